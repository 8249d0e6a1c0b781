use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// キューに積まれたアクションの識別子。
/// `<enqueue時刻ミリ秒(13桁)>-<ランダム8桁hex>` の形式で、辞書順が投入順と一致する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueuedActionId(String);

impl QueuedActionId {
    pub fn generate(enqueued_at: DateTime<Utc>) -> Self {
        let millis = enqueued_at.timestamp_millis().max(0);
        let suffix: u32 = rand::random();
        Self(format!("{millis:013}-{suffix:08x}"))
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Queued action ID cannot be empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for QueuedActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<QueuedActionId> for String {
    fn from(id: QueuedActionId) -> Self {
        id.0
    }
}

impl FromStr for QueuedActionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
