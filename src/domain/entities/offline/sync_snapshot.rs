use crate::domain::value_objects::EntityKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// UI に渡す読み取り専用の同期状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_action_count: usize,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub conflicts: Vec<EntityKey>,
}

impl Default for SyncStatusSnapshot {
    fn default() -> Self {
        Self {
            is_online: false,
            is_syncing: false,
            pending_action_count: 0,
            last_sync_attempt: None,
            last_successful_sync: None,
            conflicts: Vec::new(),
        }
    }
}

/// ローカルストアに永続化する部分
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conflicts: BTreeSet<EntityKey>,
}
