use crate::domain::value_objects::{EntityKey, FailureKind, OriginatorId, QueuedActionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum DrainTrigger {
    Reconnected,
    Enqueued,
    Scheduled,
    Manual { originator: OriginatorId },
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainTrigger::Reconnected => write!(f, "reconnected"),
            DrainTrigger::Enqueued => write!(f, "enqueued"),
            DrainTrigger::Scheduled => write!(f, "scheduled"),
            DrainTrigger::Manual { originator } => write!(f, "manual:{originator}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDispatch {
    pub action_id: QueuedActionId,
    pub entity: EntityKey,
    pub kind: FailureKind,
    pub message: String,
}

/// 1 回のドレイン（複数パスを含む）の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub trigger: DrainTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passes: u32,
    pub completed: Vec<QueuedActionId>,
    pub failed: Vec<FailedDispatch>,
    pub skipped: usize,
    pub new_conflicts: Vec<EntityKey>,
    pub interrupted: bool,
}

impl DrainReport {
    pub fn new(trigger: DrainTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: started_at,
            passes: 0,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: 0,
            new_conflicts: Vec::new(),
            interrupted: false,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0 && !self.interrupted
    }
}
