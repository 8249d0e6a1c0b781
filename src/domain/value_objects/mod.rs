pub mod offline;

pub use offline::{
    ActionFailure, ActionKind, EntityFields, EntityId, EntityKey, EntityType, FailureKind,
    OriginatorId, QueueStatus, QueuedActionId, SyncStatus,
};
