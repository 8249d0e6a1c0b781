pub mod cached_entity;
pub mod drain_report;
pub mod queued_action;
pub mod sync_snapshot;

pub use cached_entity::{CachedEntity, SyncConfirmation};
pub use drain_report::{DrainReport, DrainTrigger, FailedDispatch};
pub use queued_action::{QueuedAction, QueuedActionDraft};
pub use sync_snapshot::{SyncStatusRecord, SyncStatusSnapshot};
