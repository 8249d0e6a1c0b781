pub mod offline;

pub use offline::{
    CachedEntity, DrainReport, DrainTrigger, FailedDispatch, QueuedAction, QueuedActionDraft,
    SyncConfirmation, SyncStatusRecord, SyncStatusSnapshot,
};
