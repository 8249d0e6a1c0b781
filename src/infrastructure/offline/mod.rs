pub mod metrics;
pub mod sync_trigger_job;

pub use sync_trigger_job::{SyncTriggerHandle, SyncTriggerJob};
