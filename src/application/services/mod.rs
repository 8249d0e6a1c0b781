pub mod action_queue;
pub mod entity_cache;
pub mod offline_service;
pub mod sync_coordinator;
pub mod sync_status;

pub use action_queue::ActionQueue;
pub use entity_cache::{AppliedMutation, EntityCache};
pub use offline_service::{ConflictResolution, OfflineSyncService, OfflineSyncServiceTrait};
pub use sync_coordinator::SyncCoordinator;
pub use sync_status::SyncStatusPublisher;
