pub mod action_id;
pub mod action_kind;
pub mod entity_key;
pub mod originator_id;
pub mod payload;
pub mod queue_status;
pub mod sync_status;

pub use action_id::QueuedActionId;
pub use action_kind::ActionKind;
pub use entity_key::{EntityId, EntityKey, EntityType};
pub use originator_id::OriginatorId;
pub use payload::EntityFields;
pub use queue_status::{ActionFailure, FailureKind, QueueStatus};
pub use sync_status::SyncStatus;
