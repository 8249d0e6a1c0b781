use crate::application::ports::{ConnectivitySource, LocalDurableStore, RemoteDocumentStore};
use crate::application::services::action_queue::ActionQueue;
use crate::application::services::entity_cache::EntityCache;
use crate::application::services::sync_coordinator::SyncCoordinator;
use crate::application::services::sync_status::SyncStatusPublisher;
use crate::domain::entities::{
    CachedEntity, DrainReport, DrainTrigger, QueuedAction, QueuedActionDraft, SyncStatusSnapshot,
};
use crate::domain::value_objects::{
    ActionKind, EntityFields, EntityKey, FailureKind, OriginatorId, QueuedActionId,
};
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// コンフリクトしたエンティティをどちら側に寄せるか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// ローカルの変更をバージョン検査なしで書き込み直す
    KeepLocal,
    /// ローカルの変更を破棄してリモートの状態に戻す
    AcceptRemote,
}

#[async_trait]
pub trait OfflineSyncServiceTrait: Send + Sync {
    fn is_online(&self) -> bool;
    async fn get_entity(&self, key: &EntityKey) -> Result<Option<CachedEntity>, AppError>;
    async fn mutate_entity(
        &self,
        key: EntityKey,
        fields: EntityFields,
        originator: OriginatorId,
    ) -> Result<CachedEntity, AppError>;
    async fn create_entity(
        &self,
        key: EntityKey,
        fields: EntityFields,
        originator: OriginatorId,
    ) -> Result<CachedEntity, AppError>;
    async fn get_sync_status(&self) -> Result<SyncStatusSnapshot, AppError>;
    async fn force_sync(&self, originator: OriginatorId) -> Result<Option<DrainReport>, AppError>;
    async fn list_pending_actions(
        &self,
        originator: Option<OriginatorId>,
    ) -> Result<Vec<QueuedAction>, AppError>;
    async fn discard_action(&self, id: &QueuedActionId) -> Result<QueuedAction, AppError>;
    async fn retry_entity(&self, key: &EntityKey) -> Result<usize, AppError>;
    async fn resolve_conflict(
        &self,
        key: &EntityKey,
        resolution: ConflictResolution,
    ) -> Result<(), AppError>;
    fn subscribe_status(&self) -> watch::Receiver<SyncStatusSnapshot>;
}

pub struct OfflineSyncService {
    queue: Arc<ActionQueue>,
    cache: Arc<EntityCache>,
    status: Arc<SyncStatusPublisher>,
    coordinator: Arc<SyncCoordinator>,
    config: SyncConfig,
}

impl OfflineSyncService {
    pub fn new(
        queue: Arc<ActionQueue>,
        cache: Arc<EntityCache>,
        status: Arc<SyncStatusPublisher>,
        coordinator: Arc<SyncCoordinator>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            status,
            coordinator,
            config,
        }
    }

    /// ストアから各コンポーネントを組み立て、前回送信途中だったアクションを戻す
    pub async fn bootstrap(
        store: Arc<dyn LocalDurableStore>,
        remote: Arc<dyn RemoteDocumentStore>,
        connectivity: Arc<dyn ConnectivitySource>,
        config: SyncConfig,
    ) -> Result<Self, AppError> {
        let queue = Arc::new(ActionQueue::new(store.clone(), config.coalesce_updates));
        let cache = Arc::new(EntityCache::new(store.clone()));
        let status = Arc::new(SyncStatusPublisher::load(store).await?);
        queue.recover_in_flight().await?;

        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            cache.clone(),
            status.clone(),
            remote,
            connectivity,
        ));
        coordinator.publish_status().await;

        Ok(Self::new(queue, cache, status, coordinator, config))
    }

    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn list_entities(&self) -> Result<Vec<CachedEntity>, AppError> {
        self.cache.list().await
    }

    async fn intake(
        &self,
        key: EntityKey,
        kind: ActionKind,
        originator: OriginatorId,
    ) -> Result<CachedEntity, AppError> {
        if kind.fields().is_empty() {
            return Err(AppError::ValidationError(
                "Mutation must touch at least one field".to_string(),
            ));
        }

        let entity = {
            let _intake = self.coordinator.lock_intake().await;

            if matches!(kind, ActionKind::CreateResource { .. })
                && self.cache.read(&key).await?.is_some()
            {
                return Err(AppError::ValidationError(format!(
                    "Entity {key} already exists"
                )));
            }

            let applied = self.cache.apply_local(&key, kind.fields()).await?;
            let draft = QueuedActionDraft::new(key.clone(), kind, originator);
            if let Err(err) = self.queue.enqueue(draft).await {
                if let Err(restore_err) = self.cache.restore(&key, applied.previous).await {
                    error!(
                        target: "offline::service",
                        entity = %key,
                        error = %restore_err,
                        "failed to undo optimistic apply"
                    );
                }
                return Err(match err {
                    AppError::LocalStorage(_) => err,
                    other => AppError::LocalStorage(other.to_string()),
                });
            }
            applied.entity
        };

        self.coordinator.publish_status().await;
        self.kick(DrainTrigger::Enqueued);
        Ok(entity)
    }

    fn kick(&self, trigger: DrainTrigger) {
        if self.config.drain_on_enqueue && self.coordinator.is_online() {
            self.coordinator.trigger(trigger);
        }
    }

    async fn clear_conflict(&self, key: &EntityKey) -> Result<(), AppError> {
        let still_conflicted = self.queue.pending_for(key).await?.iter().any(|action| {
            action
                .last_error
                .as_ref()
                .map(|failure| failure.kind == FailureKind::Conflict)
                .unwrap_or(false)
        });
        if !still_conflicted {
            self.status.remove_conflict(key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OfflineSyncServiceTrait for OfflineSyncService {
    fn is_online(&self) -> bool {
        self.coordinator.is_online()
    }

    async fn get_entity(&self, key: &EntityKey) -> Result<Option<CachedEntity>, AppError> {
        self.cache.read(key).await
    }

    async fn mutate_entity(
        &self,
        key: EntityKey,
        fields: EntityFields,
        originator: OriginatorId,
    ) -> Result<CachedEntity, AppError> {
        self.intake(key, ActionKind::UpdateEntity { fields }, originator)
            .await
    }

    async fn create_entity(
        &self,
        key: EntityKey,
        fields: EntityFields,
        originator: OriginatorId,
    ) -> Result<CachedEntity, AppError> {
        self.intake(key, ActionKind::CreateResource { fields }, originator)
            .await
    }

    async fn get_sync_status(&self) -> Result<SyncStatusSnapshot, AppError> {
        self.coordinator.status_snapshot().await
    }

    async fn force_sync(&self, originator: OriginatorId) -> Result<Option<DrainReport>, AppError> {
        info!(target: "offline::service", %originator, "manual sync requested");
        self.coordinator
            .drain(DrainTrigger::Manual { originator })
            .await
    }

    async fn list_pending_actions(
        &self,
        originator: Option<OriginatorId>,
    ) -> Result<Vec<QueuedAction>, AppError> {
        match originator {
            Some(originator) => self.queue.list_pending_for(&originator).await,
            None => self.queue.list_pending().await,
        }
    }

    async fn discard_action(&self, id: &QueuedActionId) -> Result<QueuedAction, AppError> {
        let removed = {
            let _intake = self.coordinator.lock_intake().await;
            let removed = self
                .queue
                .discard(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Queued action {id}")))?;

            let remaining: Vec<EntityFields> = self
                .queue
                .pending_for(&removed.entity)
                .await?
                .into_iter()
                .map(|action| action.kind.fields().clone())
                .collect();
            self.cache.rollback(&removed.entity, &remaining).await?;
            self.clear_conflict(&removed.entity).await?;
            removed
        };

        self.coordinator.publish_status().await;
        Ok(removed)
    }

    async fn retry_entity(&self, key: &EntityKey) -> Result<usize, AppError> {
        let reset = {
            let _intake = self.coordinator.lock_intake().await;
            let reset = self.queue.reset_for_retry(key, false).await?;
            if reset > 0 {
                self.cache.mark_pending(key).await?;
                self.clear_conflict(key).await?;
            }
            reset
        };

        if reset > 0 {
            info!(target: "offline::service", entity = %key, reset, "entity queued for retry");
            self.coordinator.publish_status().await;
            self.kick(DrainTrigger::Enqueued);
        }
        Ok(reset)
    }

    async fn resolve_conflict(
        &self,
        key: &EntityKey,
        resolution: ConflictResolution,
    ) -> Result<(), AppError> {
        if !self.status.has_conflict(key).await {
            return Err(AppError::NotFound(format!("No conflict recorded for {key}")));
        }

        {
            let _intake = self.coordinator.lock_intake().await;
            match resolution {
                ConflictResolution::KeepLocal => {
                    self.queue.reset_for_retry(key, true).await?;
                    self.cache.mark_pending(key).await?;
                }
                ConflictResolution::AcceptRemote => {
                    for action in self.queue.pending_for(key).await? {
                        self.queue.discard(&action.id).await?;
                    }
                    self.cache.rollback(key, &[]).await?;
                }
            }
            self.status.remove_conflict(key).await?;
        }

        info!(
            target: "offline::service",
            entity = %key,
            resolution = ?resolution,
            "conflict resolved"
        );
        self.coordinator.publish_status().await;
        if resolution == ConflictResolution::KeepLocal {
            self.kick(DrainTrigger::Enqueued);
        }
        Ok(())
    }

    fn subscribe_status(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::SyncStatus;
    use crate::infrastructure::network::ConnectivityMonitor;
    use crate::infrastructure::remote::InMemoryDocumentStore;
    use crate::infrastructure::storage::MemoryDurableStore;
    use serde_json::{Value, json};

    fn key(id: &str) -> EntityKey {
        EntityKey::parse("characters", id).unwrap()
    }

    fn fields(value: Value) -> EntityFields {
        EntityFields::new(value).unwrap()
    }

    fn user() -> OriginatorId {
        OriginatorId::new("user-a".to_string()).unwrap()
    }

    async fn offline_service(store: MemoryDurableStore) -> OfflineSyncService {
        let config = SyncConfig {
            drain_on_enqueue: false,
            ..SyncConfig::default()
        };
        OfflineSyncService::bootstrap(
            Arc::new(store),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(ConnectivityMonitor::new(false)),
            config,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_mutate_entity_applies_locally_while_offline() {
        let service = offline_service(MemoryDurableStore::new()).await;

        let entity = service
            .mutate_entity(key("char-1"), fields(json!({"hp": 40})), user())
            .await
            .unwrap();

        assert_eq!(entity.sync_status, SyncStatus::Pending);
        assert!(!service.is_online());
        let status = service.get_sync_status().await.unwrap();
        assert_eq!(status.pending_action_count, 1);
        assert!(!status.is_online);
    }

    #[tokio::test]
    async fn test_mutate_entity_rolls_back_when_queue_write_fails() {
        let store = MemoryDurableStore::new();
        let service = offline_service(store.clone()).await;
        service
            .mutate_entity(key("char-1"), fields(json!({"hp": 40})), user())
            .await
            .unwrap();

        store.fail_writes_matching(Some("offline/queue"));
        let err = service
            .mutate_entity(key("char-1"), fields(json!({"hp": 1})), user())
            .await
            .unwrap_err();
        assert!(err.is_local_storage());

        store.fail_writes_matching(None);
        assert_eq!(service.list_pending_actions(None).await.unwrap().len(), 1);
        let entity = service.get_entity(&key("char-1")).await.unwrap().unwrap();
        assert_eq!(entity.data.get("hp"), Some(&json!(40)));
    }

    #[tokio::test]
    async fn test_first_mutation_is_removed_when_queue_write_fails() {
        let store = MemoryDurableStore::new();
        let service = offline_service(store.clone()).await;
        store.fail_writes_matching(Some("offline/queue"));

        let err = service
            .mutate_entity(key("char-9"), fields(json!({"hp": 1})), user())
            .await
            .unwrap_err();

        assert!(err.is_local_storage());
        assert!(service.get_entity(&key("char-9")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_mutation_is_rejected() {
        let service = offline_service(MemoryDurableStore::new()).await;
        let err = service
            .mutate_entity(key("char-1"), EntityFields::default(), user())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_create_entity_rejects_existing() {
        let service = offline_service(MemoryDurableStore::new()).await;
        service
            .create_entity(key("spell-1"), fields(json!({"name": "Bolt"})), user())
            .await
            .unwrap();

        let err = service
            .create_entity(key("spell-1"), fields(json!({"name": "Bolt"})), user())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_discard_action_marks_unsynced_entity_error() {
        let service = offline_service(MemoryDurableStore::new()).await;
        service
            .mutate_entity(key("char-1"), fields(json!({"hp": 40})), user())
            .await
            .unwrap();
        let pending = service.list_pending_actions(Some(user())).await.unwrap();

        service.discard_action(&pending[0].id).await.unwrap();

        assert!(service.list_pending_actions(None).await.unwrap().is_empty());
        let entity = service.get_entity(&key("char-1")).await.unwrap().unwrap();
        assert_eq!(entity.sync_status, SyncStatus::Error);
        assert!(matches!(
            service.discard_action(&pending[0].id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_force_sync_offline_is_noop() {
        let service = offline_service(MemoryDurableStore::new()).await;
        service
            .mutate_entity(key("char-1"), fields(json!({"hp": 40})), user())
            .await
            .unwrap();

        assert!(service.force_sync(user()).await.unwrap().is_none());
        assert_eq!(service.list_pending_actions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_conflict_requires_recorded_conflict() {
        let service = offline_service(MemoryDurableStore::new()).await;
        let err = service
            .resolve_conflict(&key("char-1"), ConflictResolution::KeepLocal)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
