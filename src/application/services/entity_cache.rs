use crate::application::ports::durable_store::{
    LocalDurableStore, decode_record, read_record, write_record,
};
use crate::domain::entities::{CachedEntity, SyncConfirmation};
use crate::domain::value_objects::{EntityFields, EntityKey};
use crate::shared::error::AppError;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const ENTITY_PREFIX: &str = "offline/entities/";

/// ローカル適用の結果。エンキューに失敗したときは `previous` で元に戻す
#[derive(Debug, Clone)]
pub struct AppliedMutation {
    pub previous: Option<CachedEntity>,
    pub entity: CachedEntity,
}

pub struct EntityCache {
    store: Arc<dyn LocalDurableStore>,
    lock: Mutex<()>,
}

fn storage_key(key: &EntityKey) -> String {
    format!("{ENTITY_PREFIX}{}", key.storage_suffix())
}

impl EntityCache {
    pub fn new(store: Arc<dyn LocalDurableStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// キャッシュのみを参照する。リモートへは問い合わせない
    pub async fn read(&self, key: &EntityKey) -> Result<Option<CachedEntity>, AppError> {
        read_record(self.store.as_ref(), &storage_key(key)).await
    }

    async fn save(&self, entity: &CachedEntity) -> Result<(), AppError> {
        write_record(self.store.as_ref(), &storage_key(&entity.key), entity).await
    }

    async fn update<F>(&self, key: &EntityKey, apply: F) -> Result<Option<CachedEntity>, AppError>
    where
        F: FnOnce(&mut CachedEntity) + Send,
    {
        let _guard = self.lock.lock().await;
        let Some(mut entity) = self.read(key).await? else {
            return Ok(None);
        };
        apply(&mut entity);
        self.save(&entity).await?;
        Ok(Some(entity))
    }

    pub async fn apply_local(
        &self,
        key: &EntityKey,
        mutation: &EntityFields,
    ) -> Result<AppliedMutation, AppError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let previous = self.read(key).await?;
        let mut entity = previous
            .clone()
            .unwrap_or_else(|| CachedEntity::seed(key.clone(), now));
        entity.apply_local(mutation, now);
        self.save(&entity).await?;

        debug!(
            target: "offline::cache",
            entity = %key,
            fields = mutation.len(),
            "applied local mutation"
        );
        Ok(AppliedMutation { previous, entity })
    }

    /// 確定したリモート書き込みを取り込み、両側で食い違ったフィールドを返す
    pub async fn mark_synced(
        &self,
        key: &EntityKey,
        confirmation: &SyncConfirmation,
    ) -> Result<Vec<String>, AppError> {
        let _guard = self.lock.lock().await;
        let mut entity = self
            .read(key)
            .await?
            .unwrap_or_else(|| CachedEntity::seed(key.clone(), confirmation.synced_at));
        let conflicting = entity.reconcile(confirmation);
        self.save(&entity).await?;

        if !conflicting.is_empty() {
            warn!(
                target: "offline::cache",
                entity = %key,
                fields = ?conflicting,
                "remote and local changed the same fields"
            );
        }
        Ok(conflicting)
    }

    pub async fn rebase(
        &self,
        key: &EntityKey,
        remote_snapshot: &EntityFields,
        remote_version: u64,
    ) -> Result<Option<CachedEntity>, AppError> {
        self.update(key, |entity| entity.rebase(remote_snapshot, remote_version))
            .await
    }

    pub async fn mark_error(
        &self,
        key: &EntityKey,
        message: &str,
    ) -> Result<Option<CachedEntity>, AppError> {
        self.update(key, |entity| entity.mark_error(message)).await
    }

    pub async fn mark_pending(&self, key: &EntityKey) -> Result<Option<CachedEntity>, AppError> {
        self.update(key, |entity| entity.mark_pending()).await
    }

    /// 楽観的適用を取り消す。`previous` が無ければエントリごと消す
    pub async fn restore(
        &self,
        key: &EntityKey,
        previous: Option<CachedEntity>,
    ) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        match previous {
            Some(entity) => self.save(&entity).await,
            None => self.store.delete(&storage_key(key)).await,
        }
    }

    /// 破棄後に残ったアクションのペイロードだけで状態を組み直す。
    /// 残りが無く一度も同期していなければ、ローカル値を残したまま `error` にする。
    pub async fn rollback(
        &self,
        key: &EntityKey,
        remaining: &[EntityFields],
    ) -> Result<Option<CachedEntity>, AppError> {
        self.update(key, |entity| {
            if !remaining.is_empty() {
                entity.replay_pending(remaining.iter(), Utc::now());
            } else if !entity.rollback() {
                entity.mark_error("local changes were discarded before the first sync");
            }
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<CachedEntity>, AppError> {
        let entries = self.store.scan_prefix(ENTITY_PREFIX).await?;
        entries
            .iter()
            .map(|(key, bytes)| decode_record(key, bytes))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::SyncStatus;
    use crate::infrastructure::storage::MemoryDurableStore;
    use serde_json::{Value, json};
    use std::collections::BTreeSet;

    fn key(id: &str) -> EntityKey {
        EntityKey::parse("characters", id).unwrap()
    }

    fn fields(value: Value) -> EntityFields {
        EntityFields::new(value).unwrap()
    }

    fn confirmation(remote: Value, version: u64, written: &[&str]) -> SyncConfirmation {
        SyncConfirmation {
            remote_snapshot: fields(remote),
            remote_version: version,
            synced_at: Utc::now(),
            written_fields: written.iter().map(|s| s.to_string()).collect(),
            outstanding_fields: BTreeSet::new(),
            has_outstanding_actions: false,
        }
    }

    #[tokio::test]
    async fn test_apply_local_seeds_missing_entity() {
        let cache = EntityCache::new(Arc::new(MemoryDurableStore::new()));

        let applied = cache
            .apply_local(&key("char-1"), &fields(json!({"hp": 40})))
            .await
            .unwrap();

        assert!(applied.previous.is_none());
        assert_eq!(applied.entity.sync_status, SyncStatus::Pending);
        let stored = cache.read(&key("char-1")).await.unwrap().unwrap();
        assert_eq!(stored.data, fields(json!({"hp": 40})));
    }

    #[tokio::test]
    async fn test_restore_removes_seeded_entity() {
        let cache = EntityCache::new(Arc::new(MemoryDurableStore::new()));
        let applied = cache
            .apply_local(&key("char-1"), &fields(json!({"hp": 40})))
            .await
            .unwrap();

        cache.restore(&key("char-1"), applied.previous).await.unwrap();

        assert!(cache.read(&key("char-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_then_rollback() {
        let cache = EntityCache::new(Arc::new(MemoryDurableStore::new()));
        cache
            .apply_local(&key("char-1"), &fields(json!({"hp": 40})))
            .await
            .unwrap();
        cache
            .mark_synced(
                &key("char-1"),
                &confirmation(json!({"hp": 40, "mana": 0}), 2, &["hp"]),
            )
            .await
            .unwrap();

        let synced = cache.read(&key("char-1")).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(synced.data, fields(json!({"hp": 40, "mana": 0})));

        cache
            .apply_local(&key("char-1"), &fields(json!({"hp": 1})))
            .await
            .unwrap();
        let rolled = cache.rollback(&key("char-1"), &[]).await.unwrap().unwrap();
        assert_eq!(rolled.data, fields(json!({"hp": 40, "mana": 0})));
        assert_eq!(rolled.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_rollback_of_unsynced_entity_marks_error() {
        let cache = EntityCache::new(Arc::new(MemoryDurableStore::new()));
        cache
            .apply_local(&key("char-1"), &fields(json!({"hp": 40})))
            .await
            .unwrap();

        let entity = cache.rollback(&key("char-1"), &[]).await.unwrap().unwrap();

        assert_eq!(entity.sync_status, SyncStatus::Error);
        assert_eq!(entity.data, fields(json!({"hp": 40})));
    }

    #[tokio::test]
    async fn test_list_returns_all_entities() {
        let cache = EntityCache::new(Arc::new(MemoryDurableStore::new()));
        for id in ["b", "a"] {
            cache
                .apply_local(&key(id), &fields(json!({"hp": 1})))
                .await
                .unwrap();
        }

        let listed: Vec<String> = cache
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|entity| entity.key.to_string())
            .collect();
        assert_eq!(listed, vec!["characters/a", "characters/b"]);
    }
}
