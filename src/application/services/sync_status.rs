use crate::application::ports::durable_store::{LocalDurableStore, read_record, write_record};
use crate::domain::entities::{SyncStatusRecord, SyncStatusSnapshot};
use crate::domain::value_objects::EntityKey;
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};

pub const SYNC_STATUS_KEY: &str = "offline/sync_status";

/// UI 向けの同期状態を保持・配信する。
/// 試行時刻とコンフリクト一覧は永続化し、オンライン状態や件数は呼び出し側が渡す。
pub struct SyncStatusPublisher {
    store: Arc<dyn LocalDurableStore>,
    record: RwLock<SyncStatusRecord>,
    write_lock: Mutex<()>,
    sender: watch::Sender<SyncStatusSnapshot>,
}

impl SyncStatusPublisher {
    pub async fn load(store: Arc<dyn LocalDurableStore>) -> Result<Self, AppError> {
        let record = read_record::<SyncStatusRecord>(store.as_ref(), SYNC_STATUS_KEY)
            .await?
            .unwrap_or_default();
        let (sender, _) = watch::channel(SyncStatusSnapshot {
            last_sync_attempt: record.last_sync_attempt,
            last_successful_sync: record.last_successful_sync,
            conflicts: record.conflicts.iter().cloned().collect(),
            ..SyncStatusSnapshot::default()
        });

        Ok(Self {
            store,
            record: RwLock::new(record),
            write_lock: Mutex::new(()),
            sender,
        })
    }

    pub async fn record(&self) -> SyncStatusRecord {
        self.record.read().await.clone()
    }

    /// 永続化に成功してからメモリ上の値を差し替える
    async fn persist<F>(&self, apply: F) -> Result<bool, AppError>
    where
        F: FnOnce(&mut SyncStatusRecord) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.record.read().await.clone();
        if !apply(&mut next) {
            return Ok(false);
        }
        write_record(self.store.as_ref(), SYNC_STATUS_KEY, &next).await?;
        *self.record.write().await = next;
        Ok(true)
    }

    pub async fn record_attempt(
        &self,
        attempted_at: DateTime<Utc>,
        succeeded: bool,
    ) -> Result<(), AppError> {
        self.persist(|record| {
            record.last_sync_attempt = Some(attempted_at);
            if succeeded {
                record.last_successful_sync = Some(attempted_at);
            }
            true
        })
        .await
        .map(|_| ())
    }

    pub async fn add_conflict(&self, key: &EntityKey) -> Result<bool, AppError> {
        self.persist(|record| record.conflicts.insert(key.clone()))
            .await
    }

    pub async fn remove_conflict(&self, key: &EntityKey) -> Result<bool, AppError> {
        self.persist(|record| record.conflicts.remove(key)).await
    }

    pub async fn has_conflict(&self, key: &EntityKey) -> bool {
        self.record.read().await.conflicts.contains(key)
    }

    /// 現在値からスナップショットを組み立て、購読者へ配信する
    pub async fn publish(
        &self,
        is_online: bool,
        is_syncing: bool,
        pending_action_count: usize,
    ) -> SyncStatusSnapshot {
        let record = self.record.read().await;
        let snapshot = SyncStatusSnapshot {
            is_online,
            is_syncing,
            pending_action_count,
            last_sync_attempt: record.last_sync_attempt,
            last_successful_sync: record.last_successful_sync,
            conflicts: record.conflicts.iter().cloned().collect(),
        };
        self.sender.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        snapshot
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryDurableStore;

    #[tokio::test]
    async fn test_record_survives_reload() {
        let store = Arc::new(MemoryDurableStore::new());
        let publisher = SyncStatusPublisher::load(store.clone()).await.unwrap();
        let at = Utc::now();
        publisher.record_attempt(at, true).await.unwrap();
        publisher
            .add_conflict(&EntityKey::parse("characters", "char-1").unwrap())
            .await
            .unwrap();

        let reloaded = SyncStatusPublisher::load(store).await.unwrap();
        let record = reloaded.record().await;
        assert_eq!(record.last_sync_attempt, Some(at));
        assert_eq!(record.last_successful_sync, Some(at));
        assert_eq!(record.conflicts.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_keeps_last_success() {
        let publisher = SyncStatusPublisher::load(Arc::new(MemoryDurableStore::new()))
            .await
            .unwrap();
        let first = Utc::now();
        publisher.record_attempt(first, true).await.unwrap();
        let second = first + chrono::Duration::seconds(5);
        publisher.record_attempt(second, false).await.unwrap();

        let snapshot = publisher.publish(true, false, 1).await;
        assert_eq!(snapshot.last_sync_attempt, Some(second));
        assert_eq!(snapshot.last_successful_sync, Some(first));
    }

    #[tokio::test]
    async fn test_subscribers_see_published_snapshots() {
        let publisher = SyncStatusPublisher::load(Arc::new(MemoryDurableStore::new()))
            .await
            .unwrap();
        let mut receiver = publisher.subscribe();

        publisher.publish(true, true, 3).await;

        receiver.changed().await.unwrap();
        let snapshot = receiver.borrow_and_update().clone();
        assert!(snapshot.is_online);
        assert!(snapshot.is_syncing);
        assert_eq!(snapshot.pending_action_count, 3);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_record_unchanged() {
        let store = MemoryDurableStore::new();
        let publisher = SyncStatusPublisher::load(Arc::new(store.clone()))
            .await
            .unwrap();
        store.set_fail_writes(true);

        let key = EntityKey::parse("characters", "char-1").unwrap();
        assert!(publisher.add_conflict(&key).await.is_err());
        assert!(!publisher.has_conflict(&key).await);
    }
}
