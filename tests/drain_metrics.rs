//! ドレインメトリクスはプロセス共有のカウンタなので、他のテストと別バイナリで検証する

use async_trait::async_trait;
use futures::future::join_all;
use mythrill_sync::application::ports::{
    MergeWrite, RemoteDocument, RemoteDocumentStore, RemoteStoreError,
};
use mythrill_sync::application::services::{OfflineSyncService, OfflineSyncServiceTrait};
use mythrill_sync::domain::value_objects::{
    EntityFields, EntityId, EntityKey, EntityType, OriginatorId,
};
use mythrill_sync::infrastructure::network::ConnectivityMonitor;
use mythrill_sync::infrastructure::offline::metrics;
use mythrill_sync::infrastructure::remote::InMemoryDocumentStore;
use mythrill_sync::infrastructure::storage::MemoryDurableStore;
use mythrill_sync::shared::config::SyncConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// 書き込みごとに少し待つリモート。ドレイン中に次の要求を割り込ませるために使う
struct SlowRemote {
    inner: InMemoryDocumentStore,
    delay: Duration,
}

#[async_trait]
impl RemoteDocumentStore for SlowRemote {
    async fn get(
        &self,
        collection: &EntityType,
        id: &EntityId,
    ) -> Result<Option<RemoteDocument>, RemoteStoreError> {
        self.inner.get(collection, id).await
    }

    async fn merge_write(&self, write: MergeWrite) -> Result<RemoteDocument, RemoteStoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.merge_write(write).await
    }
}

fn user() -> OriginatorId {
    OriginatorId::new("user-a".to_string()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_metrics_count_each_drain_once_under_overlapping_triggers() {
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let remote = InMemoryDocumentStore::new();
    let service = OfflineSyncService::bootstrap(
        Arc::new(MemoryDurableStore::new()),
        Arc::new(SlowRemote {
            inner: remote.clone(),
            delay: Duration::from_millis(5),
        }),
        monitor,
        SyncConfig {
            auto_sync: false,
            drain_on_enqueue: false,
            coalesce_updates: false,
            ..SyncConfig::default()
        },
    )
    .await
    .unwrap();

    let before = metrics::snapshot();

    let rounds = join_all((0..16u64).map(|round| {
        let service = &service;
        async move {
            tokio::time::sleep(Duration::from_millis(round * 3)).await;
            let key = EntityKey::parse("characters", &format!("char-{}", round % 4)).unwrap();
            service
                .mutate_entity(
                    key,
                    EntityFields::new(json!({"hp": round})).unwrap(),
                    user(),
                )
                .await
                .unwrap();
            service.force_sync(user()).await.unwrap()
        }
    }))
    .await;

    let mut reports: Vec<_> = rounds.into_iter().flatten().collect();
    for _ in 0..5 {
        if service.list_pending_actions(None).await.unwrap().is_empty() {
            break;
        }
        reports.extend(service.force_sync(user()).await.unwrap());
    }

    let after = metrics::snapshot();
    let completed: usize = reports.iter().map(|report| report.completed.len()).sum();

    assert!(service.list_pending_actions(None).await.unwrap().is_empty());
    assert_eq!(completed, 16);
    assert_eq!(remote.write_count().await, 16);
    assert_eq!(after.total_drains - before.total_drains, reports.len() as u64);
    assert_eq!(
        after.completed_actions - before.completed_actions,
        completed as u64
    );
}
