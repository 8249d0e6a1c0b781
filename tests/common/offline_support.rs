use std::sync::Arc;
use std::time::Duration;

use mythrill_sync::application::services::{OfflineSyncService, OfflineSyncServiceTrait};
use mythrill_sync::domain::value_objects::{EntityFields, EntityKey, OriginatorId};
use mythrill_sync::infrastructure::network::ConnectivityMonitor;
use mythrill_sync::infrastructure::remote::InMemoryDocumentStore;
use mythrill_sync::infrastructure::storage::MemoryDurableStore;
use mythrill_sync::shared::config::SyncConfig;
use serde_json::Value;

pub struct OfflineTestContext {
    pub service: OfflineSyncService,
    pub store: MemoryDurableStore,
    pub remote: InMemoryDocumentStore,
    pub monitor: Arc<ConnectivityMonitor>,
}

/// 自動ドレインを切った設定。テストからは `force_sync` で明示的に流す
pub fn manual_sync_config() -> SyncConfig {
    SyncConfig {
        auto_sync: false,
        drain_on_enqueue: false,
        ..SyncConfig::default()
    }
}

pub async fn setup_offline_context() -> OfflineTestContext {
    setup_with(MemoryDurableStore::new(), InMemoryDocumentStore::new(), manual_sync_config()).await
}

pub async fn setup_with(
    store: MemoryDurableStore,
    remote: InMemoryDocumentStore,
    config: SyncConfig,
) -> OfflineTestContext {
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let service = OfflineSyncService::bootstrap(
        Arc::new(store.clone()),
        Arc::new(remote.clone()),
        monitor.clone(),
        config,
    )
    .await
    .expect("bootstrap offline service");

    OfflineTestContext {
        service,
        store,
        remote,
        monitor,
    }
}

pub fn key(id: &str) -> EntityKey {
    EntityKey::parse("characters", id).expect("entity key")
}

pub fn fields(value: Value) -> EntityFields {
    EntityFields::new(value).expect("object payload")
}

pub fn originator(name: &str) -> OriginatorId {
    OriginatorId::new(name.to_string()).expect("originator")
}

/// キューが空になるまで待つ
#[allow(dead_code)]
pub async fn wait_until_drained(service: &OfflineSyncService) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = service.get_sync_status().await.expect("status");
            if status.pending_action_count == 0 && !status.is_syncing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue drained in time");
}

/// ドレインを最大 `max_rounds` 回繰り返し、キューが空になったかを返す
#[allow(dead_code)]
pub async fn drain_until_empty(context: &OfflineTestContext, max_rounds: usize) -> bool {
    for _ in 0..max_rounds {
        context
            .service
            .force_sync(originator("tester"))
            .await
            .expect("drain");
        let pending = context
            .service
            .list_pending_actions(None)
            .await
            .expect("pending");
        if pending.is_empty() {
            return true;
        }
    }
    false
}
