use crate::application::ports::{ConnectivityEvent, ConnectivitySource};
use crate::application::services::SyncCoordinator;
use crate::domain::entities::DrainTrigger;
use crate::shared::config::SyncConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 接続の回復と定期実行をきっかけにドレインを起動するジョブ
pub struct SyncTriggerJob {
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn ConnectivitySource>,
    config: SyncConfig,
}

/// 起動したタスクの後始末用。`shutdown` を呼ぶか drop するとタスクが止まる
pub struct SyncTriggerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SyncTriggerHandle {
    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!(target: "offline::trigger", "sync triggers stopped");
    }
}

impl Drop for SyncTriggerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl SyncTriggerJob {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        connectivity: Arc<dyn ConnectivitySource>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            connectivity,
            config,
        })
    }

    pub fn start(self: &Arc<Self>) -> SyncTriggerHandle {
        let mut tasks = vec![self.spawn_connectivity_listener()];
        if self.config.auto_sync {
            tasks.push(self.spawn_schedule(Duration::from_secs(self.config.sync_interval.max(1))));
        }
        SyncTriggerHandle { tasks }
    }

    fn spawn_connectivity_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        let mut events = self.connectivity.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                job.coordinator.publish_status().await;
                match event {
                    ConnectivityEvent::BecameOnline => {
                        info!(target: "offline::trigger", "connectivity restored; draining queue");
                        job.run_guarded(DrainTrigger::Reconnected).await;
                    }
                    ConnectivityEvent::BecameOffline => {
                        debug!(target: "offline::trigger", "connectivity lost");
                    }
                }
            }
        })
    }

    fn spawn_schedule(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 初回の即時 tick は読み捨てる
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if job.connectivity.is_online() {
                    job.run_guarded(DrainTrigger::Scheduled).await;
                }
            }
        })
    }

    async fn run_guarded(&self, trigger: DrainTrigger) {
        match self.coordinator.drain(trigger).await {
            Ok(Some(report)) => debug!(
                target: "offline::trigger",
                completed = report.completed.len(),
                failed = report.failed.len(),
                "triggered drain finished"
            ),
            Ok(None) => {}
            Err(err) => error!(target: "offline::trigger", error = %err, "triggered drain failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::LocalDurableStore;
    use crate::application::services::{ActionQueue, EntityCache, SyncStatusPublisher};
    use crate::domain::entities::QueuedActionDraft;
    use crate::domain::value_objects::{ActionKind, EntityFields, EntityKey, OriginatorId};
    use crate::infrastructure::network::ConnectivityMonitor;
    use crate::infrastructure::remote::InMemoryDocumentStore;
    use crate::infrastructure::storage::MemoryDurableStore;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    /// 常にオンラインだが接続イベントを一度も送らない
    struct SilentOnline;

    impl ConnectivitySource for SilentOnline {
        fn is_online(&self) -> bool {
            true
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent> {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        }
    }

    async fn coordinator_with_one_action(
        remote: &InMemoryDocumentStore,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> (Arc<SyncCoordinator>, Arc<ActionQueue>) {
        let store: Arc<dyn LocalDurableStore> = Arc::new(MemoryDurableStore::new());
        let queue = Arc::new(ActionQueue::new(store.clone(), true));
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            Arc::new(EntityCache::new(store.clone())),
            Arc::new(SyncStatusPublisher::load(store).await.unwrap()),
            Arc::new(remote.clone()),
            connectivity,
        ));
        queue
            .enqueue(QueuedActionDraft::new(
                EntityKey::parse("characters", "char-1").unwrap(),
                ActionKind::UpdateEntity {
                    fields: EntityFields::new(json!({"hp": 40})).unwrap(),
                },
                OriginatorId::new("user-a".into()).unwrap(),
            ))
            .await
            .unwrap();
        (coordinator, queue)
    }

    fn manual_config() -> SyncConfig {
        SyncConfig {
            auto_sync: false,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reconnect_triggers_drain() {
        let remote = InMemoryDocumentStore::new();
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let (coordinator, queue) = coordinator_with_one_action(&remote, monitor.clone()).await;

        let _handle = SyncTriggerJob::new(coordinator, monitor.clone(), manual_config()).start();

        monitor.set_online(true);

        timeout(Duration::from_secs(5), async {
            while queue.pending_count().await.unwrap() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue drained after reconnect");
        assert_eq!(remote.write_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_drains_while_online() {
        let remote = InMemoryDocumentStore::new();
        let (coordinator, queue) =
            coordinator_with_one_action(&remote, Arc::new(SilentOnline)).await;
        let config = SyncConfig {
            auto_sync: true,
            sync_interval: 30,
            drain_on_enqueue: false,
            ..SyncConfig::default()
        };

        let _handle = SyncTriggerJob::new(coordinator, Arc::new(SilentOnline), config).start();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(remote.write_count().await, 0);

        tokio::time::advance(Duration::from_secs(25)).await;
        timeout(Duration::from_secs(5), async {
            while queue.pending_count().await.unwrap() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue drained on schedule");
        assert_eq!(remote.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_triggers() {
        let remote = InMemoryDocumentStore::new();
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let (coordinator, queue) = coordinator_with_one_action(&remote, monitor.clone()).await;

        let handle = SyncTriggerJob::new(coordinator, monitor.clone(), manual_config()).start();
        handle.shutdown();
        tokio::task::yield_now().await;

        monitor.set_online(true);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(remote.write_count().await, 0);
    }
}
