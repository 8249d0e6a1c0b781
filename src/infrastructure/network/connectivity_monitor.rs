use crate::application::ports::{ConnectivityEvent, ConnectivityProbe, ConnectivitySource};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct MonitorState {
    online: bool,
    subscribers: Vec<mpsc::UnboundedSender<ConnectivityEvent>>,
}

/// 接続状態を保持し、遷移ごとに 1 回だけ購読者へ通知する
pub struct ConnectivityMonitor {
    state: Mutex<MonitorState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                online: initially_online,
                subscribers: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// ホストアプリからの接続状態の入力。状態が変わったときだけ `true`
    pub fn set_online(&self, online: bool) -> bool {
        let mut state = self.state();
        if state.online == online {
            return false;
        }
        state.online = online;

        let event = ConnectivityEvent::from_online(online);
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event).is_ok());

        info!(
            target: "offline::connectivity",
            online,
            subscribers = state.subscribers.len(),
            "connectivity changed"
        );
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// `probe` を一定間隔で呼び、結果を `set_online` に流す
    pub fn spawn_probe(
        self: &Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe.probe().await;
                debug!(target: "offline::connectivity", online, "probe finished");
                monitor.set_online(online);
            }
        })
    }
}

impl ConnectivitySource for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        self.state().online
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state();
        // 受信側はまだ手元にあるので送信は失敗しない
        let _ = sender.send(ConnectivityEvent::from_online(state.online));
        state.subscribers.push(sender);
        receiver
    }
}
