use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

impl ConnectivityEvent {
    pub fn from_online(online: bool) -> Self {
        if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityEvent::BecameOnline)
    }
}

/// 接続可否を能動的に確認する手段（ヘルスチェックなど）
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// 現在の接続状態と、その遷移通知の購読口
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;
    /// 購読直後に現在の状態を 1 件受け取り、以降は遷移ごとに 1 件ずつ受け取る
    fn subscribe(&self) -> UnboundedReceiver<ConnectivityEvent>;
}
