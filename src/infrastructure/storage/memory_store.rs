use crate::application::ports::durable_store::LocalDurableStore;
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// メモリ上の永続ストア。テストとハーネス用で、プロセス終了で消える。
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_prefix: Arc<Mutex<Option<String>>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降の書き込みをすべて失敗させる（ストレージ障害の再現用）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// プレフィックスに一致するキーへの書き込みだけを失敗させる
    pub fn fail_writes_matching(&self, prefix: Option<&str>) {
        if let Ok(mut guard) = self.fail_prefix.lock() {
            *guard = prefix.map(str::to_string);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 生のバイト列を直接書き込む（破損データの再現用）
    pub async fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    fn ensure_writable(&self, key: &str) -> Result<(), AppError> {
        let prefix_blocked = self
            .fail_prefix
            .lock()
            .map(|guard| guard.as_deref().is_some_and(|prefix| key.starts_with(prefix)))
            .unwrap_or(false);
        if self.fail_writes.load(Ordering::SeqCst) || prefix_blocked {
            return Err(AppError::LocalStorage(format!(
                "memory store is rejecting writes to {key}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalDurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError> {
        self.ensure_writable(key)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.ensure_writable(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, AppError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryDurableStore::new();
        store.set("a", b"1".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered_and_bounded() {
        let store = MemoryDurableStore::new();
        store.set("offline/entities/b", b"2".to_vec()).await.unwrap();
        store.set("offline/entities/a", b"1".to_vec()).await.unwrap();
        store.set("offline/queue", b"q".to_vec()).await.unwrap();

        let entries = store.scan_prefix("offline/entities/").await.unwrap();
        let keys: Vec<_> = entries.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["offline/entities/a", "offline/entities/b"]);
    }

    #[tokio::test]
    async fn test_write_failures_are_reported() {
        let store = MemoryDurableStore::new();
        store.set_fail_writes(true);

        let err = store.set("a", b"1".to_vec()).await.unwrap_err();
        assert!(err.is_local_storage());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_prefix_failures_only_hit_matching_keys() {
        let store = MemoryDurableStore::new();
        store.fail_writes_matching(Some("offline/queue"));

        assert!(store.set("offline/queue", b"q".to_vec()).await.is_err());
        assert!(store.set("offline/entities/a", b"1".to_vec()).await.is_ok());

        store.fail_writes_matching(None);
        assert!(store.set("offline/queue", b"q".to_vec()).await.is_ok());
        assert_eq!(store.len().await, 2);
    }
}
