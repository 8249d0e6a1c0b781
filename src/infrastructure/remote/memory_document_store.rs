use crate::application::ports::{
    MergeWrite, RemoteDocument, RemoteDocumentStore, RemoteStoreError,
};
use crate::domain::value_objects::{EntityFields, EntityId, EntityKey, EntityType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct RemoteState {
    documents: HashMap<EntityKey, RemoteDocument>,
    /// 冪等キーごとの適用結果
    applied: HashMap<String, RemoteDocument>,
    /// 実際に適用された書き込み（再送分は含まない）
    write_log: Vec<MergeWrite>,
    injected: VecDeque<RemoteStoreError>,
    rejected: HashMap<EntityKey, RemoteStoreError>,
    unavailable: bool,
}

/// バージョントークンと冪等キーを持つメモリ上のリモートストア。
/// テストとハーネスで障害注入に使う。
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<RemoteState>>,
}

fn key_of(collection: &EntityType, id: &EntityId) -> EntityKey {
    EntityKey::new(collection.clone(), id.clone())
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 別クライアントによる書き込みを再現する
    pub async fn external_write(&self, key: &EntityKey, fields: EntityFields) -> RemoteDocument {
        let mut state = self.state.write().await;
        apply(&mut state, key, &fields)
    }

    pub async fn document(&self, key: &EntityKey) -> Option<RemoteDocument> {
        self.state.read().await.documents.get(key).cloned()
    }

    pub async fn write_log(&self) -> Vec<MergeWrite> {
        self.state.read().await.write_log.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.state.read().await.write_log.len()
    }

    /// 次の書き込みを指定エラーで失敗させる（積んだ順に消費される）
    pub async fn fail_next_write(&self, error: RemoteStoreError) {
        self.state.write().await.injected.push_back(error);
    }

    /// 解除するまで特定エンティティへの書き込みを拒否する
    pub async fn reject_entity(&self, key: &EntityKey, error: Option<RemoteStoreError>) {
        let mut state = self.state.write().await;
        match error {
            Some(error) => {
                state.rejected.insert(key.clone(), error);
            }
            None => {
                state.rejected.remove(key);
            }
        }
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

fn apply(state: &mut RemoteState, key: &EntityKey, fields: &EntityFields) -> RemoteDocument {
    let now = Utc::now();
    let document = state
        .documents
        .entry(key.clone())
        .or_insert_with(|| RemoteDocument {
            collection: key.entity_type.clone(),
            id: key.entity_id.clone(),
            data: EntityFields::default(),
            version: 0,
            updated_at: now,
        });
    document.data.merge_from(fields);
    document.version += 1;
    document.updated_at = now;
    document.clone()
}

#[async_trait]
impl RemoteDocumentStore for InMemoryDocumentStore {
    async fn get(
        &self,
        collection: &EntityType,
        id: &EntityId,
    ) -> Result<Option<RemoteDocument>, RemoteStoreError> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(RemoteStoreError::Transient(
                "remote store unreachable".to_string(),
            ));
        }
        Ok(state.documents.get(&key_of(collection, id)).cloned())
    }

    async fn merge_write(&self, write: MergeWrite) -> Result<RemoteDocument, RemoteStoreError> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(RemoteStoreError::Transient(
                "remote store unreachable".to_string(),
            ));
        }
        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }

        let key = key_of(&write.collection, &write.id);
        if let Some(error) = state.rejected.get(&key) {
            return Err(error.clone());
        }

        if let Some(previous) = state.applied.get(&write.idempotency_key) {
            debug!(
                target: "offline::remote",
                idempotency_key = %write.idempotency_key,
                "duplicate write ignored"
            );
            return Ok(state
                .documents
                .get(&key)
                .cloned()
                .unwrap_or_else(|| previous.clone()));
        }

        let current_version = state
            .documents
            .get(&key)
            .map(|document| document.version)
            .unwrap_or(0);
        if let Some(expected) = write.expected_version {
            if expected != current_version {
                return Err(RemoteStoreError::VersionConflict {
                    collection: write.collection.to_string(),
                    id: write.id.to_string(),
                    expected,
                    actual: current_version,
                });
            }
        }

        let document = apply(&mut state, &key, &write.fields);
        state
            .applied
            .insert(write.idempotency_key.clone(), document.clone());
        state.write_log.push(write);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn key() -> EntityKey {
        EntityKey::parse("characters", "char-1").unwrap()
    }

    fn write(fields: Value, expected: Option<u64>, idempotency_key: &str) -> MergeWrite {
        MergeWrite {
            collection: key().entity_type,
            id: key().entity_id,
            fields: EntityFields::new(fields).unwrap(),
            expected_version: expected,
            idempotency_key: idempotency_key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_merge_write_keeps_untouched_fields() {
        let store = InMemoryDocumentStore::new();
        store
            .external_write(&key(), EntityFields::new(json!({"hp": 10, "name": "Aria"})).unwrap())
            .await;

        let document = store
            .merge_write(write(json!({"hp": 40}), Some(1), "a-1"))
            .await
            .unwrap();

        assert_eq!(Value::from(document.data), json!({"hp": 40, "name": "Aria"}));
        assert_eq!(document.version, 2);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_applies_once() {
        let store = InMemoryDocumentStore::new();
        store
            .merge_write(write(json!({"hp": 40}), None, "a-1"))
            .await
            .unwrap();
        let replay = store
            .merge_write(write(json!({"hp": 40}), Some(0), "a-1"))
            .await
            .unwrap();

        assert_eq!(replay.version, 1);
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = InMemoryDocumentStore::new();
        store
            .external_write(&key(), EntityFields::new(json!({"hp": 10})).unwrap())
            .await;
        store
            .external_write(&key(), EntityFields::new(json!({"mana": 5})).unwrap())
            .await;

        let err = store
            .merge_write(write(json!({"hp": 40}), Some(1), "a-1"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = InMemoryDocumentStore::new();
        store
            .fail_next_write(RemoteStoreError::Transient("timeout".into()))
            .await;

        assert!(
            store
                .merge_write(write(json!({"hp": 1}), None, "a-1"))
                .await
                .unwrap_err()
                .is_transient()
        );
        assert!(store.merge_write(write(json!({"hp": 1}), None, "a-1")).await.is_ok());
    }
}
