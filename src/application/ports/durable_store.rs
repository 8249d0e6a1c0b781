use crate::shared::error::AppError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

/// 再起動後も残るキー単位の永続マップ。
/// 書き込み失敗は必ず呼び出し元へ `AppError::LocalStorage` として返す。
#[async_trait]
pub trait LocalDurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// プレフィックスに一致するエントリをキー順で返す
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, AppError>;
}

pub async fn read_record<T>(store: &dyn LocalDurableStore, key: &str) -> Result<Option<T>, AppError>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(bytes) => decode_record(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub async fn write_record<T>(store: &dyn LocalDurableStore, key: &str, record: &T) -> Result<(), AppError>
where
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec(record)
        .map_err(|e| AppError::SerializationError(format!("{key}: {e}")))?;
    store.set(key, bytes).await
}

pub fn decode_record<T>(key: &str, bytes: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::DeserializationError(format!("malformed record at {key}: {e}")))
}
