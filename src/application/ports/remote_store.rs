use crate::domain::value_objects::{EntityFields, EntityId, EntityType};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub collection: EntityType,
    pub id: EntityId,
    pub data: EntityFields,
    /// 楽観的並行制御用のバージョントークン。書き込みごとに単調増加する
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// 既存のリモート状態にフィールド単位で重ねる書き込み
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeWrite {
    pub collection: EntityType,
    pub id: EntityId,
    pub fields: EntityFields,
    /// `Some` の場合、リモートのバージョンが一致しなければ `VersionConflict`
    pub expected_version: Option<u64>,
    /// 同じキーの再送は一度分の効果しか持たない
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteStoreError {
    #[error("Version conflict on {collection}/{id}: expected {expected}, found {actual}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Remote store unavailable: {0}")]
    Transient(String),

    #[error("Remote store rejected write: {0}")]
    Rejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl RemoteStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteStoreError::VersionConflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteStoreError::Transient(_))
    }
}

impl From<RemoteStoreError> for AppError {
    fn from(err: RemoteStoreError) -> Self {
        match err {
            RemoteStoreError::VersionConflict { .. } => AppError::VersionConflict(err.to_string()),
            RemoteStoreError::Transient(_) => AppError::TransientRemote(err.to_string()),
            RemoteStoreError::Rejected(_) | RemoteStoreError::Unauthorized(_) => {
                AppError::PermanentRemote(err.to_string())
            }
        }
    }
}

/// エンジンが書き込む先のリモートドキュメントストア
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn get(
        &self,
        collection: &EntityType,
        id: &EntityId,
    ) -> Result<Option<RemoteDocument>, RemoteStoreError>;

    async fn merge_write(&self, write: MergeWrite) -> Result<RemoteDocument, RemoteStoreError>;
}
