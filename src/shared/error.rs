use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// ローカル永続ストアが利用できない（その操作は行われなかったものとして扱う）
    LocalStorage(String),
    /// タイムアウトや接続断など。次回のドレインで自動的に再試行される
    TransientRemote(String),
    /// リモートのバージョントークンが先行している
    VersionConflict(String),
    /// 認可・スキーマ検証などの恒久的な拒否
    PermanentRemote(String),
    NotFound(String),
    ValidationError(String),
    ConfigurationError(String),
    SerializationError(String),
    DeserializationError(String),
    Internal(String),
}

impl AppError {
    pub fn is_local_storage(&self) -> bool {
        matches!(self, AppError::LocalStorage(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::LocalStorage(msg) => write!(f, "Local storage error: {}", msg),
            AppError::TransientRemote(msg) => write!(f, "Transient remote error: {}", msg),
            AppError::VersionConflict(msg) => write!(f, "Version conflict: {}", msg),
            AppError::PermanentRemote(msg) => write!(f, "Permanent remote error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::LocalStorage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::LocalStorage(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::LocalStorage(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
