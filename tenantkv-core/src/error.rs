//! Error types for store operations.

use thiserror::Error;

/// Why a key, value, TTL or tenant id was rejected before touching storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("tenant id cannot be empty")]
    EmptyTenant,

    #[error("key cannot be empty")]
    EmptyKey,

    #[error("key is {len} characters, maximum is {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("value serializes to {bytes} bytes, maximum is {max}")]
    ValueTooLarge { bytes: usize, max: usize },

    #[error("ttl must be a positive number of seconds")]
    InvalidTtl,

    #[error("value could not be serialized: {0}")]
    Unserializable(String),
}

/// Errors returned by [`TenantKvStore`](crate::TenantKvStore) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Malformed input; retrying the same request will fail again
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A live record already exists for this tenant and key
    #[error("key '{key}' already exists for tenant '{tenant_id}'")]
    DuplicateKey { tenant_id: String, key: String },

    /// No live record for this tenant and key
    #[error("key '{key}' not found or expired for tenant '{tenant_id}'")]
    NotFound { tenant_id: String, key: String },

    /// The tenant already holds its maximum number of live records
    #[error("tenant '{tenant_id}' is at its limit of {limit} live records")]
    QuotaExceeded { tenant_id: String, limit: usize },

    /// The whole batch was refused before any entry was processed
    #[error("batch of {size} entries exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Backing storage failed; safe to retry with backoff
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Fieldless discriminant of [`StoreError`], for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    DuplicateKey,
    NotFound,
    QuotaExceeded,
    BatchTooLarge,
    StorageUnavailable,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            StoreError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            StoreError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Returns `true` only for transient infrastructure faults.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }

    pub(crate) fn not_found(tenant_id: &str, key: &str) -> Self {
        StoreError::NotFound {
            tenant_id: tenant_id.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(tenant_id: &str, key: &str) -> Self {
        StoreError::DuplicateKey {
            tenant_id: tenant_id.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::StorageUnavailable(format!("corrupt record data: {}", err))
    }
}

/// Result alias used throughout the crate
pub type StoreResult<T> = Result<T, StoreError>;
