//! Error types for the blob store.

/// Errors returned by [`KvStore`](crate::KvStore) operations and the blob
/// entry codec.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A key already exists and `overwrite` was not set.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// A key was expected to exist but does not.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A stored blob failed the digest check or could not be decoded.
    #[error("blob is not coherent: {0}")]
    Corrupt(String),

    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
