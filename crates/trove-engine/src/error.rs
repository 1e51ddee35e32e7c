//! Error types for the record engine.

use trove_types::{ContentError, PluginError, StatusTransitionError};

/// Errors returned by backend and tstore operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The record does not exist.
    #[error("record not found")]
    RecordNotFound,

    /// The record is frozen and rejects further mutations.
    #[error("record is locked")]
    RecordLocked,

    /// The requested edit produces identical content.
    #[error("no record changes")]
    NoRecordChanges,

    /// The backend is shutting down.
    #[error("backend is shut down")]
    Shutdown,

    /// Disallowed status transition.
    #[error(transparent)]
    StatusTransition(#[from] StatusTransitionError),

    /// Record content failed validation.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// A plugin-defined error, passed through intact.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// No plugin is registered under the given id.
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// No anchor covers the requested leaf yet.
    #[error("anchor not found")]
    AnchorNotFound,

    /// Blob store failure.
    #[error("store error: {0}")]
    Store(#[from] trove_store::StoreError),

    /// Verifiable log failure.
    #[error("log error: {0}")]
    Log(#[from] trove_log::LogError),

    /// Timestamping service failure.
    #[error("timestamp error: {0}")]
    Stamp(#[from] trove_stamp::StampError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Anchor scheduler failure.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}
