//! Error types for the timestamping client.

use crate::StampResult;

/// Errors returned by [`StampClient`](crate::StampClient) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StampError {
    /// Transport-level failure (connect, timeout, decode).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service rejected a digest with a non-recoverable result.
    #[error("service rejected digest {digest}: {result:?}")]
    Rejected {
        /// The offending digest.
        digest: String,
        /// The result code the service returned.
        result: StampResult,
    },

    /// The reply did not line up with the request (count or order).
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}
