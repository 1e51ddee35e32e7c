//! Error types for the verifiable log.

/// Errors returned by [`VerifiableLog`](crate::VerifiableLog) operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// No tree exists for the given token.
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// The tree is frozen and rejects new record leaves.
    #[error("tree is frozen: {0}")]
    TreeFrozen(String),

    /// A proof was requested for a leaf index outside the tree.
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    LeafOutOfRange {
        /// Requested leaf index.
        index: u64,
        /// Size of the tree (or prefix) the proof was requested against.
        tree_size: u64,
    },
}
