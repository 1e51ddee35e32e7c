//! Shared types for the trove record store.
//!
//! This crate defines the entities that travel between the engine, the
//! backing stores, and plugins: the record identifier ([`Token`]), record
//! content ([`File`], [`MetadataStream`], [`RecordMetadata`], [`Record`]),
//! lifecycle labels ([`State`], [`Status`]), batch-read requests, inventory
//! replies, timestamp proofs, and the domain error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Byte length of a full record token.
pub const TOKEN_SIZE: usize = 32;

/// Byte length of the short token form (the first 8 bytes of a full token).
pub const TOKEN_SIZE_SHORT: usize = 8;

/// Opaque 32-byte record identifier, printed as hex.
///
/// Tokens are allocated by the verifiable-log component when the log for a
/// record is created. The short form (first 8 bytes, 16 hex characters) is
/// accepted on read paths; writes require the full token.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Return the short form: the first 8 bytes, hex encoded.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..TOKEN_SIZE_SHORT])
    }

    /// Parse a full-length token from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(s).map_err(|_| TokenError::InvalidHex(s.to_string()))?;
        let arr: [u8; TOKEN_SIZE] = bytes
            .try_into()
            .map_err(|_| TokenError::InvalidLength(s.len()))?;
        Ok(Self(arr))
    }

    /// Whether the hex string is a valid full or short token form.
    pub fn is_valid_hex(s: &str) -> bool {
        (s.len() == TOKEN_SIZE * 2 || s.len() == TOKEN_SIZE_SHORT * 2)
            && s.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl From<[u8; TOKEN_SIZE]> for Token {
    fn from(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Token {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.short())
    }
}

/// Token parsing failure.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The string is not valid hex.
    #[error("token is not valid hex: {0}")]
    InvalidHex(String),

    /// The decoded token has the wrong length.
    #[error("invalid token length: {0} hex chars")]
    InvalidLength(usize),
}

// ---------------------------------------------------------------------------
// Record state and status
// ---------------------------------------------------------------------------

/// Coarse visibility bucket of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// The record has not been made public.
    Unvetted,
    /// The record has been made public.
    Vetted,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Unvetted => f.write_str("unvetted"),
            State::Vetted => f.write_str("vetted"),
        }
    }
}

/// Lifecycle status of a record.
///
/// `Censored` and `Archived` are terminal: the record is frozen and no
/// further mutations are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Initial status of every new record.
    Unreviewed,
    /// Publicly visible. Entering this status resets version and iteration.
    Public,
    /// Frozen, with all file payloads erased from the blob store.
    Censored,
    /// Frozen, contents retained.
    Archived,
}

impl Status {
    /// All statuses, in declaration order.
    pub const ALL: [Status; 4] = [
        Status::Unreviewed,
        Status::Public,
        Status::Censored,
        Status::Archived,
    ];
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unreviewed => f.write_str("unreviewed"),
            Status::Public => f.write_str("public"),
            Status::Censored => f.write_str("censored"),
            Status::Archived => f.write_str("archived"),
        }
    }
}

// ---------------------------------------------------------------------------
// Record content
// ---------------------------------------------------------------------------

/// A user-supplied payload within a record.
///
/// `name` must be a sanitized basename, unique within the record. `digest`
/// is the hex SHA-256 of the base64-decoded `payload`, and `mime` must match
/// the MIME type detected from the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// File name. A basename, never a path.
    pub name: String,
    /// Declared MIME type.
    pub mime: String,
    /// Hex SHA-256 digest of the decoded payload.
    pub digest: String,
    /// Base64-encoded payload.
    pub payload: String,
}

/// Structured, plugin-owned JSON attached to a record.
///
/// Streams are keyed by `(plugin_id, stream_id)`, unique within a record.
/// Append-mode streams hold newline-concatenated JSON objects; overwrite-mode
/// streams hold a single object. The mode is chosen per edit, not per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStream {
    /// Plugin that owns this stream.
    pub plugin_id: String,
    /// Stream identifier within the plugin. Must be non-zero.
    pub stream_id: u32,
    /// JSON payload.
    pub payload: String,
}

/// Per-iteration summary of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Hex-encoded record token.
    pub token: String,
    /// Version, incremented on file changes only.
    pub version: u32,
    /// Iteration, incremented on every mutation.
    pub iteration: u32,
    /// Visibility bucket.
    pub state: State,
    /// Lifecycle status.
    pub status: Status,
    /// Unix timestamp of this iteration.
    pub timestamp: i64,
    /// Hex merkle root of the record's file digests.
    pub merkle: String,
}

/// A record at a specific `(version, iteration)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Per-iteration summary.
    pub metadata: RecordMetadata,
    /// Metadata streams.
    pub streams: Vec<MetadataStream>,
    /// User-supplied files.
    pub files: Vec<File>,
}

/// A single request within a batch record read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequest {
    /// Hex token, short or full form. The reply is keyed by this exact
    /// string so the caller can correlate it.
    pub token: String,
    /// Version to fetch. `None` fetches the latest version.
    pub version: Option<u32>,
    /// When non-empty, only files with these names are returned.
    pub filenames: Vec<String>,
    /// When set, no file payloads are returned at all.
    pub omit_all_files: bool,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Tokens of all records, partitioned by state and status.
///
/// Within each bucket, tokens are ordered by the timestamp of the record's
/// most recent status change, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Unvetted buckets, keyed by status.
    pub unvetted: BTreeMap<Status, Vec<String>>,
    /// Vetted buckets, keyed by status.
    pub vetted: BTreeMap<Status, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// A single proof within a [`Timestamp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Proof {
    /// Inclusion of a leaf in an anchored log root.
    ///
    /// `hashes` are the sibling hashes from the leaf to the root of the log
    /// at `tree_size`; `merkle_root` is the anchored root hash.
    Inclusion {
        /// Hex leaf hash being proven.
        digest: String,
        /// Hex root hash of the log at `tree_size`.
        merkle_root: String,
        /// Hex sibling hashes, leaf to root.
        hashes: Vec<String>,
        /// Index of the leaf in the log.
        leaf_index: u64,
        /// Size of the log covered by the anchored root.
        tree_size: u64,
    },
    /// Inclusion of an anchored log root in a blockchain timestamp.
    ///
    /// `hashes` are the digests of the timestamped batch; recomputing their
    /// merkle root must yield `merkle_root`, which is the value committed to
    /// the chain by `tx_id`.
    Chain {
        /// Hex digest that was submitted for timestamping.
        digest: String,
        /// Hex merkle root committed on chain.
        merkle_root: String,
        /// Hex digests of the timestamped batch.
        hashes: Vec<String>,
        /// Chain transaction id.
        tx_id: String,
        /// Unix timestamp of the confirmed chain block.
        chain_timestamp: i64,
    },
}

/// Proof data for one piece of record content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// JSON blob entry of the content being timestamped. Empty when the
    /// payload has been censored.
    pub data: String,
    /// Hex digest of the content.
    pub digest: String,
    /// Chain transaction id of the covering anchor, when confirmed.
    pub tx_id: String,
    /// Merkle root committed on chain by the covering anchor.
    pub merkle_root: String,
    /// Proofs linking `digest` to `merkle_root`.
    pub proofs: Vec<Proof>,
}

/// Timestamps for every piece of content in one record version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTimestamps {
    /// Hex record token.
    pub token: String,
    /// Record version these timestamps cover.
    pub version: u32,
    /// Timestamp of the record metadata.
    pub record_metadata: Timestamp,
    /// Timestamps of metadata streams, keyed by plugin id then stream id.
    pub streams: BTreeMap<String, BTreeMap<u32, Timestamp>>,
    /// Timestamps of files, keyed by file name.
    pub files: BTreeMap<String, Timestamp>,
}

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

/// Sub-code of a [`ContentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentErrorCode {
    /// Token is not a valid full-length token.
    TokenInvalid,
    /// A metadata stream is missing a required field.
    MetadataStreamInvalid,
    /// Duplicate `(plugin_id, stream_id)` pair.
    MetadataStreamDuplicate,
    /// File name is a path or is not sanitized.
    FileNameInvalid,
    /// Duplicate file name across adds and deletes.
    FileNameDuplicate,
    /// File digest is malformed or does not match the payload.
    FileDigestInvalid,
    /// File payload is empty or not valid base64.
    FilePayloadInvalid,
    /// Declared MIME type does not match the payload.
    FileMimeInvalid,
    /// Declared MIME type is not in the allowed set.
    FileMimeUnsupported,
    /// Neither file adds nor file deletes were provided.
    FilesEmpty,
}

/// A record content validation failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("content error {code:?}: {context}")]
pub struct ContentError {
    /// What was wrong with the content.
    pub code: ContentErrorCode,
    /// Human-readable context, e.g. the offending file name.
    pub context: String,
}

impl ContentError {
    /// Build a content error with context.
    pub fn new(code: ContentErrorCode, context: impl Into<String>) -> Self {
        Self {
            code,
            context: context.into(),
        }
    }
}

/// A disallowed record status transition.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("status transition not allowed: {from} -> {to}")]
pub struct StatusTransitionError {
    /// Current status.
    pub from: Status,
    /// Requested status.
    pub to: Status,
}

/// A plugin-defined error, propagated intact to the caller.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("plugin {plugin_id} error {code}: {context}")]
pub struct PluginError {
    /// Plugin that raised the error.
    pub plugin_id: String,
    /// Plugin-defined error code.
    pub code: u32,
    /// Human-readable context.
    pub context: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
