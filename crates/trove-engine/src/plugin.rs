//! Plugin registry types, the hook bus contract, and hook payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use trove_store::BlobEntry;
use trove_types::{File, MetadataStream, Record, RecordMetadata, Token};

use crate::error::BackendError;

/// Hook points fired around record mutations and plugin writes.
///
/// Pre hooks may veto the mutation by failing; post hooks are best-effort
/// and their errors are logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    /// Before a new record is saved.
    NewRecordPre,
    /// After a new record has been saved.
    NewRecordPost,
    /// Before an edited record iteration is saved.
    EditRecordPre,
    /// After an edited record iteration has been saved.
    EditRecordPost,
    /// Before a metadata-only iteration is saved.
    EditMetadataPre,
    /// After a metadata-only iteration has been saved.
    EditMetadataPost,
    /// Before a status change is applied.
    SetRecordStatusPre,
    /// After a status change has been applied.
    SetRecordStatusPost,
    /// Before a plugin write command executes.
    PluginPre,
    /// After a plugin write command has executed.
    PluginPost,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookType::NewRecordPre => "new-record-pre",
            HookType::NewRecordPost => "new-record-post",
            HookType::EditRecordPre => "edit-record-pre",
            HookType::EditRecordPost => "edit-record-post",
            HookType::EditMetadataPre => "edit-metadata-pre",
            HookType::EditMetadataPost => "edit-metadata-post",
            HookType::SetRecordStatusPre => "set-record-status-pre",
            HookType::SetRecordStatusPost => "set-record-status-post",
            HookType::PluginPre => "plugin-pre",
            HookType::PluginPost => "plugin-post",
        };
        f.write_str(name)
    }
}

/// Payload of [`HookType::NewRecordPre`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookNewRecordPre {
    /// Metadata streams of the proposed record.
    pub streams: Vec<MetadataStream>,
    /// Files of the proposed record.
    pub files: Vec<File>,
}

/// Payload of [`HookType::NewRecordPost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookNewRecordPost {
    /// Metadata streams of the saved record.
    pub streams: Vec<MetadataStream>,
    /// Files of the saved record.
    pub files: Vec<File>,
    /// Record metadata of the saved record.
    pub record_metadata: RecordMetadata,
}

/// Payload of the edit-record hook pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEditRecord {
    /// The record as it currently exists.
    pub record: Record,
    /// Proposed record metadata of the new iteration.
    pub record_metadata: RecordMetadata,
    /// Proposed metadata streams of the new iteration.
    pub streams: Vec<MetadataStream>,
    /// Proposed files of the new iteration.
    pub files: Vec<File>,
}

/// Payload of the edit-metadata hook pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEditMetadata {
    /// The record as it currently exists.
    pub record: Record,
    /// Proposed metadata streams of the new iteration.
    pub streams: Vec<MetadataStream>,
}

/// Payload of the set-record-status hook pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSetRecordStatus {
    /// The record as it currently exists.
    pub record: Record,
    /// Proposed record metadata, carrying the new status.
    pub record_metadata: RecordMetadata,
    /// Proposed metadata streams of the new iteration.
    pub streams: Vec<MetadataStream>,
}

/// Payload of [`HookType::PluginPre`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPluginPre {
    /// Hex token of the record the command runs against.
    pub token: String,
    /// Target plugin.
    pub plugin_id: String,
    /// Plugin command.
    pub cmd: String,
    /// Command payload.
    pub payload: String,
}

/// Payload of [`HookType::PluginPost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPluginPost {
    /// Target plugin.
    pub plugin_id: String,
    /// Plugin command.
    pub cmd: String,
    /// Command payload.
    pub payload: String,
    /// Command reply.
    pub reply: String,
}

/// A single key/value plugin setting supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSetting {
    /// Setting name.
    pub key: String,
    /// Setting value.
    pub value: String,
}

/// A registered domain module.
///
/// Plugins own blob descriptors, answer read and write commands, and
/// participate in every hook. They interact with storage exclusively
/// through the [`PluginClient`] handle they were constructed with.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin identifier.
    fn id(&self) -> &str;

    /// Settings the plugin was configured with.
    fn settings(&self) -> Vec<PluginSetting> {
        Vec::new()
    }

    /// One-time setup, run after registration.
    async fn setup(&self) -> Result<(), BackendError>;

    /// Execute a read-only command. The token is optional; commands that
    /// need one must reject its absence themselves.
    async fn read(
        &self,
        token: Option<Token>,
        cmd: &str,
        payload: &str,
    ) -> Result<String, BackendError>;

    /// Execute a write command. The per-record lock is already held.
    async fn write(&self, token: Token, cmd: &str, payload: &str) -> Result<String, BackendError>;

    /// React to a lifecycle hook. The payload is the JSON encoding of the
    /// hook struct for `hook`.
    async fn hook(&self, hook: HookType, payload: &str) -> Result<(), BackendError>;

    /// Verify and rebuild any plugin-owned caches.
    async fn fsck(&self) -> Result<(), BackendError>;
}

/// The storage surface handed to plugins.
///
/// Deliberately narrow: plugins attach blobs to records and read records
/// back, nothing else. They never see the record engine itself.
#[async_trait::async_trait]
pub trait PluginClient: Send + Sync {
    /// Save a plugin blob against a record. The blob is appended to the
    /// record's log with the descriptor from the entry's data hint.
    async fn blob_save(&self, token: &Token, entry: BlobEntry) -> Result<(), BackendError>;

    /// All blobs on a record whose descriptor is in `descriptors`, in
    /// leaf-append order.
    async fn blobs_by_data_desc(
        &self,
        token: &Token,
        descriptors: &[String],
    ) -> Result<Vec<BlobEntry>, BackendError>;

    /// Load a record, optionally at a version, with file filtering.
    async fn record_partial(
        &self,
        token: &Token,
        version: Option<u32>,
        filenames: &[String],
        omit_all_files: bool,
    ) -> Result<Record, BackendError>;
}
