//! The tstore layer: records as leaves of a verifiable log, with blob
//! payloads in the key-value store.
//!
//! Every piece of record content (record metadata, metadata streams, files)
//! is stored once as a [`BlobEntry`] under a fresh opaque key, and committed
//! to the record's log by a leaf whose value is the content digest and whose
//! extra data carries the store key and a descriptor. A per-iteration record
//! index leaf ties the content of that iteration together; unchanged content
//! is shared across iterations instead of re-put.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};
use trove_log::{NewLeaf, VerifiableLog};
use trove_stamp::StampClient;
use trove_store::{blobify, deblob, key_new, BlobEntry, DataDescriptor, KvStore};
use trove_types::{
    File, MetadataStream, Proof, Record, RecordMetadata, RecordTimestamps, Timestamp, Token,
};

use crate::error::BackendError;
use crate::plugin::{HookType, Plugin, PluginClient, PluginSetting};

/// Descriptor of record metadata blobs.
pub const DESC_RECORD_METADATA: &str = "recordMetadata";
/// Descriptor of file blobs.
pub const DESC_FILE: &str = "file";
/// Descriptor of metadata stream blobs.
pub const DESC_METADATA_STREAM: &str = "metadataStream";
/// Descriptor of record index blobs.
pub const DESC_RECORD_INDEX: &str = "recordIndex";
/// Descriptor of anchor blobs.
pub const DESC_ANCHOR: &str = "anchor";

/// The compact record carried in a leaf's extra data.
///
/// `key` is the blob-store key of the leaf's payload; `descriptor` is what
/// gives the leaf its meaning. No positional assumptions are made anywhere:
/// a leaf is interpreted by its descriptor alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraData {
    /// Blob-store key of the leaf payload.
    pub key: String,
    /// Payload descriptor.
    pub descriptor: String,
    /// Stream id, set only on metadata stream leaves.
    #[serde(default)]
    pub stream_id: u32,
}

impl ExtraData {
    /// Build extra data for a leaf.
    pub fn new(key: impl Into<String>, descriptor: impl Into<String>, stream_id: u32) -> Self {
        Self {
            key: key.into(),
            descriptor: descriptor.into(),
            stream_id,
        }
    }

    /// Encode to the compact JSON stored on the leaf.
    pub fn encode(&self) -> Result<String, BackendError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a leaf's extra data.
    pub fn decode(data: &str) -> Result<Self, BackendError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Per-iteration index tying an iteration to its content digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordIndex {
    pub version: u32,
    pub iteration: u32,
    /// Hex digest of the record metadata blob.
    pub record_metadata: String,
    /// Hex digests of stream blobs, keyed by plugin id then stream id.
    pub streams: BTreeMap<String, BTreeMap<u32, String>>,
    /// Hex digests of file blobs, keyed by file name.
    pub files: BTreeMap<String, String>,
    /// Set on the final iteration of a frozen record.
    pub frozen: bool,
}

/// The tstore: a verifiable log and a blob store glued into a record store,
/// plus the plugin registry and the anchor engine state.
pub struct Tstore {
    log: Arc<VerifiableLog>,
    store: Arc<dyn KvStore>,
    stamper: Arc<dyn StampClient>,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    /// Reentrancy guard for the anchor engine. Set while an anchor drop is
    /// waiting on chain confirmation; scheduler ticks that fire during the
    /// wait are skipped.
    pub(crate) dropping_anchor: Mutex<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl Tstore {
    /// Create a tstore over the given log, blob store, and stamp client.
    pub fn new(
        log: Arc<VerifiableLog>,
        store: Arc<dyn KvStore>,
        stamper: Arc<dyn StampClient>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            log,
            store,
            stamper,
            plugins: RwLock::new(Vec::new()),
            dropping_anchor: Mutex::new(false),
            shutdown_tx,
        })
    }

    /// The underlying verifiable log.
    pub fn log(&self) -> &Arc<VerifiableLog> {
        &self.log
    }

    /// The underlying blob store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub(crate) fn stamper(&self) -> &Arc<dyn StampClient> {
        &self.stamper
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// A receiver that observes shutdown. Used by background waits.
    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown. Background waits unblock promptly.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("tstore closed");
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Allocate a new record log and return its token.
    pub fn record_new(&self) -> Token {
        self.log.tree_new()
    }

    /// Whether a log exists for the token.
    ///
    /// A log can briefly exist without a saved record if a crash lands
    /// between allocation and first save; reads against such a token fail
    /// with [`BackendError::RecordNotFound`].
    pub fn record_exists(&self, token: &Token) -> bool {
        self.log.tree_exists(token)
    }

    /// Resolve a full or short hex token against existing logs.
    pub fn token_resolve(&self, token_hex: &str) -> Option<Token> {
        self.log.token_resolve(token_hex)
    }

    /// Tokens of all record logs.
    pub fn inventory(&self) -> Vec<Token> {
        self.log.trees_all()
    }

    /// Save a new record iteration.
    pub async fn record_save(
        &self,
        token: &Token,
        rm: &RecordMetadata,
        streams: &[MetadataStream],
        files: &[File],
    ) -> Result<(), BackendError> {
        self.save_iteration(token, rm, streams, files, false).await
    }

    /// Save a final record iteration and freeze the log. No further record
    /// leaves are accepted after this; a covering anchor leaf still is.
    pub async fn record_freeze(
        &self,
        token: &Token,
        rm: &RecordMetadata,
        streams: &[MetadataStream],
        files: &[File],
    ) -> Result<(), BackendError> {
        self.save_iteration(token, rm, streams, files, true).await?;
        self.log.tree_freeze(token)?;
        debug!(%token, "record frozen");
        Ok(())
    }

    async fn save_iteration(
        &self,
        token: &Token,
        rm: &RecordMetadata,
        streams: &[MetadataStream],
        files: &[File],
        frozen: bool,
    ) -> Result<(), BackendError> {
        if !self.log.tree_exists(token) {
            return Err(BackendError::RecordNotFound);
        }
        if self.log.tree_is_frozen(token)? {
            return Err(BackendError::RecordLocked);
        }

        // Build the blob entries for this iteration's content.
        let rm_entry = BlobEntry::new(
            &DataDescriptor::structure(DESC_RECORD_METADATA),
            &serde_json::to_vec(rm)?,
        )?;

        let mut index = RecordIndex {
            version: rm.version,
            iteration: rm.iteration,
            record_metadata: rm_entry.digest.clone(),
            streams: BTreeMap::new(),
            files: BTreeMap::new(),
            frozen,
        };

        // (entry, stream_id) pairs; stream_id is zero except for streams.
        let mut content: Vec<(BlobEntry, String, u32)> =
            vec![(rm_entry, DESC_RECORD_METADATA.to_string(), 0)];

        for stream in streams {
            let entry = BlobEntry::new(
                &DataDescriptor::structure(DESC_METADATA_STREAM),
                &serde_json::to_vec(stream)?,
            )?;
            index
                .streams
                .entry(stream.plugin_id.clone())
                .or_default()
                .insert(stream.stream_id, entry.digest.clone());
            content.push((entry, DESC_METADATA_STREAM.to_string(), stream.stream_id));
        }

        for file in files {
            let entry = BlobEntry::new(
                &DataDescriptor::structure(DESC_FILE),
                &serde_json::to_vec(file)?,
            )?;
            index.files.insert(file.name.clone(), entry.digest.clone());
            content.push((entry, DESC_FILE.to_string(), 0));
        }

        // Content already committed by an earlier iteration is shared, not
        // re-put.
        let existing: HashSet<String> = self
            .log
            .leaves_all(token)?
            .into_iter()
            .map(|l| hex::encode(l.value))
            .collect();

        let mut blobs: HashMap<String, Bytes> = HashMap::new();
        let mut leaves: Vec<NewLeaf> = Vec::new();
        for (entry, descriptor, stream_id) in &content {
            if existing.contains(&entry.digest) {
                continue;
            }
            let key = key_new();
            let extra = ExtraData::new(&key, descriptor.clone(), *stream_id);
            blobs.insert(key, blobify(entry)?);
            leaves.push(NewLeaf::new(digest_array(&entry.digest)?, extra.encode()?));
        }

        // The index closes the iteration.
        let index_entry = BlobEntry::new(
            &DataDescriptor::structure(DESC_RECORD_INDEX),
            &serde_json::to_vec(&index)?,
        )?;
        let index_key = key_new();
        blobs.insert(index_key.clone(), blobify(&index_entry)?);
        leaves.push(NewLeaf::new(
            digest_array(&index_entry.digest)?,
            ExtraData::new(&index_key, DESC_RECORD_INDEX, 0).encode()?,
        ));

        // Blobs land before leaves: an aborted save leaves unreferenced
        // garbage in the store, never a leaf pointing at a missing blob.
        self.store.put(blobs, false).await?;
        self.log.leaves_append(token, leaves, false)?;

        debug!(
            %token,
            version = rm.version,
            iteration = rm.iteration,
            streams = streams.len(),
            files = files.len(),
            "saved record iteration"
        );
        Ok(())
    }

    /// Erase the blob-store payloads of all file blobs of a record, across
    /// all iterations. Record metadata, streams, indexes, and anchors
    /// remain.
    pub async fn record_del(&self, token: &Token) -> Result<(), BackendError> {
        let leaves = self.log.leaves_all(token)?;
        let indexes = self.record_indexes(&leaves).await?;

        let file_digests: HashSet<&String> = indexes
            .iter()
            .flat_map(|idx| idx.files.values())
            .collect();

        let keys: Vec<String> = leaves
            .iter()
            .filter_map(|leaf| {
                let extra = ExtraData::decode(&leaf.extra_data).ok()?;
                file_digests
                    .contains(&hex::encode(leaf.value))
                    .then_some(extra.key)
            })
            .collect();

        self.store.del(&keys).await?;
        debug!(%token, files = keys.len(), "record file contents deleted");
        Ok(())
    }

    /// Load the latest version of a record in full.
    pub async fn record_latest(&self, token: &Token) -> Result<Record, BackendError> {
        self.record_partial(token, None, &[], false).await
    }

    /// Load a record, optionally at a version, with file filtering.
    ///
    /// Censored file payloads come back as empty files (name and digest
    /// retained, mime and payload empty).
    pub async fn record_partial(
        &self,
        token: &Token,
        version: Option<u32>,
        filenames: &[String],
        omit_all_files: bool,
    ) -> Result<Record, BackendError> {
        if !self.log.tree_exists(token) {
            return Err(BackendError::RecordNotFound);
        }
        let leaves = self.log.leaves_all(token)?;
        let indexes = self.record_indexes(&leaves).await?;

        let index = match version {
            None => indexes.last(),
            Some(v) => indexes.iter().rev().find(|idx| idx.version == v),
        }
        .ok_or(BackendError::RecordNotFound)?;

        // Map content digests to store keys via the leaves.
        let mut keys_by_digest: HashMap<String, String> = HashMap::with_capacity(leaves.len());
        for leaf in &leaves {
            let extra = ExtraData::decode(&leaf.extra_data)?;
            keys_by_digest.insert(hex::encode(leaf.value), extra.key);
        }

        let wanted_files: Vec<(&String, &String)> = if omit_all_files {
            Vec::new()
        } else {
            index
                .files
                .iter()
                .filter(|(name, _)| filenames.is_empty() || filenames.contains(name))
                .collect()
        };

        let mut wanted_keys: Vec<String> = Vec::new();
        let push_key = |digest: &String, keys: &mut Vec<String>| {
            if let Some(key) = keys_by_digest.get(digest) {
                keys.push(key.clone());
            }
        };
        push_key(&index.record_metadata, &mut wanted_keys);
        for streams in index.streams.values() {
            for digest in streams.values() {
                push_key(digest, &mut wanted_keys);
            }
        }
        for (_, digest) in &wanted_files {
            push_key(digest, &mut wanted_keys);
        }

        let blobs = self.store.get(&wanted_keys).await?;
        let entry_for = |digest: &String| -> Result<Option<BlobEntry>, BackendError> {
            let Some(key) = keys_by_digest.get(digest) else {
                return Ok(None);
            };
            match blobs.get(key) {
                Some(blob) => Ok(Some(deblob(blob)?)),
                None => Ok(None),
            }
        };

        let rm: RecordMetadata = entry_for(&index.record_metadata)?
            .ok_or_else(|| BackendError::Internal(format!("record metadata blob missing {token}")))?
            .decode_structure(DESC_RECORD_METADATA)?;

        let mut streams = Vec::new();
        for stream_digests in index.streams.values() {
            for digest in stream_digests.values() {
                let entry = entry_for(digest)?.ok_or_else(|| {
                    BackendError::Internal(format!("metadata stream blob missing {token}"))
                })?;
                streams.push(entry.decode_structure::<MetadataStream>(DESC_METADATA_STREAM)?);
            }
        }
        streams.sort_by(|a, b| {
            (a.plugin_id.as_str(), a.stream_id).cmp(&(b.plugin_id.as_str(), b.stream_id))
        });

        let mut files = Vec::new();
        for (name, digest) in &wanted_files {
            match entry_for(digest)? {
                Some(entry) => files.push(entry.decode_structure::<File>(DESC_FILE)?),
                // Payload erased by a censor; surface the file shell.
                None => files.push(File {
                    name: (*name).clone(),
                    mime: String::new(),
                    digest: (*digest).clone(),
                    payload: String::new(),
                }),
            }
        }

        Ok(Record {
            metadata: rm,
            streams,
            files,
        })
    }

    /// Decode all record index leaves, in append order.
    pub(crate) async fn record_indexes(
        &self,
        leaves: &[trove_log::Leaf],
    ) -> Result<Vec<RecordIndex>, BackendError> {
        let mut keys = Vec::new();
        for leaf in leaves {
            let extra = ExtraData::decode(&leaf.extra_data)?;
            if extra.descriptor == DESC_RECORD_INDEX {
                keys.push(extra.key);
            }
        }

        let blobs = self.store.get(&keys).await?;
        let mut indexes = Vec::with_capacity(keys.len());
        for key in &keys {
            let blob = blobs
                .get(key)
                .ok_or_else(|| BackendError::Internal(format!("record index blob missing {key}")))?;
            indexes.push(deblob(blob)?.decode_structure::<RecordIndex>(DESC_RECORD_INDEX)?);
        }
        Ok(indexes)
    }

    // ------------------------------------------------------------------
    // Timestamps
    // ------------------------------------------------------------------

    /// Derive timestamps for every piece of content of a record version.
    pub async fn record_timestamps(
        &self,
        token: &Token,
        version: Option<u32>,
    ) -> Result<RecordTimestamps, BackendError> {
        if !self.log.tree_exists(token) {
            return Err(BackendError::RecordNotFound);
        }
        let leaves = self.log.leaves_all(token)?;
        let indexes = self.record_indexes(&leaves).await?;
        let index = match version {
            None => indexes.last(),
            Some(v) => indexes.iter().rev().find(|idx| idx.version == v),
        }
        .ok_or(BackendError::RecordNotFound)?;

        let record_metadata = self
            .timestamp_for_digest(token, &leaves, &index.record_metadata)
            .await?;

        let mut streams: BTreeMap<String, BTreeMap<u32, Timestamp>> = BTreeMap::new();
        for (plugin_id, stream_digests) in &index.streams {
            for (stream_id, digest) in stream_digests {
                let ts = self.timestamp_for_digest(token, &leaves, digest).await?;
                streams
                    .entry(plugin_id.clone())
                    .or_default()
                    .insert(*stream_id, ts);
            }
        }

        let mut files: BTreeMap<String, Timestamp> = BTreeMap::new();
        for (name, digest) in &index.files {
            files.insert(
                name.clone(),
                self.timestamp_for_digest(token, &leaves, digest).await?,
            );
        }

        Ok(RecordTimestamps {
            token: token.to_string(),
            version: index.version,
            record_metadata,
            streams,
            files,
        })
    }

    /// Build the timestamp for one content digest: the blob itself, the
    /// log inclusion proof against the covering anchor's root, and the
    /// chain proof from that anchor's verified receipt.
    async fn timestamp_for_digest(
        &self,
        token: &Token,
        leaves: &[trove_log::Leaf],
        digest: &str,
    ) -> Result<Timestamp, BackendError> {
        let leaf = leaves
            .iter()
            .find(|l| hex::encode(l.value) == digest)
            .ok_or_else(|| BackendError::Internal(format!("leaf not found for digest {digest}")))?;

        let extra = ExtraData::decode(&leaf.extra_data)?;
        let data = match self.store.get(&[extra.key.clone()]).await?.remove(&extra.key) {
            Some(blob) => String::from_utf8(blob.to_vec())
                .map_err(|e| BackendError::Internal(format!("blob is not valid UTF-8: {e}")))?,
            // Censored payload.
            None => String::new(),
        };

        let anchor = match self.anchor_for_leaf(token, &leaf.merkle_leaf_hash).await? {
            Some(anchor) => anchor,
            None => {
                // Not anchored yet; data only.
                return Ok(Timestamp {
                    data,
                    digest: digest.to_string(),
                    tx_id: String::new(),
                    merkle_root: String::new(),
                    proofs: Vec::new(),
                });
            }
        };

        let verify = anchor.verify_digest.as_ref().ok_or_else(|| {
            BackendError::Internal("anchor is missing its verify digest".to_string())
        })?;

        let path = self
            .log
            .inclusion_proof(token, leaf.leaf_index, anchor.log_root.tree_size)?;

        let proofs = vec![
            Proof::Inclusion {
                digest: hex::encode(leaf.merkle_leaf_hash),
                merkle_root: hex::encode(anchor.log_root.root_hash),
                hashes: path.iter().map(hex::encode).collect(),
                leaf_index: leaf.leaf_index,
                tree_size: anchor.log_root.tree_size,
            },
            Proof::Chain {
                digest: hex::encode(anchor.log_root.root_hash),
                merkle_root: verify.chain_information.merkle_root.clone(),
                hashes: verify.chain_information.merkle_path.clone(),
                tx_id: verify.chain_information.transaction.clone(),
                chain_timestamp: verify.chain_information.chain_timestamp,
            },
        ];

        Ok(Timestamp {
            data,
            digest: digest.to_string(),
            tx_id: verify.chain_information.transaction.clone(),
            merkle_root: verify.chain_information.merkle_root.clone(),
            proofs,
        })
    }

    // ------------------------------------------------------------------
    // Plugin blob APIs
    // ------------------------------------------------------------------

    /// Save a plugin blob against a record.
    pub async fn blob_save(&self, token: &Token, entry: BlobEntry) -> Result<(), BackendError> {
        if !self.log.tree_exists(token) {
            return Err(BackendError::RecordNotFound);
        }
        if self.log.tree_is_frozen(token)? {
            return Err(BackendError::RecordLocked);
        }

        // Refuse incoherent entries before they reach storage.
        entry.decode_payload()?;
        let descriptor = entry.data_descriptor()?.descriptor;

        let key = key_new();
        let mut blobs = HashMap::new();
        blobs.insert(key.clone(), blobify(&entry)?);
        self.store.put(blobs, false).await?;

        self.log.leaves_append(
            token,
            vec![NewLeaf::new(
                digest_array(&entry.digest)?,
                ExtraData::new(&key, &descriptor, 0).encode()?,
            )],
            false,
        )?;

        debug!(%token, descriptor, "plugin blob saved");
        Ok(())
    }

    /// All blobs on a record whose descriptor is in `descriptors`, in
    /// leaf-append order.
    pub async fn blobs_by_data_desc(
        &self,
        token: &Token,
        descriptors: &[String],
    ) -> Result<Vec<BlobEntry>, BackendError> {
        if !self.log.tree_exists(token) {
            return Err(BackendError::RecordNotFound);
        }

        let leaves = self.log.leaves_all(token)?;
        let mut keys = Vec::new();
        for leaf in &leaves {
            let extra = ExtraData::decode(&leaf.extra_data)?;
            if descriptors.contains(&extra.descriptor) {
                keys.push(extra.key);
            }
        }

        let blobs = self.store.get(&keys).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(blob) = blobs.get(key) {
                entries.push(deblob(blob)?);
            }
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Plugin registry and hooks
    // ------------------------------------------------------------------

    /// Register a plugin. Plugins are dispatched in registration order.
    pub fn plugin_register(&self, plugin: Arc<dyn Plugin>) -> Result<(), BackendError> {
        let mut plugins = self.plugins.write().expect("lock poisoned");
        if plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(BackendError::Internal(format!(
                "plugin already registered: {}",
                plugin.id()
            )));
        }
        info!(plugin = plugin.id(), "plugin registered");
        plugins.push(plugin);
        Ok(())
    }

    /// Run a registered plugin's one-time setup.
    pub async fn plugin_setup(&self, plugin_id: &str) -> Result<(), BackendError> {
        self.plugin(plugin_id)?.setup().await
    }

    /// Ids and settings of all registered plugins.
    pub fn plugins(&self) -> Vec<(String, Vec<PluginSetting>)> {
        self.plugins_snapshot()
            .iter()
            .map(|p| (p.id().to_string(), p.settings()))
            .collect()
    }

    fn plugins_snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.read().expect("lock poisoned").clone()
    }

    fn plugin(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>, BackendError> {
        self.plugins_snapshot()
            .into_iter()
            .find(|p| p.id() == plugin_id)
            .ok_or_else(|| BackendError::PluginNotFound(plugin_id.to_string()))
    }

    /// Dispatch a read command to a plugin.
    pub async fn plugin_read(
        &self,
        token: Option<Token>,
        plugin_id: &str,
        cmd: &str,
        payload: &str,
    ) -> Result<String, BackendError> {
        self.plugin(plugin_id)?.read(token, cmd, payload).await
    }

    /// Dispatch a write command to a plugin. The caller holds the record
    /// lock and has already fired the plugin pre hook.
    pub async fn plugin_write(
        &self,
        token: Token,
        plugin_id: &str,
        cmd: &str,
        payload: &str,
    ) -> Result<String, BackendError> {
        self.plugin(plugin_id)?.write(token, cmd, payload).await
    }

    /// Fire a pre hook on every plugin. The first failure vetoes the
    /// mutation.
    pub async fn plugin_hook_pre(
        &self,
        hook: HookType,
        payload: &str,
    ) -> Result<(), BackendError> {
        for plugin in self.plugins_snapshot() {
            plugin.hook(hook, payload).await?;
        }
        Ok(())
    }

    /// Fire a post hook on every plugin. Failures are logged, not
    /// returned.
    pub async fn plugin_hook_post(&self, hook: HookType, payload: &str) {
        for plugin in self.plugins_snapshot() {
            if let Err(e) = plugin.hook(hook, payload).await {
                error!(plugin = plugin.id(), %hook, error = %e, "post hook failed");
            }
        }
    }

    /// Run every plugin's fsck.
    pub async fn fsck(&self) -> Result<(), BackendError> {
        for plugin in self.plugins_snapshot() {
            plugin.fsck().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PluginClient for Tstore {
    async fn blob_save(&self, token: &Token, entry: BlobEntry) -> Result<(), BackendError> {
        Tstore::blob_save(self, token, entry).await
    }

    async fn blobs_by_data_desc(
        &self,
        token: &Token,
        descriptors: &[String],
    ) -> Result<Vec<BlobEntry>, BackendError> {
        Tstore::blobs_by_data_desc(self, token, descriptors).await
    }

    async fn record_partial(
        &self,
        token: &Token,
        version: Option<u32>,
        filenames: &[String],
        omit_all_files: bool,
    ) -> Result<Record, BackendError> {
        Tstore::record_partial(self, token, version, filenames, omit_all_files).await
    }
}

/// Decode a hex digest into its 32-byte array.
pub(crate) fn digest_array(digest: &str) -> Result<[u8; 32], BackendError> {
    let bytes = hex::decode(digest)
        .map_err(|e| BackendError::Internal(format!("invalid digest hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| BackendError::Internal(format!("invalid digest length: {digest}")))
}
