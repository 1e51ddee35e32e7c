//! The record API: validation, status machine, locking, inventory, and
//! plugin orchestration over a [`Tstore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};
use trove_types::{
    File, Inventory, MetadataStream, Record, RecordRequest, RecordTimestamps, State, Status,
    StatusTransitionError, Token,
};

use crate::error::BackendError;
use crate::inventory::InventoryCache;
use crate::plugin::{
    HookEditMetadata, HookEditRecord, HookNewRecordPost, HookNewRecordPre, HookPluginPost,
    HookPluginPre, HookSetRecordStatus, HookType, Plugin, PluginSetting,
};
use crate::tstore::Tstore;
use crate::validate::{
    files_update, files_verify, metadata_streams_update, metadata_streams_verify,
    record_metadata_new, unix_now,
};

/// Whether a status transition is allowed.
///
/// `unreviewed` may go public or censored; `public` may be censored or
/// archived; `censored` and `archived` are terminal.
fn status_change_is_allowed(from: Status, to: Status) -> bool {
    matches!(
        (from, to),
        (Status::Unreviewed, Status::Public)
            | (Status::Unreviewed, Status::Censored)
            | (Status::Public, Status::Censored)
            | (Status::Public, Status::Archived)
    )
}

/// The record backend.
///
/// Thread-safe across records; mutations within a record serialize on a
/// lazily created per-token mutex that is held across hooks and the
/// inventory update. Reads never take the record lock; they rely on the
/// log and blob store being append-only.
pub struct TroveBackend {
    tstore: Arc<Tstore>,
    inventory: InventoryCache,
    record_locks: Mutex<HashMap<Token, Arc<tokio::sync::Mutex<()>>>>,
}

impl TroveBackend {
    /// Create a backend over a tstore, loading the persisted inventory.
    pub async fn new(tstore: Arc<Tstore>) -> Result<Self, BackendError> {
        let inventory = InventoryCache::new(tstore.store().clone());
        inventory.load().await?;
        Ok(Self {
            tstore,
            inventory,
            record_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The underlying tstore. Plugins are constructed against this.
    pub fn tstore(&self) -> &Arc<Tstore> {
        &self.tstore
    }

    /// The per-record mutex, created on first use.
    fn record_lock(&self, token: &Token) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.record_locks.lock().expect("lock poisoned");
        locks
            .entry(*token)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn check_shutdown(&self) -> Result<(), BackendError> {
        if self.tstore.is_shutdown() {
            return Err(BackendError::Shutdown);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Record mutations
    // ------------------------------------------------------------------

    /// Create a new record.
    pub async fn record_new(
        &self,
        streams: Vec<MetadataStream>,
        files: Vec<File>,
    ) -> Result<Record, BackendError> {
        metadata_streams_verify(&streams)?;
        files_verify(&files, &[])?;
        self.check_shutdown()?;

        let pre = HookNewRecordPre {
            streams: streams.clone(),
            files: files.clone(),
        };
        self.tstore
            .plugin_hook_pre(HookType::NewRecordPre, &serde_json::to_string(&pre)?)
            .await?;

        let token = self.tstore.record_new();
        let rm = record_metadata_new(
            &token,
            &files,
            State::Unvetted,
            Status::Unreviewed,
            1,
            1,
        );
        self.tstore.record_save(&token, &rm, &streams, &files).await?;

        let post = HookNewRecordPost {
            streams,
            files,
            record_metadata: rm.clone(),
        };
        self.tstore
            .plugin_hook_post(HookType::NewRecordPost, &serde_json::to_string(&post)?)
            .await;

        self.inventory
            .add(State::Unvetted, &token, Status::Unreviewed, unix_now())
            .await?;

        info!(%token, "record created");
        self.tstore.record_latest(&token).await
    }

    /// Edit a record's files and metadata. Creates a new version.
    pub async fn record_edit(
        &self,
        token: &Token,
        md_append: Vec<MetadataStream>,
        md_overwrite: Vec<MetadataStream>,
        files_add: Vec<File>,
        files_del: Vec<String>,
    ) -> Result<Record, BackendError> {
        // One combined pass so duplicates across the two lists are caught.
        let all_md: Vec<MetadataStream> = md_append
            .iter()
            .chain(md_overwrite.iter())
            .cloned()
            .collect();
        metadata_streams_verify(&all_md)?;
        files_verify(&files_add, &files_del)?;

        if !self.tstore.record_exists(token) {
            return Err(BackendError::RecordNotFound);
        }

        self.check_shutdown()?;
        let lock = self.record_lock(token);
        let _held = lock.lock().await;

        let record = self.tstore.record_latest(token).await?;
        let rm = &record.metadata;
        if record_is_frozen(rm) {
            return Err(BackendError::RecordLocked);
        }

        let streams = metadata_streams_update(&record.streams, &md_append, &md_overwrite);
        let files = files_update(&record.files, &files_add, &files_del);
        let new_rm = record_metadata_new(
            token,
            &files,
            rm.state,
            rm.status,
            rm.version + 1,
            rm.iteration + 1,
        );

        // The merkle root only moves when the file set changes.
        if new_rm.merkle == rm.merkle {
            return Err(BackendError::NoRecordChanges);
        }

        let hook = HookEditRecord {
            record: record.clone(),
            record_metadata: new_rm.clone(),
            streams: streams.clone(),
            files: files.clone(),
        };
        let payload = serde_json::to_string(&hook)?;
        self.tstore
            .plugin_hook_pre(HookType::EditRecordPre, &payload)
            .await?;

        self.tstore.record_save(token, &new_rm, &streams, &files).await?;

        self.tstore
            .plugin_hook_post(HookType::EditRecordPost, &payload)
            .await;

        debug!(%token, version = new_rm.version, "record edited");
        self.tstore.record_latest(token).await
    }

    /// Edit a record's metadata streams only. Creates a new iteration,
    /// not a new version.
    pub async fn record_edit_metadata(
        &self,
        token: &Token,
        md_append: Vec<MetadataStream>,
        md_overwrite: Vec<MetadataStream>,
    ) -> Result<Record, BackendError> {
        let all_md: Vec<MetadataStream> = md_append
            .iter()
            .chain(md_overwrite.iter())
            .cloned()
            .collect();
        metadata_streams_verify(&all_md)?;
        if md_append.is_empty() && md_overwrite.is_empty() {
            return Err(BackendError::NoRecordChanges);
        }

        if !self.tstore.record_exists(token) {
            return Err(BackendError::RecordNotFound);
        }

        self.check_shutdown()?;
        let lock = self.record_lock(token);
        let _held = lock.lock().await;

        let record = self.tstore.record_latest(token).await?;
        let rm = &record.metadata;
        if record_is_frozen(rm) {
            return Err(BackendError::RecordLocked);
        }

        let streams = metadata_streams_update(&record.streams, &md_append, &md_overwrite);
        let new_rm = record_metadata_new(
            token,
            &record.files,
            rm.state,
            rm.status,
            rm.version,
            rm.iteration + 1,
        );

        let hook = HookEditMetadata {
            record: record.clone(),
            streams: streams.clone(),
        };
        let payload = serde_json::to_string(&hook)?;
        self.tstore
            .plugin_hook_pre(HookType::EditMetadataPre, &payload)
            .await?;

        self.tstore
            .record_save(token, &new_rm, &streams, &record.files)
            .await?;

        self.tstore
            .plugin_hook_post(HookType::EditMetadataPost, &payload)
            .await;

        debug!(%token, iteration = new_rm.iteration, "record metadata edited");
        self.tstore.record_latest(token).await
    }

    /// Change a record's status.
    pub async fn record_set_status(
        &self,
        token: &Token,
        status: Status,
        md_append: Vec<MetadataStream>,
        md_overwrite: Vec<MetadataStream>,
    ) -> Result<Record, BackendError> {
        if !self.tstore.record_exists(token) {
            return Err(BackendError::RecordNotFound);
        }

        self.check_shutdown()?;
        let lock = self.record_lock(token);
        let _held = lock.lock().await;

        let record = self.tstore.record_latest(token).await?;
        let curr_status = record.metadata.status;

        if !status_change_is_allowed(curr_status, status) {
            return Err(StatusTransitionError {
                from: curr_status,
                to: status,
            }
            .into());
        }

        // Going public moves the record to vetted and restarts version and
        // iteration. All other changes keep the state and version and bump
        // the iteration.
        let (state, version, iteration) = if status == Status::Public {
            (State::Vetted, 1, 1)
        } else {
            (
                record.metadata.state,
                record.metadata.version,
                record.metadata.iteration + 1,
            )
        };

        let new_rm = record_metadata_new(token, &record.files, state, status, version, iteration);
        let streams = metadata_streams_update(&record.streams, &md_append, &md_overwrite);

        let hook = HookSetRecordStatus {
            record: record.clone(),
            record_metadata: new_rm.clone(),
            streams: streams.clone(),
        };
        let payload = serde_json::to_string(&hook)?;
        self.tstore
            .plugin_hook_pre(HookType::SetRecordStatusPre, &payload)
            .await?;

        match status {
            Status::Public => {
                self.tstore
                    .record_save(token, &new_rm, &streams, &record.files)
                    .await?;
            }
            Status::Archived => {
                self.tstore
                    .record_freeze(token, &new_rm, &streams, &record.files)
                    .await?;
            }
            Status::Censored => {
                self.tstore
                    .record_freeze(token, &new_rm, &streams, &record.files)
                    .await?;
                self.tstore.record_del(token).await?;
            }
            Status::Unreviewed => {
                // Unreachable: no transition leads back to unreviewed.
                return Err(StatusTransitionError {
                    from: curr_status,
                    to: status,
                }
                .into());
            }
        }

        info!(%token, from = %curr_status, to = %status, "record status updated");

        self.tstore
            .plugin_hook_post(HookType::SetRecordStatusPost, &payload)
            .await;

        match status {
            Status::Public => {
                self.inventory
                    .move_to_vetted(token, status, unix_now())
                    .await?;
            }
            _ => {
                self.inventory
                    .update(record.metadata.state, token, status, unix_now())
                    .await?;
            }
        }

        self.tstore.record_latest(token).await
    }

    // ------------------------------------------------------------------
    // Record reads
    // ------------------------------------------------------------------

    /// Whether a record exists.
    pub fn record_exists(&self, token: &Token) -> bool {
        self.tstore.record_exists(token)
    }

    /// Batch record read. Missing records are omitted from the reply, not
    /// errored; each reply entry is keyed by the exact token string the
    /// request carried, short or full.
    pub async fn records(
        &self,
        requests: Vec<RecordRequest>,
    ) -> Result<HashMap<String, Record>, BackendError> {
        let mut records = HashMap::with_capacity(requests.len());

        for request in requests {
            if !Token::is_valid_hex(&request.token) {
                debug!(token = request.token, "skipping invalid token");
                continue;
            }
            let Some(token) = self.tstore.token_resolve(&request.token) else {
                debug!(token = request.token, "record not found");
                continue;
            };

            match self
                .tstore
                .record_partial(
                    &token,
                    request.version,
                    &request.filenames,
                    request.omit_all_files,
                )
                .await
            {
                Ok(record) => {
                    records.insert(request.token, record);
                }
                Err(BackendError::RecordNotFound) => {
                    debug!(token = request.token, "record not found");
                }
                Err(e) => {
                    // An unexpected per-record failure does not fail the
                    // whole batch.
                    error!(token = request.token, error = %e, "record lookup failed");
                }
            }
        }

        Ok(records)
    }

    /// Timestamps for a record version (latest when `None`).
    pub async fn record_timestamps(
        &self,
        token: &Token,
        version: Option<u32>,
    ) -> Result<RecordTimestamps, BackendError> {
        self.tstore.record_timestamps(token, version).await
    }

    /// The inventory, filtered by state and status. See
    /// [`InventoryCache::inventory`].
    pub async fn inventory(
        &self,
        state: Option<State>,
        status: Option<Status>,
        page_size: u32,
        page_number: u32,
    ) -> Result<Inventory, BackendError> {
        Ok(self
            .inventory
            .inventory(state, status, page_size, page_number)
            .await)
    }

    /// One page of a state's tokens across all statuses, ordered by most
    /// recent status change.
    pub async fn inventory_ordered(
        &self,
        state: State,
        page_size: u32,
        page_number: u32,
    ) -> Result<Vec<String>, BackendError> {
        Ok(self.inventory.ordered(state, page_size, page_number).await)
    }

    // ------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------

    /// Register a plugin.
    pub fn plugin_register(&self, plugin: Arc<dyn Plugin>) -> Result<(), BackendError> {
        self.tstore.plugin_register(plugin)
    }

    /// Run a plugin's one-time setup.
    pub async fn plugin_setup(&self, plugin_id: &str) -> Result<(), BackendError> {
        self.tstore.plugin_setup(plugin_id).await
    }

    /// Ids and settings of all registered plugins.
    pub fn plugin_inventory(&self) -> Vec<(String, Vec<PluginSetting>)> {
        self.tstore.plugins()
    }

    /// Execute a read-only plugin command. The token is optional on reads.
    pub async fn plugin_read(
        &self,
        token: Option<Token>,
        plugin_id: &str,
        cmd: &str,
        payload: &str,
    ) -> Result<String, BackendError> {
        if let Some(token) = &token {
            if !self.tstore.record_exists(token) {
                return Err(BackendError::RecordNotFound);
            }
        }
        self.tstore.plugin_read(token, plugin_id, cmd, payload).await
    }

    /// Execute a plugin write command under the record lock, wrapped in
    /// the plugin hook pair.
    pub async fn plugin_write(
        &self,
        token: &Token,
        plugin_id: &str,
        cmd: &str,
        payload: &str,
    ) -> Result<String, BackendError> {
        if !self.tstore.record_exists(token) {
            return Err(BackendError::RecordNotFound);
        }

        info!(%token, plugin_id, cmd, "plugin write");

        self.check_shutdown()?;
        let lock = self.record_lock(token);
        let _held = lock.lock().await;

        let pre = HookPluginPre {
            token: token.to_string(),
            plugin_id: plugin_id.to_string(),
            cmd: cmd.to_string(),
            payload: payload.to_string(),
        };
        self.tstore
            .plugin_hook_pre(HookType::PluginPre, &serde_json::to_string(&pre)?)
            .await?;

        let reply = self
            .tstore
            .plugin_write(*token, plugin_id, cmd, payload)
            .await?;

        let post = HookPluginPost {
            plugin_id: plugin_id.to_string(),
            cmd: cmd.to_string(),
            payload: payload.to_string(),
            reply: reply.clone(),
        };
        self.tstore
            .plugin_hook_post(HookType::PluginPost, &serde_json::to_string(&post)?)
            .await;

        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Rebuild the inventory cache from the logs, then run plugin fscks.
    ///
    /// Rebuilt ordering is by each record's last-edit timestamp rather
    /// than its last status change: the status-change timestamp is not
    /// separately preserved on disk, so the edit timestamp stands in.
    pub async fn fsck(&self) -> Result<(), BackendError> {
        info!("running fsck");

        let tokens = self.tstore.inventory();

        let mut vetted: Vec<(Token, Record)> = Vec::new();
        let mut unvetted: Vec<(Token, Record)> = Vec::new();
        for token in tokens {
            let record = match self.tstore.record_partial(&token, None, &[], true).await {
                Ok(record) => record,
                // A log allocated but never saved to. Nothing to index.
                Err(BackendError::RecordNotFound) => continue,
                Err(e) => return Err(e),
            };
            match record.metadata.state {
                State::Vetted => vetted.push((token, record)),
                State::Unvetted => unvetted.push((token, record)),
            }
        }

        // Oldest first, so replaying the adds leaves the newest at the
        // head of each bucket, matching steady-state behavior.
        vetted.sort_by_key(|(_, r)| r.metadata.timestamp);
        unvetted.sort_by_key(|(_, r)| r.metadata.timestamp);
        let total = vetted.len() + unvetted.len();

        self.inventory.clear(State::Unvetted).await?;
        self.inventory.clear(State::Vetted).await?;

        // Vetted records are replayed the way they happened on the record
        // API: added as unvetted, then moved to vetted.
        for (token, record) in &vetted {
            self.inventory
                .add(
                    State::Unvetted,
                    token,
                    Status::Unreviewed,
                    record.metadata.timestamp,
                )
                .await?;
            self.inventory
                .move_to_vetted(token, record.metadata.status, record.metadata.timestamp)
                .await?;
        }
        for (token, record) in &unvetted {
            self.inventory
                .add(
                    State::Unvetted,
                    token,
                    record.metadata.status,
                    record.metadata.timestamp,
                )
                .await?;
        }

        info!(records = total, "inventory rebuilt");

        self.tstore.fsck().await
    }

    /// Shut the backend down. In-flight mutations finish; new ones fail
    /// with [`BackendError::Shutdown`].
    pub fn close(&self) {
        self.tstore.close();
    }
}

/// Whether the record metadata marks a terminal, frozen record.
fn record_is_frozen(rm: &trove_types::RecordMetadata) -> bool {
    matches!(rm.status, Status::Censored | Status::Archived)
}
