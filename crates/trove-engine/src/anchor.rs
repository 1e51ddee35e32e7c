//! The anchor engine: periodic cryptographic timestamping of log roots.
//!
//! Once an hour every log with unanchored leaves has its current root hash
//! submitted to the external timestamping service in one batch. A spawned
//! wait task then polls the service until every digest in the batch has a
//! confirmed chain timestamp, verifies the returned merkle paths, and
//! writes one anchor blob + anchor leaf per log. A leaf appended before an
//! anchor's tree size is provably covered by that anchor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use trove_log::{merkle, LogRoot, NewLeaf};
use trove_stamp::{StampResult, VerifyDigest};
use trove_store::{blobify, deblob, key_new, BlobEntry, DataDescriptor};

use crate::error::BackendError;
use crate::tstore::{digest_array, ExtraData, Tstore, DESC_ANCHOR};

/// Identifier included in timestamp and verify requests.
const ANCHOR_ID: &str = "tstorebe";

/// Anchor schedule: second 0 of minute 56, every hour. The external
/// service drops its anchor transaction on the hour, so submissions a few
/// minutes before that make the current batch.
pub const ANCHOR_SCHEDULE: &str = "0 56 * * * *";

/// How often the wait task polls the service for confirmation.
const ANCHOR_WAIT_PERIOD: Duration = Duration::from_secs(5 * 60);

/// How many polls before giving up. 36 polls at 5 minutes gives the
/// timestamp transaction 180 minutes to confirm.
const ANCHOR_WAIT_RETRIES: u32 = 36;

/// A timestamp of a log at a specific tree size.
///
/// Only `log_root.root_hash` is submitted for anchoring, but the whole log
/// root is kept so inclusion proofs can later be derived for any leaf the
/// root covers. `verify_digest` is the chain receipt, attached once the
/// anchor has confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Hex token of the anchored log.
    pub token: String,
    /// The log root that was anchored.
    pub log_root: LogRoot,
    /// Chain receipt; present once confirmed.
    pub verify_digest: Option<VerifyDigest>,
}

impl Anchor {
    fn encode(&self) -> Result<BlobEntry, BackendError> {
        Ok(BlobEntry::new(
            &DataDescriptor::structure(DESC_ANCHOR),
            &serde_json::to_vec(self)?,
        )?)
    }

    fn decode(entry: &BlobEntry) -> Result<Self, BackendError> {
        Ok(entry.decode_structure(DESC_ANCHOR)?)
    }
}

/// Clears the dropping-anchor flag on every exit path of the wait task.
struct DroppingGuard<'a>(&'a Tstore);

impl Drop for DroppingGuard<'_> {
    fn drop(&mut self) {
        self.0.dropping_anchor_set(false);
    }
}

impl Tstore {
    pub(crate) fn dropping_anchor_get(&self) -> bool {
        *self.dropping_anchor.lock().expect("lock poisoned")
    }

    pub(crate) fn dropping_anchor_set(&self, dropping: bool) {
        *self.dropping_anchor.lock().expect("lock poisoned") = dropping;
    }

    /// The most recent anchor of a log, if any.
    pub async fn anchor_latest(
        &self,
        token: &trove_types::Token,
    ) -> Result<Option<Anchor>, BackendError> {
        let leaves = self.log().leaves_all(token)?;

        let mut key = None;
        for leaf in leaves.iter().rev() {
            let extra = ExtraData::decode(&leaf.extra_data)?;
            if extra.descriptor == DESC_ANCHOR {
                key = Some(extra.key);
                break;
            }
        }
        let Some(key) = key else {
            return Ok(None);
        };

        let blobs = self.store().get(&[key.clone()]).await?;
        let blob = blobs
            .get(&key)
            .ok_or_else(|| BackendError::Internal(format!("anchor blob missing {key}")))?;
        Ok(Some(Anchor::decode(&deblob(blob)?)?))
    }

    /// The anchor covering a specific leaf, if it has been anchored.
    ///
    /// Scans forward from the leaf for the next two anchor leaves: a leaf
    /// added mid-drop is not covered by the in-flight anchor, only by the
    /// one after it. The covering anchor is the first whose tree size
    /// exceeds the leaf index.
    pub async fn anchor_for_leaf(
        &self,
        token: &trove_types::Token,
        merkle_leaf_hash: &[u8; 32],
    ) -> Result<Option<Anchor>, BackendError> {
        let leaves = self.log().leaves_all(token)?;

        let leaf = leaves
            .iter()
            .find(|l| l.merkle_leaf_hash == *merkle_leaf_hash)
            .ok_or_else(|| BackendError::Internal("leaf not found".to_string()))?;

        let mut keys = Vec::with_capacity(2);
        for candidate in &leaves[leaf.leaf_index as usize..] {
            let extra = ExtraData::decode(&candidate.extra_data)?;
            if extra.descriptor == DESC_ANCHOR {
                keys.push(extra.key);
                if keys.len() == 2 {
                    break;
                }
            }
        }
        if keys.is_empty() {
            return Ok(None);
        }

        let blobs = self.store().get(&keys).await?;
        for key in &keys {
            let blob = blobs
                .get(key)
                .ok_or_else(|| BackendError::Internal(format!("anchor blob missing {key}")))?;
            let anchor = Anchor::decode(&deblob(blob)?)?;
            if leaf.leaf_index < anchor.log_root.tree_size {
                return Ok(Some(anchor));
            }
        }
        Ok(None)
    }

    /// Persist a confirmed anchor: blob to the store, anchor leaf to the
    /// log. Frozen logs accept their covering anchor leaf.
    async fn anchor_save(&self, anchor: &Anchor) -> Result<(), BackendError> {
        if anchor.verify_digest.is_none() {
            return Err(BackendError::Internal(
                "anchor is missing its verify digest".to_string(),
            ));
        }
        let token = trove_types::Token::from_hex(&anchor.token)
            .map_err(|e| BackendError::Internal(format!("anchor token: {e}")))?;

        let entry = anchor.encode()?;
        let key = key_new();
        let mut blobs = HashMap::new();
        blobs.insert(key.clone(), blobify(&entry)?);
        self.store().put(blobs, false).await?;

        let appended = self.log().leaves_append(
            &token,
            vec![NewLeaf::new(
                digest_array(&entry.digest)?,
                ExtraData::new(&key, DESC_ANCHOR, 0).encode()?,
            )],
            true,
        )?;
        if appended.len() != 1 {
            return Err(BackendError::Internal(format!(
                "wrong number of queued anchor leaves: got {}, want 1",
                appended.len()
            )));
        }

        debug!(
            token = %anchor.token,
            tree_size = anchor.log_root.tree_size,
            "anchor saved"
        );
        Ok(())
    }

    /// Drop an anchor for every log with unanchored leaves.
    ///
    /// Collects one digest per such log (the hex of its current root
    /// hash), submits the batch to the timestamping service, and spawns
    /// [`anchor_wait`](Self::anchor_wait) to poll for confirmation. A
    /// digest the service has already seen is idempotent success: it is
    /// the crash-recovery case for a batch submitted before a restart.
    pub async fn anchor_trees(self: &Arc<Self>) -> Result<(), BackendError> {
        self.anchor_trees_with(ANCHOR_WAIT_PERIOD, ANCHOR_WAIT_RETRIES)
            .await?;
        Ok(())
    }

    /// [`anchor_trees`](Self::anchor_trees) with an explicit wait cadence.
    /// Returns the wait task's handle so callers can await confirmation;
    /// `None` when no log needed anchoring.
    pub(crate) async fn anchor_trees_with(
        self: &Arc<Self>,
        period: Duration,
        retries: u32,
    ) -> Result<Option<tokio::task::JoinHandle<()>>, BackendError> {
        debug!("start anchor process");

        if self.dropping_anchor_get() {
            // The previous anchor has not confirmed yet. This happens when
            // the chain takes longer than the anchor period to confirm the
            // timestamp transaction; the next tick picks the trees up.
            info!("previous anchor still dropping; skipping this anchor period");
            return Ok(None);
        }

        let mut anchors = Vec::new();
        let mut digests = Vec::new();

        for token in self.log().trees_all() {
            match self.anchor_latest(&token).await? {
                None => {
                    // Never anchored. An empty log has nothing to anchor.
                    if self.log().leaf_count(&token)? == 0 {
                        continue;
                    }
                }
                Some(anchor) => {
                    let root = self.log().log_root(&token)?;
                    // The anchor leaf itself is one past the anchored
                    // height.
                    if anchor.log_root.tree_size == root.tree_size - 1 {
                        continue;
                    }
                }
            }

            let log_root = self.log().log_root(&token)?;
            digests.push(hex::encode(log_root.root_hash));
            debug!(%token, tree_size = log_root.tree_size, "anchoring log");
            anchors.push(Anchor {
                token: token.to_string(),
                log_root,
                verify_digest: None,
            });
        }

        if anchors.is_empty() {
            info!("no logs to anchor");
            return Ok(None);
        }

        info!(logs = anchors.len(), "anchoring logs");
        let reply = self.stamper().timestamp_batch(ANCHOR_ID, &digests).await?;

        let mut failed = false;
        for (digest, result) in reply.digests.iter().zip(reply.results.iter()) {
            match result {
                StampResult::Ok => {}
                StampResult::Exists => {
                    warn!(digest, "digest was already submitted");
                }
                other => {
                    error!(digest, result = ?other, "digest rejected");
                    failed = true;
                }
            }
        }
        if failed {
            return Err(BackendError::Internal(
                "timestamp service failed to accept digests".to_string(),
            ));
        }

        let tstore = self.clone();
        let handle = tokio::spawn(async move {
            tstore
                .anchor_wait_with(anchors, digests, period, retries)
                .await;
        });

        Ok(Some(handle))
    }

    /// Poll the timestamping service until every digest in the batch has
    /// confirmed, then verify and save the anchors.
    ///
    /// An anchor is not confirmed until its reply carries both a non-zero
    /// transaction and a non-zero chain timestamp. Digests confirmed by an
    /// earlier transaction (pre-restart submissions) count as confirmed,
    /// but the whole batch must confirm before anchors are saved.
    pub async fn anchor_wait(self: Arc<Self>, anchors: Vec<Anchor>, digests: Vec<String>) {
        self.anchor_wait_with(anchors, digests, ANCHOR_WAIT_PERIOD, ANCHOR_WAIT_RETRIES)
            .await
    }

    pub(crate) async fn anchor_wait_with(
        self: Arc<Self>,
        anchors: Vec<Anchor>,
        digests: Vec<String>,
        period: Duration,
        retries: u32,
    ) {
        if self.dropping_anchor_get() {
            error!("anchor wait started reentrantly");
            return;
        }
        self.dropping_anchor_set(true);
        let _guard = DroppingGuard(&self);

        info!("waiting for anchor to drop");
        let mut shutdown = self.shutdown_rx();

        for attempt in 0..retries {
            if self.is_shutdown() {
                info!("shutdown while waiting for anchor");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown while waiting for anchor");
                        return;
                    }
                }
            }

            debug!(attempt = attempt + 1, retries, "verify anchor attempt");

            let reply = match self.stamper().verify_batch(ANCHOR_ID, &digests).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "verify batch failed");
                    return;
                }
            };

            let mut anchored = 0;
            for vd in &reply.digests {
                if vd.result != StampResult::Ok {
                    error!(digest = vd.digest, result = ?vd.result, "digest verify failed");
                    break;
                }
                if !vd.is_anchored() {
                    debug!(digest = vd.digest, "anchor not confirmed yet; retrying");
                    break;
                }
                anchored += 1;
            }
            if anchored != digests.len() {
                continue;
            }

            for (anchor, vd) in anchors.iter().zip(reply.digests.iter()) {
                // The receipt must be for the root we submitted.
                let root_hex = hex::encode(anchor.log_root.root_hash);
                if vd.digest != root_hex {
                    error!(got = vd.digest, want = root_hex, "anchored digest mismatch");
                    continue;
                }

                // The merkle path must resolve to the committed root.
                let path: Vec<Vec<u8>> = vd
                    .chain_information
                    .merkle_path
                    .iter()
                    .filter_map(|h| hex::decode(h).ok())
                    .collect();
                let computed = hex::encode(merkle::merkle_root(&path));
                if computed != vd.chain_information.merkle_root {
                    error!(
                        got = computed,
                        want = vd.chain_information.merkle_root,
                        "merkle path does not resolve to chain root"
                    );
                    continue;
                }

                // And our digest must be in it.
                if !vd.chain_information.merkle_path.contains(&vd.digest) {
                    error!(digest = vd.digest, "digest not found in merkle path");
                    continue;
                }

                let mut confirmed = anchor.clone();
                confirmed.verify_digest = Some(vd.clone());
                if let Err(e) = self.anchor_save(&confirmed).await {
                    error!(token = anchor.token, error = %e, "anchor save failed");
                    continue;
                }
            }

            info!(logs = reply.digests.len(), "anchor dropped");
            return;
        }

        error!(
            waited_minutes = period.as_secs() * u64::from(retries) / 60,
            "anchor drop timed out"
        );
    }
}

/// Start the cron scheduler that fires [`Tstore::anchor_trees`] at minute
/// 56 of every hour. The returned scheduler keeps the job alive; shut it
/// down alongside the backend.
pub async fn anchor_scheduler_start(tstore: Arc<Tstore>) -> Result<JobScheduler, BackendError> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| BackendError::Scheduler(e.to_string()))?;

    let job = Job::new_async(ANCHOR_SCHEDULE, move |_uuid, _lock| {
        let tstore = tstore.clone();
        Box::pin(async move {
            if let Err(e) = tstore.anchor_trees().await {
                error!(error = %e, "scheduled anchor drop failed");
            }
        })
    })
    .map_err(|e| BackendError::Scheduler(e.to_string()))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| BackendError::Scheduler(e.to_string()))?;
    scheduler
        .start()
        .await
        .map_err(|e| BackendError::Scheduler(e.to_string()))?;

    info!(schedule = ANCHOR_SCHEDULE, "anchor scheduler started");
    Ok(scheduler)
}
