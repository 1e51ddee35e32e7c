//! Billing-status commands and entities.

use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use trove_engine::BackendError;
use trove_store::{BlobEntry, DataDescriptor};
use trove_types::{PluginError, Token};

use crate::{BillingPlugin, PLUGIN_ID};

/// Set a proposal's billing status.
pub const CMD_SET_BILLING_STATUS: &str = "setbillingstatus";
/// List a proposal's billing status changes.
pub const CMD_BILLING_STATUS_CHANGES: &str = "billingstatuschanges";
/// Derived billing summary of a proposal.
pub const CMD_SUMMARY: &str = "summary";

/// Blob descriptor of billing status changes.
pub const DESC_BILLING_STATUS: &str = "pi-billingstatus-v1";

/// Plugin owning the vote summary metadata stream.
pub const VOTE_PLUGIN_ID: &str = "ticketvote";
/// Stream id of the vote summary within [`VOTE_PLUGIN_ID`].
pub const VOTE_STREAM_ID_SUMMARY: u32 = 2;
/// File holding the vote metadata of a proposal.
pub const FILENAME_VOTE_METADATA: &str = "votemetadata.json";

/// The command token does not match the payload token.
pub const ERR_TOKEN_INVALID: u32 = 1;
/// The public key is not a valid hex ed25519 key.
pub const ERR_PUBLIC_KEY_INVALID: u32 = 2;
/// The signature does not verify.
pub const ERR_SIGNATURE_INVALID: u32 = 3;
/// The billing status is not one of the known statuses.
pub const ERR_BILLING_STATUS_INVALID: u32 = 4;
/// The billing status change is not allowed.
pub const ERR_BILLING_STATUS_CHANGE_NOT_ALLOWED: u32 = 5;
/// The command is not provided by this plugin.
pub const ERR_CMD_INVALID: u32 = 6;

/// Billing status of an approved proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    /// The proposal may bill against the treasury.
    Active,
    /// Billing has been closed before completion. Requires a reason.
    Closed,
    /// All work has been billed.
    Completed,
}

impl BillingStatus {
    /// Stable digit used in the signed message.
    fn digit(self) -> u32 {
        match self {
            BillingStatus::Active => 1,
            BillingStatus::Closed => 2,
            BillingStatus::Completed => 3,
        }
    }
}

/// Vote status of a proposal, as published by the ticket-vote module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStatus {
    /// Voting has not been authorized.
    Unauthorized,
    /// Voting has been authorized but not started.
    Authorized,
    /// Voting is underway.
    Started,
    /// Voting finished without meeting approval.
    Rejected,
    /// Voting finished and the proposal was approved.
    Approved,
}

/// The ticket-vote summary decoded from its metadata stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSummary {
    /// Outcome of the proposal vote.
    pub status: VoteStatus,
}

/// Vote metadata file contents. A non-zero `link_by` marks an RFP: a
/// proposal that solicits submissions rather than billing itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteMetadata {
    /// Deadline by which submissions must link to this proposal.
    #[serde(default)]
    pub link_by: i64,
    /// Token of the RFP this proposal submits to.
    #[serde(default)]
    pub link_to: String,
}

/// Wire form of [`CMD_SET_BILLING_STATUS`] with the status left undecoded,
/// so an unknown status reports [`ERR_BILLING_STATUS_INVALID`] instead of
/// a decode failure.
#[derive(Deserialize)]
struct SetBillingStatusRaw {
    token: String,
    status: serde_json::Value,
    #[serde(default)]
    reason: String,
    public_key: String,
    signature: String,
}

/// Payload of [`CMD_SET_BILLING_STATUS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBillingStatus {
    /// Hex token of the proposal. Must be the full-length token.
    pub token: String,
    /// Requested billing status.
    pub status: BillingStatus,
    /// Reason for the change. Required when closing.
    #[serde(default)]
    pub reason: String,
    /// Hex ed25519 public key of the admin.
    pub public_key: String,
    /// Hex signature over `token + status digit + reason`.
    pub signature: String,
}

/// Reply of [`CMD_SET_BILLING_STATUS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBillingStatusReply {
    /// Server timestamp of the accepted change.
    pub timestamp: i64,
    /// Hex plugin-identity signature over the admin signature.
    pub receipt: String,
}

/// An accepted billing status change, stored as a record blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingStatusChange {
    /// Hex token of the proposal.
    pub token: String,
    /// The status that was set.
    pub status: BillingStatus,
    /// Reason for the change.
    pub reason: String,
    /// Hex public key of the admin.
    pub public_key: String,
    /// Hex admin signature over `token + status digit + reason`.
    pub signature: String,
    /// Server timestamp of the change.
    pub timestamp: i64,
    /// Hex plugin-identity signature over `signature`.
    pub receipt: String,
}

/// Reply of [`CMD_BILLING_STATUS_CHANGES`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingStatusChangesReply {
    /// All changes, oldest first.
    pub changes: Vec<BillingStatusChange>,
}

/// Reply of [`CMD_SUMMARY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReply {
    /// Derived billing status. `None` when the proposal has no billing
    /// status (vote not approved).
    pub billing_status: Option<BillingStatus>,
}

/// Derive the current billing status from the vote outcome and the change
/// history. Approved proposals with no changes yet are active.
pub fn billing_status_current(
    vote_status: VoteStatus,
    changes: &[BillingStatusChange],
) -> Option<BillingStatus> {
    if vote_status != VoteStatus::Approved {
        return None;
    }
    Some(
        changes
            .last()
            .map(|change| change.status)
            .unwrap_or(BillingStatus::Active),
    )
}

fn plugin_error(code: u32, context: impl Into<String>) -> BackendError {
    PluginError {
        plugin_id: PLUGIN_ID.to_string(),
        code,
        context: context.into(),
    }
    .into()
}

fn change_not_allowed(context: impl Into<String>) -> BackendError {
    plugin_error(ERR_BILLING_STATUS_CHANGE_NOT_ALLOWED, context)
}

/// Verify an admin signature over `msg`.
fn verify_signature(signature: &str, public_key: &str, msg: &str) -> Result<(), BackendError> {
    let key_bytes: [u8; 32] = hex::decode(public_key)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| plugin_error(ERR_PUBLIC_KEY_INVALID, "not a valid hex key"))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| plugin_error(ERR_PUBLIC_KEY_INVALID, "not a valid ed25519 key"))?;

    let sig_bytes: [u8; 64] = hex::decode(signature)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| plugin_error(ERR_SIGNATURE_INVALID, "not a valid hex signature"))?;

    key.verify(msg.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| plugin_error(ERR_SIGNATURE_INVALID, "signature verification failed"))
}

/// The message an admin signs for a billing status change.
pub fn change_message(token: &str, status: BillingStatus, reason: &str) -> String {
    format!("{token}{}{reason}", status.digit())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl BillingPlugin {
    /// The proposal's vote summary, decoded from the ticket-vote summary
    /// metadata stream. A proposal without one has not finished voting.
    fn vote_summary(
        &self,
        record: &trove_types::Record,
    ) -> Result<Option<VoteSummary>, BackendError> {
        let Some(stream) = record
            .streams
            .iter()
            .find(|s| s.plugin_id == VOTE_PLUGIN_ID && s.stream_id == VOTE_STREAM_ID_SUMMARY)
        else {
            return Ok(None);
        };

        // The summary is an overwrite-mode stream: a single JSON object.
        // Tolerate trailing newlines from append-style writers by taking
        // the last non-empty line.
        let line = stream
            .payload
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        Ok(Some(serde_json::from_str(line)?))
    }

    /// Decode the proposal's vote metadata file, when present.
    fn vote_metadata(
        &self,
        record: &trove_types::Record,
    ) -> Result<Option<VoteMetadata>, BackendError> {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

        let Some(file) = record
            .files
            .iter()
            .find(|f| f.name == FILENAME_VOTE_METADATA)
        else {
            return Ok(None);
        };
        let payload = BASE64
            .decode(&file.payload)
            .map_err(|e| BackendError::Internal(format!("vote metadata payload: {e}")))?;
        Ok(Some(serde_json::from_slice(&payload)?))
    }

    /// All billing status changes of a proposal, oldest first.
    async fn billing_status_changes(
        &self,
        token: &Token,
    ) -> Result<Vec<BillingStatusChange>, BackendError> {
        let entries = self
            .tstore
            .blobs_by_data_desc(token, &[DESC_BILLING_STATUS.to_string()])
            .await?;

        let mut changes = Vec::with_capacity(entries.len());
        for entry in entries {
            changes.push(entry.decode_structure::<BillingStatusChange>(DESC_BILLING_STATUS)?);
        }

        // Leaf order is already oldest to newest; the sort is a sanity
        // pass over clock skew.
        changes.sort_by_key(|change| change.timestamp);
        Ok(changes)
    }

    pub(crate) async fn cmd_set_billing_status(
        &self,
        token: &Token,
        payload: &str,
    ) -> Result<String, BackendError> {
        let raw: SetBillingStatusRaw = serde_json::from_str(payload)?;

        // The payload token must be the full-length token of the record
        // the command is executing against.
        match Token::from_hex(&raw.token) {
            Ok(payload_token) if payload_token == *token => {}
            _ => {
                return Err(plugin_error(
                    ERR_TOKEN_INVALID,
                    format!("payload token does not match command token: {}", raw.token),
                ))
            }
        }

        // The status must be one of the known statuses.
        let status: BillingStatus = serde_json::from_value(raw.status)
            .map_err(|_| plugin_error(ERR_BILLING_STATUS_INVALID, "invalid billing status"))?;

        let cmd = SetBillingStatus {
            token: raw.token,
            status,
            reason: raw.reason,
            public_key: raw.public_key,
            signature: raw.signature,
        };

        verify_signature(
            &cmd.signature,
            &cmd.public_key,
            &change_message(&cmd.token, cmd.status, &cmd.reason),
        )?;

        if cmd.status == BillingStatus::Closed && cmd.reason.is_empty() {
            return Err(change_not_allowed(
                "must provide a reason when setting billing status to closed",
            ));
        }

        // Billing status only exists once the proposal vote was approved.
        let record = self
            .tstore
            .record_partial(token, None, &[FILENAME_VOTE_METADATA.to_string()], false)
            .await?;
        let vote_status = match self.vote_summary(&record)? {
            Some(summary) => summary.status,
            None => VoteStatus::Unauthorized,
        };
        if vote_status != VoteStatus::Approved {
            return Err(change_not_allowed(
                "setting billing status is allowed only if the proposal vote was approved",
            ));
        }

        // RFPs solicit submissions; they do not bill and have no billing
        // status.
        if let Some(vm) = self.vote_metadata(&record)? {
            if vm.link_by != 0 {
                return Err(change_not_allowed("rfp proposals do not have a billing status"));
            }
        }

        let changes = self.billing_status_changes(token).await?;
        if changes.len() as u32 + 1 > self.changes_max {
            return Err(change_not_allowed(
                "number of billing status changes exceeds the maximum allowed",
            ));
        }

        // The vote was checked to be approved, so a current status exists.
        let current =
            billing_status_current(vote_status, &changes).unwrap_or(BillingStatus::Active);
        if current == cmd.status {
            return Err(change_not_allowed(format!(
                "invalid billing status transition, {current:?} to {:?} is not allowed",
                cmd.status
            )));
        }

        // Countersign the admin signature.
        let receipt = self.identity.sign(cmd.signature.as_bytes());
        let change = BillingStatusChange {
            token: cmd.token,
            status: cmd.status,
            reason: cmd.reason,
            public_key: cmd.public_key,
            signature: cmd.signature,
            timestamp: unix_now(),
            receipt: hex::encode(receipt.to_bytes()),
        };

        let entry = BlobEntry::new(
            &DataDescriptor::structure(DESC_BILLING_STATUS),
            &serde_json::to_vec(&change)?,
        )
        .map_err(BackendError::Store)?;
        self.tstore.blob_save(token, entry).await?;

        let reply = SetBillingStatusReply {
            timestamp: change.timestamp,
            receipt: change.receipt,
        };
        Ok(serde_json::to_string(&reply)?)
    }

    pub(crate) async fn cmd_billing_status_changes(
        &self,
        token: &Token,
    ) -> Result<String, BackendError> {
        let changes = self.billing_status_changes(token).await?;
        Ok(serde_json::to_string(&BillingStatusChangesReply { changes })?)
    }

    pub(crate) async fn cmd_summary(&self, token: &Token) -> Result<String, BackendError> {
        let record = self.tstore.record_partial(token, None, &[], true).await?;
        let vote_status = match self.vote_summary(&record)? {
            Some(summary) => summary.status,
            None => VoteStatus::Unauthorized,
        };
        let changes = self.billing_status_changes(token).await?;

        let reply = SummaryReply {
            billing_status: billing_status_current(vote_status, &changes),
        };
        Ok(serde_json::to_string(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn change(status: BillingStatus, timestamp: i64) -> BillingStatusChange {
        BillingStatusChange {
            token: "ab".repeat(32),
            status,
            reason: String::new(),
            public_key: String::new(),
            signature: String::new(),
            timestamp,
            receipt: String::new(),
        }
    }

    #[test]
    fn test_current_status_requires_approval() {
        for status in [
            VoteStatus::Unauthorized,
            VoteStatus::Authorized,
            VoteStatus::Started,
            VoteStatus::Rejected,
        ] {
            assert_eq!(billing_status_current(status, &[]), None);
        }
    }

    #[test]
    fn test_current_status_defaults_to_active() {
        assert_eq!(
            billing_status_current(VoteStatus::Approved, &[]),
            Some(BillingStatus::Active)
        );
    }

    #[test]
    fn test_current_status_uses_latest_change() {
        let changes = vec![
            change(BillingStatus::Closed, 10),
            change(BillingStatus::Active, 20),
            change(BillingStatus::Completed, 30),
        ];
        assert_eq!(
            billing_status_current(VoteStatus::Approved, &changes),
            Some(BillingStatus::Completed)
        );
    }

    #[test]
    fn test_change_message_digits() {
        assert_eq!(change_message("aa", BillingStatus::Active, "r"), "aa1r");
        assert_eq!(change_message("aa", BillingStatus::Closed, ""), "aa2");
        assert_eq!(change_message("aa", BillingStatus::Completed, "x"), "aa3x");
    }

    #[test]
    fn test_verify_signature_roundtrip() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let msg = change_message(&"aa".repeat(32), BillingStatus::Closed, "done");
        let signature = hex::encode(key.sign(msg.as_bytes()).to_bytes());
        let public_key = hex::encode(key.verifying_key().to_bytes());

        verify_signature(&signature, &public_key, &msg).unwrap();

        // A different message fails.
        let err = verify_signature(&signature, &public_key, "other message");
        assert!(err.is_err());

        // A mangled key fails.
        let err = verify_signature(&signature, "zz", &msg);
        assert!(err.is_err());
    }

    #[test]
    fn test_billing_status_serde() {
        assert_eq!(
            serde_json::to_string(&BillingStatus::Closed).unwrap(),
            "\"closed\""
        );
        let status: BillingStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, BillingStatus::Completed);
    }
}
