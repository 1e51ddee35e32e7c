//! The `pi` plugin: proposal billing-status management.
//!
//! Approved proposals bill against the treasury while their billing status
//! is `active`. Admins move proposals between `active`, `closed`, and
//! `completed`; every accepted transition is recorded as a signed
//! [`BillingStatusChange`] blob on the proposal's record, countersigned by
//! the plugin identity.

mod cmds;


use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tracing::debug;
use trove_engine::{BackendError, HookType, Plugin, PluginClient, PluginSetting};
use trove_types::{PluginError, Token};

pub use cmds::{
    billing_status_current, change_message, BillingStatus, BillingStatusChange,
    BillingStatusChangesReply,
    SetBillingStatus, SetBillingStatusReply, SummaryReply, VoteMetadata, VoteStatus, VoteSummary,
    CMD_BILLING_STATUS_CHANGES, CMD_SET_BILLING_STATUS, CMD_SUMMARY, DESC_BILLING_STATUS,
    ERR_BILLING_STATUS_CHANGE_NOT_ALLOWED, ERR_BILLING_STATUS_INVALID, ERR_CMD_INVALID,
    ERR_PUBLIC_KEY_INVALID, ERR_SIGNATURE_INVALID, ERR_TOKEN_INVALID, FILENAME_VOTE_METADATA,
    VOTE_PLUGIN_ID, VOTE_STREAM_ID_SUMMARY,
};

/// Plugin identifier.
pub const PLUGIN_ID: &str = "pi";

/// Setting that caps the number of billing status changes per proposal.
pub const SETTING_BILLING_STATUS_CHANGES_MAX: &str = "billingstatuschangesmax";

/// Default for [`SETTING_BILLING_STATUS_CHANGES_MAX`].
pub const BILLING_STATUS_CHANGES_MAX_DEFAULT: u32 = 1;

/// The billing-status plugin.
pub struct BillingPlugin {
    tstore: Arc<dyn PluginClient>,
    identity: SigningKey,
    changes_max: u32,
}

impl BillingPlugin {
    /// Construct the plugin against the plugin-facing tstore surface.
    ///
    /// Recognized settings: [`SETTING_BILLING_STATUS_CHANGES_MAX`].
    pub fn new(
        tstore: Arc<dyn PluginClient>,
        identity: SigningKey,
        settings: &[PluginSetting],
    ) -> Self {
        let mut changes_max = BILLING_STATUS_CHANGES_MAX_DEFAULT;
        for setting in settings {
            if setting.key == SETTING_BILLING_STATUS_CHANGES_MAX {
                if let Ok(value) = setting.value.parse() {
                    changes_max = value;
                }
            }
        }
        debug!(changes_max, "billing plugin configured");
        Self {
            tstore,
            identity,
            changes_max,
        }
    }

    /// Hex public key of the plugin identity that countersigns receipts.
    pub fn public_key(&self) -> String {
        hex::encode(self.identity.verifying_key().to_bytes())
    }
}

#[async_trait::async_trait]
impl Plugin for BillingPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn settings(&self) -> Vec<PluginSetting> {
        vec![PluginSetting {
            key: SETTING_BILLING_STATUS_CHANGES_MAX.to_string(),
            value: self.changes_max.to_string(),
        }]
    }

    async fn setup(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn read(
        &self,
        token: Option<Token>,
        cmd: &str,
        _payload: &str,
    ) -> Result<String, BackendError> {
        let token = token.ok_or_else(|| PluginError {
            plugin_id: PLUGIN_ID.to_string(),
            code: ERR_TOKEN_INVALID,
            context: "token not provided".to_string(),
        })?;

        match cmd {
            CMD_BILLING_STATUS_CHANGES => self.cmd_billing_status_changes(&token).await,
            CMD_SUMMARY => self.cmd_summary(&token).await,
            _ => Err(PluginError {
                plugin_id: PLUGIN_ID.to_string(),
                code: ERR_CMD_INVALID,
                context: format!("unknown command: {cmd}"),
            }
            .into()),
        }
    }

    async fn write(&self, token: Token, cmd: &str, payload: &str) -> Result<String, BackendError> {
        match cmd {
            CMD_SET_BILLING_STATUS => self.cmd_set_billing_status(&token, payload).await,
            _ => Err(PluginError {
                plugin_id: PLUGIN_ID.to_string(),
                code: ERR_CMD_INVALID,
                context: format!("unknown command: {cmd}"),
            }
            .into()),
        }
    }

    async fn hook(&self, _hook: HookType, _payload: &str) -> Result<(), BackendError> {
        // Billing imposes no constraints on record mutations.
        Ok(())
    }

    async fn fsck(&self) -> Result<(), BackendError> {
        // All billing state is derived from record blobs; no caches.
        Ok(())
    }
}
