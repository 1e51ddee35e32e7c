//! Client contract for the external blockchain timestamping service.
//!
//! The service accepts batches of SHA-256 digests, aggregates each batch
//! into a merkle tree, commits the batch root to a blockchain transaction
//! once per hour, and reports confirmation once the transaction has enough
//! confirmations. This crate defines the request/reply contract
//! ([`StampClient`]), an HTTP binding ([`HttpStampClient`]), and an
//! in-process test double ([`testing::ManualStampClient`]).

mod error;
mod http;
pub mod testing;

use serde::{Deserialize, Serialize};

pub use error::StampError;
pub use http::HttpStampClient;

/// Per-digest result code returned by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StampResult {
    /// Malformed digest or request.
    Invalid,
    /// Digest accepted / found.
    Ok,
    /// Digest was already submitted earlier.
    ///
    /// Callers must treat this as idempotent success: it is the normal
    /// crash-recovery case when a batch was partially submitted before a
    /// restart.
    Exists,
    /// Digest is unknown to the service.
    DoesNotExist,
    /// The service is not accepting submissions.
    Disabled,
}

/// Reply to a batch timestamp submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampBatchReply {
    /// Caller-supplied identifier, echoed back.
    pub id: String,
    /// The submitted digests, in submission order.
    pub digests: Vec<String>,
    /// One result per digest, same order.
    pub results: Vec<StampResult>,
}

/// Chain inclusion data for a confirmed digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInformation {
    /// Unix timestamp of the confirmed chain block. Zero until the
    /// timestamp transaction has enough confirmations.
    pub chain_timestamp: i64,
    /// Hex transaction id. A zeroed 32-byte digest until the transaction
    /// has been sent.
    pub transaction: String,
    /// Hex merkle root of the timestamped batch, committed by the
    /// transaction.
    pub merkle_root: String,
    /// Hex digests of the timestamped batch; hashing them back up must
    /// reproduce `merkle_root`.
    pub merkle_path: Vec<String>,
}

/// The hex transaction id the service reports before the anchor
/// transaction has been sent.
pub fn zero_transaction() -> String {
    hex::encode([0u8; 32])
}

/// Verification data for one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDigest {
    /// The digest that was queried.
    pub digest: String,
    /// Result of the lookup.
    pub result: StampResult,
    /// Chain inclusion data, meaningful only when `result` is OK.
    pub chain_information: ChainInformation,
}

impl VerifyDigest {
    /// Whether this digest has been fully anchored: the timestamp
    /// transaction has been sent and has confirmed on chain.
    pub fn is_anchored(&self) -> bool {
        self.result == StampResult::Ok
            && self.chain_information.transaction != zero_transaction()
            && self.chain_information.chain_timestamp != 0
    }
}

/// Reply to a batch verify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyBatchReply {
    /// Caller-supplied identifier, echoed back.
    pub id: String,
    /// One entry per queried digest, same order as the request.
    pub digests: Vec<VerifyDigest>,
}

/// Client contract for the timestamping service.
#[async_trait::async_trait]
pub trait StampClient: Send + Sync {
    /// Submit a batch of hex SHA-256 digests for timestamping.
    async fn timestamp_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<TimestampBatchReply, StampError>;

    /// Query the anchoring status of a batch of digests.
    async fn verify_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<VerifyBatchReply, StampError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_transaction_is_64_zeros() {
        assert_eq!(zero_transaction(), "0".repeat(64));
    }

    #[test]
    fn test_is_anchored_requires_tx_and_timestamp() {
        let mut vd = VerifyDigest {
            digest: "aa".repeat(32),
            result: StampResult::Ok,
            chain_information: ChainInformation {
                chain_timestamp: 0,
                transaction: zero_transaction(),
                merkle_root: String::new(),
                merkle_path: Vec::new(),
            },
        };
        assert!(!vd.is_anchored(), "tx not sent");

        vd.chain_information.transaction = "bb".repeat(32);
        assert!(!vd.is_anchored(), "tx sent but not confirmed");

        vd.chain_information.chain_timestamp = 1_700_000_000;
        assert!(vd.is_anchored());

        vd.result = StampResult::DoesNotExist;
        assert!(!vd.is_anchored());
    }

    #[test]
    fn test_stamp_result_serde() {
        let json = serde_json::to_string(&StampResult::Exists).unwrap();
        assert_eq!(json, "\"exists\"");
    }
}
