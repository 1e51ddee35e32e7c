//! In-process timestamping service for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use trove_log::merkle;

use crate::error::StampError;
use crate::{
    zero_transaction, ChainInformation, StampClient, StampResult, TimestampBatchReply,
    VerifyBatchReply, VerifyDigest,
};

/// A scriptable, in-process [`StampClient`].
///
/// Submitted digests sit unconfirmed (zero transaction) until the test
/// calls [`confirm_all`](Self::confirm_all), which "mines" every pending
/// batch: each batch gets a merkle root over its digests, a synthetic
/// transaction id, and a chain timestamp. Re-submitting a known digest
/// reports [`StampResult::Exists`], mirroring the real service.
#[derive(Default)]
pub struct ManualStampClient {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Pending batches, in submission order.
    pending: Vec<Vec<String>>,
    /// Confirmed digests and their chain data.
    confirmed: HashMap<String, ChainInformation>,
    /// All digests ever submitted.
    submitted: HashSet<String>,
    /// Counter used to fabricate distinct transaction ids.
    tx_counter: u64,
}

impl ManualStampClient {
    /// Create an empty test service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm every pending batch, as if the hourly anchor transaction
    /// had been mined and confirmed. Returns the number of digests
    /// confirmed.
    pub fn confirm_all(&self) -> usize {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let mut confirmed = 0;

        let batches = std::mem::take(&mut inner.pending);
        for batch in batches {
            inner.tx_counter += 1;
            let mut tx = [0u8; 32];
            tx[..8].copy_from_slice(&inner.tx_counter.to_be_bytes());

            let leaf_bytes: Vec<Vec<u8>> = batch
                .iter()
                .map(|d| hex::decode(d).expect("test digests are hex"))
                .collect();
            let root = merkle::merkle_root(&leaf_bytes);

            let chain_timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;

            for digest in &batch {
                inner.confirmed.insert(
                    digest.clone(),
                    ChainInformation {
                        chain_timestamp,
                        transaction: hex::encode(tx),
                        merkle_root: hex::encode(root),
                        merkle_path: batch.clone(),
                    },
                );
                confirmed += 1;
            }
        }

        confirmed
    }

    /// Number of digests submitted but not yet confirmed.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("lock poisoned")
            .pending
            .iter()
            .map(|b| b.len())
            .sum()
    }
}

#[async_trait::async_trait]
impl StampClient for ManualStampClient {
    async fn timestamp_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<TimestampBatchReply, StampError> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        let mut results = Vec::with_capacity(digests.len());
        let mut fresh = Vec::new();
        for digest in digests {
            if inner.submitted.contains(digest) {
                results.push(StampResult::Exists);
            } else {
                inner.submitted.insert(digest.clone());
                fresh.push(digest.clone());
                results.push(StampResult::Ok);
            }
        }
        if !fresh.is_empty() {
            inner.pending.push(fresh);
        }

        Ok(TimestampBatchReply {
            id: id.to_string(),
            digests: digests.to_vec(),
            results,
        })
    }

    async fn verify_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<VerifyBatchReply, StampError> {
        let inner = self.inner.lock().expect("lock poisoned");

        let digests = digests
            .iter()
            .map(|digest| match inner.confirmed.get(digest) {
                Some(info) => VerifyDigest {
                    digest: digest.clone(),
                    result: StampResult::Ok,
                    chain_information: info.clone(),
                },
                None if inner.submitted.contains(digest) => VerifyDigest {
                    digest: digest.clone(),
                    result: StampResult::Ok,
                    chain_information: ChainInformation {
                        transaction: zero_transaction(),
                        ..ChainInformation::default()
                    },
                },
                None => VerifyDigest {
                    digest: digest.clone(),
                    result: StampResult::DoesNotExist,
                    chain_information: ChainInformation::default(),
                },
            })
            .collect();

        Ok(VerifyBatchReply {
            id: id.to_string(),
            digests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn digest(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[tokio::test]
    async fn test_submit_then_verify_unconfirmed() {
        let client = ManualStampClient::new();
        let digests = vec![digest(b"a"), digest(b"b")];

        let reply = client.timestamp_batch("test", &digests).await.unwrap();
        assert_eq!(reply.results, vec![StampResult::Ok, StampResult::Ok]);

        let verify = client.verify_batch("test", &digests).await.unwrap();
        for vd in &verify.digests {
            assert!(!vd.is_anchored());
            assert_eq!(vd.chain_information.transaction, zero_transaction());
        }
    }

    #[tokio::test]
    async fn test_confirm_all_anchors_batch() {
        let client = ManualStampClient::new();
        let digests = vec![digest(b"a"), digest(b"b"), digest(b"c")];
        client.timestamp_batch("test", &digests).await.unwrap();

        assert_eq!(client.confirm_all(), 3);
        assert_eq!(client.pending_count(), 0);

        let verify = client.verify_batch("test", &digests).await.unwrap();
        for vd in &verify.digests {
            assert!(vd.is_anchored());
            assert_eq!(vd.chain_information.merkle_path, digests);
        }

        // The reported root matches a recomputation over the path.
        let leaf_bytes: Vec<Vec<u8>> = digests.iter().map(|d| hex::decode(d).unwrap()).collect();
        let root = hex::encode(merkle::merkle_root(&leaf_bytes));
        assert_eq!(verify.digests[0].chain_information.merkle_root, root);
    }

    #[tokio::test]
    async fn test_resubmission_reports_exists() {
        let client = ManualStampClient::new();
        let digests = vec![digest(b"a")];
        client.timestamp_batch("test", &digests).await.unwrap();

        let reply = client.timestamp_batch("test", &digests).await.unwrap();
        assert_eq!(reply.results, vec![StampResult::Exists]);
    }

    #[tokio::test]
    async fn test_unknown_digest_does_not_exist() {
        let client = ManualStampClient::new();
        let verify = client
            .verify_batch("test", &[digest(b"never-submitted")])
            .await
            .unwrap();
        assert_eq!(verify.digests[0].result, StampResult::DoesNotExist);
    }
}
