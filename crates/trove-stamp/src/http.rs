//! HTTP binding of the timestamping-service contract.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::StampError;
use crate::{StampClient, TimestampBatchReply, VerifyBatchReply};

/// Per-request timeout. The service batches work hourly, so anything that
/// has not answered within a few seconds is down, not slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct BatchRequest<'a> {
    id: &'a str,
    digests: &'a [String],
}

/// [`StampClient`] over HTTP.
pub struct HttpStampClient {
    client: reqwest::Client,
    host: String,
}

impl HttpStampClient {
    /// Create a client for the service at `host` (scheme + authority,
    /// no trailing slash).
    pub fn new(host: impl Into<String>) -> Result<Self, StampError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }
}

#[async_trait::async_trait]
impl StampClient for HttpStampClient {
    async fn timestamp_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<TimestampBatchReply, StampError> {
        let url = format!("{}/v2/timestamp/batch", self.host);
        debug!(url, digests = digests.len(), "submitting timestamp batch");

        let reply: TimestampBatchReply = self
            .client
            .post(&url)
            .json(&BatchRequest { id, digests })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if reply.results.len() != digests.len() {
            return Err(StampError::MalformedReply(format!(
                "got {} results for {} digests",
                reply.results.len(),
                digests.len()
            )));
        }
        Ok(reply)
    }

    async fn verify_batch(
        &self,
        id: &str,
        digests: &[String],
    ) -> Result<VerifyBatchReply, StampError> {
        let url = format!("{}/v2/verify/batch", self.host);
        debug!(url, digests = digests.len(), "verifying timestamp batch");

        let reply: VerifyBatchReply = self
            .client
            .post(&url)
            .json(&BatchRequest { id, digests })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if reply.digests.len() != digests.len() {
            return Err(StampError::MalformedReply(format!(
                "got {} digests for {} queried",
                reply.digests.len(),
                digests.len()
            )));
        }
        Ok(reply)
    }
}
