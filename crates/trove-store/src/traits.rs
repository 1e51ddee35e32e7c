//! Core trait for the key-value blob store.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::StoreError;

/// Trait for the durable key-value store backing the record engine.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Values are passed as [`Bytes`] to keep batch reads cheap.
///
/// Puts and deletes are durable once the call returns. A `get` omits missing
/// keys from the reply instead of failing, so batch readers can tolerate
/// censored payloads.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Store a batch of blobs.
    ///
    /// With `overwrite` unset, writing to an existing key fails with
    /// [`StoreError::KeyExists`] and the batch is not applied.
    async fn put(&self, blobs: HashMap<String, Bytes>, overwrite: bool) -> Result<(), StoreError>;

    /// Retrieve a batch of blobs. Missing keys are omitted from the reply.
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, StoreError>;

    /// Delete a batch of blobs. Deleting a missing key is not an error.
    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;

    /// List all keys starting with `prefix`.
    async fn enumerate(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
