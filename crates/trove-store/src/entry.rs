//! The typed, digest-addressed unit of storage.
//!
//! Every value persisted through a [`KvStore`](crate::KvStore) is a
//! [`BlobEntry`]: a base64 payload, a hex SHA-256 digest of the raw payload,
//! and a base64 JSON data hint describing what the payload is. The hint's
//! `descriptor` is the only thing that gives a stored blob (and the log leaf
//! pointing at it) its meaning.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Coarse payload category recorded in a [`DataDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// A JSON-encoded structure.
    Structure,
}

/// Describes the payload of a [`BlobEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDescriptor {
    /// Payload category.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Payload descriptor, e.g. `"recordMetadata"`, `"file"`, or a
    /// plugin-owned identifier.
    pub descriptor: String,
}

impl DataDescriptor {
    /// A structure descriptor with the given identifier.
    pub fn structure(descriptor: impl Into<String>) -> Self {
        Self {
            data_type: DataType::Structure,
            descriptor: descriptor.into(),
        }
    }
}

/// The atom of storage.
///
/// Invariant: `digest == hex(sha256(base64decode(data)))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    /// Base64-encoded JSON [`DataDescriptor`].
    pub data_hint: String,
    /// Base64-encoded payload.
    pub data: String,
    /// Hex SHA-256 digest of the raw payload.
    pub digest: String,
}

impl BlobEntry {
    /// Build an entry from a descriptor and raw payload bytes.
    pub fn new(descriptor: &DataDescriptor, payload: &[u8]) -> Result<Self, StoreError> {
        let hint = serde_json::to_vec(descriptor)?;
        Ok(Self {
            data_hint: BASE64.encode(hint),
            data: BASE64.encode(payload),
            digest: hex::encode(Sha256::digest(payload)),
        })
    }

    /// Decode the data hint into its [`DataDescriptor`].
    pub fn data_descriptor(&self) -> Result<DataDescriptor, StoreError> {
        let hint = BASE64
            .decode(&self.data_hint)
            .map_err(|e| StoreError::Corrupt(format!("decode data hint: {e}")))?;
        Ok(serde_json::from_slice(&hint)?)
    }

    /// Decode the payload, verifying it against the digest.
    pub fn decode_payload(&self) -> Result<Vec<u8>, StoreError> {
        let payload = BASE64
            .decode(&self.data)
            .map_err(|e| StoreError::Corrupt(format!("decode data: {e}")))?;
        let digest = hex::encode(Sha256::digest(&payload));
        if digest != self.digest {
            return Err(StoreError::Corrupt(format!(
                "digest mismatch: got {digest}, want {}",
                self.digest
            )));
        }
        Ok(payload)
    }

    /// Decode the payload as a JSON structure, after checking that the data
    /// hint carries the expected descriptor.
    pub fn decode_structure<T: serde::de::DeserializeOwned>(
        &self,
        descriptor: &str,
    ) -> Result<T, StoreError> {
        let dd = self.data_descriptor()?;
        if dd.descriptor != descriptor {
            return Err(StoreError::Corrupt(format!(
                "unexpected descriptor: got {}, want {descriptor}",
                dd.descriptor
            )));
        }
        let payload = self.decode_payload()?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Encode a [`BlobEntry`] into the bytes stored under a key-value store key.
pub fn blobify(entry: &BlobEntry) -> Result<Bytes, StoreError> {
    Ok(Bytes::from(serde_json::to_vec(entry)?))
}

/// Decode stored bytes back into a [`BlobEntry`], verifying the digest.
pub fn deblob(blob: &[u8]) -> Result<BlobEntry, StoreError> {
    let entry: BlobEntry = serde_json::from_slice(blob)?;
    // Re-derive the digest so a corrupted value never makes it out.
    entry.decode_payload()?;
    Ok(entry)
}
