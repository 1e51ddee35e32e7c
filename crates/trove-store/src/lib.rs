//! Blob store trait and backend implementations.
//!
//! This crate defines the [`KvStore`] trait for the content-addressed
//! key-value store that backs the record engine, along with two concrete
//! backends:
//!
//! - [`MemoryStore`] — in-memory storage backed by a `RwLock<HashMap>`.
//! - [`FjallStore`] — durable storage backed by a fjall keyspace.
//!
//! It also defines [`BlobEntry`], the typed, digest-addressed unit that all
//! stored values are encoded as.

mod entry;
mod error;
mod fjall_store;
mod memory;
mod traits;

pub use entry::{deblob, blobify, BlobEntry, DataDescriptor, DataType};
pub use error::StoreError;
pub use fjall_store::FjallStore;
pub use memory::MemoryStore;
pub use traits::KvStore;

/// Generate a fresh, opaque store key.
///
/// Keys carry no semantics; a leaf's extra-data is the only link between a
/// log leaf and the blob stored under the key.
pub fn key_new() -> String {
    let mut bytes = [0u8; 16];
    rand::fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_new_unique_and_hex() {
        let a = key_new();
        let b = key_new();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
