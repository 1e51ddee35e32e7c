//! Durable blob store backend on a fjall keyspace.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::KvStore;

/// Durable store backed by a single fjall keyspace.
pub struct FjallStore {
    #[allow(dead_code)]
    db: Database,
    blobs: Keyspace,
}

impl FjallStore {
    /// Open a persistent store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::builder(path).open()?;
        let blobs = db.keyspace("blobs", KeyspaceCreateOptions::default)?;
        Ok(Self { db, blobs })
    }

    /// Open a temporary store (cleaned up on drop). For tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        let blobs = db.keyspace("blobs", KeyspaceCreateOptions::default)?;
        Ok(Self { db, blobs })
    }
}

#[async_trait::async_trait]
impl KvStore for FjallStore {
    async fn put(&self, blobs: HashMap<String, Bytes>, overwrite: bool) -> Result<(), StoreError> {
        if !overwrite {
            for key in blobs.keys() {
                if self.blobs.get(key.as_bytes())?.is_some() {
                    return Err(StoreError::KeyExists(key.clone()));
                }
            }
        }

        debug!(blobs = blobs.len(), overwrite, "storing blobs");
        for (key, value) in &blobs {
            self.blobs.insert(key.as_bytes(), value.as_ref())?;
        }
        Ok(())
    }

    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, StoreError> {
        let mut reply = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.blobs.get(key.as_bytes())? {
                reply.insert(key.clone(), Bytes::copy_from_slice(&value));
            }
        }
        Ok(reply)
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.blobs.remove(key.as_bytes())?;
        }
        debug!(keys = keys.len(), "deleted blobs");
        Ok(())
    }

    async fn enumerate(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for guard in self.blobs.prefix(prefix.as_bytes()) {
            let k = guard.key()?;
            let key = std::str::from_utf8(&k)
                .map_err(|e| StoreError::Corrupt(format!("key is not valid UTF-8: {e}")))?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(entries: &[(&str, &[u8])]) -> HashMap<String, Bytes> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v)))
            .collect()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = FjallStore::open_temporary().unwrap();
        store.put(blobs(&[("k", b"value")]), false).await.unwrap();

        let got = store.get(&["k".to_string()]).await.unwrap();
        assert_eq!(got.get("k"), Some(&Bytes::from_static(b"value")));
    }

    #[tokio::test]
    async fn test_overwrite_guard() {
        let store = FjallStore::open_temporary().unwrap();
        store.put(blobs(&[("k", b"one")]), false).await.unwrap();

        let err = store.put(blobs(&[("k", b"two")]), false).await;
        assert!(matches!(err, Err(StoreError::KeyExists(_))));

        store.put(blobs(&[("k", b"two")]), true).await.unwrap();
        let got = store.get(&["k".to_string()]).await.unwrap();
        assert_eq!(got.get("k"), Some(&Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_del_and_enumerate() {
        let store = FjallStore::open_temporary().unwrap();
        store
            .put(blobs(&[("p/a", b"1"), ("p/b", b"2"), ("q/c", b"3")]), false)
            .await
            .unwrap();

        let mut keys = store.enumerate("p/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p/a", "p/b"]);

        store.del(&["p/a".to_string()]).await.unwrap();
        let keys = store.enumerate("p/").await.unwrap();
        assert_eq!(keys, vec!["p/b"]);
    }
}
