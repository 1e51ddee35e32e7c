//! In-memory blob store backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::KvStore;

/// In-memory store backed by a `RwLock<HashMap>`.
///
/// Used in tests and for ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, blobs: HashMap<String, Bytes>, overwrite: bool) -> Result<(), StoreError> {
        let mut map = self.blobs.write().expect("lock poisoned");

        if !overwrite {
            for key in blobs.keys() {
                if map.contains_key(key) {
                    return Err(StoreError::KeyExists(key.clone()));
                }
            }
        }

        debug!(blobs = blobs.len(), overwrite, "storing blobs in memory");
        map.extend(blobs);
        Ok(())
    }

    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut map = self.blobs.write().expect("lock poisoned");
        for key in keys {
            map.remove(key);
        }
        debug!(keys = keys.len(), "deleted blobs from memory");
        Ok(())
    }

    async fn enumerate(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
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
        let store = MemoryStore::new();
        store.put(blobs(&[("a", b"one")]), false).await.unwrap();

        let got = store.get(&["a".to_string()]).await.unwrap();
        assert_eq!(got.get("a"), Some(&Bytes::from_static(b"one")));
    }

    #[tokio::test]
    async fn test_get_missing_key_omitted() {
        let store = MemoryStore::new();
        store.put(blobs(&[("a", b"one")]), false).await.unwrap();

        let got = store
            .get(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(!got.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_put_without_overwrite_rejects_existing() {
        let store = MemoryStore::new();
        store.put(blobs(&[("a", b"one")]), false).await.unwrap();

        let err = store.put(blobs(&[("a", b"two")]), false).await;
        assert!(matches!(err, Err(StoreError::KeyExists(_))));

        // The original value is untouched.
        let got = store.get(&["a".to_string()]).await.unwrap();
        assert_eq!(got.get("a"), Some(&Bytes::from_static(b"one")));
    }

    #[tokio::test]
    async fn test_put_with_overwrite_replaces() {
        let store = MemoryStore::new();
        store.put(blobs(&[("a", b"one")]), false).await.unwrap();
        store.put(blobs(&[("a", b"two")]), true).await.unwrap();

        let got = store.get(&["a".to_string()]).await.unwrap();
        assert_eq!(got.get("a"), Some(&Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn test_del_then_get_omits() {
        let store = MemoryStore::new();
        store
            .put(blobs(&[("a", b"one"), ("b", b"two")]), false)
            .await
            .unwrap();
        store.del(&["a".to_string()]).await.unwrap();

        let got = store
            .get(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(!got.contains_key("a"));
        assert!(got.contains_key("b"));
    }

    #[tokio::test]
    async fn test_del_missing_key_ok() {
        let store = MemoryStore::new();
        store.del(&["ghost".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_enumerate_prefix() {
        let store = MemoryStore::new();
        store
            .put(
                blobs(&[("inv/unvetted", b"a"), ("inv/vetted", b"b"), ("x", b"c")]),
                false,
            )
            .await
            .unwrap();

        let mut keys = store.enumerate("inv/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["inv/unvetted", "inv/vetted"]);
    }
}
