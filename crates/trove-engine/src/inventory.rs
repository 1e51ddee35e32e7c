//! The inventory cache: a status-partitioned index of all record tokens.
//!
//! Kept in memory, mirrored to the blob store after every mutation, and
//! rebuildable from the logs by fsck. Each `(state, status)` bucket is an
//! insertion-ordered sequence with the most recent status change first.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use trove_store::KvStore;
use trove_types::{Inventory, State, Status, Token};

use crate::error::BackendError;

const INV_KEY_UNVETTED: &str = "inv/unvetted";
const INV_KEY_VETTED: &str = "inv/vetted";

/// One cached token and the timestamp that orders it within its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    token: String,
    timestamp: i64,
}

type Partition = BTreeMap<Status, Vec<Entry>>;

#[derive(Default)]
struct Inner {
    unvetted: Partition,
    vetted: Partition,
}

/// The in-memory, store-mirrored inventory.
pub struct InventoryCache {
    store: Arc<dyn KvStore>,
    inner: Mutex<Inner>,
}

impl InventoryCache {
    /// Create an empty cache mirrored to the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Load the persisted partitions, if any.
    pub async fn load(&self) -> Result<(), BackendError> {
        let keys = [INV_KEY_UNVETTED.to_string(), INV_KEY_VETTED.to_string()];
        let blobs = self.store.get(&keys).await?;

        let mut inner = self.inner.lock().await;
        if let Some(blob) = blobs.get(INV_KEY_UNVETTED) {
            inner.unvetted = serde_json::from_slice(blob)?;
        }
        if let Some(blob) = blobs.get(INV_KEY_VETTED) {
            inner.vetted = serde_json::from_slice(blob)?;
        }
        debug!("inventory loaded");
        Ok(())
    }

    /// Prepend a token to a bucket.
    pub async fn add(
        &self,
        state: State,
        token: &Token,
        status: Status,
        timestamp: i64,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        partition_mut(&mut inner, state)
            .entry(status)
            .or_default()
            .insert(
                0,
                Entry {
                    token: token.to_string(),
                    timestamp,
                },
            );
        self.persist(&inner, state).await
    }

    /// Move a token to a new status bucket within its state.
    pub async fn update(
        &self,
        state: State,
        token: &Token,
        status: Status,
        timestamp: i64,
    ) -> Result<(), BackendError> {
        let token = token.to_string();
        let mut inner = self.inner.lock().await;

        let partition = partition_mut(&mut inner, state);
        for entries in partition.values_mut() {
            entries.retain(|e| e.token != token);
        }
        partition
            .entry(status)
            .or_default()
            .insert(0, Entry { token, timestamp });

        self.persist(&inner, state).await
    }

    /// Move a token out of the unvetted partition into a vetted bucket.
    pub async fn move_to_vetted(
        &self,
        token: &Token,
        status: Status,
        timestamp: i64,
    ) -> Result<(), BackendError> {
        let token = token.to_string();
        let mut inner = self.inner.lock().await;

        for entries in inner.unvetted.values_mut() {
            entries.retain(|e| e.token != token);
        }
        inner
            .vetted
            .entry(status)
            .or_default()
            .insert(0, Entry { token, timestamp });

        self.persist(&inner, State::Unvetted).await?;
        self.persist(&inner, State::Vetted).await
    }

    /// Drop a whole partition. Used by fsck before a rebuild.
    pub async fn clear(&self, state: State) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        partition_mut(&mut inner, state).clear();
        self.persist(&inner, state).await
    }

    /// One page of a single `(state, status)` bucket.
    pub async fn by_status(
        &self,
        state: State,
        status: Status,
        page_size: u32,
        page_number: u32,
    ) -> Vec<String> {
        let inner = self.inner.lock().await;
        let entries = partition_ref(&inner, state)
            .get(&status)
            .map(Vec::as_slice)
            .unwrap_or_default();
        page(entries, page_size, page_number)
    }

    /// The inventory reply for the given state/status filters.
    ///
    /// With a status, a single page of that bucket is returned. Without
    /// one, the first page of every bucket is returned and the page number
    /// is ignored.
    pub async fn inventory(
        &self,
        state: Option<State>,
        status: Option<Status>,
        page_size: u32,
        page_number: u32,
    ) -> Inventory {
        let inner = self.inner.lock().await;
        let mut reply = Inventory::default();

        for s in [State::Unvetted, State::Vetted] {
            if state.is_some_and(|wanted| wanted != s) {
                continue;
            }
            let partition = partition_ref(&inner, s);
            let out = match s {
                State::Unvetted => &mut reply.unvetted,
                State::Vetted => &mut reply.vetted,
            };
            match status {
                Some(wanted) => {
                    let entries = partition.get(&wanted).map(Vec::as_slice).unwrap_or_default();
                    out.insert(wanted, page(entries, page_size, page_number));
                }
                None => {
                    for (bucket_status, entries) in partition {
                        out.insert(*bucket_status, page(entries, page_size, 1));
                    }
                }
            }
        }

        reply
    }

    /// One page of all tokens in a state, merged across statuses and
    /// ordered by timestamp, newest first.
    pub async fn ordered(&self, state: State, page_size: u32, page_number: u32) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<Entry> = partition_ref(&inner, state)
            .values()
            .flatten()
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        page(&entries, page_size, page_number)
    }

    async fn persist(&self, inner: &Inner, state: State) -> Result<(), BackendError> {
        let (key, partition) = match state {
            State::Unvetted => (INV_KEY_UNVETTED, &inner.unvetted),
            State::Vetted => (INV_KEY_VETTED, &inner.vetted),
        };
        let blob = Bytes::from(serde_json::to_vec(partition)?);
        let mut blobs = std::collections::HashMap::new();
        blobs.insert(key.to_string(), blob);
        self.store.put(blobs, true).await?;
        Ok(())
    }
}

fn partition_mut(inner: &mut Inner, state: State) -> &mut Partition {
    match state {
        State::Unvetted => &mut inner.unvetted,
        State::Vetted => &mut inner.vetted,
    }
}

fn partition_ref(inner: &Inner, state: State) -> &Partition {
    match state {
        State::Unvetted => &inner.unvetted,
        State::Vetted => &inner.vetted,
    }
}

/// Slice out one page of entries. Page numbers are 1-based; a page size
/// of zero returns everything.
fn page(entries: &[Entry], page_size: u32, page_number: u32) -> Vec<String> {
    if page_size == 0 {
        return entries.iter().map(|e| e.token.clone()).collect();
    }
    let page_number = page_number.max(1);
    entries
        .iter()
        .skip(((page_number - 1) * page_size) as usize)
        .take(page_size as usize)
        .map(|e| e.token.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_store::MemoryStore;

    fn token(fill: u8) -> Token {
        Token::from([fill; 32])
    }

    fn cache() -> InventoryCache {
        InventoryCache::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_add_prepends() {
        let inv = cache();
        inv.add(State::Unvetted, &token(1), Status::Unreviewed, 10)
            .await
            .unwrap();
        inv.add(State::Unvetted, &token(2), Status::Unreviewed, 20)
            .await
            .unwrap();

        let tokens = inv
            .by_status(State::Unvetted, Status::Unreviewed, 0, 1)
            .await;
        assert_eq!(tokens, vec![token(2).to_string(), token(1).to_string()]);
    }

    #[tokio::test]
    async fn test_update_moves_between_buckets() {
        let inv = cache();
        inv.add(State::Vetted, &token(1), Status::Public, 10)
            .await
            .unwrap();
        inv.update(State::Vetted, &token(1), Status::Archived, 20)
            .await
            .unwrap();

        assert!(inv
            .by_status(State::Vetted, Status::Public, 0, 1)
            .await
            .is_empty());
        assert_eq!(
            inv.by_status(State::Vetted, Status::Archived, 0, 1).await,
            vec![token(1).to_string()]
        );
    }

    #[tokio::test]
    async fn test_move_to_vetted() {
        let inv = cache();
        inv.add(State::Unvetted, &token(1), Status::Unreviewed, 10)
            .await
            .unwrap();
        inv.move_to_vetted(&token(1), Status::Public, 20)
            .await
            .unwrap();

        assert!(inv
            .by_status(State::Unvetted, Status::Unreviewed, 0, 1)
            .await
            .is_empty());
        assert_eq!(
            inv.by_status(State::Vetted, Status::Public, 0, 1).await,
            vec![token(1).to_string()]
        );
    }

    #[tokio::test]
    async fn test_each_token_in_exactly_one_bucket() {
        let inv = cache();
        inv.add(State::Unvetted, &token(1), Status::Unreviewed, 10)
            .await
            .unwrap();
        inv.move_to_vetted(&token(1), Status::Public, 20)
            .await
            .unwrap();
        inv.update(State::Vetted, &token(1), Status::Censored, 30)
            .await
            .unwrap();

        let reply = inv.inventory(None, None, 0, 1).await;
        let total: usize = reply
            .unvetted
            .values()
            .chain(reply.vetted.values())
            .map(Vec::len)
            .sum();
        assert_eq!(total, 1);
        assert_eq!(
            reply.vetted.get(&Status::Censored),
            Some(&vec![token(1).to_string()])
        );
    }

    #[tokio::test]
    async fn test_pagination() {
        let inv = cache();
        for i in 1..=5u8 {
            inv.add(State::Unvetted, &token(i), Status::Unreviewed, i as i64)
                .await
                .unwrap();
        }

        // Newest first: 5 4 3 2 1, pages of 2.
        let p1 = inv
            .by_status(State::Unvetted, Status::Unreviewed, 2, 1)
            .await;
        let p2 = inv
            .by_status(State::Unvetted, Status::Unreviewed, 2, 2)
            .await;
        let p3 = inv
            .by_status(State::Unvetted, Status::Unreviewed, 2, 3)
            .await;
        assert_eq!(p1, vec![token(5).to_string(), token(4).to_string()]);
        assert_eq!(p2, vec![token(3).to_string(), token(2).to_string()]);
        assert_eq!(p3, vec![token(1).to_string()]);
    }

    #[tokio::test]
    async fn test_ordered_merges_statuses_by_timestamp() {
        let inv = cache();
        inv.add(State::Vetted, &token(1), Status::Public, 10)
            .await
            .unwrap();
        inv.add(State::Vetted, &token(2), Status::Archived, 30)
            .await
            .unwrap();
        inv.add(State::Vetted, &token(3), Status::Public, 20)
            .await
            .unwrap();

        let ordered = inv.ordered(State::Vetted, 0, 1).await;
        assert_eq!(
            ordered,
            vec![
                token(2).to_string(),
                token(3).to_string(),
                token(1).to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

        let inv = InventoryCache::new(store.clone());
        inv.add(State::Unvetted, &token(1), Status::Unreviewed, 10)
            .await
            .unwrap();
        inv.move_to_vetted(&token(1), Status::Public, 20)
            .await
            .unwrap();

        // A fresh cache over the same store sees the same content.
        let reloaded = InventoryCache::new(store);
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.by_status(State::Vetted, Status::Public, 0, 1).await,
            vec![token(1).to_string()]
        );
    }
}
