//! Per-record append-only trees.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;
use trove_types::{Token, TOKEN_SIZE, TOKEN_SIZE_SHORT};

use crate::error::LogError;
use crate::merkle;

/// Snapshot of a tree's merkle state at a point in time.
///
/// The `root_hash` is what the anchor engine submits for timestamping;
/// `tree_size` is what anchors later compare against to decide whether a
/// tree has unanchored leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRoot {
    /// Number of leaves covered by this root.
    pub tree_size: u64,
    /// Merkle root hash over the first `tree_size` leaves.
    pub root_hash: [u8; 32],
    /// Unix timestamp at which the root was computed.
    pub timestamp: i64,
}

/// A leaf to be appended: the digest it commits to plus opaque extra data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLeaf {
    /// 32-byte digest the leaf commits to.
    pub value: [u8; 32],
    /// Opaque extra data linking the leaf to its blob-store payload.
    pub extra_data: String,
}

impl NewLeaf {
    /// Build a leaf from a digest and its extra data.
    pub fn new(value: [u8; 32], extra_data: String) -> Self {
        Self { value, extra_data }
    }
}

/// An appended leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    /// 32-byte digest the leaf commits to.
    pub value: [u8; 32],
    /// RFC 6962 leaf hash of `value`.
    pub merkle_leaf_hash: [u8; 32],
    /// Position of the leaf in its tree.
    pub leaf_index: u64,
    /// Opaque extra data linking the leaf to its blob-store payload.
    pub extra_data: String,
}

struct TreeState {
    leaves: Vec<Leaf>,
    frozen: bool,
}

/// The in-process verifiable log: one append-only tree per record token.
///
/// Thread-safe behind a single `RwLock`; every operation is in-memory work.
#[derive(Default)]
pub struct VerifiableLog {
    trees: RwLock<BTreeMap<Token, TreeState>>,
}

impl VerifiableLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new tree and return its freshly generated token.
    pub fn tree_new(&self) -> Token {
        let mut trees = self.trees.write().expect("lock poisoned");
        loop {
            let mut bytes = [0u8; TOKEN_SIZE];
            rand::fill(&mut bytes);
            let token = Token::from(bytes);
            if trees.contains_key(&token) {
                continue;
            }
            trees.insert(
                token,
                TreeState {
                    leaves: Vec::new(),
                    frozen: false,
                },
            );
            debug!(%token, "created tree");
            return token;
        }
    }

    /// Whether a tree exists for the token.
    pub fn tree_exists(&self, token: &Token) -> bool {
        self.trees
            .read()
            .expect("lock poisoned")
            .contains_key(token)
    }

    /// All tree tokens, in token order.
    pub fn trees_all(&self) -> Vec<Token> {
        self.trees
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Resolve a full or short hex token to the full token of an existing
    /// tree. Short tokens resolve only when the prefix is unambiguous.
    pub fn token_resolve(&self, token_hex: &str) -> Option<Token> {
        if token_hex.len() == TOKEN_SIZE * 2 {
            let token = Token::from_hex(token_hex).ok()?;
            return self.tree_exists(&token).then_some(token);
        }
        if token_hex.len() != TOKEN_SIZE_SHORT * 2 {
            return None;
        }

        let trees = self.trees.read().expect("lock poisoned");
        let mut found = None;
        for token in trees.keys() {
            if token.short() == token_hex {
                if found.is_some() {
                    return None;
                }
                found = Some(*token);
            }
        }
        found
    }

    /// Freeze a tree. Record leaves are rejected from then on.
    pub fn tree_freeze(&self, token: &Token) -> Result<(), LogError> {
        let mut trees = self.trees.write().expect("lock poisoned");
        let tree = trees
            .get_mut(token)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))?;
        tree.frozen = true;
        debug!(%token, "froze tree");
        Ok(())
    }

    /// Whether a tree is frozen.
    pub fn tree_is_frozen(&self, token: &Token) -> Result<bool, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        trees
            .get(token)
            .map(|t| t.frozen)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))
    }

    /// All leaves of a tree, in append order.
    pub fn leaves_all(&self, token: &Token) -> Result<Vec<Leaf>, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        trees
            .get(token)
            .map(|t| t.leaves.clone())
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))
    }

    /// Number of leaves in a tree.
    pub fn leaf_count(&self, token: &Token) -> Result<u64, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        trees
            .get(token)
            .map(|t| t.leaves.len() as u64)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))
    }

    /// Append leaves to a tree, returning them with their assigned indexes.
    ///
    /// `allow_frozen` is set only by the anchor path: a frozen tree still
    /// accepts its covering anchor leaf, never new record content.
    pub fn leaves_append(
        &self,
        token: &Token,
        leaves: Vec<NewLeaf>,
        allow_frozen: bool,
    ) -> Result<Vec<Leaf>, LogError> {
        let mut trees = self.trees.write().expect("lock poisoned");
        let tree = trees
            .get_mut(token)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))?;
        if tree.frozen && !allow_frozen {
            return Err(LogError::TreeFrozen(token.to_string()));
        }

        let mut appended = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let appended_leaf = Leaf {
                merkle_leaf_hash: merkle::leaf_hash(&leaf.value),
                value: leaf.value,
                leaf_index: tree.leaves.len() as u64,
                extra_data: leaf.extra_data,
            };
            tree.leaves.push(appended_leaf.clone());
            appended.push(appended_leaf);
        }

        debug!(%token, appended = appended.len(), tree_size = tree.leaves.len(), "appended leaves");
        Ok(appended)
    }

    /// The current signed log root of a tree.
    pub fn log_root(&self, token: &Token) -> Result<LogRoot, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        let tree = trees
            .get(token)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))?;
        Ok(Self::root_of(&tree.leaves, tree.leaves.len() as u64))
    }

    /// The log root of a tree truncated to its first `tree_size` leaves.
    pub fn log_root_at(&self, token: &Token, tree_size: u64) -> Result<LogRoot, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        let tree = trees
            .get(token)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))?;
        if tree_size > tree.leaves.len() as u64 {
            return Err(LogError::LeafOutOfRange {
                index: tree_size,
                tree_size: tree.leaves.len() as u64,
            });
        }
        Ok(Self::root_of(&tree.leaves, tree_size))
    }

    /// Inclusion path for `leaf_index` against the root at `tree_size`.
    pub fn inclusion_proof(
        &self,
        token: &Token,
        leaf_index: u64,
        tree_size: u64,
    ) -> Result<Vec<[u8; 32]>, LogError> {
        let trees = self.trees.read().expect("lock poisoned");
        let tree = trees
            .get(token)
            .ok_or_else(|| LogError::TreeNotFound(token.to_string()))?;
        if tree_size > tree.leaves.len() as u64 || leaf_index >= tree_size {
            return Err(LogError::LeafOutOfRange {
                index: leaf_index,
                tree_size,
            });
        }

        let hashes: Vec<[u8; 32]> = tree.leaves[..tree_size as usize]
            .iter()
            .map(|l| l.merkle_leaf_hash)
            .collect();
        Ok(merkle::inclusion_path(&hashes, leaf_index as usize))
    }

    fn root_of(leaves: &[Leaf], tree_size: u64) -> LogRoot {
        let hashes: Vec<[u8; 32]> = leaves[..tree_size as usize]
            .iter()
            .map(|l| l.merkle_leaf_hash)
            .collect();
        LogRoot {
            tree_size,
            root_hash: merkle::root_from_leaf_hashes(&hashes),
            timestamp: unix_now(),
        }
    }
}

/// Current unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_inclusion;
    use sha2::{Digest, Sha256};

    fn digest(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn leaf(data: &[u8]) -> NewLeaf {
        NewLeaf::new(digest(data), format!("extra-{}", hex::encode(&data[..1])))
    }

    #[test]
    fn test_tree_new_unique_tokens() {
        let log = VerifiableLog::new();
        let a = log.tree_new();
        let b = log.tree_new();
        assert_ne!(a, b);
        assert!(log.tree_exists(&a));
        assert!(log.tree_exists(&b));
    }

    #[test]
    fn test_leaves_append_assigns_indexes() {
        let log = VerifiableLog::new();
        let token = log.tree_new();

        let appended = log
            .leaves_append(&token, vec![leaf(b"a"), leaf(b"b"), leaf(b"c")], false)
            .unwrap();
        assert_eq!(appended.len(), 3);
        for (i, l) in appended.iter().enumerate() {
            assert_eq!(l.leaf_index, i as u64);
            assert_eq!(l.merkle_leaf_hash, merkle::leaf_hash(&l.value));
        }

        let all = log.leaves_all(&token).unwrap();
        assert_eq!(all, appended);
    }

    #[test]
    fn test_log_root_changes_with_appends() {
        let log = VerifiableLog::new();
        let token = log.tree_new();

        let empty = log.log_root(&token).unwrap();
        assert_eq!(empty.tree_size, 0);

        log.leaves_append(&token, vec![leaf(b"a")], false).unwrap();
        let one = log.log_root(&token).unwrap();
        assert_eq!(one.tree_size, 1);
        assert_ne!(one.root_hash, empty.root_hash);

        log.leaves_append(&token, vec![leaf(b"b")], false).unwrap();
        let two = log.log_root(&token).unwrap();
        assert_eq!(two.tree_size, 2);
        assert_ne!(two.root_hash, one.root_hash);
    }

    #[test]
    fn test_log_root_at_matches_history() {
        let log = VerifiableLog::new();
        let token = log.tree_new();

        log.leaves_append(&token, vec![leaf(b"a"), leaf(b"b")], false)
            .unwrap();
        let before = log.log_root(&token).unwrap();

        log.leaves_append(&token, vec![leaf(b"c")], false).unwrap();
        let replayed = log.log_root_at(&token, 2).unwrap();
        assert_eq!(replayed.root_hash, before.root_hash);
        assert_eq!(replayed.tree_size, 2);
    }

    #[test]
    fn test_inclusion_proof_verifies_against_covering_root() {
        let log = VerifiableLog::new();
        let token = log.tree_new();

        let leaves: Vec<NewLeaf> = (0..5u8).map(|i| leaf(&[i])).collect();
        let appended = log.leaves_append(&token, leaves, false).unwrap();
        let root = log.log_root(&token).unwrap();

        for l in &appended {
            let path = log
                .inclusion_proof(&token, l.leaf_index, root.tree_size)
                .unwrap();
            assert!(verify_inclusion(
                &l.merkle_leaf_hash,
                l.leaf_index,
                root.tree_size,
                &path,
                &root.root_hash,
            ));
        }
    }

    #[test]
    fn test_frozen_tree_rejects_record_leaves() {
        let log = VerifiableLog::new();
        let token = log.tree_new();
        log.leaves_append(&token, vec![leaf(b"a")], false).unwrap();

        log.tree_freeze(&token).unwrap();
        assert!(log.tree_is_frozen(&token).unwrap());

        let err = log.leaves_append(&token, vec![leaf(b"b")], false);
        assert!(matches!(err, Err(LogError::TreeFrozen(_))));

        // The anchor path still gets through.
        log.leaves_append(&token, vec![leaf(b"anchor")], true)
            .unwrap();
        assert_eq!(log.leaf_count(&token).unwrap(), 2);
    }

    #[test]
    fn test_token_resolve_full_and_short() {
        let log = VerifiableLog::new();
        let token = log.tree_new();

        assert_eq!(log.token_resolve(&token.to_string()), Some(token));
        assert_eq!(log.token_resolve(&token.short()), Some(token));
        assert_eq!(log.token_resolve("ff".repeat(32).as_str()), None);
        assert_eq!(log.token_resolve("nonsense"), None);
    }

    #[test]
    fn test_unknown_tree_errors() {
        let log = VerifiableLog::new();
        let token = Token::from([0u8; 32]);
        assert!(matches!(
            log.leaves_all(&token),
            Err(LogError::TreeNotFound(_))
        ));
        assert!(matches!(
            log.log_root(&token),
            Err(LogError::TreeNotFound(_))
        ));
    }
}
