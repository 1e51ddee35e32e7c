//! RFC 6962-style SHA-256 merkle trees.
//!
//! Leaves and interior nodes are domain-separated (`0x00` / `0x01`
//! prefixes) so a leaf hash can never collide with a node hash. The same
//! construction is used for log roots, record file merkles, and the
//! timestamp-service batch roots, so one verifier covers all three.

use sha2::{Digest, Sha256};

/// Hash a leaf value: `sha256(0x00 || value)`.
pub fn leaf_hash(value: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(value);
    hasher.finalize().into()
}

/// Hash an interior node: `sha256(0x01 || left || right)`.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n`. Requires `n >= 2`.
fn split_point(n: usize) -> usize {
    debug_assert!(n >= 2);
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Merkle root over already-hashed leaves.
///
/// The empty tree hashes to `sha256("")`.
pub fn root_from_leaf_hashes(hashes: &[[u8; 32]]) -> [u8; 32] {
    match hashes.len() {
        0 => Sha256::digest([]).into(),
        1 => hashes[0],
        n => {
            let k = split_point(n);
            node_hash(
                &root_from_leaf_hashes(&hashes[..k]),
                &root_from_leaf_hashes(&hashes[k..]),
            )
        }
    }
}

/// Merkle root over raw leaf values (each is leaf-hashed first).
pub fn merkle_root<V: AsRef<[u8]>>(values: &[V]) -> [u8; 32] {
    let hashes: Vec<[u8; 32]> = values.iter().map(|v| leaf_hash(v.as_ref())).collect();
    root_from_leaf_hashes(&hashes)
}

/// Inclusion path for the leaf at `index`, bottom-up sibling subtree roots.
///
/// Requires `index < hashes.len()`.
pub fn inclusion_path(hashes: &[[u8; 32]], index: usize) -> Vec<[u8; 32]> {
    debug_assert!(index < hashes.len());
    let n = hashes.len();
    if n <= 1 {
        return Vec::new();
    }
    let k = split_point(n);
    if index < k {
        let mut path = inclusion_path(&hashes[..k], index);
        path.push(root_from_leaf_hashes(&hashes[k..]));
        path
    } else {
        let mut path = inclusion_path(&hashes[k..], index - k);
        path.push(root_from_leaf_hashes(&hashes[..k]));
        path
    }
}

/// Verify an inclusion path (RFC 9162 §2.1.3.2).
pub fn verify_inclusion(
    leaf_hash: &[u8; 32],
    leaf_index: u64,
    tree_size: u64,
    path: &[[u8; 32]],
    root: &[u8; 32],
) -> bool {
    if leaf_index >= tree_size {
        return false;
    }

    let mut fnode = leaf_index;
    let mut snode = tree_size - 1;
    let mut hash = *leaf_hash;

    for sibling in path {
        if snode == 0 {
            return false;
        }
        if fnode & 1 == 1 || fnode == snode {
            hash = node_hash(sibling, &hash);
            if fnode & 1 == 0 {
                // Right-border node: climb until a left sibling appears.
                while fnode & 1 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            hash = node_hash(&hash, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    snode == 0 && hash == *root
}
