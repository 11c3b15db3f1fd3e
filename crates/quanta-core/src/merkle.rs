//! Merkle tree over transaction IDs.
//!
//! Leaves and internal nodes are hashed under distinct tags
//! ([`TAG_LEAF`]/[`TAG_NODE`]) to rule out second-preimage attacks that
//! reinterpret an internal node as a leaf. Odd layers duplicate their last
//! element. An empty tree has root [`Hash256::ZERO`].

use crate::hash::{hash_tagged, TAG_LEAF, TAG_NODE};
use crate::types::Hash256;

/// Tagged leaf hash of a transaction ID.
pub fn leaf_hash(txid: &Hash256) -> Hash256 {
    hash_tagged(TAG_LEAF, txid.as_bytes())
}

/// Tagged internal-node hash of two children.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    hash_tagged(TAG_NODE, &buf)
}

/// Compute the Merkle root of a slice of transaction IDs.
///
/// Returns [`Hash256::ZERO`] for an empty slice.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }

    let mut layer: Vec<Hash256> = txids.iter().map(leaf_hash).collect();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

/// An inclusion proof for one leaf, listing sibling hashes bottom-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub txid: Hash256,
    pub path: Vec<ProofStep>,
}

/// One sibling on the proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofStep {
    pub hash: Hash256,
    /// True when the sibling sits to the left of the running hash.
    pub sibling_left: bool,
}

impl MerkleProof {
    /// Recompute the root this proof commits to.
    pub fn compute_root(&self) -> Hash256 {
        let mut acc = leaf_hash(&self.txid);
        for step in &self.path {
            acc = if step.sibling_left {
                node_hash(&step.hash, &acc)
            } else {
                node_hash(&acc, &step.hash)
            };
        }
        acc
    }
}

/// Generate an inclusion proof for the leaf at `index`.
///
/// Returns `None` when `index` is out of bounds.
pub fn prove(txids: &[Hash256], index: usize) -> Option<MerkleProof> {
    if index >= txids.len() {
        return None;
    }

    let mut path = Vec::new();
    let mut layer: Vec<Hash256> = txids.iter().map(leaf_hash).collect();
    let mut pos = index;

    while layer.len() > 1 {
        let sibling_pos = pos ^ 1;
        let sibling = if sibling_pos < layer.len() {
            layer[sibling_pos]
        } else {
            // Odd layer: the last element pairs with itself.
            layer[pos]
        };
        path.push(ProofStep {
            hash: sibling,
            sibling_left: pos % 2 == 1,
        });
        layer = next_layer(&layer);
        pos /= 2;
    }

    Some(MerkleProof {
        leaf_index: index,
        txid: txids[index],
        path,
    })
}
