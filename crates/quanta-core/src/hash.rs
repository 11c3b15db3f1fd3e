//! Domain-separated hashing.
//!
//! Every hash in the protocol is a keyed BLAKE3 hash whose key is derived
//! from a short ASCII tag, so hashes of different kinds (header, transaction,
//! Merkle leaf/node, sighash, PoW) can never collide by construction.
//!
//! The proof-of-work seed schedule also lives here: the PoW kernel is keyed
//! per epoch by the hash of an ancestor block, not recomputed per block.

use crate::constants::{POW_EPOCH_INTERVAL, POW_EPOCH_LAG};
use crate::types::Hash256;

/// Tag for transaction IDs.
pub const TAG_TX: &str = "quanta/tx";
/// Tag for block header identity hashes.
pub const TAG_HEADER: &str = "quanta/header";
/// Tag for Merkle leaf hashes.
pub const TAG_LEAF: &str = "quanta/leaf";
/// Tag for Merkle internal-node hashes.
pub const TAG_NODE: &str = "quanta/node";
/// Tag for transaction signature hashes.
pub const TAG_SIGHASH: &str = "quanta/sighash";
/// Tag for the default proof-of-work kernel.
pub const TAG_POW: &str = "quanta/pow";
/// Tag for script-level hashing (`OP_HASH`, pubkey hashes).
pub const TAG_SCRIPT: &str = "quanta/script";

/// Compute the tagged hash of `bytes`.
///
/// The tag is expanded to a 32-byte BLAKE3 key (`BLAKE3(tag)`), and the
/// payload is hashed under that key.
pub fn hash_tagged(tag: &str, bytes: &[u8]) -> Hash256 {
    let key: [u8; 32] = blake3::hash(tag.as_bytes()).into();
    Hash256(blake3::keyed_hash(&key, bytes).into())
}

/// Height of the block whose header hash seeds the PoW kernel for a block
/// at `height`.
///
/// The seed block sits [`POW_EPOCH_LAG`] blocks before the most recent
/// [`POW_EPOCH_INTERVAL`] boundary: `h - (h mod 2048) - 64`, floored at
/// genesis for the first epoch. Validators therefore need ancestors up to
/// ~2112 blocks back, and the seed changes only when an epoch boundary is
/// crossed.
pub fn pow_seed_height(height: u64) -> u64 {
    let boundary = height - (height % POW_EPOCH_INTERVAL);
    boundary.saturating_sub(POW_EPOCH_LAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_hash_deterministic() {
        assert_eq!(hash_tagged(TAG_TX, b"abc"), hash_tagged(TAG_TX, b"abc"));
    }

    #[test]
    fn different_tags_never_collide() {
        let payload = b"identical payload";
        let tags = [TAG_TX, TAG_HEADER, TAG_LEAF, TAG_NODE, TAG_SIGHASH, TAG_POW, TAG_SCRIPT];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(hash_tagged(a, payload), hash_tagged(b, payload), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn tagged_hash_differs_from_plain_blake3() {
        let plain: [u8; 32] = blake3::hash(b"abc").into();
        assert_ne!(hash_tagged(TAG_TX, b"abc").0, plain);
    }

    #[test]
    fn seed_height_first_epoch_is_genesis() {
        assert_eq!(pow_seed_height(0), 0);
        assert_eq!(pow_seed_height(1), 0);
        assert_eq!(pow_seed_height(2047), 0);
    }

    #[test]
    fn seed_height_lags_epoch_boundary() {
        assert_eq!(pow_seed_height(2048), 2048 - 64);
        assert_eq!(pow_seed_height(2049), 2048 - 64);
        assert_eq!(pow_seed_height(4095), 2048 - 64);
        assert_eq!(pow_seed_height(4096), 4096 - 64);
    }

    #[test]
    fn seed_stable_within_epoch() {
        let seed = pow_seed_height(10_000);
        let epoch_start = 10_000 - (10_000 % POW_EPOCH_INTERVAL);
        for h in epoch_start..epoch_start + POW_EPOCH_INTERVAL {
            assert_eq!(pow_seed_height(h), seed);
        }
    }
}
