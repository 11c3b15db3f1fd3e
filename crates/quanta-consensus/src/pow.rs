//! Proof-of-work kernels.
//!
//! The PoW hash is an opaque function of an epoch seed and the canonical
//! header bytes. The seed is the header hash of an ancestor chosen by
//! [`pow_seed_height`](quanta_core::hash::pow_seed_height): it changes
//! every 2048 blocks, lagged 64 blocks behind the epoch boundary, so
//! miners and validators rebuild per-epoch state off the critical path.
//!
//! Two kernels sit behind the same interface:
//!
//! - [`pow_hash`] — the default CPU kernel, always compiled: an SHA-256
//!   pre-mix of `seed || header` bound into a tagged BLAKE3 hash.
//!   Deterministic and cheap, used by tests and non-`randomx` builds.
//! - [`RandomXPow`] — the memory-hard kernel behind the `randomx` cargo
//!   feature, keyed by the same seed and rotated when the epoch changes.

use sha2::{Digest, Sha256};

use quanta_core::hash::{hash_tagged, TAG_POW};
use quanta_core::types::Hash256;

/// Default CPU kernel: `hash_tagged("quanta/pow", seed || SHA256(seed ||
/// header) || header)`.
pub fn pow_hash(seed: &Hash256, header_bytes: &[u8]) -> Hash256 {
    let mut pre = Sha256::new();
    pre.update(seed.as_bytes());
    pre.update(header_bytes);
    let mix = pre.finalize();

    let mut payload = Vec::with_capacity(64 + header_bytes.len());
    payload.extend_from_slice(seed.as_bytes());
    payload.extend_from_slice(&mix);
    payload.extend_from_slice(header_bytes);
    hash_tagged(TAG_POW, &payload)
}

/// Memory-hard RandomX kernel. Light mode (~256 MB cache) suffices for
/// validation; mining wants `RandomXFlag::FLAG_FULL_MEM`.
#[cfg(feature = "randomx")]
pub struct RandomXPow {
    vm: std::sync::Mutex<randomx_rs::RandomXVM>,
    current_seed: std::sync::Mutex<Hash256>,
    flags: randomx_rs::RandomXFlag,
}

#[cfg(feature = "randomx")]
impl RandomXPow {
    /// Create a light-mode VM keyed by `seed`.
    pub fn new(seed: &Hash256) -> Result<Self, String> {
        use randomx_rs::{RandomXCache, RandomXFlag, RandomXVM};
        let flags = RandomXFlag::get_recommended_flags();
        let cache = RandomXCache::new(flags, seed.as_bytes())
            .map_err(|e| format!("RandomX cache init failed: {e}"))?;
        let vm = RandomXVM::new(flags, Some(cache), None)
            .map_err(|e| format!("RandomX VM init failed: {e}"))?;
        Ok(Self {
            vm: std::sync::Mutex::new(vm),
            current_seed: std::sync::Mutex::new(*seed),
            flags,
        })
    }

    /// Re-key the VM when the epoch seed changes. No-op for the current
    /// seed.
    pub fn update_seed(&self, seed: &Hash256) -> Result<(), String> {
        use randomx_rs::RandomXCache;
        let mut current = self.current_seed.lock().unwrap();
        if *current == *seed {
            return Ok(());
        }
        let cache = RandomXCache::new(self.flags, seed.as_bytes())
            .map_err(|e| format!("RandomX cache reinit failed: {e}"))?;
        self.vm
            .lock()
            .unwrap()
            .reinit_cache(cache)
            .map_err(|e| format!("RandomX VM reinit failed: {e}"))?;
        *current = *seed;
        Ok(())
    }

    /// Hash header bytes under the current key.
    pub fn hash(&self, header_bytes: &[u8]) -> Result<Hash256, String> {
        let result = self
            .vm
            .lock()
            .unwrap()
            .calculate_hash(header_bytes)
            .map_err(|e| format!("RandomX hash failed: {e}"))?;
        let bytes: [u8; 32] = result
            .try_into()
            .map_err(|_| "RandomX hash is not 32 bytes".to_string())?;
        Ok(Hash256(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_deterministic() {
        let seed = Hash256([7; 32]);
        assert_eq!(pow_hash(&seed, b"header"), pow_hash(&seed, b"header"));
    }

    #[test]
    fn kernel_depends_on_seed() {
        let a = pow_hash(&Hash256([1; 32]), b"header");
        let b = pow_hash(&Hash256([2; 32]), b"header");
        assert_ne!(a, b);
    }

    #[test]
    fn kernel_depends_on_header() {
        let seed = Hash256([7; 32]);
        assert_ne!(pow_hash(&seed, b"header a"), pow_hash(&seed, b"header b"));
    }

    #[test]
    fn kernel_differs_from_identity_hash() {
        // The PoW hash must never coincide with the tagged header identity
        // hash of the same bytes.
        let seed = Hash256([7; 32]);
        let identity = hash_tagged(quanta_core::hash::TAG_HEADER, b"header");
        assert_ne!(pow_hash(&seed, b"header"), identity);
    }
}
