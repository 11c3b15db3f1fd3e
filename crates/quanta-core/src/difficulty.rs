//! Difficulty targets and the per-block retarget.
//!
//! # Target representation
//!
//! The header carries a compact `u32` encoding of a 256-bit threshold:
//! the high byte is a base-256 exponent, the low 23 bits a mantissa, and
//! bit 23 a sign bit that is never valid in a target. A header hash
//! satisfies the proof of work when, read as a big-endian 256-bit integer,
//! it is at most the expanded target. Consensus requires the compact form
//! to be canonical: re-encoding the expanded target must reproduce the
//! exact compact value.
//!
//! # Retarget
//!
//! The target adjusts every block from the solve time of the last
//! [`RETARGET_WINDOW`] blocks (fewer on the early chain):
//!
//! ```text
//! span     = parent.time - ancestor.time          (window solve time)
//! damped   = span + span * (T*n - span) / (4*T*n)
//! adjusted = clamp(damped, T*n/4, T*n*4)
//! next     = parent_target * adjusted / (T*n)
//! ```
//!
//! with `T = TARGET_BLOCK_TIME` and `n` the interval count. The damping
//! term moves only a quarter of the way toward the observed solve rate,
//! and the clamp bounds any single retarget to a factor of four. The
//! sequence is stationary when every block solves in exactly `T`.

use primitive_types::{U256, U512};

use crate::constants::{RETARGET_WINDOW, TARGET_BLOCK_TIME};
use crate::types::Hash256;

/// Compact encoding of the easiest permitted target (the pow limit).
pub const MAX_TARGET_BITS: u32 = 0x207f_ffff;

/// Sign bit of the compact mantissa. Never valid in a target.
const COMPACT_SIGN_BIT: u32 = 0x0080_0000;

/// The easiest permitted target, expanded.
pub fn max_target() -> U256 {
    compact_to_target(MAX_TARGET_BITS).expect("pow limit is canonical")
}

/// Expand a compact target to 256 bits.
///
/// Returns `None` for encodings no valid header can carry: a set sign bit,
/// a zero value, or an exponent that overflows 256 bits.
pub fn compact_to_target(bits: u32) -> Option<U256> {
    if bits & COMPACT_SIGN_BIT != 0 {
        return None;
    }
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 {
        return None;
    }

    let target = if exponent <= 3 {
        let shifted = mantissa >> (8 * (3 - exponent));
        if shifted == 0 {
            return None;
        }
        U256::from(shifted)
    } else {
        if exponent > 32 {
            return None;
        }
        U256::from(mantissa) << (8 * (exponent - 3))
    };
    Some(target)
}

/// Compress a 256-bit target to its canonical compact form.
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut mantissa: u32 = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        ((target >> (8 * (size - 3))).low_u32()) & 0x00ff_ffff
    };
    // Avoid the sign bit by shifting the mantissa down a byte.
    if mantissa & COMPACT_SIGN_BIT != 0 {
        mantissa >>= 8;
        size += 1;
    }
    ((size as u32) << 24) | mantissa
}

/// Whether `bits` is a canonical compact target within the pow limit.
pub fn is_canonical_compact(bits: u32) -> bool {
    match compact_to_target(bits) {
        Some(target) => target <= max_target() && target_to_compact(target) == bits,
        None => false,
    }
}

/// Whether a PoW hash (big-endian 256-bit integer) meets the target.
pub fn meets_target(pow_hash: &Hash256, target: &U256) -> bool {
    U256::from_big_endian(&pow_hash.0) <= *target
}

/// Expected work to find a hash at or below `target`: `2^256 / (target+1)`,
/// computed without 512-bit division as `(!target / (target+1)) + 1`.
pub fn work(target: &U256) -> U256 {
    (!*target / (*target + U256::one())) + U256::one()
}

/// Compute the next compact target from the parent's target and the solve
/// time of the trailing window.
///
/// `span_secs` is `parent.time - ancestor.time` over `intervals` solve
/// intervals ([`window_intervals`] of the height being scheduled; the
/// early chain uses however many ancestors exist). With `intervals == 0`
/// there is nothing to measure and the parent target carries forward.
pub fn next_target(parent_bits: u32, span_secs: i64, intervals: u64) -> u32 {
    if intervals == 0 {
        return parent_bits;
    }
    let Some(parent_target) = compact_to_target(parent_bits) else {
        // Non-canonical parents are rejected during validation; this path
        // only serves callers probing with garbage.
        return parent_bits;
    };

    let t_n = (TARGET_BLOCK_TIME * intervals) as i128;
    let span = span_secs as i128;

    // Damped adjustment, then the 4x clamp. Signed arithmetic: a hostile
    // span (zero or negative) lands on the lower clamp.
    let damped = span + span * (t_n - span) / (4 * t_n);
    let adjusted = damped.clamp(t_n / 4, t_n * 4) as u64;

    let widened: U512 = parent_target.full_mul(U256::from(adjusted));
    let next = widened / U512::from(t_n as u64);
    let next = U256::try_from(next).unwrap_or_else(|_| max_target());

    let next = next.min(max_target()).max(U256::one());
    target_to_compact(next)
}

/// Number of retarget intervals available to a block at `height`: the
/// full [`RETARGET_WINDOW`] once enough ancestors exist, fewer on the
/// early chain, zero for the block after genesis. The consensus engine
/// feeds this to [`next_target`].
pub fn window_intervals(height: u64) -> u64 {
    height.saturating_sub(1).min(RETARGET_WINDOW)
}
