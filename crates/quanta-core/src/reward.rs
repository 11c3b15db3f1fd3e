//! Subsidy schedule and emission accounting.
//!
//! The block subsidy starts at
//! [`INITIAL_SUBSIDY`](crate::constants::INITIAL_SUBSIDY) and halves every
//! [`HALVING_INTERVAL`](crate::constants::HALVING_INTERVAL) blocks via an
//! integer shift, reaching zero after 64 halvings at the latest (earlier in
//! practice, once truncation exhausts the mantissa). Fees are accounted
//! separately: a block's coinbase may claim up to `subsidy(h) + fees`.

use crate::constants::{HALVING_INTERVAL, INITIAL_SUBSIDY};

/// Block subsidy in quarks at the given height.
pub fn subsidy(height: u64) -> u64 {
    epoch_subsidy(halving_epoch(height))
}

/// Subsidy for a halving epoch: `INITIAL_SUBSIDY >> epoch`, zero from
/// epoch 64 (shift guard).
pub fn epoch_subsidy(epoch: u64) -> u64 {
    if epoch >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> epoch
}

/// Which halving epoch a height falls in.
pub fn halving_epoch(height: u64) -> u64 {
    height / HALVING_INTERVAL
}

/// First height of a halving epoch.
pub fn epoch_start_height(epoch: u64) -> u64 {
    epoch.saturating_mul(HALVING_INTERVAL)
}

/// Cumulative subsidy for heights `0..=height`, computed per epoch.
///
/// This is the ceiling on the total amount of live UTXOs at any tip of
/// that height (fees only move value, never create it).
pub fn cumulative_subsidy(height: u64) -> u64 {
    let final_epoch = halving_epoch(height);
    let mut total: u64 = 0;

    for epoch in 0..=final_epoch {
        let per_block = epoch_subsidy(epoch);
        if per_block == 0 {
            break;
        }
        let start = epoch_start_height(epoch);
        let end = if epoch == final_epoch {
            height
        } else {
            epoch_start_height(epoch + 1) - 1
        };
        let blocks = end - start + 1;
        total = total.saturating_add(per_block.saturating_mul(blocks));
    }

    total
}

/// Total emission across every epoch with a non-zero subsidy.
pub fn total_emission() -> u64 {
    let mut total: u64 = 0;
    for epoch in 0..64u64 {
        let per_block = epoch_subsidy(epoch);
        if per_block == 0 {
            break;
        }
        total = total.saturating_add(per_block.saturating_mul(HALVING_INTERVAL));
    }
    total
}
