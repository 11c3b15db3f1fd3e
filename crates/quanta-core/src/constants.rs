//! Consensus constants. All monetary values are in quarks (1 QTA = 10^4 quarks).
//!
//! Changing any constant in this module is a hard fork.

/// Sub-unit multiplier: quarks per whole coin.
pub const COIN: u64 = 10_000;

/// Initial block subsidy in quarks (105,113,636 QTA).
///
/// The full emission across all halvings is just under
/// `2 * INITIAL_SUBSIDY * HALVING_INTERVAL` ≈ 2.21 × 10^18 quarks, which
/// leaves ~8× headroom below `u64::MAX`.
pub const INITIAL_SUBSIDY: u64 = 105_113_636 * COIN;

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 1_051_200;

/// Target seconds between blocks (2-minute profile).
pub const TARGET_BLOCK_TIME: u64 = 120;

/// Number of solve intervals consumed by the per-block retarget.
pub const RETARGET_WINDOW: u64 = 60;

/// Maximum number of blocks a reorganization may disconnect.
///
/// Deeper forks are rejected with `ReorgTooDeep`; blocks below this depth
/// are effectively final.
pub const MAX_REORG_DEPTH: u64 = 100;

/// Maximum canonical-encoded block size in bytes (4 MiB).
pub const MAX_BLOCK_BYTES: usize = 4_194_304;

/// Maximum canonical-encoded transaction size in bytes (1 MiB).
pub const MAX_TX_BYTES: usize = 1_048_576;

/// Maximum script size in bytes (10 KiB).
pub const MAX_SCRIPT_BYTES: usize = 10_240;

/// Maximum inputs or outputs per transaction.
pub const MAX_TX_SLOTS: usize = 65_536;

/// Confirmations before a coinbase output becomes spendable.
pub const COINBASE_MATURITY: u64 = 100;

/// Maximum signature-operation cost per block (one unit per CHECK_SIG_PQ).
pub const MAX_SIGOP_COST: u64 = 80_000;

/// Number of ancestor timestamps in the median-time-past window.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Maximum seconds a block timestamp may run ahead of wall-clock time.
pub const MAX_FUTURE_DRIFT_SECONDS: u64 = 7_200;

/// Blocks per proof-of-work seed epoch.
pub const POW_EPOCH_INTERVAL: u64 = 2_048;

/// Lag (in blocks) between an epoch boundary and its seed block, giving
/// miners and validators time to build the next epoch state.
pub const POW_EPOCH_LAG: u64 = 64;

/// Minimum coinbase unlock-script length (height commitment alone).
pub const MIN_COINBASE_SCRIPT: usize = 2;

/// Maximum coinbase unlock-script length (height commitment + miner data).
pub const MAX_COINBASE_SCRIPT: usize = 100;

/// Supported transaction versions.
pub const TX_VERSION: u32 = 1;

/// Supported block header version.
pub const BLOCK_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_fits_u64() {
        // Geometric sum of the halving schedule is < 2 * first epoch.
        let bound = 2u128 * INITIAL_SUBSIDY as u128 * HALVING_INTERVAL as u128;
        assert!(bound < u64::MAX as u128);
    }

    #[test]
    fn epoch_lag_smaller_than_interval() {
        assert!(POW_EPOCH_LAG < POW_EPOCH_INTERVAL);
    }
}
