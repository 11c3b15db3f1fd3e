//! Block validation.
//!
//! Phase A ([`check_block_structure`]) needs only the block bytes: coinbase
//! placement, per-transaction structure, duplicate detection, Merkle
//! commitment, size cap, and canonical target form. The proof-of-work check
//! itself lives with the consensus engine, which owns the epoch seed.
//!
//! Phase B ([`contextual_check`]) needs the parent chain state, provided as
//! a [`BlockContext`] plus a UTXO lookup: parent linkage, expected target,
//! timestamp rules, coinbase height commitment, input existence and
//! maturity, amount conservation, script evaluation, double-spend
//! detection, sigop cost, and the coinbase claim.
//!
//! Script verification is CPU-bound and pure, so it fans out over a worker
//! pool after the sequential UTXO pass has resolved every prevout.
//! Validation can be cancelled cooperatively between transactions when a
//! better tip candidate arrives; cancellation is not a consensus failure.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::constants::{
    BLOCK_VERSION, MAX_BLOCK_BYTES, MAX_FUTURE_DRIFT_SECONDS, MAX_SIGOP_COST,
};
use crate::difficulty;
use crate::error::{TxError, ValidationError};
use crate::merkle;
use crate::script;
use crate::types::{Block, Hash256, OutPoint, TxOutput, UtxoEntry};
use crate::validation::{self, coinbase_height};

/// Chain-state inputs to phase-B validation, assembled by the consensus
/// engine from the branch the block extends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    /// Height the block would connect at.
    pub height: u64,
    /// Header hash of the parent.
    pub prev_hash: Hash256,
    /// Compact target required at this height.
    pub expected_target: u32,
    /// Median of the previous 11 block times.
    pub median_time_past: u32,
    /// Wall-clock time in Unix seconds.
    pub current_time: u64,
    /// Subsidy for this height.
    pub subsidy: u64,
}

/// Summary of a block that passed phase B.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all transaction fees in quarks.
    pub total_fees: u64,
    /// Total coinbase output amount in quarks.
    pub coinbase_amount: u64,
    /// Total signature-operation cost.
    pub sigop_cost: u64,
}

/// Why a contextual check did not produce a [`ValidatedBlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextualFailure {
    /// Consensus-invalid: the block is `Failed` terminally.
    Invalid(ValidationError),
    /// Cooperatively cancelled: the block may be revalidated later.
    Cancelled,
}

impl From<ValidationError> for ContextualFailure {
    fn from(e: ValidationError) -> Self {
        Self::Invalid(e)
    }
}

/// Phase A: context-free block checks. Returns the transaction IDs in
/// block order on success.
pub fn check_block_structure(block: &Block) -> Result<Vec<Hash256>, ValidationError> {
    if block.header.version != BLOCK_VERSION {
        return Err(ValidationError::BadVersion(block.header.version));
    }

    if block.transactions.is_empty() {
        return Err(ValidationError::NoCoinbase);
    }
    if !block.transactions[0].is_coinbase() {
        return Err(ValidationError::CoinbaseMalformed(
            "first transaction is not a coinbase".into(),
        ));
    }

    for (i, tx) in block.transactions.iter().enumerate() {
        if i > 0 && tx.is_coinbase() {
            return Err(ValidationError::ExtraCoinbase(i));
        }
        validation::check_transaction(tx)
            .map_err(|source| ValidationError::Tx { index: i, source })?;
    }

    let mut seen = HashSet::with_capacity(block.transactions.len());
    let mut txids = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(ValidationError::DuplicateTx(txid));
        }
        txids.push(txid);
    }

    if block.header.merkle_root != merkle::merkle_root(&txids) {
        return Err(ValidationError::BadMerkleRoot);
    }

    let size = block.encoded_size();
    if size > MAX_BLOCK_BYTES {
        return Err(ValidationError::BlockTooLarge { size, max: MAX_BLOCK_BYTES });
    }

    if !difficulty::is_canonical_compact(block.header.target) {
        return Err(ValidationError::NonCanonicalTarget(block.header.target));
    }

    Ok(txids)
}

/// Phase B: validate a structurally-sound block against its parent chain
/// state.
///
/// `get_utxo` reads the UTXO set as of the parent block. Outputs created
/// earlier in this block are spendable by later transactions (the
/// in-block overlay below); the block's own coinbase stays locked by
/// maturity. `cancel` is polled between transactions.
pub fn contextual_check<F>(
    block: &Block,
    txids: &[Hash256],
    ctx: &BlockContext,
    get_utxo: F,
    cancel: Option<&AtomicBool>,
) -> Result<ValidatedBlock, ContextualFailure>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry> + Sync,
{
    // --- Header linkage and difficulty ---

    if block.header.prev_block != ctx.prev_hash {
        return Err(ValidationError::WrongParent {
            got: block.header.prev_block,
            expected: ctx.prev_hash,
        }
        .into());
    }

    if block.header.target != ctx.expected_target {
        return Err(ValidationError::WrongTarget {
            got: block.header.target,
            expected: ctx.expected_target,
        }
        .into());
    }

    // --- Timestamp ---

    if block.header.time <= ctx.median_time_past {
        return Err(ValidationError::BadTimestamp(format!(
            "time {} not after median-past {}",
            block.header.time, ctx.median_time_past,
        ))
        .into());
    }
    let max_time = ctx.current_time.saturating_add(MAX_FUTURE_DRIFT_SECONDS);
    if block.header.time as u64 > max_time {
        return Err(ValidationError::BadTimestamp(format!(
            "time {} exceeds now + {MAX_FUTURE_DRIFT_SECONDS}",
            block.header.time,
        ))
        .into());
    }

    // --- Coinbase height commitment ---

    let coinbase = &block.transactions[0];
    let claimed = coinbase_height(coinbase)
        .map_err(|e| ValidationError::CoinbaseMalformed(e.to_string()))?;
    if claimed != ctx.height {
        return Err(ValidationError::CoinbaseHeightMismatch {
            claimed,
            expected: ctx.height,
        }
        .into());
    }

    // --- Transactions: overlay walk, fees, sigops ---

    // Outputs created by this block so far, spendable by later
    // transactions; outpoints consumed by this block.
    let mut created: HashMap<OutPoint, UtxoEntry> = HashMap::new();
    let mut spent: HashSet<OutPoint> = HashSet::new();

    for (index, output) in coinbase.outputs.iter().enumerate() {
        created.insert(
            OutPoint { txid: txids[0], index: index as u32 },
            UtxoEntry {
                output: output.clone(),
                height: ctx.height as u32,
                is_coinbase: true,
            },
        );
    }

    let mut total_fees: u64 = 0;
    let mut sigop_cost: u64 = 0;
    for input in &coinbase.inputs {
        sigop_cost += script::count_sigops(&input.unlock_script);
    }

    // Script jobs: (tx index, input index, resolved prevout).
    let mut jobs: Vec<(usize, usize, TxOutput)> = Vec::new();

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(ContextualFailure::Cancelled);
            }
        }

        // Resolve inputs against the overlay: pre-block UTXO set plus
        // earlier in-block outputs, minus anything already consumed.
        for input in &tx.inputs {
            if spent.contains(&input.previous_output) {
                return Err(ValidationError::DoubleSpend(input.previous_output).into());
            }
        }
        let lookup = |op: &OutPoint| {
            if spent.contains(op) {
                return None;
            }
            created.get(op).cloned().or_else(|| get_utxo(op))
        };

        let (validated, prevouts) =
            validation::check_transaction_inputs(tx, lookup, ctx.height)
                .map_err(|source| ValidationError::Tx { index: i, source })?;

        for input in &tx.inputs {
            spent.insert(input.previous_output);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            created.insert(
                OutPoint { txid: txids[i], index: index as u32 },
                UtxoEntry {
                    output: output.clone(),
                    height: ctx.height as u32,
                    is_coinbase: false,
                },
            );
        }

        total_fees = total_fees
            .checked_add(validated.fee)
            .ok_or(ValidationError::Tx { index: i, source: TxError::AmountOverflow })?;

        sigop_cost += validation::sigop_cost(tx, &prevouts);
        for (input_index, prevout) in prevouts.into_iter().enumerate() {
            jobs.push((i, input_index, prevout));
        }
    }

    if sigop_cost > MAX_SIGOP_COST {
        return Err(ValidationError::TooManySigops {
            cost: sigop_cost,
            max: MAX_SIGOP_COST,
        }
        .into());
    }

    // --- Parallel script verification ---

    if let Some(cancel) = cancel {
        if cancel.load(Ordering::Relaxed) {
            return Err(ContextualFailure::Cancelled);
        }
    }

    jobs.par_iter().try_for_each(|(tx_index, input_index, prevout)| {
        script::verify_input(&block.transactions[*tx_index], *input_index, prevout).map_err(
            |source| ValidationError::Tx {
                index: *tx_index,
                source: TxError::ScriptFailure { index: *input_index, source },
            },
        )
    })?;

    // --- Coinbase claim ---

    let coinbase_amount = coinbase
        .total_output_amount()
        .ok_or(ValidationError::Tx { index: 0, source: TxError::AmountOverflow })?;
    let max_claim = ctx
        .subsidy
        .checked_add(total_fees)
        .ok_or(ValidationError::Tx { index: 0, source: TxError::AmountOverflow })?;
    if coinbase_amount > max_claim {
        return Err(ValidationError::CoinbaseOverclaim {
            got: coinbase_amount,
            max: max_claim,
        }
        .into());
    }

    Ok(ValidatedBlock {
        total_fees,
        coinbase_amount,
        sigop_cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_varint;
    use crate::constants::{COIN, COINBASE_MATURITY, TARGET_BLOCK_TIME};
    use crate::crypto::{self, KeyPair};
    use crate::difficulty::MAX_TARGET_BITS;
    use crate::script::pay_to_pubkey_hash;
    use crate::types::{BlockHeader, Transaction, TxInput};

    // --- Helpers ---

    fn coinbase(height: u64, amount: u64) -> Transaction {
        let mut unlock = Vec::new();
        write_varint(&mut unlock, height);
        unlock.push(0xC0);
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::sentinel(),
                unlock_script: unlock,
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount, script: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn make_block(prev: Hash256, time: u32, txs: Vec<Transaction>) -> Block {
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: prev,
                merkle_root: merkle::merkle_root(&txids),
                time,
                target: MAX_TARGET_BITS,
                nonce: 0,
            },
            transactions: txs,
        }
    }

    fn ctx_at(height: u64, prev: Hash256, subsidy: u64) -> BlockContext {
        BlockContext {
            height,
            prev_hash: prev,
            expected_target: MAX_TARGET_BITS,
            median_time_past: 1_000_000,
            current_time: 1_000_000 + TARGET_BLOCK_TIME,
            subsidy,
        }
    }

    fn check(
        block: &Block,
        ctx: &BlockContext,
        utxos: &HashMap<OutPoint, UtxoEntry>,
    ) -> Result<ValidatedBlock, ContextualFailure> {
        let txids = check_block_structure(block).map_err(ContextualFailure::Invalid)?;
        contextual_check(block, &txids, ctx, |op| utxos.get(op).cloned(), None)
    }

    fn signed_spend(
        kp: &KeyPair,
        outpoint: OutPoint,
        prevout: &TxOutput,
        out_amount: u64,
    ) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: outpoint,
                unlock_script: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount: out_amount, script: vec![0x51] }],
            lock_time: 0,
        };
        crypto::sign_input(&mut tx, 0, kp, prevout).unwrap();
        tx
    }

    // ------------------------------------------------------------------
    // Phase A
    // ------------------------------------------------------------------

    #[test]
    fn structure_rejects_empty_block() {
        let block = make_block(Hash256::ZERO, 0, vec![]);
        assert_eq!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::NoCoinbase
        );
    }

    #[test]
    fn structure_rejects_first_tx_not_coinbase() {
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let tx = signed_spend(
            &kp,
            OutPoint { txid: Hash256([1; 32]), index: 0 },
            &prevout,
            90,
        );
        let block = make_block(Hash256::ZERO, 0, vec![tx]);
        assert!(matches!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::CoinbaseMalformed(_)
        ));
    }

    #[test]
    fn structure_rejects_second_coinbase() {
        let block = make_block(
            Hash256::ZERO,
            0,
            vec![coinbase(1, 50 * COIN), coinbase(1, 1)],
        );
        assert_eq!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::ExtraCoinbase(1)
        );
    }

    #[test]
    fn structure_rejects_tampered_merkle_root() {
        let mut block = make_block(Hash256::ZERO, 0, vec![coinbase(1, 50 * COIN)]);
        block.header.merkle_root = Hash256([0xFF; 32]);
        assert_eq!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::BadMerkleRoot
        );
    }

    #[test]
    fn structure_rejects_duplicate_txids() {
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let tx = signed_spend(
            &kp,
            OutPoint { txid: Hash256([1; 32]), index: 0 },
            &prevout,
            90,
        );
        // Identical transaction twice: same txid, caught before the
        // (also-failing) double-spend check.
        let block = make_block(
            Hash256::ZERO,
            0,
            vec![coinbase(1, 50 * COIN), tx.clone(), tx],
        );
        assert!(matches!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::DuplicateTx(_)
        ));
    }

    #[test]
    fn structure_rejects_non_canonical_target() {
        let mut block = make_block(Hash256::ZERO, 0, vec![coinbase(1, 50 * COIN)]);
        block.header.target = 0x1d80_0000; // sign bit set
        assert_eq!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::NonCanonicalTarget(0x1d80_0000)
        );
    }

    #[test]
    fn structure_rejects_bad_version() {
        let mut block = make_block(Hash256::ZERO, 0, vec![coinbase(1, 50 * COIN)]);
        block.header.version = 9;
        assert_eq!(
            check_block_structure(&block).unwrap_err(),
            ValidationError::BadVersion(9)
        );
    }

    #[test]
    fn structure_accepts_coinbase_only_block() {
        let block = make_block(Hash256::ZERO, 0, vec![coinbase(1, 50 * COIN)]);
        let txids = check_block_structure(&block).unwrap();
        assert_eq!(txids.len(), 1);
        assert_eq!(txids[0], block.transactions[0].txid());
    }

    // ------------------------------------------------------------------
    // Phase B: header rules
    // ------------------------------------------------------------------

    #[test]
    fn contextual_rejects_wrong_parent() {
        let prev = Hash256([0x11; 32]);
        let block = make_block(Hash256([0x22; 32]), 1_000_100, vec![coinbase(1, 50 * COIN)]);
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::WrongParent { .. })
        ));
    }

    #[test]
    fn contextual_rejects_wrong_target() {
        let prev = Hash256([0x11; 32]);
        let block = make_block(prev, 1_000_100, vec![coinbase(1, 50 * COIN)]);
        let mut ctx = ctx_at(1, prev, 50 * COIN);
        ctx.expected_target = 0x1d00_ffff;
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx, &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::WrongTarget { .. })
        ));
    }

    #[test]
    fn contextual_timestamp_must_beat_median() {
        let prev = Hash256([0x11; 32]);
        let ctx = ctx_at(1, prev, 50 * COIN);
        let utxos = HashMap::new();

        // Equal to the median: rejected.
        let block = make_block(prev, ctx.median_time_past, vec![coinbase(1, 50 * COIN)]);
        assert!(matches!(
            check(&block, &ctx, &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::BadTimestamp(_))
        ));

        // One past the median: accepted.
        let block = make_block(prev, ctx.median_time_past + 1, vec![coinbase(1, 50 * COIN)]);
        assert!(check(&block, &ctx, &utxos).is_ok());
    }

    #[test]
    fn contextual_future_drift_boundary() {
        let prev = Hash256([0x11; 32]);
        let ctx = ctx_at(1, prev, 50 * COIN);
        let utxos = HashMap::new();

        // Exactly now + 7200: accepted.
        let at_limit = (ctx.current_time + MAX_FUTURE_DRIFT_SECONDS) as u32;
        let block = make_block(prev, at_limit, vec![coinbase(1, 50 * COIN)]);
        assert!(check(&block, &ctx, &utxos).is_ok());

        // One second further: rejected.
        let block = make_block(prev, at_limit + 1, vec![coinbase(1, 50 * COIN)]);
        assert!(matches!(
            check(&block, &ctx, &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::BadTimestamp(_))
        ));
    }

    #[test]
    fn contextual_rejects_height_mismatch() {
        let prev = Hash256([0x11; 32]);
        let block = make_block(prev, 1_000_100, vec![coinbase(2, 50 * COIN)]);
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::CoinbaseHeightMismatch {
                claimed: 2,
                expected: 1,
            })
        ));
    }

    // ------------------------------------------------------------------
    // Phase B: coinbase claim
    // ------------------------------------------------------------------

    #[test]
    fn coinbase_may_claim_exactly_subsidy_plus_fees() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100 * COIN,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };
        let spend = signed_spend(&kp, op, &prevout, 99 * COIN); // 1 QTA fee

        let mut utxos = HashMap::new();
        utxos.insert(op, UtxoEntry { output: prevout, height: 0, is_coinbase: false });

        let block = make_block(
            prev,
            1_000_100,
            vec![coinbase(1, 50 * COIN + COIN), spend],
        );
        let validated = check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap();
        assert_eq!(validated.total_fees, COIN);
        assert_eq!(validated.coinbase_amount, 51 * COIN);
        assert_eq!(validated.sigop_cost, 1);
    }

    #[test]
    fn coinbase_overclaim_rejected_by_one_quark() {
        let prev = Hash256([0x11; 32]);
        let block = make_block(prev, 1_000_100, vec![coinbase(1, 50 * COIN + 1)]);
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::CoinbaseOverclaim {
                got,
                max,
            }) if got == 50 * COIN + 1 && max == 50 * COIN
        ));
    }

    #[test]
    fn coinbase_may_claim_less() {
        let prev = Hash256([0x11; 32]);
        let block = make_block(prev, 1_000_100, vec![coinbase(1, 1)]);
        let utxos = HashMap::new();
        assert!(check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).is_ok());
    }

    // ------------------------------------------------------------------
    // Phase B: inputs and the in-block overlay
    // ------------------------------------------------------------------

    #[test]
    fn missing_utxo_rejected() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };
        let spend = signed_spend(&kp, op, &prevout, 90);
        let block = make_block(prev, 1_000_100, vec![coinbase(1, 50 * COIN), spend]);
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::Tx {
                index: 1,
                source: TxError::MissingUtxo(_),
            })
        ));
    }

    #[test]
    fn double_spend_across_transactions_rejected() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100 * COIN,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };
        let spend_a = signed_spend(&kp, op, &prevout, 99 * COIN);
        let spend_b = signed_spend(&kp, op, &prevout, 98 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(op, UtxoEntry { output: prevout, height: 0, is_coinbase: false });

        let block = make_block(
            prev,
            1_000_100,
            vec![coinbase(1, 50 * COIN), spend_a, spend_b],
        );
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::DoubleSpend(o)) if o == op
        ));
    }

    #[test]
    fn in_block_chaining_is_allowed() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let lock = pay_to_pubkey_hash(&kp.public_key().key_hash());
        let prevout = TxOutput { amount: 100 * COIN, script: lock.clone() };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };

        // First spend pays back to the same key, second spends its output.
        let mut first = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: op,
                unlock_script: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount: 99 * COIN, script: lock.clone() }],
            lock_time: 0,
        };
        crypto::sign_input(&mut first, 0, &kp, &prevout).unwrap();

        let mid = TxOutput { amount: 99 * COIN, script: lock };
        let second = signed_spend(
            &kp,
            OutPoint { txid: first.txid(), index: 0 },
            &mid,
            98 * COIN,
        );

        let mut utxos = HashMap::new();
        utxos.insert(op, UtxoEntry { output: prevout, height: 0, is_coinbase: false });

        let block = make_block(
            prev,
            1_000_100,
            vec![coinbase(1, 52 * COIN), first, second],
        );
        let validated = check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap();
        assert_eq!(validated.total_fees, 2 * COIN);
    }

    #[test]
    fn spending_own_coinbase_in_block_is_immature() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let lock = pay_to_pubkey_hash(&kp.public_key().key_hash());

        let mut cb = coinbase(1, 50 * COIN);
        cb.outputs[0].script = lock.clone();
        let cb_out = TxOutput { amount: 50 * COIN, script: lock };
        let spend = signed_spend(
            &kp,
            OutPoint { txid: cb.txid(), index: 0 },
            &cb_out,
            49 * COIN,
        );

        let block = make_block(prev, 1_000_100, vec![cb, spend]);
        let utxos = HashMap::new();
        assert!(matches!(
            check(&block, &ctx_at(1, prev, 50 * COIN), &utxos).unwrap_err(),
            ContextualFailure::Invalid(ValidationError::Tx {
                index: 1,
                source: TxError::CoinbaseImmature { .. },
            })
        ));
    }

    #[test]
    fn mature_coinbase_spend_accepted() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100 * COIN,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };
        let spend = signed_spend(&kp, op, &prevout, 100 * COIN);

        let height = COINBASE_MATURITY + 5;
        let mut utxos = HashMap::new();
        utxos.insert(op, UtxoEntry { output: prevout, height: 5, is_coinbase: true });

        let block = make_block(
            prev,
            1_000_100,
            vec![coinbase(height, 50 * COIN), spend],
        );
        assert!(check(&block, &ctx_at(height, prev, 50 * COIN), &utxos).is_ok());
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    #[test]
    fn cancellation_is_not_a_consensus_failure() {
        let prev = Hash256([0x11; 32]);
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 100 * COIN,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let op = OutPoint { txid: Hash256([0x22; 32]), index: 0 };
        let spend = signed_spend(&kp, op, &prevout, 99 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(op, UtxoEntry { output: prevout, height: 0, is_coinbase: false });

        let block = make_block(
            prev,
            1_000_100,
            vec![coinbase(1, 50 * COIN), spend],
        );
        let txids = check_block_structure(&block).unwrap();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            contextual_check(
                &block,
                &txids,
                &ctx_at(1, prev, 50 * COIN),
                |op| utxos.get(op).cloned(),
                Some(&cancel),
            )
            .unwrap_err(),
            ContextualFailure::Cancelled
        );
    }
}
