//! Consensus engine.
//!
//! Wires quanta-core's validation, difficulty, and reward modules to a
//! [`ChainView`] and the proof-of-work kernel, providing the full
//! validation pipeline for incoming blocks and the template builder for
//! external miners.
//!
//! The engine walks header chains by hash (never by height), so it
//! validates blocks on side branches during reorganizations exactly as it
//! does on the main chain — the caller names the parent, the engine
//! derives expected target, median time past, and the PoW epoch seed from
//! that branch.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::debug;

use quanta_core::block_validation::{
    self, BlockContext, ContextualFailure, ValidatedBlock,
};
use quanta_core::chain_state::ChainView;
use quanta_core::codec::write_varint;
use quanta_core::constants::{
    MAX_BLOCK_BYTES, MAX_COINBASE_SCRIPT, MAX_SIGOP_COST, MEDIAN_TIME_SPAN,
};
use quanta_core::difficulty;
use quanta_core::error::{ChainError, QuantaError, ValidationError};
use quanta_core::hash::pow_seed_height;
use quanta_core::merkle;
use quanta_core::reward;
use quanta_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, UtxoEntry,
};
use quanta_core::validation;

use crate::pow;

/// A freshly built mining candidate.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    /// Height the block would connect at.
    pub height: u64,
    /// Parent (current tip) hash.
    pub prev_hash: Hash256,
    /// Required compact target.
    pub target: u32,
    /// Chosen block time.
    pub time: u32,
    /// Merkle root over the included transactions.
    pub merkle_root: Hash256,
    /// Total fees collected by the coinbase.
    pub total_fees: u64,
    /// The candidate block with nonce zero; the miner owns the nonce.
    pub block: Block,
}

/// The production consensus engine.
pub struct ConsensusEngine {
    chain: Arc<dyn ChainView>,
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
    #[cfg(feature = "randomx")]
    randomx: pow::RandomXPow,
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine").finish_non_exhaustive()
    }
}

impl ConsensusEngine {
    /// Create an engine reading chain state from `chain`, with the system
    /// clock.
    pub fn new(chain: Arc<dyn ChainView>) -> Self {
        Self::with_clock(chain, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    /// Create an engine with an injected clock (tests).
    pub fn with_clock(
        chain: Arc<dyn ChainView>,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            #[cfg(feature = "randomx")]
            randomx: pow::RandomXPow::new(&quanta_core::genesis::genesis_hash())
                .expect("RandomX VM init failed"),
            chain,
            clock: Box::new(clock),
        }
    }

    fn header_of(&self, hash: &Hash256) -> Result<BlockHeader, QuantaError> {
        self.chain
            .get_block_header(hash)?
            .ok_or_else(|| ChainError::UnknownBlock(*hash).into())
    }

    /// Header `steps` blocks above `from` (0 = `from` itself), following
    /// parent links.
    fn ancestor_header(&self, from: &Hash256, steps: u64) -> Result<BlockHeader, QuantaError> {
        let mut header = self.header_of(from)?;
        for _ in 0..steps {
            header = self.header_of(&header.prev_block)?;
        }
        Ok(header)
    }

    /// Expected compact target for the block after the given parent.
    pub fn next_target(
        &self,
        parent_hash: &Hash256,
        parent_height: u64,
    ) -> Result<u32, QuantaError> {
        let parent = self.header_of(parent_hash)?;
        let intervals = difficulty::window_intervals(parent_height + 1);
        if intervals == 0 {
            return Ok(parent.target);
        }
        let ancestor = self.ancestor_header(parent_hash, intervals)?;
        let span = parent.time as i64 - ancestor.time as i64;
        Ok(difficulty::next_target(parent.target, span, intervals))
    }

    /// Median of the last 11 block times ending at `parent_hash`
    /// (inclusive); fewer on the early chain.
    pub fn median_time_past(&self, parent_hash: &Hash256) -> Result<u32, QuantaError> {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut header = self.header_of(parent_hash)?;
        loop {
            times.push(header.time);
            if times.len() == MEDIAN_TIME_SPAN || header.prev_block == Hash256::ZERO {
                break;
            }
            header = self.header_of(&header.prev_block)?;
        }
        times.sort_unstable();
        Ok(times[times.len() / 2])
    }

    /// The PoW epoch seed for a block at `height` on the branch ending at
    /// `parent_hash`.
    pub fn pow_seed(&self, height: u64, parent_hash: &Hash256) -> Result<Hash256, QuantaError> {
        debug_assert!(height >= 1);
        let steps = (height - 1) - pow_seed_height(height);
        Ok(self.ancestor_header(parent_hash, steps)?.hash())
    }

    /// Check a header's proof of work against its own claimed target.
    /// The claimed target is separately pinned to the retarget schedule
    /// during contextual validation.
    pub fn check_pow(
        &self,
        header: &BlockHeader,
        height: u64,
        parent_hash: &Hash256,
    ) -> Result<(), QuantaError> {
        let target = difficulty::compact_to_target(header.target)
            .filter(|_| difficulty::is_canonical_compact(header.target))
            .ok_or(ValidationError::NonCanonicalTarget(header.target))?;

        let seed = self.pow_seed(height, parent_hash)?;
        let hash = self.pow_hash(&seed, &header.pow_bytes())?;
        if difficulty::meets_target(&hash, &target) {
            Ok(())
        } else {
            Err(ValidationError::PowInsufficient.into())
        }
    }

    fn pow_hash(&self, seed: &Hash256, header_bytes: &[u8]) -> Result<Hash256, QuantaError> {
        #[cfg(feature = "randomx")]
        {
            self.randomx
                .update_seed(seed)
                .and_then(|_| self.randomx.hash(header_bytes))
                .map_err(|e| quanta_core::error::StorageError::Io(e).into())
        }
        #[cfg(not(feature = "randomx"))]
        Ok(pow::pow_hash(seed, header_bytes))
    }

    /// Header-only admission check for `receive_header`: canonical target
    /// and proof of work. Contextual rules (target schedule, timestamps)
    /// wait for the body.
    pub fn check_header(
        &self,
        header: &BlockHeader,
        height: u64,
    ) -> Result<(), QuantaError> {
        self.check_pow(header, height, &header.prev_block)
    }

    /// Full validation of a block extending `parent_hash` at
    /// `parent_height + 1`.
    ///
    /// `get_utxo` reads the UTXO set as of the parent (the store has
    /// already been rewound/advanced to it during reorganizations).
    /// Consensus failures come back as
    /// [`QuantaError::Validation`]; a cooperative cancellation as
    /// [`ChainError::Cancelled`], which must not mark the block failed.
    pub fn validate_block<F>(
        &self,
        block: &Block,
        parent_hash: &Hash256,
        parent_height: u64,
        get_utxo: F,
        cancel: Option<&AtomicBool>,
    ) -> Result<ValidatedBlock, QuantaError>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry> + Sync,
    {
        let height = parent_height + 1;
        let txids = block_validation::check_block_structure(block)?;
        self.check_pow(&block.header, height, parent_hash)?;

        let ctx = BlockContext {
            height,
            prev_hash: *parent_hash,
            expected_target: self.next_target(parent_hash, parent_height)?,
            median_time_past: self.median_time_past(parent_hash)?,
            current_time: (self.clock)(),
            subsidy: reward::subsidy(height),
        };

        match block_validation::contextual_check(block, &txids, &ctx, get_utxo, cancel) {
            Ok(validated) => Ok(validated),
            Err(ContextualFailure::Invalid(e)) => Err(e.into()),
            Err(ContextualFailure::Cancelled) => Err(ChainError::Cancelled.into()),
        }
    }

    /// Build a mining template on the current tip.
    ///
    /// `coinbase_script` locks the reward; `extra_data` rides in the
    /// coinbase unlock script after the height commitment (truncated to
    /// fit the coinbase cap — miners put extra-nonce seeds here).
    /// `candidates` are mempool transactions in selection order; the
    /// engine re-filters them against the chain view (existence, maturity,
    /// in-template double spends, byte and sigop budgets) so a stale pool
    /// can never produce an invalid template.
    pub fn create_block_template(
        &self,
        coinbase_script: &[u8],
        extra_data: &[u8],
        candidates: &[Transaction],
    ) -> Result<BlockTemplate, QuantaError> {
        let (tip_height, tip_hash) = self.chain.chain_tip()?;
        let height = tip_height + 1;
        let target = self.next_target(&tip_hash, tip_height)?;
        let median_time_past = self.median_time_past(&tip_hash)?;
        let time = ((self.clock)().max(median_time_past as u64 + 1)) as u32;
        let subsidy = reward::subsidy(height);

        // Height commitment first, then whatever extra data still fits.
        let mut coinbase_unlock = Vec::new();
        write_varint(&mut coinbase_unlock, height);
        let room = MAX_COINBASE_SCRIPT - coinbase_unlock.len();
        coinbase_unlock.extend_from_slice(&extra_data[..extra_data.len().min(room)]);
        if coinbase_unlock.len() < quanta_core::constants::MIN_COINBASE_SCRIPT {
            coinbase_unlock.push(0);
        }

        // Measure the fixed overhead with a placeholder coinbase; the
        // amount field is fixed-width, so the size is final.
        let mut coinbase = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::sentinel(),
                unlock_script: coinbase_unlock,
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount: subsidy, script: coinbase_script.to_vec() }],
            lock_time: 0,
        };
        let mut bytes_used = 84 + 9 + coinbase.encoded_size();
        let mut sigops_used = quanta_core::script::count_sigops(&coinbase.inputs[0].unlock_script);

        // Select candidates against the confirmed set plus an in-template
        // overlay, keeping dependency order.
        let mut included: Vec<Transaction> = Vec::new();
        let mut total_fees: u64 = 0;
        let mut spent: std::collections::HashSet<OutPoint> = Default::default();
        let mut in_template: std::collections::HashMap<OutPoint, UtxoEntry> = Default::default();

        'candidates: for tx in candidates {
            if tx.is_coinbase() {
                continue;
            }
            let size = tx.encoded_size();
            if bytes_used + size > MAX_BLOCK_BYTES {
                continue;
            }

            let mut prevouts = Vec::with_capacity(tx.inputs.len());
            for input in &tx.inputs {
                if spent.contains(&input.previous_output) {
                    continue 'candidates;
                }
                let utxo = in_template
                    .get(&input.previous_output)
                    .cloned()
                    .or_else(|| self.chain.get_utxo(&input.previous_output).ok().flatten());
                match utxo {
                    Some(u) if u.is_mature(height) => prevouts.push(u.output),
                    _ => continue 'candidates,
                }
            }

            let input_total: u64 = match prevouts
                .iter()
                .try_fold(0u64, |acc, p| acc.checked_add(p.amount))
            {
                Some(v) => v,
                None => continue,
            };
            let output_total = match tx.total_output_amount() {
                Some(v) if v <= input_total => v,
                _ => continue,
            };

            let cost = validation::sigop_cost(tx, &prevouts);
            if sigops_used + cost > MAX_SIGOP_COST {
                continue;
            }

            let txid = tx.txid();
            for input in &tx.inputs {
                spent.insert(input.previous_output);
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                in_template.insert(
                    OutPoint { txid, index: index as u32 },
                    UtxoEntry {
                        output: output.clone(),
                        height: height as u32,
                        is_coinbase: false,
                    },
                );
            }

            bytes_used += size;
            sigops_used += cost;
            total_fees = total_fees.saturating_add(input_total - output_total);
            included.push(tx.clone());
        }

        coinbase.outputs[0].amount = subsidy.saturating_add(total_fees);

        let mut transactions = Vec::with_capacity(1 + included.len());
        transactions.push(coinbase);
        transactions.extend(included);

        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        let merkle_root = merkle::merkle_root(&txids);

        debug!(
            height,
            txs = transactions.len(),
            total_fees,
            target = format_args!("{target:#010x}"),
            "built block template"
        );

        let block = Block {
            header: BlockHeader {
                version: 1,
                prev_block: tip_hash,
                merkle_root,
                time,
                target,
                nonce: 0,
            },
            transactions,
        };

        Ok(BlockTemplate {
            height,
            prev_hash: tip_hash,
            target,
            time,
            merkle_root,
            total_fees,
            block,
        })
    }
}

/// Grind nonces until the header's PoW hash meets its target, using the
/// default CPU kernel. Returns `false` when `max_nonce` is exhausted.
pub fn mine_block(block: &mut Block, seed: &Hash256, max_nonce: u64) -> bool {
    let Some(target) = difficulty::compact_to_target(block.header.target) else {
        return false;
    };
    for nonce in 0..=max_nonce {
        block.header.nonce = nonce;
        let hash = pow::pow_hash(seed, &block.header.pow_bytes());
        if difficulty::meets_target(&hash, &target) {
            return true;
        }
    }
    false
}
