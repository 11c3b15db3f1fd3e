//! In-memory pool of unconfirmed transactions.
//!
//! Stores transactions already validated against a UTXO view and keeps
//! them ready for block templates:
//!
//! - O(1) lookup by txid and O(1) conflict detection via a spent-outpoint
//!   index
//! - fee-rate-ordered selection (highest first) with in-template dependency
//!   resolution
//! - size-bounded storage with lowest-fee-rate eviction
//! - reorganization handling: transactions from disconnected blocks return
//!   to the pool when still valid, confirmed ones leave it
//!
//! The pool itself never re-runs scripts; admission validation is the
//! caller's job (see [`validate_transaction`](crate::validation::validate_transaction)).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};

/// Default maximum number of pooled transactions.
pub const DEFAULT_MAX_COUNT: usize = 5_000;

/// Default maximum total serialized bytes (32 MiB — lattice signatures
/// make transactions kilobytes each).
pub const DEFAULT_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Fee rate precision: milli-quarks per byte.
const FEE_RATE_PRECISION: u128 = 1_000;

fn compute_fee_rate(fee: u64, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = (fee as u128) * FEE_RATE_PRECISION / (size as u128);
    rate.min(u64::MAX as u128) as u64
}

/// A pooled transaction with precomputed metadata.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: u64,
    pub size: usize,
    fee_rate: u64,
}

impl MempoolEntry {
    /// Fee rate in milli-quarks per byte.
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }
}

/// The transaction pool.
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint → txid of the pooled spender.
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// Ascending `(fee_rate, txid)`; iterate in reverse for selection.
    by_fee_rate: BTreeSet<(u64, Hash256)>,
    max_count: usize,
    max_bytes: usize,
    total_bytes: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Mempool {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            by_fee_rate: BTreeSet::new(),
            max_count,
            max_bytes,
            total_bytes: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_COUNT, DEFAULT_MAX_BYTES)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// An output created by a pooled (unconfirmed) transaction and not yet
    /// spent by another pooled transaction, viewed as a UTXO at `height`.
    /// Lets admission validate children of unconfirmed parents, which the
    /// template selector then orders into the same block.
    pub fn unconfirmed_output(&self, outpoint: &OutPoint, height: u64) -> Option<UtxoEntry> {
        if self.by_outpoint.contains_key(outpoint) {
            return None;
        }
        let entry = self.entries.get(&outpoint.txid)?;
        let output = entry.tx.outputs.get(outpoint.index as usize)?;
        Some(UtxoEntry {
            output: output.clone(),
            height: height as u32,
            is_coinbase: false,
        })
    }

    /// Insert a pre-validated transaction with its computed fee.
    ///
    /// Rejects duplicates and input conflicts. When full, evicts
    /// lowest-fee-rate entries as long as the newcomer pays a strictly
    /// higher rate; otherwise fails with `PoolFull`.
    pub fn insert(&mut self, tx: Transaction, fee: u64) -> Result<Hash256, MempoolError> {
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid));
        }

        for input in &tx.inputs {
            if let Some(existing) = self.by_outpoint.get(&input.previous_output) {
                return Err(MempoolError::Conflict {
                    existing: *existing,
                    outpoint: input.previous_output,
                });
            }
        }

        let size = tx.encoded_size();
        let fee_rate = compute_fee_rate(fee, size);

        while self.entries.len() >= self.max_count
            || self.total_bytes + size > self.max_bytes
        {
            let Some(&(lowest_rate, lowest_txid)) = self.by_fee_rate.iter().next() else {
                return Err(MempoolError::PoolFull);
            };
            if lowest_rate >= fee_rate {
                return Err(MempoolError::PoolFull);
            }
            self.remove(&lowest_txid);
        }

        for input in &tx.inputs {
            self.by_outpoint.insert(input.previous_output, txid);
        }
        self.by_fee_rate.insert((fee_rate, txid));
        self.total_bytes += size;
        self.entries.insert(txid, MempoolEntry { tx, txid, fee, size, fee_rate });
        Ok(txid)
    }

    /// Remove a transaction by txid.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        self.by_fee_rate.remove(&(entry.fee_rate, entry.txid));
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Select transactions for a block template: descending fee rate,
    /// bounded by byte and sigop budgets, with parents resolved before
    /// children (a child may spend an output of an already-selected
    /// transaction).
    ///
    /// `get_utxo` reads the confirmed UTXO set at the template's parent;
    /// entries whose inputs are unavailable or immature are skipped, not
    /// removed.
    pub fn select<F>(
        &self,
        max_bytes: usize,
        max_sigops: u64,
        height: u64,
        get_utxo: F,
    ) -> Vec<MempoolEntry>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        let mut selected: Vec<MempoolEntry> = Vec::new();
        let mut selected_ids: HashSet<Hash256> = HashSet::new();
        // Outputs made available by already-selected transactions.
        let mut in_template: HashMap<OutPoint, UtxoEntry> = HashMap::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut bytes_used = 0usize;
        let mut sigops_used = 0u64;

        // Multi-pass: a high-fee child becomes selectable once its parent
        // lands in the template. Each pass walks remaining entries in
        // fee-rate order; stop when a pass adds nothing.
        loop {
            let mut progressed = false;

            for &(_, txid) in self.by_fee_rate.iter().rev() {
                if selected_ids.contains(&txid) {
                    continue;
                }
                let entry = &self.entries[&txid];
                if bytes_used + entry.size > max_bytes {
                    continue;
                }

                // Resolve every input from the confirmed set or the
                // template overlay.
                let mut prevouts = Vec::with_capacity(entry.tx.inputs.len());
                let mut ok = true;
                for input in &entry.tx.inputs {
                    if spent.contains(&input.previous_output) {
                        ok = false;
                        break;
                    }
                    let utxo = in_template
                        .get(&input.previous_output)
                        .cloned()
                        .or_else(|| get_utxo(&input.previous_output));
                    match utxo {
                        Some(u) if u.is_mature(height) => prevouts.push(u),
                        _ => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    continue;
                }

                let cost = crate::validation::sigop_cost(
                    &entry.tx,
                    &prevouts.iter().map(|u| u.output.clone()).collect::<Vec<_>>(),
                );
                if sigops_used + cost > max_sigops {
                    continue;
                }

                for input in &entry.tx.inputs {
                    spent.insert(input.previous_output);
                }
                for (index, output) in entry.tx.outputs.iter().enumerate() {
                    in_template.insert(
                        OutPoint { txid, index: index as u32 },
                        UtxoEntry {
                            output: output.clone(),
                            height: height as u32,
                            is_coinbase: false,
                        },
                    );
                }
                bytes_used += entry.size;
                sigops_used += cost;
                selected_ids.insert(txid);
                selected.push(entry.clone());
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        selected
    }

    /// Drop transactions confirmed or conflicted by a connected block.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.remove(&tx.txid());
            // Anything else spending the same outpoints is now invalid.
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if let Some(conflicting) = self.by_outpoint.get(&input.previous_output).copied()
                {
                    self.remove(&conflicting);
                }
            }
        }
    }

    /// Reorganization notification.
    ///
    /// Transactions from `disconnected` blocks (oldest first) re-enter the
    /// pool when `revalidate` accepts them under the new tip, returning
    /// their fee; transactions confirmed by `connected` blocks leave the
    /// pool along with anything now conflicting.
    pub fn reorg_notification<F>(
        &mut self,
        disconnected: &[Block],
        connected: &[Block],
        revalidate: F,
    ) where
        F: Fn(&Transaction) -> Option<u64>,
    {
        let mut confirmed: HashSet<Hash256> = HashSet::new();
        for block in connected {
            self.remove_confirmed(block);
            confirmed.extend(block.transactions.iter().map(|tx| tx.txid()));
        }
        for block in disconnected {
            for tx in block.transactions.iter().skip(1) {
                let txid = tx.txid();
                // A transaction confirmed on the new branch stays out.
                if confirmed.contains(&txid) || self.contains(&txid) {
                    continue;
                }
                if let Some(fee) = revalidate(tx) {
                    let _ = self.insert(tx.clone(), fee);
                }
            }
        }
    }

}
