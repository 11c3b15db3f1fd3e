//! Chain storage interfaces and the in-memory implementation.
//!
//! [`ChainStore`] is the mutable store owning the UTXO set, block bodies,
//! undo records, and the height index: `connect_block` applies a block's
//! batch (remove spent, insert created, persist block + undo, advance the
//! tip) and `disconnect_tip` reverts it from undo data. Transactions apply
//! in block order, spends before creates per transaction, so later
//! transactions may spend outputs created earlier in the same block.
//! Blocks reaching `connect_block` must already be fully validated; the
//! store enforces only set-level integrity (`MissingUtxo` /
//! `DuplicateUtxo`, height continuity, duplicate blocks).
//!
//! [`ChainView`] is the read-only face handed to the consensus engine and
//! other readers. Because every connect and disconnect commits as its own
//! atomic write group, a reader between groups always sees a consistent
//! UTXO set; long-running readers take storage-level snapshots
//! (quanta-node).
//!
//! [`MemoryChainStore`] backs tests; the production node uses RocksDB
//! (quanta-node).

use std::collections::{HashMap, HashSet};

use crate::error::StorageError;
use crate::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, UndoRecord, UtxoEntry,
};

/// Result of connecting a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectResult {
    pub utxos_created: usize,
    pub utxos_spent: usize,
}

/// Result of disconnecting the tip block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectResult {
    pub utxos_restored: usize,
    pub utxos_removed: usize,
}

/// Read-only chain state, implemented by stores and store adapters.
pub trait ChainView: Send + Sync {
    /// Look up a UTXO. `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError>;

    /// Current main-chain tip as `(height, hash)`; `(0, Hash256::ZERO)`
    /// before genesis.
    fn chain_tip(&self) -> Result<(u64, Hash256), StorageError>;

    /// Header of any stored block (main chain or side chain).
    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StorageError>;

    /// Full body of any stored block.
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError>;

    /// Main-chain block hash at `height`.
    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, StorageError>;
}

/// Mutable chain storage: UTXO set + blocks + undo records + height index,
/// with per-block atomic apply/revert.
pub trait ChainStore: ChainView {
    /// Apply a validated block at `height`: delete every spent outpoint,
    /// insert every created outpoint, store the body and undo record,
    /// index the height, and advance the tip — atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::HeightMismatch`] unless `height` is exactly
    ///   `tip + 1` (or 0 on an empty chain)
    /// - [`StorageError::MissingUtxo`] when a spent outpoint is absent
    /// - [`StorageError::DuplicateUtxo`] when a created outpoint exists
    /// - [`StorageError::DuplicateBlock`] when the block is already
    ///   connected
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectResult, StorageError>;

    /// Revert the tip block using its undo record: delete the outputs it
    /// created, re-insert the outputs it spent, and rewind the tip.
    fn disconnect_tip(&mut self) -> Result<DisconnectResult, StorageError>;

    /// Store a block body without connecting it (side-chain candidate kept
    /// for a potential reorganization).
    fn put_block_body(&mut self, block: &Block) -> Result<(), StorageError>;

    /// Undo record of a connected block.
    fn get_undo(&self, hash: &Hash256) -> Result<Option<UndoRecord>, StorageError>;

    /// Number of live UTXOs.
    fn utxo_count(&self) -> u64;

    /// Whether no block has been connected.
    fn is_empty(&self) -> bool;

    /// Every live UTXO, for audits and supply checks. Memory-bound; test
    /// and tooling use only.
    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, StorageError>;
}

/// In-memory chain store for tests. No persistence, no crash recovery.
pub struct MemoryChainStore {
    utxos: HashMap<OutPoint, UtxoEntry>,
    blocks: HashMap<Hash256, Block>,
    height_to_hash: HashMap<u64, Hash256>,
    undo: HashMap<Hash256, UndoRecord>,
    tip_height: u64,
    tip_hash: Hash256,
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
            blocks: HashMap::new(),
            height_to_hash: HashMap::new(),
            undo: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn undo_count(&self) -> usize {
        self.undo.len()
    }

    /// Remove spent UTXOs into the undo record. Coinbase inputs spend
    /// nothing, and outputs created earlier in the same block (tracked in
    /// `created_in_block`) are consumed without an undo entry — there is
    /// no prior coin to restore.
    fn spend_inputs(
        &mut self,
        tx: &Transaction,
        undo: &mut UndoRecord,
        created_in_block: &mut HashSet<OutPoint>,
    ) -> Result<usize, StorageError> {
        if tx.is_coinbase() {
            return Ok(0);
        }
        let mut spent = 0;
        for input in &tx.inputs {
            let entry = self
                .utxos
                .remove(&input.previous_output)
                .ok_or(StorageError::MissingUtxo(input.previous_output))?;
            if !created_in_block.remove(&input.previous_output) {
                undo.spent.push((input.previous_output, entry));
            }
            spent += 1;
        }
        Ok(spent)
    }

    fn create_outputs(
        &mut self,
        tx: &Transaction,
        height: u64,
        created_in_block: &mut HashSet<OutPoint>,
    ) -> Result<usize, StorageError> {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        let mut created = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint { txid, index: index as u32 };
            let entry = UtxoEntry {
                output: output.clone(),
                height: height as u32,
                is_coinbase,
            };
            if self.utxos.insert(outpoint, entry).is_some() {
                return Err(StorageError::DuplicateUtxo(outpoint));
            }
            created_in_block.insert(outpoint);
            created += 1;
        }
        Ok(created)
    }
}

impl ChainView for MemoryChainStore {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), StorageError> {
        Ok((self.tip_height, self.tip_hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StorageError> {
        Ok(self.blocks.get(hash).map(|b| b.header))
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, StorageError> {
        Ok(self.height_to_hash.get(&height).copied())
    }
}

impl ChainStore for MemoryChainStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectResult, StorageError> {
        if self.tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(StorageError::HeightMismatch { expected: 0, got: height });
            }
        } else if height != self.tip_height + 1 {
            return Err(StorageError::HeightMismatch {
                expected: self.tip_height + 1,
                got: height,
            });
        }

        let block_hash = block.header.hash();
        if self.undo.contains_key(&block_hash) {
            return Err(StorageError::DuplicateBlock(block_hash));
        }

        let mut undo = UndoRecord::default();
        let mut created_in_block = HashSet::new();
        let mut total_spent = 0;
        let mut total_created = 0;
        for tx in &block.transactions {
            total_spent += self.spend_inputs(tx, &mut undo, &mut created_in_block)?;
            total_created += self.create_outputs(tx, height, &mut created_in_block)?;
        }

        self.blocks.insert(block_hash, block.clone());
        self.height_to_hash.insert(height, block_hash);
        self.undo.insert(block_hash, undo);
        self.tip_height = height;
        self.tip_hash = block_hash;

        Ok(ConnectResult {
            utxos_created: total_created,
            utxos_spent: total_spent,
        })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectResult, StorageError> {
        if self.tip_hash == Hash256::ZERO {
            return Err(StorageError::EmptyChain);
        }

        let tip_hash = self.tip_hash;
        let tip_height = self.tip_height;

        let block = self
            .blocks
            .get(&tip_hash)
            .cloned()
            .ok_or(StorageError::Corruption(format!("tip block {tip_hash} missing")))?;
        let undo = self
            .undo
            .remove(&tip_hash)
            .ok_or(StorageError::UndoMissing(tip_hash))?;

        let mut removed = 0;
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for index in 0..tx.outputs.len() {
                let outpoint = OutPoint { txid, index: index as u32 };
                if self.utxos.remove(&outpoint).is_some() {
                    removed += 1;
                }
            }
        }

        let restored = undo.spent.len();
        for (outpoint, entry) in undo.spent {
            self.utxos.insert(outpoint, entry);
        }

        self.height_to_hash.remove(&tip_height);
        if tip_height == 0 {
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = tip_height - 1;
            self.tip_hash = block.header.prev_block;
        }

        Ok(DisconnectResult {
            utxos_restored: restored,
            utxos_removed: removed,
        })
    }

    fn put_block_body(&mut self, block: &Block) -> Result<(), StorageError> {
        self.blocks.insert(block.header.hash(), block.clone());
        Ok(())
    }

    fn get_undo(&self, hash: &Hash256) -> Result<Option<UndoRecord>, StorageError> {
        Ok(self.undo.get(hash).cloned())
    }

    fn utxo_count(&self) -> u64 {
        self.utxos.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.tip_hash == Hash256::ZERO
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, StorageError> {
        let mut all: Vec<_> = self.utxos.iter().map(|(k, v)| (*k, v.clone())).collect();
        all.sort_by_key(|(op, _)| (op.txid, op.index));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_varint;
    use crate::constants::COIN;
    use crate::difficulty::MAX_TARGET_BITS;
    use crate::merkle;
    use crate::types::{TxInput, TxOutput};

    // --- Helpers ---

    fn coinbase(height: u64, amount: u64, script_seed: u8) -> Transaction {
        let mut unlock = Vec::new();
        write_varint(&mut unlock, height);
        unlock.push(script_seed);
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::sentinel(),
                unlock_script: unlock,
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount, script: vec![script_seed] }],
            lock_time: 0,
        }
    }

    fn spend(outpoints: &[OutPoint], amount: u64, script_seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|op| TxInput {
                    previous_output: *op,
                    unlock_script: vec![0xAB; 8],
                    sequence: u32::MAX,
                })
                .collect(),
            outputs: vec![TxOutput { amount, script: vec![script_seed] }],
            lock_time: 0,
        }
    }

    fn make_block(prev: Hash256, time: u32, txs: Vec<Transaction>) -> Block {
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
        Block {
            header: crate::types::BlockHeader {
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

    fn outpoint_of(tx: &Transaction, index: u32) -> OutPoint {
        OutPoint { txid: tx.txid(), index }
    }

    // ------------------------------------------------------------------
    // Empty store
    // ------------------------------------------------------------------

    #[test]
    fn new_store_is_empty() {
        let store = MemoryChainStore::new();
        assert!(store.is_empty());
        assert_eq!(store.utxo_count(), 0);
        assert_eq!(store.chain_tip().unwrap(), (0, Hash256::ZERO));
    }

    #[test]
    fn disconnect_empty_chain_errors() {
        let mut store = MemoryChainStore::new();
        assert_eq!(store.disconnect_tip().unwrap_err(), StorageError::EmptyChain);
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    #[test]
    fn connect_genesis() {
        let mut store = MemoryChainStore::new();
        let cb = coinbase(0, 50 * COIN, 0xAA);
        let block = make_block(Hash256::ZERO, 1_000_000, vec![cb.clone()]);
        let result = store.connect_block(&block, 0).unwrap();

        assert_eq!(result.utxos_created, 1);
        assert_eq!(result.utxos_spent, 0);
        assert_eq!(store.chain_tip().unwrap(), (0, block.header.hash()));

        let entry = store.get_utxo(&outpoint_of(&cb, 0)).unwrap().unwrap();
        assert_eq!(entry.output.amount, 50 * COIN);
        assert_eq!(entry.height, 0);
        assert!(entry.is_coinbase);
    }

    #[test]
    fn connect_rejects_height_gap() {
        let mut store = MemoryChainStore::new();
        let block = make_block(Hash256::ZERO, 1_000_000, vec![coinbase(0, 1, 0xAA)]);
        assert_eq!(
            store.connect_block(&block, 1).unwrap_err(),
            StorageError::HeightMismatch { expected: 0, got: 1 }
        );

        store.connect_block(&block, 0).unwrap();
        let next = make_block(block.header.hash(), 1_000_120, vec![coinbase(1, 1, 0xBB)]);
        assert_eq!(
            store.connect_block(&next, 5).unwrap_err(),
            StorageError::HeightMismatch { expected: 1, got: 5 }
        );
    }

    #[test]
    fn connect_rejects_missing_utxo() {
        let mut store = MemoryChainStore::new();
        let cb = coinbase(0, 50 * COIN, 0xAA);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb]);
        store.connect_block(&block0, 0).unwrap();

        let phantom = OutPoint { txid: Hash256([0xEE; 32]), index: 0 };
        let bad = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 1, 0xBB), spend(&[phantom], 1, 0xCC)],
        );
        assert_eq!(
            store.connect_block(&bad, 1).unwrap_err(),
            StorageError::MissingUtxo(phantom)
        );
    }

    #[test]
    fn connect_rejects_duplicate_block() {
        let mut store = MemoryChainStore::new();
        let block = make_block(Hash256::ZERO, 1_000_000, vec![coinbase(0, 1, 0xAA)]);
        store.connect_block(&block, 0).unwrap();
        // Same hash again (the store checks undo presence, not height).
        let err = store.connect_block(&block, 1).unwrap_err();
        assert_eq!(err, StorageError::DuplicateBlock(block.header.hash()));
    }

    #[test]
    fn connect_spends_and_creates() {
        let mut store = MemoryChainStore::new();
        let cb0 = coinbase(0, 50 * COIN, 0xAA);
        let cb0_out = outpoint_of(&cb0, 0);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb0]);
        store.connect_block(&block0, 0).unwrap();

        let spender = spend(&[cb0_out], 49 * COIN, 0xCC);
        let block1 = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 50 * COIN, 0xBB), spender.clone()],
        );
        let result = store.connect_block(&block1, 1).unwrap();

        assert_eq!(result.utxos_spent, 1);
        assert_eq!(result.utxos_created, 2);
        assert_eq!(store.get_utxo(&cb0_out).unwrap(), None);
        assert!(store.get_utxo(&outpoint_of(&spender, 0)).unwrap().is_some());
        assert_eq!(store.utxo_count(), 2);
    }

    // ------------------------------------------------------------------
    // Disconnect: revert(apply(b)) restores the pre-b set exactly
    // ------------------------------------------------------------------

    #[test]
    fn disconnect_restores_previous_utxo_set() {
        let mut store = MemoryChainStore::new();
        let cb0 = coinbase(0, 50 * COIN, 0xAA);
        let cb0_out = outpoint_of(&cb0, 0);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb0]);
        store.connect_block(&block0, 0).unwrap();

        let before = store.iter_utxos().unwrap();

        let spender = spend(&[cb0_out], 49 * COIN, 0xCC);
        let block1 = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 50 * COIN, 0xBB), spender],
        );
        store.connect_block(&block1, 1).unwrap();
        assert_ne!(store.iter_utxos().unwrap(), before);

        let result = store.disconnect_tip().unwrap();
        assert_eq!(result.utxos_removed, 2);
        assert_eq!(result.utxos_restored, 1);

        // Byte-identical restoration.
        assert_eq!(store.iter_utxos().unwrap(), before);
        assert_eq!(store.chain_tip().unwrap(), (0, block0.header.hash()));

        let restored = store.get_utxo(&cb0_out).unwrap().unwrap();
        assert!(restored.is_coinbase);
        assert_eq!(restored.height, 0);
    }

    #[test]
    fn disconnect_genesis_returns_to_empty() {
        let mut store = MemoryChainStore::new();
        let block = make_block(Hash256::ZERO, 1_000_000, vec![coinbase(0, 1, 0xAA)]);
        store.connect_block(&block, 0).unwrap();
        store.disconnect_tip().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.utxo_count(), 0);
        assert_eq!(store.undo_count(), 0);
    }

    #[test]
    fn multi_input_disconnect_restores_all() {
        let mut store = MemoryChainStore::new();
        let cb0 = Transaction {
            outputs: vec![
                TxOutput { amount: 30 * COIN, script: vec![0xAA] },
                TxOutput { amount: 20 * COIN, script: vec![0xBB] },
            ],
            ..coinbase(0, 0, 0xAA)
        };
        let op0 = outpoint_of(&cb0, 0);
        let op1 = outpoint_of(&cb0, 1);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb0]);
        store.connect_block(&block0, 0).unwrap();

        let merge = spend(&[op0, op1], 49 * COIN, 0xCC);
        let block1 = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 50 * COIN, 0xDD), merge],
        );
        let result = store.connect_block(&block1, 1).unwrap();
        assert_eq!(result.utxos_spent, 2);

        store.disconnect_tip().unwrap();
        assert_eq!(store.get_utxo(&op0).unwrap().unwrap().output.amount, 30 * COIN);
        assert_eq!(store.get_utxo(&op1).unwrap().unwrap().output.amount, 20 * COIN);
    }

    #[test]
    fn in_block_chain_connects_and_reverts_exactly() {
        let mut store = MemoryChainStore::new();
        let cb0 = coinbase(0, 50 * COIN, 0xAA);
        let cb0_out = outpoint_of(&cb0, 0);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb0]);
        store.connect_block(&block0, 0).unwrap();

        let before = store.iter_utxos().unwrap();

        // Block 1 chains within itself: the second spend consumes an
        // output the first spend just created.
        let first = spend(&[cb0_out], 49 * COIN, 0xBB);
        let mid_out = outpoint_of(&first, 0);
        let second = spend(&[mid_out], 48 * COIN, 0xCC);
        let final_out = outpoint_of(&second, 0);
        let block1 = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 50 * COIN, 0xDD), first, second],
        );
        let result = store.connect_block(&block1, 1).unwrap();
        assert_eq!(result.utxos_spent, 2);
        assert_eq!(result.utxos_created, 3);

        // Live set: block-1 coinbase + the end of the chain.
        assert_eq!(store.utxo_count(), 2);
        assert!(store.get_utxo(&cb0_out).unwrap().is_none());
        assert!(store.get_utxo(&mid_out).unwrap().is_none());
        assert!(store.get_utxo(&final_out).unwrap().is_some());

        // Undo holds only the pre-existing coin, not the chained one.
        let undo = store.get_undo(&block1.header.hash()).unwrap().unwrap();
        assert_eq!(undo.spent.len(), 1);
        assert_eq!(undo.spent[0].0, cb0_out);

        // revert(apply(b)) is exact: no phantom restoration of mid_out.
        store.disconnect_tip().unwrap();
        assert_eq!(store.iter_utxos().unwrap(), before);
    }

    #[test]
    fn connect_disconnect_reconnect_alternate() {
        let mut store = MemoryChainStore::new();
        let cb0 = coinbase(0, 50 * COIN, 0xAA);
        let cb0_out = outpoint_of(&cb0, 0);
        let block0 = make_block(Hash256::ZERO, 1_000_000, vec![cb0]);
        store.connect_block(&block0, 0).unwrap();

        let block1 = make_block(
            block0.header.hash(),
            1_000_120,
            vec![coinbase(1, 50 * COIN, 0xBB)],
        );
        store.connect_block(&block1, 1).unwrap();
        store.disconnect_tip().unwrap();

        // A different block 1 spending the genesis coinbase.
        let alt = make_block(
            block0.header.hash(),
            1_000_121,
            vec![coinbase(1, 50 * COIN, 0xEE), spend(&[cb0_out], 48 * COIN, 0xFF)],
        );
        let result = store.connect_block(&alt, 1).unwrap();
        assert_eq!(result.utxos_spent, 1);
        assert_eq!(store.utxo_count(), 2);
    }

    // ------------------------------------------------------------------
    // Side-chain bodies and headers
    // ------------------------------------------------------------------

    #[test]
    fn put_block_body_stores_without_connecting() {
        let mut store = MemoryChainStore::new();
        let block = make_block(Hash256::ZERO, 1_000_000, vec![coinbase(0, 1, 0xAA)]);
        store.put_block_body(&block).unwrap();
        assert!(store.is_empty());
        assert_eq!(
            store.get_block(&block.header.hash()).unwrap().unwrap(),
            block
        );
        assert_eq!(
            store.get_block_header(&block.header.hash()).unwrap().unwrap(),
            block.header
        );
    }

    // ------------------------------------------------------------------
    // Trait objects
    // ------------------------------------------------------------------

    #[test]
    fn chain_store_is_dyn_compatible() {
        let mut store = MemoryChainStore::new();
        let block = make_block(Hash256::ZERO, 1_000_000, vec![coinbase(0, 1, 0xAA)]);
        store.connect_block(&block, 0).unwrap();

        let dyn_store: &dyn ChainStore = &store;
        assert!(!dyn_store.is_empty());
        assert_eq!(dyn_store.utxo_count(), 1);
        let dyn_view: &dyn ChainView = &store;
        assert_eq!(dyn_view.chain_tip().unwrap().0, 0);
    }
}
