//! Full-node composition.
//!
//! [`Node`] owns the block index and the main-chain pointer, wires the
//! durable store to the consensus engine, and drives
//! [`activate_best_chain`](Node::activate_best_chain): connecting the
//! highest-work fully-available candidate, reorganizing through the fork
//! point with stored undo data when the candidate is on a side branch, and
//! refusing reorganizations deeper than the finality window.
//!
//! Concurrency model: a single chain-writer at a time (the `write_gate`
//! serializes every mutating entry point), any number of readers through
//! short `RwLock` read guards. Locks are never held across engine calls,
//! and each connect/disconnect commits as its own atomic write group, so
//! readers always observe a consistent tip.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use quanta_consensus::{BlockTemplate, ConsensusEngine};
use quanta_core::block_validation;
use quanta_core::chain_state::{ChainStore, ChainView};
use quanta_core::codec;
use quanta_core::constants::{MAX_BLOCK_BYTES, MAX_REORG_DEPTH, MAX_SIGOP_COST};
use quanta_core::difficulty;
use quanta_core::error::{ChainError, QuantaError, StorageError};
use quanta_core::genesis;
use quanta_core::index::{BlockIndex, BlockIndexEntry, BlockStatus};
use quanta_core::mempool::Mempool;
use quanta_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};
use quanta_core::validation;

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Maximum number of orphan blocks held while awaiting their parents.
const MAX_ORPHAN_BLOCKS: usize = 100;
/// Seconds after which a stashed orphan block is considered stale.
const ORPHAN_EXPIRY_SECS: u64 = 600;
/// Bytes reserved in a template for the header and coinbase.
const TEMPLATE_RESERVED_BYTES: usize = 1_024;

/// How the node received a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockAcceptance {
    /// Connected to the main chain (possibly via a reorganization).
    Connected { hash: Hash256, height: u64 },
    /// Valid so far, indexed on a side branch.
    SideChain { hash: Hash256 },
    /// Already known with a body.
    AlreadyKnown { hash: Hash256 },
    /// Parent unknown; stashed until the parent arrives.
    Orphan { hash: Hash256 },
}

/// Runtime counters. Relaxed atomics — operational insight, not
/// consistency.
#[derive(Default)]
pub struct NodeMetrics {
    pub blocks_connected: AtomicU64,
    pub reorgs: AtomicU64,
    pub mempool_size: AtomicU64,
}

/// Read-only adapter handing the consensus engine a coherent view:
/// headers come from the in-memory index (which also knows side
/// branches), everything else from the durable store.
struct NodeChainState {
    storage: Arc<RwLock<RocksStore>>,
    index: Arc<RwLock<BlockIndex>>,
}

impl ChainView for NodeChainState {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        self.storage.read().get_utxo(outpoint)
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), StorageError> {
        self.storage.read().chain_tip()
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StorageError> {
        if let Some(entry) = self.index.read().get(hash) {
            return Ok(Some(entry.header));
        }
        self.storage.read().get_block_header(hash)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        self.storage.read().get_block(hash)
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, StorageError> {
        self.storage.read().get_block_hash(height)
    }
}

#[derive(Default)]
struct ActivationOutcome {
    /// A fork refused for exceeding the reorg depth limit, with its depth.
    deep_fork: Option<(Hash256, u64)>,
    /// Blocks that failed phase-B validation during this activation.
    failures: Vec<(Hash256, quanta_core::error::ValidationError)>,
}

/// The full node.
pub struct Node {
    storage: Arc<RwLock<RocksStore>>,
    index: Arc<RwLock<BlockIndex>>,
    engine: ConsensusEngine,
    mempool: Mutex<Mempool>,
    /// Blocks whose parent is unknown: (parent hash, block, arrival).
    orphans: Mutex<Vec<(Hash256, Block, Instant)>>,
    /// Side-branch tips refused for reorg depth; never reconsidered.
    rejected_forks: Mutex<HashSet<Hash256>>,
    /// Cooperative cancellation flag for in-flight validation.
    cancel: Arc<AtomicBool>,
    /// Serializes all mutating entry points (the single chain-writer).
    write_gate: Mutex<()>,
    pub metrics: NodeMetrics,
}

impl Node {
    /// Open a node over the configured data directory, using the system
    /// clock.
    pub fn open(config: &NodeConfig) -> Result<Self, QuantaError> {
        Self::open_with_clock(config, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })
    }

    /// Open a node with an injected clock (tests).
    pub fn open_with_clock(
        config: &NodeConfig,
        clock: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Result<Self, QuantaError> {
        let store = RocksStore::open(config.db_path())?;

        let mut index = BlockIndex::new();
        let entries = store.load_index()?;
        if entries.is_empty() {
            let genesis_hash = index.insert_genesis(genesis::genesis_block().header);
            let entry = index
                .get(&genesis_hash)
                .expect("genesis entry just inserted")
                .clone();
            store.put_index_entry(&entry)?;
        } else {
            for entry in entries {
                index.restore_entry(entry);
            }
            index.restore_main_chain(store.load_main_chain()?);
        }
        info!(
            indexed = index.len(),
            height = index.main_height().unwrap_or(0),
            "chain state loaded"
        );

        let storage = Arc::new(RwLock::new(store));
        let index = Arc::new(RwLock::new(index));
        let view = NodeChainState {
            storage: storage.clone(),
            index: index.clone(),
        };
        let engine = ConsensusEngine::with_clock(Arc::new(view), clock);

        Ok(Self {
            storage,
            index,
            engine,
            mempool: Mutex::new(Mempool::with_defaults()),
            orphans: Mutex::new(Vec::new()),
            rejected_forks: Mutex::new(HashSet::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            write_gate: Mutex::new(()),
            metrics: NodeMetrics::default(),
        })
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// Current main-chain tip as `(height, hash)`.
    pub fn chain_tip(&self) -> (u64, Hash256) {
        let index = self.index.read();
        let tip = index.main_tip().expect("index always holds genesis");
        (tip.height, tip.hash)
    }

    /// Total work of the main chain.
    pub fn total_work(&self) -> primitive_types::U256 {
        self.index
            .read()
            .main_tip()
            .map(|e| e.total_work)
            .unwrap_or_default()
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, QuantaError> {
        Ok(self.storage.read().get_block(hash)?)
    }

    pub fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, QuantaError> {
        Ok(self.storage.read().get_block_hash(height)?)
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, QuantaError> {
        Ok(self.storage.read().get_utxo(outpoint)?)
    }

    /// Validation status of an indexed block.
    pub fn block_status(&self, hash: &Hash256) -> Option<BlockStatus> {
        self.index.read().get(hash).map(|e| e.status)
    }

    pub fn utxo_count(&self) -> u64 {
        self.storage.read().utxo_count()
    }

    /// Dump every live UTXO, ordered by outpoint. Audit and test surface.
    pub fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, QuantaError> {
        let mut all = self.storage.read().iter_utxos()?;
        all.sort_by_key(|(op, _)| (op.txid, op.index));
        Ok(all)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    /// The consensus engine (PoW seeds and targets for external miners).
    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Intake: headers and blocks
    // ------------------------------------------------------------------

    /// Decode and index a header received from the network.
    pub fn receive_header(&self, bytes: &[u8]) -> Result<Hash256, QuantaError> {
        let header = codec::decode_header(bytes)?;
        let _gate = self.write_gate.lock();
        self.accept_header(header)
    }

    /// Decode and process a full block received from the network.
    pub fn receive_block(&self, bytes: &[u8]) -> Result<BlockAcceptance, QuantaError> {
        let block = codec::decode_block(bytes)?;
        self.process_block(&block)
    }

    /// Mining submission interface: full validation, then chain
    /// activation.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<BlockAcceptance, QuantaError> {
        self.receive_block(bytes)
    }

    /// Process an already-decoded block.
    pub fn process_block(&self, block: &Block) -> Result<BlockAcceptance, QuantaError> {
        let _gate = self.write_gate.lock();
        self.process_block_locked(block)
    }

    /// Admit a transaction to the mempool, validated against the current
    /// tip's UTXO view extended with unspent outputs of already-pooled
    /// transactions (so a child may follow its unconfirmed parent).
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, QuantaError> {
        let (tip_height, _) = self.storage.read().chain_tip()?;
        let storage = self.storage.clone();

        let mut pool = self.mempool.lock();
        let validated = validation::validate_transaction(
            &tx,
            |op| {
                storage
                    .read()
                    .get_utxo(op)
                    .ok()
                    .flatten()
                    .or_else(|| pool.unconfirmed_output(op, tip_height + 1))
            },
            tip_height + 1,
        )?;

        let txid = pool.insert(tx, validated.fee)?;
        self.metrics.mempool_size.store(pool.len() as u64, Ordering::Relaxed);
        Ok(txid)
    }

    /// Request cancellation of the in-flight block validation (a better
    /// candidate arrived). Honored at per-transaction boundaries.
    pub fn cancel_validation(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Mining interface
    // ------------------------------------------------------------------

    /// Build a block template on the current tip with mempool-selected
    /// transactions.
    pub fn get_block_template(
        &self,
        coinbase_script: &[u8],
        extra_data: &[u8],
    ) -> Result<BlockTemplate, QuantaError> {
        let (tip_height, _) = self.storage.read().chain_tip()?;
        let storage = self.storage.clone();
        let selected = self.mempool.lock().select(
            MAX_BLOCK_BYTES - TEMPLATE_RESERVED_BYTES,
            MAX_SIGOP_COST,
            tip_height + 1,
            |op| storage.read().get_utxo(op).ok().flatten(),
        );
        let txs: Vec<Transaction> = selected.into_iter().map(|e| e.tx).collect();
        self.engine.create_block_template(coinbase_script, extra_data, &txs)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Persist the current index record of `hash`.
    fn persist_index_entry(&self, hash: &Hash256) -> Result<(), QuantaError> {
        let entry: Option<BlockIndexEntry> = self.index.read().get(hash).cloned();
        if let Some(entry) = entry {
            self.storage.read().put_index_entry(&entry)?;
        }
        Ok(())
    }

    /// Mark a block and its descendants `Failed` and persist the change.
    fn fail_block(&self, hash: &Hash256) -> Result<(), QuantaError> {
        let failed = self.index.write().mark_failed(hash);
        for h in &failed {
            self.persist_index_entry(h)?;
        }
        Ok(())
    }

    /// Header admission: parent linkage, canonical target, proof of work,
    /// index insertion. Idempotent for known headers.
    fn accept_header(&self, header: BlockHeader) -> Result<Hash256, QuantaError> {
        let hash = header.hash();

        let height = {
            let index = self.index.read();
            if let Some(entry) = index.get(&hash) {
                if entry.status == BlockStatus::Failed {
                    return Err(ChainError::ParentFailed(hash).into());
                }
                return Ok(hash);
            }
            let parent = index
                .get(&header.prev_block)
                .ok_or(ChainError::OrphanHeader(header.prev_block))?;
            if parent.status == BlockStatus::Failed {
                return Err(ChainError::ParentFailed(parent.hash).into());
            }
            parent.height + 1
        };

        if !difficulty::is_canonical_compact(header.target) {
            return Err(
                quanta_core::error::ValidationError::NonCanonicalTarget(header.target).into(),
            );
        }
        self.engine.check_header(&header, height)?;

        self.index.write().insert_header(header)?;
        self.persist_index_entry(&hash)?;
        debug!(hash = %hash, height, "indexed header");
        Ok(hash)
    }

    fn process_block_locked(&self, block: &Block) -> Result<BlockAcceptance, QuantaError> {
        let hash = block.header.hash();

        // A Failed block is never retried; a known body is a no-op.
        {
            let index = self.index.read();
            if let Some(entry) = index.get(&hash) {
                if entry.status == BlockStatus::Failed {
                    return Err(ChainError::ParentFailed(hash).into());
                }
                if entry.status.has_body() {
                    return Ok(BlockAcceptance::AlreadyKnown { hash });
                }
            }
        }

        // Phase A. A structural failure is terminal for this hash.
        if let Err(e) = block_validation::check_block_structure(block) {
            warn!(block = %hash, error = %e, "block failed structural checks");
            self.fail_block(&hash)?;
            return Err(e.into());
        }

        match self.accept_header(block.header) {
            Ok(_) => {}
            Err(QuantaError::Chain(ChainError::OrphanHeader(parent))) => {
                self.stash_orphan(parent, block.clone());
                return Ok(BlockAcceptance::Orphan { hash });
            }
            Err(e) => return Err(e),
        }

        self.storage.write().put_block_body(block)?;
        self.index.write().set_status(&hash, BlockStatus::BodyKnown);
        self.persist_index_entry(&hash)?;

        let outcome = self.activate_best_chain()?;

        // Parents make orphans adoptable.
        self.process_orphans_of(hash);

        // The submitter learns the exact validation verdict for its block.
        if let Some((_, error)) = outcome.failures.iter().find(|(h, _)| *h == hash) {
            return Err(error.clone().into());
        }

        if let Some((rejected_tip, depth)) = outcome.deep_fork {
            let on_rejected_branch = rejected_tip == hash
                || self.index.read().path_between(&hash, &rejected_tip).is_some();
            if on_rejected_branch {
                return Err(ChainError::ReorgTooDeep { depth, max: MAX_REORG_DEPTH }.into());
            }
        }

        let index = self.index.read();
        if index.is_on_main_chain(&hash) {
            let height = index.get(&hash).map(|e| e.height).unwrap_or(0);
            Ok(BlockAcceptance::Connected { hash, height })
        } else if index.get(&hash).map(|e| e.status) == Some(BlockStatus::Failed) {
            Err(ChainError::ParentFailed(hash).into())
        } else {
            Ok(BlockAcceptance::SideChain { hash })
        }
    }

    fn stash_orphan(&self, parent: Hash256, block: Block) {
        let mut orphans = self.orphans.lock();
        let now = Instant::now();
        orphans.retain(|(_, _, at)| now.duration_since(*at).as_secs() < ORPHAN_EXPIRY_SECS);
        if orphans.len() >= MAX_ORPHAN_BLOCKS {
            orphans.remove(0);
        }
        debug!(parent = %parent, "stashed orphan block");
        orphans.push((parent, block, now));
    }

    fn process_orphans_of(&self, parent: Hash256) {
        let adoptable: Vec<Block> = {
            let mut orphans = self.orphans.lock();
            let (ready, rest): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *orphans).into_iter().partition(|(p, _, _)| *p == parent);
            *orphans = rest;
            ready.into_iter().map(|(_, block, _)| block).collect()
        };
        for block in adoptable {
            if let Err(e) = self.process_block_locked(&block) {
                debug!(error = %e, "stashed orphan rejected");
            }
        }
    }

    /// Re-point the main chain at the best available candidate.
    ///
    /// Forward extension connects one block at a time; a side-branch
    /// winner first disconnects to the fork point (rejecting the branch
    /// with `ReorgTooDeep` when that would unwind more than
    /// [`MAX_REORG_DEPTH`] blocks), then connects the new branch. A
    /// mid-branch validation failure marks the offender and its
    /// descendants `Failed`, rolls the partial connect back, and
    /// re-evaluates. The mempool hears about every completed switch.
    fn activate_best_chain(&self) -> Result<ActivationOutcome, QuantaError> {
        self.cancel.store(false, Ordering::Relaxed);
        let mut outcome = ActivationOutcome::default();
        let mut all_disconnected: Vec<Block> = Vec::new();
        let mut all_connected: Vec<Block> = Vec::new();

        'outer: loop {
            // Pick the candidate under a read lock, then work lock-free.
            let (best_hash, tip_hash, tip_height) = {
                let index = self.index.read();
                let rejected = self.rejected_forks.lock().clone();
                let Some(best) = index.best_candidate(&rejected) else { break };
                let tip = index
                    .main_tip()
                    .ok_or_else(|| StorageError::Corruption("no main tip".into()))?;
                if best.hash == tip.hash {
                    break;
                }
                (best.hash, tip.hash, tip.height)
            };

            let (fork_hash, fork_height, path) = {
                let index = self.index.read();
                let fork = index
                    .fork_point(&best_hash)
                    .ok_or(ChainError::UnknownBlock(best_hash))?;
                let fork_height = index
                    .get(&fork)
                    .map(|e| e.height)
                    .ok_or(ChainError::UnknownBlock(fork))?;
                let path = index
                    .path_between(&fork, &best_hash)
                    .ok_or(ChainError::UnknownBlock(best_hash))?;
                (fork, fork_height, path)
            };

            // Finality window.
            let depth = tip_height - fork_height;
            if depth > MAX_REORG_DEPTH {
                warn!(
                    candidate = %best_hash,
                    depth,
                    max = MAX_REORG_DEPTH,
                    "refusing deep reorganization"
                );
                self.rejected_forks.lock().insert(best_hash);
                outcome.deep_fork = Some((best_hash, depth));
                continue;
            }

            // Disconnect down to the fork point (newest first).
            let mut disconnected: Vec<Block> = Vec::new();
            while self.index.read().main_tip().map(|e| e.hash) != Some(fork_hash) {
                let tip_entry = self
                    .index
                    .read()
                    .main_tip()
                    .cloned()
                    .ok_or_else(|| StorageError::Corruption("no main tip".into()))?;
                let block = self
                    .storage
                    .read()
                    .get_block(&tip_entry.hash)?
                    .ok_or(ChainError::UnknownBlock(tip_entry.hash))?;
                let parent_work = self
                    .index
                    .read()
                    .get(&tip_entry.parent)
                    .map(|e| e.total_work)
                    .unwrap_or_default();

                self.storage.write().disconnect_tip_full(Some(&parent_work))?;
                self.index.write().pop_main();
                self.persist_index_entry(&tip_entry.hash)?;
                disconnected.push(block);
            }
            disconnected.reverse(); // oldest first from here on

            // Connect the new branch upward.
            let mut connected: Vec<Block> = Vec::new();
            for next_hash in &path {
                let (entry, parent_height) = {
                    let index = self.index.read();
                    let entry = index
                        .get(next_hash)
                        .cloned()
                        .ok_or(ChainError::UnknownBlock(*next_hash))?;
                    let parent_height =
                        index.get(&entry.parent).map(|e| e.height).unwrap_or(0);
                    (entry, parent_height)
                };
                let block = self
                    .storage
                    .read()
                    .get_block(next_hash)?
                    .ok_or(ChainError::UnknownBlock(*next_hash))?;

                // Fresh bodies get phase-B validation; blocks that were on
                // the main chain before (rollback reconnects) already
                // passed it.
                if entry.status == BlockStatus::BodyKnown {
                    let storage = self.storage.clone();
                    let result = self.engine.validate_block(
                        &block,
                        &entry.parent,
                        parent_height,
                        |op| storage.read().get_utxo(op).ok().flatten(),
                        Some(&self.cancel),
                    );
                    match result {
                        Ok(_) => {}
                        Err(QuantaError::Chain(ChainError::Cancelled)) => {
                            debug!(block = %next_hash, "validation cancelled, restoring chain");
                            self.rollback(&connected, &disconnected)?;
                            break 'outer;
                        }
                        Err(QuantaError::Validation(e)) => {
                            warn!(block = %next_hash, error = %e, "block failed validation");
                            self.fail_block(next_hash)?;
                            outcome.failures.push((*next_hash, e));
                            self.rollback(&connected, &disconnected)?;
                            continue 'outer;
                        }
                        Err(e) => {
                            self.rollback(&connected, &disconnected)?;
                            return Err(e);
                        }
                    }
                }

                self.storage.write().connect_block_full(
                    &block,
                    entry.height,
                    Some(&entry.total_work),
                )?;
                {
                    let mut index = self.index.write();
                    index.set_status(next_hash, BlockStatus::Validated);
                    index.push_main(*next_hash);
                }
                self.persist_index_entry(next_hash)?;
                self.metrics.blocks_connected.fetch_add(1, Ordering::Relaxed);
                connected.push(block);
            }

            if !disconnected.is_empty() {
                self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);
                info!(
                    from = %tip_hash,
                    to = %best_hash,
                    disconnected = disconnected.len(),
                    connected = connected.len(),
                    "chain reorganized"
                );
            }
            all_disconnected.extend(disconnected);
            all_connected.extend(connected);
        }

        if !all_disconnected.is_empty() || !all_connected.is_empty() {
            self.notify_mempool(&all_disconnected, &all_connected)?;
        }

        Ok(outcome)
    }

    /// Undo a partial branch switch: disconnect what this pass connected,
    /// reconnect what it disconnected (already re-validated in their day).
    fn rollback(&self, connected: &[Block], disconnected: &[Block]) -> Result<(), QuantaError> {
        for block in connected.iter().rev() {
            let hash = block.header.hash();
            let parent_work = {
                let index = self.index.read();
                index
                    .get(&hash)
                    .and_then(|e| index.get(&e.parent))
                    .map(|p| p.total_work)
                    .unwrap_or_default()
            };
            self.storage.write().disconnect_tip_full(Some(&parent_work))?;
            self.index.write().pop_main();
            self.persist_index_entry(&hash)?;
        }
        for block in disconnected {
            let hash = block.header.hash();
            let entry = self
                .index
                .read()
                .get(&hash)
                .cloned()
                .ok_or(ChainError::UnknownBlock(hash))?;
            self.storage.write().connect_block_full(
                block,
                entry.height,
                Some(&entry.total_work),
            )?;
            self.index.write().push_main(hash);
            self.persist_index_entry(&hash)?;
        }
        Ok(())
    }

    fn notify_mempool(
        &self,
        disconnected: &[Block],
        connected: &[Block],
    ) -> Result<(), QuantaError> {
        let (tip_height, _) = self.storage.read().chain_tip()?;
        let storage = self.storage.clone();
        let mut pool = self.mempool.lock();
        pool.reorg_notification(disconnected, connected, |tx| {
            validation::validate_transaction(
                tx,
                |op| storage.read().get_utxo(op).ok().flatten(),
                tip_height + 1,
            )
            .ok()
            .map(|v| v.fee)
        });
        self.metrics.mempool_size.store(pool.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
