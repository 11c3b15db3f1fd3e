//! RocksDB-backed durable chain storage.
//!
//! Implements [`ChainStore`] over column families laid out as:
//!
//! | family   | key                        | value                          |
//! |----------|----------------------------|--------------------------------|
//! | `blocks` | block hash (32 B)          | canonical-encoded block        |
//! | `undo`   | block hash (32 B)          | canonical-encoded undo record  |
//! | `utxos`  | outpoint encoding (36 B)   | canonical-encoded UTXO entry   |
//! | `index`  | height (8 B BE) ‖ hash     | block-index-entry record       |
//! | `main`   | height (8 B BE)            | block hash (32 B)              |
//! | `meta`   | ASCII key                  | tip hash/height, work, schema  |
//!
//! Every connect/disconnect is one atomic [`WriteBatch`]: UTXO deltas,
//! block body, undo record, height index, and tip metadata commit together
//! or not at all, so a crash can never leave the UTXO set half-applied.
//! Connects walk the block's transactions in order, so later transactions
//! may spend outputs created earlier in the same block.
//! On open the store verifies the recovery invariant (tip metadata matches
//! the head of the `main` index) and refuses to run otherwise.
//!
//! On first open the genesis block is connected automatically.

use std::collections::HashSet;
use std::path::Path;

use primitive_types::U256;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use tracing::{debug, info};

use quanta_core::chain_state::{ChainStore, ChainView, ConnectResult, DisconnectResult};
use quanta_core::codec::{self, Decodable, Reader};
use quanta_core::error::StorageError;
use quanta_core::genesis;
use quanta_core::index::{BlockIndexEntry, BlockStatus};
use quanta_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, UndoRecord, UtxoEntry,
};

const CF_BLOCKS: &str = "blocks";
const CF_UNDO: &str = "undo";
const CF_UTXOS: &str = "utxos";
const CF_INDEX: &str = "index";
const CF_MAIN: &str = "main";
const CF_META: &str = "meta";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_UNDO, CF_UTXOS, CF_INDEX, CF_MAIN, CF_META];

const META_TIP_HASH: &[u8] = b"tip_hash";
const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TOTAL_WORK: &[u8] = b"total_work";
const META_UTXO_COUNT: &[u8] = b"utxo_count";
const META_SCHEMA_VERSION: &[u8] = b"schema_version";

const SCHEMA_VERSION: u64 = 1;

/// LRU row-cache capacity for point lookups (UTXO reads dominate).
const ROW_CACHE_BYTES: usize = 64 << 20;

/// Persisted form of a [`BlockIndexEntry`]. The header rides as its 84
/// canonical bytes; hash and parent are recomputed on load.
#[derive(bincode::Encode, bincode::Decode)]
struct IndexRecord {
    height: u64,
    status: u8,
    total_work: [u8; 32],
    seen_order: u64,
    header: Vec<u8>,
}

fn status_to_u8(status: BlockStatus) -> u8 {
    match status {
        BlockStatus::HeaderKnown => 0,
        BlockStatus::BodyKnown => 1,
        BlockStatus::Validated => 2,
        BlockStatus::InMainChain => 3,
        BlockStatus::Failed => 4,
    }
}

fn status_from_u8(raw: u8) -> Result<BlockStatus, StorageError> {
    Ok(match raw {
        0 => BlockStatus::HeaderKnown,
        1 => BlockStatus::BodyKnown,
        2 => BlockStatus::Validated,
        3 => BlockStatus::InMainChain,
        4 => BlockStatus::Failed,
        other => {
            return Err(StorageError::Corruption(format!(
                "unknown index status {other}"
            )));
        }
    })
}

/// RocksDB-backed persistent chain storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create the database at `path`.
    ///
    /// Creates missing column families, verifies the schema version and
    /// the recovery invariant, and connects genesis on an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_row_cache(&rocksdb::Cache::new_lru_cache(ROW_CACHE_BYTES));

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut store = Self { db };
        store.check_schema()?;
        store.check_recovery_invariant()?;

        if store.is_empty() {
            info!("fresh chain database, connecting genesis");
            store.connect_block_full(genesis::genesis_block(), 0, None)?;
        }

        Ok(store)
    }

    fn check_schema(&self) -> Result<(), StorageError> {
        match self.get_meta_u64(META_SCHEMA_VERSION)? {
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            Some(v) => Err(StorageError::Corruption(format!(
                "schema version {v}, expected {SCHEMA_VERSION}"
            ))),
            None => {
                let cf = self.cf(CF_META)?;
                self.db
                    .put_cf(&cf, META_SCHEMA_VERSION, SCHEMA_VERSION.to_le_bytes())
                    .map_err(|e| StorageError::Io(e.to_string()))
            }
        }
    }

    /// Recovery rule: the tip recorded in `meta` must be the head of the
    /// `main` index. Write groups are atomic, so a mismatch means external
    /// corruption — fatal, operator required.
    fn check_recovery_invariant(&self) -> Result<(), StorageError> {
        let meta_tip = self.get_meta_hash(META_TIP_HASH)?;
        let cf_main = self.cf(CF_MAIN)?;
        let head = self
            .db
            .iterator_cf(&cf_main, IteratorMode::End)
            .next()
            .transpose()
            .map_err(|e| StorageError::Io(e.to_string()))?;

        match (meta_tip, head) {
            (None, None) => Ok(()),
            (Some(tip), Some((_, value))) if value.as_ref() == tip.as_bytes() => Ok(()),
            (tip, head) => Err(StorageError::Corruption(format!(
                "tip metadata {tip:?} disagrees with main index head {:?}",
                head.map(|(_, v)| hex::encode(v)),
            ))),
        }
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Corruption(format!("missing column family {name}")))
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, StorageError> {
        let cf = self.cf(CF_META)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => {
                Ok(Some(u64::from_le_bytes(bytes.try_into().unwrap())))
            }
            Some(_) => Err(StorageError::Corruption("bad metadata width".into())),
            None => Ok(None),
        }
    }

    fn get_meta_hash(&self, key: &[u8]) -> Result<Option<Hash256>, StorageError> {
        let cf = self.cf(CF_META)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                Ok(Some(Hash256(bytes.try_into().unwrap())))
            }
            Some(_) => Err(StorageError::Corruption("bad metadata width".into())),
            None => Ok(None),
        }
    }

    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn index_key(height: u64, hash: &Hash256) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..8].copy_from_slice(&height.to_be_bytes());
        key[8..].copy_from_slice(hash.as_bytes());
        key
    }

    fn decode_value<T: Decodable>(bytes: &[u8]) -> Result<T, StorageError> {
        codec::decode_from_slice(bytes)
            .map_err(|e| StorageError::Corruption(format!("undecodable record: {e}")))
    }

    /// Connect a block, optionally recording the branch's cumulative work
    /// in tip metadata within the same write group.
    ///
    /// Transactions are processed in block order, spends before creates
    /// per transaction, so an output created earlier in this block is
    /// spendable by a later transaction of the same block. Only coins that
    /// existed before the block enter the undo record — an output both
    /// created and consumed here has no prior state to restore.
    pub fn connect_block_full(
        &mut self,
        block: &Block,
        height: u64,
        total_work: Option<&U256>,
    ) -> Result<ConnectResult, StorageError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(StorageError::HeightMismatch { expected: 0, got: height });
            }
        } else if height != tip_height + 1 {
            return Err(StorageError::HeightMismatch {
                expected: tip_height + 1,
                got: height,
            });
        }

        let block_hash = block.header.hash();
        let cf_undo = self.cf(CF_UNDO)?;
        if self
            .db
            .get_cf(&cf_undo, block_hash.as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .is_some()
        {
            return Err(StorageError::DuplicateBlock(block_hash));
        }

        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_main = self.cf(CF_MAIN)?;
        let cf_meta = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();

        let mut undo = UndoRecord::default();
        // Outpoints created by this block and not (yet) spent by it; these
        // are only queued in the batch, invisible to direct reads.
        let mut created_in_block: HashSet<OutPoint> = HashSet::new();
        let mut total_spent = 0usize;
        let mut total_created = 0usize;

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = codec::encode_to_vec(&input.previous_output);
                    // An output created earlier in this block exists only
                    // as a pending put (cancelled by the delete below) and
                    // has no prior coin to undo; everything else must be a
                    // live stored UTXO.
                    if !created_in_block.remove(&input.previous_output) {
                        let bytes = self
                            .db
                            .get_cf(&cf_utxos, &key)
                            .map_err(|e| StorageError::Io(e.to_string()))?
                            .ok_or(StorageError::MissingUtxo(input.previous_output))?;
                        let entry: UtxoEntry = Self::decode_value(&bytes)?;
                        undo.spent.push((input.previous_output, entry));
                    }
                    batch.delete_cf(cf_utxos, key);
                    total_spent += 1;
                }
            }

            let txid = tx.txid();
            let is_coinbase = tx.is_coinbase();
            for (idx, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint { txid, index: idx as u32 };
                let key = codec::encode_to_vec(&outpoint);
                if created_in_block.contains(&outpoint)
                    || self
                        .db
                        .get_cf(&cf_utxos, &key)
                        .map_err(|e| StorageError::Io(e.to_string()))?
                        .is_some()
                {
                    return Err(StorageError::DuplicateUtxo(outpoint));
                }
                let entry = UtxoEntry {
                    output: output.clone(),
                    height: height as u32,
                    is_coinbase,
                };
                batch.put_cf(cf_utxos, key, codec::encode_to_vec(&entry));
                created_in_block.insert(outpoint);
                total_created += 1;
            }
        }

        // Block body, undo record, height index, tip metadata.
        batch.put_cf(cf_blocks, block_hash.as_bytes(), codec::encode_to_vec(block));
        batch.put_cf(cf_undo, block_hash.as_bytes(), codec::encode_to_vec(&undo));
        batch.put_cf(cf_main, Self::height_key(height), block_hash.as_bytes());
        batch.put_cf(cf_meta, META_TIP_HASH, block_hash.as_bytes());
        batch.put_cf(cf_meta, META_TIP_HEIGHT, height.to_le_bytes());
        if let Some(work) = total_work {
            batch.put_cf(cf_meta, META_TOTAL_WORK, work.to_big_endian());
        }

        let utxo_count = self.utxo_count() + total_created as u64 - total_spent as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, utxo_count.to_le_bytes());

        self.db
            .write(batch)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        debug!(height, hash = %block_hash, created = total_created, spent = total_spent, "connected block");

        Ok(ConnectResult {
            utxos_created: total_created,
            utxos_spent: total_spent,
        })
    }

    /// Disconnect the tip, optionally rewinding the recorded cumulative
    /// work within the same write group.
    pub fn disconnect_tip_full(
        &mut self,
        total_work: Option<&U256>,
    ) -> Result<DisconnectResult, StorageError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Err(StorageError::EmptyChain);
        }

        let block = self
            .get_block(&tip_hash)?
            .ok_or_else(|| StorageError::Corruption(format!("tip block {tip_hash} missing")))?;
        let undo = self
            .get_undo(&tip_hash)?
            .ok_or(StorageError::UndoMissing(tip_hash))?;

        let cf_undo = self.cf(CF_UNDO)?;
        let cf_utxos = self.cf(CF_UTXOS)?;
        let cf_main = self.cf(CF_MAIN)?;
        let cf_meta = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();

        // Delete the outputs this block created.
        let mut removed = 0usize;
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for idx in 0..tx.outputs.len() {
                let outpoint = OutPoint { txid, index: idx as u32 };
                let key = codec::encode_to_vec(&outpoint);
                if self
                    .db
                    .get_cf(&cf_utxos, &key)
                    .map_err(|e| StorageError::Io(e.to_string()))?
                    .is_some()
                {
                    batch.delete_cf(cf_utxos, key);
                    removed += 1;
                }
            }
        }

        // Restore the outputs it spent.
        let restored = undo.spent.len();
        for (outpoint, entry) in &undo.spent {
            batch.put_cf(
                cf_utxos,
                codec::encode_to_vec(outpoint),
                codec::encode_to_vec(entry),
            );
        }

        batch.delete_cf(cf_undo, tip_hash.as_bytes());
        batch.delete_cf(cf_main, Self::height_key(tip_height));

        if tip_height == 0 {
            batch.put_cf(cf_meta, META_TIP_HASH, Hash256::ZERO.as_bytes());
            batch.put_cf(cf_meta, META_TIP_HEIGHT, 0u64.to_le_bytes());
        } else {
            batch.put_cf(cf_meta, META_TIP_HASH, block.header.prev_block.as_bytes());
            batch.put_cf(cf_meta, META_TIP_HEIGHT, (tip_height - 1).to_le_bytes());
        }
        if let Some(work) = total_work {
            batch.put_cf(cf_meta, META_TOTAL_WORK, work.to_big_endian());
        }

        let utxo_count = self.utxo_count() + restored as u64 - removed as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, utxo_count.to_le_bytes());

        self.db
            .write(batch)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        debug!(height = tip_height, hash = %tip_hash, "disconnected tip");

        Ok(DisconnectResult {
            utxos_restored: restored,
            utxos_removed: removed,
        })
    }

    /// Cumulative work of the main chain, as recorded at the last connect.
    pub fn total_work(&self) -> Result<U256, StorageError> {
        let cf = self.cf(CF_META)?;
        match self
            .db
            .get_cf(&cf, META_TOTAL_WORK)
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                Ok(U256::from_big_endian(&bytes))
            }
            Some(_) => Err(StorageError::Corruption("bad total-work width".into())),
            None => Ok(U256::zero()),
        }
    }

    /// Persist a block-index entry (idempotent; status updates overwrite).
    pub fn put_index_entry(&self, entry: &BlockIndexEntry) -> Result<(), StorageError> {
        let cf = self.cf(CF_INDEX)?;
        let record = IndexRecord {
            height: entry.height,
            status: status_to_u8(entry.status),
            total_work: entry.total_work.to_big_endian(),
            seen_order: entry.seen_order,
            header: codec::encode_to_vec(&entry.header),
        };
        let bytes = bincode::encode_to_vec(&record, bincode::config::standard())
            .map_err(|e| StorageError::Io(e.to_string()))?;
        self.db
            .put_cf(&cf, Self::index_key(entry.height, &entry.hash), bytes)
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    /// Load every persisted index entry, ordered by ascending height so
    /// parents precede children.
    pub fn load_index(&self) -> Result<Vec<BlockIndexEntry>, StorageError> {
        let cf = self.cf(CF_INDEX)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StorageError::Io(e.to_string()))?;
            let (record, _): (IndexRecord, _) =
                bincode::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StorageError::Corruption(e.to_string()))?;
            let mut reader = Reader::new(&record.header);
            let header = BlockHeader::decode(&mut reader)
                .map_err(|e| StorageError::Corruption(e.to_string()))?;
            entries.push(BlockIndexEntry {
                hash: header.hash(),
                height: record.height,
                header,
                status: status_from_u8(record.status)?,
                total_work: U256::from_big_endian(&record.total_work),
                parent: header.prev_block,
                seen_order: record.seen_order,
            });
        }
        Ok(entries)
    }

    /// Load the main-chain hashes ordered by height.
    pub fn load_main_chain(&self) -> Result<Vec<Hash256>, StorageError> {
        let cf = self.cf(CF_MAIN)?;
        let mut hashes = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StorageError::Io(e.to_string()))?;
            let bytes: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::Corruption("bad main-index width".into()))?;
            hashes.push(Hash256(bytes));
        }
        Ok(hashes)
    }

    /// Take a point-in-time UTXO snapshot, isolated from write groups that
    /// commit afterwards. Used by long-running readers (template building,
    /// RPC facades) that must not observe a half-advanced view.
    pub fn utxo_snapshot(&self) -> UtxoSnapshot<'_> {
        UtxoSnapshot {
            snapshot: self.db.snapshot(),
            store: self,
        }
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(|e| StorageError::Io(e.to_string()))
    }

    /// Manual compaction across all column families. Run during idle
    /// periods (e.g. after initial sync).
    pub fn compact(&self) -> Result<(), StorageError> {
        for name in ALL_CFS {
            let cf = self.cf(name)?;
            self.db.compact_range_cf(&cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Geometric block locator for sync: tip, tip-1, tip-2, tip-4, …,
    /// genesis.
    pub fn get_block_locator(&self) -> Result<Vec<Hash256>, StorageError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Ok(Vec::new());
        }

        let mut locator = Vec::new();
        let mut step = 1u64;
        let mut height = tip_height;
        loop {
            if let Some(hash) = self.get_block_hash(height)? {
                locator.push(hash);
            }
            if height == 0 {
                break;
            }
            height = height.saturating_sub(step);
            if locator.len() > 10 {
                step *= 2;
            }
        }
        Ok(locator)
    }

    /// Height of a main-chain block, scanning the height index newest
    /// first (recent blocks are the common case).
    pub fn get_height_for_hash(&self, hash: &Hash256) -> Result<Option<u64>, StorageError> {
        let cf = self.cf(CF_MAIN)?;
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (key, value) = item.map_err(|e| StorageError::Io(e.to_string()))?;
            if value.as_ref() == hash.as_bytes() && key.len() == 8 {
                return Ok(Some(u64::from_be_bytes(key.as_ref().try_into().unwrap())));
            }
        }
        Ok(None)
    }

    /// First locator hash present on our main chain, as `(height, hash)`.
    pub fn find_common_ancestor(
        &self,
        locator: &[Hash256],
    ) -> Result<Option<(u64, Hash256)>, StorageError> {
        for hash in locator {
            if let Some(height) = self.get_height_for_hash(hash)? {
                return Ok(Some((height, *hash)));
            }
        }
        Ok(None)
    }

    /// Up to `max_count` main-chain headers above the given hash, capped
    /// at 2000 per request.
    pub fn get_headers_after(
        &self,
        hash: &Hash256,
        max_count: usize,
    ) -> Result<Vec<BlockHeader>, StorageError> {
        const MAX_HEADERS_PER_REQUEST: usize = 2_000;
        let limit = max_count.min(MAX_HEADERS_PER_REQUEST);

        let Some(start) = self.get_height_for_hash(hash)? else {
            return Ok(Vec::new());
        };

        let mut headers = Vec::new();
        let mut height = start + 1;
        while headers.len() < limit {
            match self.get_block_hash(height)? {
                Some(h) => match self.get_block_header(&h)? {
                    Some(header) => headers.push(header),
                    None => break,
                },
                None => break,
            }
            height += 1;
        }
        Ok(headers)
    }
}

/// A consistent point-in-time view of the UTXO set.
pub struct UtxoSnapshot<'a> {
    snapshot: rocksdb::Snapshot<'a>,
    store: &'a RocksStore,
}

impl UtxoSnapshot<'_> {
    /// Look up a UTXO as of the snapshot.
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        let cf = self.store.cf(CF_UTXOS)?;
        match self
            .snapshot
            .get_cf(&cf, codec::encode_to_vec(outpoint))
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) => Ok(Some(RocksStore::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The chain tip as of the snapshot.
    pub fn chain_tip(&self) -> Result<(u64, Hash256), StorageError> {
        let cf = self.store.cf(CF_META)?;
        let hash = match self
            .snapshot
            .get_cf(&cf, META_TIP_HASH)
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => Hash256(bytes.try_into().unwrap()),
            Some(_) => return Err(StorageError::Corruption("bad metadata width".into())),
            None => Hash256::ZERO,
        };
        let height = match self
            .snapshot
            .get_cf(&cf, META_TIP_HEIGHT)
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => u64::from_le_bytes(bytes.try_into().unwrap()),
            Some(_) => return Err(StorageError::Corruption("bad metadata width".into())),
            None => 0,
        };
        Ok((height, hash))
    }
}

impl ChainView for RocksStore {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        let cf = self.cf(CF_UTXOS)?;
        match self
            .db
            .get_cf(&cf, codec::encode_to_vec(outpoint))
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), StorageError> {
        let hash = self.get_meta_hash(META_TIP_HASH)?.unwrap_or(Hash256::ZERO);
        let height = self.get_meta_u64(META_TIP_HEIGHT)?.unwrap_or(0);
        Ok((height, hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) => {
                // The header is the leading 84 bytes of the canonical
                // block encoding.
                let mut reader = Reader::new(&bytes);
                let header = BlockHeader::decode(&mut reader)
                    .map_err(|e| StorageError::Corruption(e.to_string()))?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, StorageError> {
        let cf = self.cf(CF_MAIN)?;
        match self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                Ok(Some(Hash256(bytes.try_into().unwrap())))
            }
            Some(_) => Err(StorageError::Corruption("bad main-index width".into())),
            None => Ok(None),
        }
    }
}

impl ChainStore for RocksStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectResult, StorageError> {
        self.connect_block_full(block, height, None)
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectResult, StorageError> {
        self.disconnect_tip_full(None)
    }

    fn put_block_body(&mut self, block: &Block) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        self.db
            .put_cf(
                &cf,
                block.header.hash().as_bytes(),
                codec::encode_to_vec(block),
            )
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    fn get_undo(&self, hash: &Hash256) -> Result<Option<UndoRecord>, StorageError> {
        let cf = self.cf(CF_UNDO)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn utxo_count(&self) -> u64 {
        self.get_meta_u64(META_UTXO_COUNT)
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        matches!(self.get_meta_hash(META_TIP_HASH), Ok(None) | Err(_))
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, StorageError> {
        let cf = self.cf(CF_UTXOS)?;
        let mut all = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StorageError::Io(e.to_string()))?;
            let outpoint: OutPoint = Self::decode_value(&key)?;
            let entry: UtxoEntry = Self::decode_value(&value)?;
            all.push((outpoint, entry));
        }
        Ok(all)
    }
}
