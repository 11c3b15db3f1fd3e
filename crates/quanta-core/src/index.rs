//! The block index: every known header, its validation status, and the
//! main-chain pointer.
//!
//! The index is a DAG rooted at genesis, stored as a `HashMap` keyed by
//! header hash with parent links by hash (never by pointer, so index
//! mutations cannot dangle). Each entry carries the cumulative work of its
//! ancestry; the best tip candidate is the entry of maximum total work
//! whose ancestry is fully available, ties broken by earliest arrival.
//!
//! Status state machine:
//!
//! ```text
//! HeaderKnown ──body arrives──▶ BodyKnown ──phase-B passes──▶ Validated
//!                                  │                             │
//!                                  │                             ├──activated──▶ InMainChain
//!                                  │                             │
//!                                  └──phase-B fails──────────────┴──▶ Failed (terminal)
//! ```
//!
//! A reorganization moves `InMainChain` entries back to `Validated`.
//! `Failed` is terminal and poisons all descendants.

use std::collections::{HashMap, HashSet};

use primitive_types::U256;

use crate::difficulty;
use crate::error::ChainError;
use crate::types::{BlockHeader, Hash256};

/// Validation status of an indexed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockStatus {
    /// Only the header has been seen.
    HeaderKnown,
    /// The full block body is available.
    BodyKnown,
    /// Passed full validation; not currently on the main chain.
    Validated,
    /// Part of the current main chain.
    InMainChain,
    /// Failed validation. Terminal.
    Failed,
}

impl BlockStatus {
    /// Whether the block body is available.
    pub fn has_body(self) -> bool {
        matches!(self, Self::BodyKnown | Self::Validated | Self::InMainChain)
    }
}

/// One indexed block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub height: u64,
    pub header: BlockHeader,
    pub status: BlockStatus,
    /// Sum of `work(target)` over this block and all ancestors.
    pub total_work: U256,
    pub parent: Hash256,
    /// Arrival sequence number; the tie-breaker for equal total work.
    pub seen_order: u64,
}

/// The in-memory block index and main-chain pointer.
pub struct BlockIndex {
    entries: HashMap<Hash256, BlockIndexEntry>,
    children: HashMap<Hash256, Vec<Hash256>>,
    /// Main-chain hashes indexed by height.
    main_chain: Vec<Hash256>,
    next_seen: u64,
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            children: HashMap::new(),
            main_chain: Vec::new(),
            next_seen: 0,
        }
    }

    /// Seed the index with the genesis block, already on the main chain.
    pub fn insert_genesis(&mut self, header: BlockHeader) -> Hash256 {
        let hash = header.hash();
        let work = difficulty::compact_to_target(header.target)
            .map(|t| difficulty::work(&t))
            .unwrap_or_default();
        let entry = BlockIndexEntry {
            hash,
            height: 0,
            header,
            status: BlockStatus::InMainChain,
            total_work: work,
            parent: Hash256::ZERO,
            seen_order: self.next_seen,
        };
        self.next_seen += 1;
        self.entries.insert(hash, entry);
        self.main_chain = vec![hash];
        hash
    }

    /// Index a new header under its parent.
    ///
    /// Idempotent for known hashes. Errors with
    /// [`ChainError::OrphanHeader`] when the parent is unknown and
    /// [`ChainError::ParentFailed`] when the parent is invalid.
    pub fn insert_header(&mut self, header: BlockHeader) -> Result<Hash256, ChainError> {
        let hash = header.hash();
        if self.entries.contains_key(&hash) {
            return Ok(hash);
        }

        let parent = self
            .entries
            .get(&header.prev_block)
            .ok_or(ChainError::OrphanHeader(header.prev_block))?;
        if parent.status == BlockStatus::Failed {
            return Err(ChainError::ParentFailed(parent.hash));
        }

        let work = difficulty::compact_to_target(header.target)
            .map(|t| difficulty::work(&t))
            .unwrap_or_default();
        let entry = BlockIndexEntry {
            hash,
            height: parent.height + 1,
            header,
            status: BlockStatus::HeaderKnown,
            total_work: parent.total_work + work,
            parent: header.prev_block,
            seen_order: self.next_seen,
        };
        self.next_seen += 1;
        self.children.entry(header.prev_block).or_default().push(hash);
        self.entries.insert(hash, entry);
        Ok(hash)
    }

    /// Re-insert a persisted entry at startup, preserving its recorded
    /// arrival order.
    pub fn restore_entry(&mut self, entry: BlockIndexEntry) {
        self.next_seen = self.next_seen.max(entry.seen_order + 1);
        if entry.height > 0 {
            self.children.entry(entry.parent).or_default().push(entry.hash);
        }
        self.entries.insert(entry.hash, entry);
    }

    /// Rebuild the main-chain pointer from persisted height → hash data.
    pub fn restore_main_chain(&mut self, hashes: Vec<Hash256>) {
        for hash in &hashes {
            if let Some(entry) = self.entries.get_mut(hash) {
                entry.status = BlockStatus::InMainChain;
            }
        }
        self.main_chain = hashes;
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockIndexEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Update an entry's status. No-op for unknown hashes; `Failed` is
    /// never overwritten.
    pub fn set_status(&mut self, hash: &Hash256, status: BlockStatus) {
        if let Some(entry) = self.entries.get_mut(hash) {
            if entry.status != BlockStatus::Failed {
                entry.status = status;
            }
        }
    }

    /// Mark a block and every descendant `Failed`. Returns all newly
    /// failed hashes.
    pub fn mark_failed(&mut self, hash: &Hash256) -> Vec<Hash256> {
        let mut failed = Vec::new();
        let mut queue = vec![*hash];
        while let Some(h) = queue.pop() {
            if let Some(entry) = self.entries.get_mut(&h) {
                if entry.status != BlockStatus::Failed {
                    entry.status = BlockStatus::Failed;
                    failed.push(h);
                }
            }
            if let Some(kids) = self.children.get(&h) {
                queue.extend(kids.iter().copied());
            }
        }
        failed
    }

    /// The current main-chain tip entry.
    pub fn main_tip(&self) -> Option<&BlockIndexEntry> {
        self.main_chain.last().and_then(|h| self.entries.get(h))
    }

    /// Main-chain hash at `height`.
    pub fn hash_at_height(&self, height: u64) -> Option<Hash256> {
        self.main_chain.get(height as usize).copied()
    }

    /// Current main-chain height (genesis = 0). `None` before genesis.
    pub fn main_height(&self) -> Option<u64> {
        self.main_chain.len().checked_sub(1).map(|h| h as u64)
    }

    /// Append a block to the main chain. The entry must be its child.
    pub fn push_main(&mut self, hash: Hash256) {
        self.main_chain.push(hash);
        self.set_status(&hash, BlockStatus::InMainChain);
    }

    /// Remove the main-chain tip, demoting it to `Validated`.
    pub fn pop_main(&mut self) -> Option<Hash256> {
        let hash = self.main_chain.pop()?;
        self.set_status(&hash, BlockStatus::Validated);
        Some(hash)
    }

    /// Whether `hash` lies on the current main chain.
    pub fn is_on_main_chain(&self, hash: &Hash256) -> bool {
        self.entries
            .get(hash)
            .is_some_and(|e| self.main_chain.get(e.height as usize) == Some(hash))
    }

    /// Whether a candidate's ancestry back to the main chain consists
    /// entirely of available, non-failed bodies.
    fn connectable(&self, hash: &Hash256) -> bool {
        let mut cursor = *hash;
        loop {
            let Some(entry) = self.entries.get(&cursor) else {
                return false;
            };
            match entry.status {
                BlockStatus::Failed | BlockStatus::HeaderKnown => return false,
                BlockStatus::InMainChain => return true,
                BlockStatus::BodyKnown | BlockStatus::Validated => {}
            }
            if entry.height == 0 {
                // Genesis off the main chain: only during bootstrap.
                return true;
            }
            cursor = entry.parent;
        }
    }

    /// The connect target of [`activate_best_chain`]: the entry of highest
    /// total work whose body and full ancestry are available, excluding
    /// `rejected` tips (e.g. forks refused for reorg depth). Ties break
    /// toward the earliest-seen entry.
    pub fn best_candidate(&self, rejected: &HashSet<Hash256>) -> Option<&BlockIndexEntry> {
        self.entries
            .values()
            .filter(|e| e.status.has_body() && !rejected.contains(&e.hash))
            .filter(|e| self.connectable(&e.hash))
            .max_by(|a, b| {
                a.total_work
                    .cmp(&b.total_work)
                    .then(b.seen_order.cmp(&a.seen_order))
            })
    }

    /// Walk up from `hash` to the nearest ancestor on the main chain.
    pub fn fork_point(&self, hash: &Hash256) -> Option<Hash256> {
        let mut cursor = *hash;
        loop {
            let entry = self.entries.get(&cursor)?;
            if self.is_on_main_chain(&cursor) {
                return Some(cursor);
            }
            if entry.height == 0 {
                return None;
            }
            cursor = entry.parent;
        }
    }

    /// Hashes from (exclusive) `ancestor` down to (inclusive) `descendant`,
    /// ordered by ascending height. `None` when `ancestor` is not actually
    /// an ancestor.
    pub fn path_between(
        &self,
        ancestor: &Hash256,
        descendant: &Hash256,
    ) -> Option<Vec<Hash256>> {
        let mut path = Vec::new();
        let mut cursor = *descendant;
        loop {
            if cursor == *ancestor {
                path.reverse();
                return Some(path);
            }
            let entry = self.entries.get(&cursor)?;
            if entry.height == 0 {
                return None;
            }
            path.push(cursor);
            cursor = entry.parent;
        }
    }

    /// All indexed entries (for persistence sweeps).
    pub fn entries(&self) -> impl Iterator<Item = &BlockIndexEntry> {
        self.entries.values()
    }
}
