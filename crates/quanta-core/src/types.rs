//! Core protocol types: transactions, blocks, UTXOs.
//!
//! All monetary amounts are in quarks (1 QTA = 10^4 quarks). The canonical
//! on-wire encoding of every type here lives in [`codec`](crate::codec);
//! transaction and header identities are tagged hashes of that encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::hash::{self, TAG_HEADER, TAG_TX};

/// A 32-byte hash value.
///
/// Used for transaction IDs, block header hashes, Merkle nodes, and script
/// hashes. Equality, hashing, and lexicographic ordering are defined.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints
    /// and the genesis parent link.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
///
/// Canonically encoded as 36 bytes: `txid || index (u32 LE)`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The sentinel outpoint used by coinbase transaction inputs.
    pub const fn sentinel() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Whether this is the coinbase sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// The outpoint being spent. The sentinel for coinbase inputs.
    pub previous_output: OutPoint,
    /// Script satisfying the previous output's locking script. For coinbase
    /// inputs this carries the block-height commitment (leading canonical
    /// VarInt) followed by arbitrary miner data.
    pub unlock_script: Vec<u8>,
    /// Relative-ordering field reserved by the transaction format.
    pub sequence: u32,
}

/// A transaction output, creating a new UTXO.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in quarks.
    pub amount: u64,
    /// Locking script evaluated by the script VM when this output is spent.
    pub script: Vec<u8>,
}

/// A transaction transferring value between outputs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this transaction is invalid.
    pub lock_time: u32,
}

impl Transaction {
    /// Compute the transaction ID: tagged hash of the canonical encoding.
    pub fn txid(&self) -> Hash256 {
        hash::hash_tagged(TAG_TX, &codec::encode_to_vec(self))
    }

    /// Whether this is a coinbase transaction (single input carrying the
    /// sentinel outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_sentinel()
    }

    /// Sum of all output amounts. `None` on overflow.
    pub fn total_output_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// Canonical-encoded size in bytes.
    pub fn encoded_size(&self) -> usize {
        codec::encode_to_vec(self).len()
    }
}

/// Block header containing the proof-of-work puzzle.
///
/// Canonically encoded as 84 fixed bytes: `version || prev_block ||
/// merkle_root || time || target || nonce`, integers little-endian.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u32,
    /// Hash of the previous block header.
    pub prev_block: Hash256,
    /// Merkle root over the block's transaction IDs.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub time: u32,
    /// Compact encoding of the 256-bit difficulty target.
    pub target: u32,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Compute the block identity hash: tagged hash of the canonical
    /// encoding. The proof-of-work check uses the epoch-seeded PoW hash of
    /// the same bytes, which coincides with this only for the default
    /// kernel.
    pub fn hash(&self) -> Hash256 {
        hash::hash_tagged(TAG_HEADER, &codec::encode_to_vec(self))
    }

    /// Canonical header bytes fed to the PoW kernel.
    pub fn pow_bytes(&self) -> Vec<u8> {
        codec::encode_to_vec(self)
    }
}

/// A complete block: header plus ordered transactions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// First transaction must be the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Canonical-encoded size in bytes.
    pub fn encoded_size(&self) -> usize {
        codec::encode_to_vec(self).len()
    }
}

/// An entry in the unspent transaction output set, keyed by [`OutPoint`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block that created this output.
    pub height: u32,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Whether this output may be spent by a block connecting at
    /// `spend_height`. Coinbase outputs require
    /// [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations; other outputs are always spendable.
    pub fn is_mature(&self, spend_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        spend_height.saturating_sub(self.height as u64)
            >= crate::constants::COINBASE_MATURITY
    }
}

/// Undo data for one connected block: every pre-existing UTXO its
/// non-coinbase inputs consumed, in consumption order. Outputs both
/// created and spent within the block are excluded — they have no prior
/// state. Re-inserting these (and deleting the block's own outputs)
/// restores the pre-block UTXO set exactly.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UndoRecord {
    pub spent: Vec<(OutPoint, UtxoEntry)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                unlock_script: vec![0xAB; 8],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                amount: 50 * COIN,
                script: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::sentinel(),
                unlock_script: vec![0x01, 0x01],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput {
                amount: 50 * COIN,
                script: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 1_700_000_000,
            target: 0x207f_ffff,
            nonce: 0,
        }
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    // --- OutPoint ---

    #[test]
    fn sentinel_detection() {
        assert!(OutPoint::sentinel().is_sentinel());
        assert!(!OutPoint { txid: Hash256([1; 32]), index: u32::MAX }.is_sentinel());
        assert!(!OutPoint { txid: Hash256::ZERO, index: 0 }.is_sentinel());
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn two_sentinel_inputs_not_coinbase() {
        let mut tx = sample_coinbase();
        tx.inputs.push(tx.inputs[0].clone());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn total_output_amount_overflow_returns_none() {
        let mut tx = sample_tx();
        tx.outputs = vec![
            TxOutput { amount: u64::MAX, script: vec![] },
            TxOutput { amount: 1, script: vec![] },
        ];
        assert_eq!(tx.total_output_amount(), None);
    }

    #[test]
    fn txid_deterministic_and_sensitive() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        assert_eq!(tx1.txid(), tx1.txid());
        tx2.lock_time = 1;
        assert_ne!(tx1.txid(), tx2.txid());
    }

    // --- BlockHeader ---

    #[test]
    fn header_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1;
        h2.nonce = 1;
        assert_ne!(h1.hash(), h2.hash());
    }

    #[test]
    fn header_encoding_is_84_bytes() {
        assert_eq!(codec::encode_to_vec(&sample_header()).len(), 84);
    }

    #[test]
    fn header_hash_differs_from_txid_of_same_bytes() {
        // Domain separation: hashing identical bytes under different tags
        // must not collide.
        let bytes = codec::encode_to_vec(&sample_header());
        assert_ne!(
            hash::hash_tagged(TAG_HEADER, &bytes),
            hash::hash_tagged(TAG_TX, &bytes),
        );
    }

    // --- UtxoEntry maturity ---

    #[test]
    fn coinbase_maturity_boundary() {
        let entry = UtxoEntry {
            output: TxOutput { amount: 1, script: vec![] },
            height: 100,
            is_coinbase: true,
        };
        assert!(!entry.is_mature(199));
        assert!(entry.is_mature(200));
    }

    #[test]
    fn non_coinbase_always_mature() {
        let entry = UtxoEntry {
            output: TxOutput { amount: 1, script: vec![] },
            height: 100,
            is_coinbase: false,
        };
        assert!(entry.is_mature(0));
        assert!(entry.is_mature(100));
    }
}
