//! Genesis block.
//!
//! The first block (height 0) is hardcoded and deterministic: every node
//! computes the identical block. Its coinbase commits height 0, carries the
//! genesis message, and pays the initial subsidy to an empty locking
//! script, which can never verify — the genesis output is provably
//! unspendable.

use std::sync::LazyLock;

use crate::codec::write_varint;
use crate::constants::INITIAL_SUBSIDY;
use crate::difficulty::MAX_TARGET_BITS;
use crate::merkle;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Genesis timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIME: u32 = 1_767_225_600;

/// Message embedded in the genesis coinbase.
pub const GENESIS_MESSAGE: &[u8] = b"01/Jan/2026 keys that outlive the curves";

struct GenesisData {
    block: Block,
    hash: Hash256,
    coinbase_txid: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

fn build_genesis() -> GenesisData {
    let mut unlock = Vec::new();
    write_varint(&mut unlock, 0);
    unlock.extend_from_slice(GENESIS_MESSAGE);

    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::sentinel(),
            unlock_script: unlock,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            amount: INITIAL_SUBSIDY,
            script: Vec::new(),
        }],
        lock_time: 0,
    };
    let coinbase_txid = coinbase.txid();

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_block: Hash256::ZERO,
            merkle_root: merkle::merkle_root(&[coinbase_txid]),
            time: GENESIS_TIME,
            target: MAX_TARGET_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.header.hash();

    GenesisData {
        block,
        hash,
        coinbase_txid,
    }
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis header hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// The genesis coinbase transaction ID.
pub fn genesis_coinbase_txid() -> Hash256 {
    GENESIS.coinbase_txid
}

/// Whether a block is the genesis block.
pub fn is_genesis(block: &Block) -> bool {
    block.header.hash() == GENESIS.hash
}
