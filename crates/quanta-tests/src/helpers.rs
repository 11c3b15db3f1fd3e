//! Helpers shared by the end-to-end and adversarial tests.
//!
//! Test chains pay their coinbases to an `OP_TRUE` locking script, so
//! spends need no signatures and block construction stays fast; the PQ
//! signing path gets dedicated coverage of its own. The injected clock is
//! a shared counter the helpers advance in lockstep with block times, so
//! exact-spacing chains keep the genesis target and stay cheap to mine.

use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicU64, Ordering};

use quanta_consensus::mine_block;
use quanta_core::codec::{self, write_varint};
use quanta_core::constants::TARGET_BLOCK_TIME;
use quanta_core::genesis;
use quanta_core::merkle;
use quanta_core::reward;
use quanta_core::script::OP_TRUE;
use quanta_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput,
};
use quanta_node::{Node, NodeConfig};

static TRACING: Once = Once::new();

/// Route node logs through the `RUST_LOG` filter once per test binary.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A spendable-by-anyone locking script.
pub fn anyone_can_spend() -> Vec<u8> {
    vec![OP_TRUE]
}

/// Open a fresh node over a temp directory with a controllable clock.
pub fn test_node() -> (Node, tempfile::TempDir, Arc<AtomicU64>) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    let now = Arc::new(AtomicU64::new(
        genesis::GENESIS_TIME as u64 + TARGET_BLOCK_TIME,
    ));
    let clock = now.clone();
    let node = Node::open_with_clock(&config, move || clock.load(Ordering::Relaxed)).unwrap();
    (node, dir, now)
}

/// Reopen a node over an existing data directory, sharing the clock.
pub fn reopen_node(dir: &tempfile::TempDir, now: &Arc<AtomicU64>) -> Node {
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    let clock = now.clone();
    Node::open_with_clock(&config, move || clock.load(Ordering::Relaxed)).unwrap()
}

/// Build and mine the next block on the node's tip via the template
/// builder, advancing the clock one target interval past the tip.
pub fn mine_next(node: &Node, now: &Arc<AtomicU64>) -> Block {
    let (_, tip_hash) = node.chain_tip();
    let tip_time = node
        .get_block(&tip_hash)
        .unwrap()
        .expect("tip block present")
        .header
        .time as u64;
    now.store(tip_time + TARGET_BLOCK_TIME, Ordering::Relaxed);

    let template = node.get_block_template(&anyone_can_spend(), b"").unwrap();
    let seed = node
        .engine()
        .pow_seed(template.height, &template.prev_hash)
        .unwrap();
    let mut block = template.block;
    assert!(mine_block(&mut block, &seed, u64::MAX), "mining exhausted nonces");
    block
}

/// Mine and connect `n` blocks on the current tip.
pub fn mine_chain(node: &Node, now: &Arc<AtomicU64>, n: usize) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(n);
    for _ in 0..n {
        let block = mine_next(node, now);
        node.process_block(&block).unwrap();
        blocks.push(block);
    }
    blocks
}

/// Hand-build and mine a block on an arbitrary parent (fork
/// construction). `marker` disambiguates coinbases across branches;
/// `coinbase_amount` is the claim (pass `subsidy + fees`).
pub fn build_block_on(
    node: &Node,
    parent: Hash256,
    parent_height: u64,
    time: u32,
    marker: &[u8],
    coinbase_amount: u64,
    txs: Vec<Transaction>,
) -> Block {
    let height = parent_height + 1;
    let target = node.engine().next_target(&parent, parent_height).unwrap();

    let mut unlock = Vec::new();
    write_varint(&mut unlock, height);
    unlock.extend_from_slice(marker);
    if unlock.len() < 2 {
        unlock.push(0);
    }
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::sentinel(),
            unlock_script: unlock,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            amount: coinbase_amount,
            script: anyone_can_spend(),
        }],
        lock_time: 0,
    };

    let mut transactions = vec![coinbase];
    transactions.extend(txs);
    let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();

    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block: parent,
            merkle_root: merkle::merkle_root(&txids),
            time,
            target,
            nonce: 0,
        },
        transactions,
    };
    let seed = node.engine().pow_seed(height, &parent).unwrap();
    assert!(mine_block(&mut block, &seed, u64::MAX), "mining exhausted nonces");
    block
}

/// An unsigned spend of `OP_TRUE` outputs.
pub fn spend_anyone(outpoints: &[OutPoint], amounts_out: &[u64]) -> Transaction {
    Transaction {
        version: 1,
        inputs: outpoints
            .iter()
            .map(|op| TxInput {
                previous_output: *op,
                unlock_script: vec![],
                sequence: u32::MAX,
            })
            .collect(),
        outputs: amounts_out
            .iter()
            .map(|amount| TxOutput {
                amount: *amount,
                script: anyone_can_spend(),
            })
            .collect(),
        lock_time: 0,
    }
}

/// Outpoint of a transaction's `index`-th output.
pub fn outpoint_of(tx: &Transaction, index: u32) -> OutPoint {
    OutPoint { txid: tx.txid(), index }
}

/// The subsidy a coinbase-only block at `height` claims in these tests.
pub fn block_subsidy(height: u64) -> u64 {
    reward::subsidy(height)
}

/// Canonical bytes of a block (the wire form `receive_block` takes).
pub fn block_bytes(block: &Block) -> Vec<u8> {
    codec::encode_to_vec(block)
}
