//! # quanta-consensus
//! Validation pipeline, per-block retarget driver, proof-of-work kernels,
//! and the block-template builder for the Quanta protocol.

pub mod engine;
pub mod pow;

pub use engine::{BlockTemplate, ConsensusEngine, mine_block};
