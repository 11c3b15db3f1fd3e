//! Error types for the Quanta core.
//!
//! Validation rejection is an ordinary return path: every check yields a
//! `Result` and the first failure short-circuits. There is no unwinding.

use thiserror::Error;

use crate::types::{Hash256, OutPoint};

/// Canonical-codec failures. Bytes carrying any of these are rejected and
/// never re-requested from the same peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEnd(usize),
    #[error("non-minimal varint encoding")]
    NonMinimalVarInt,
    #[error("sequence length {len} exceeds cap {max}")]
    OversizedSequence { len: u64, max: usize },
    #[error("script of {len} bytes exceeds cap {max}")]
    OversizedScript { len: usize, max: usize },
    #[error("transaction of {len} bytes exceeds cap {max}")]
    OversizedTransaction { len: usize, max: usize },
    #[error("block of {len} bytes exceeds cap {max}")]
    OversizedBlock { len: usize, max: usize },
    #[error("{0} trailing bytes after a complete structure")]
    TrailingBytes(usize),
}

/// Post-quantum signature failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("input index {index} out of bounds ({len} inputs)")]
    InputIndexOutOfBounds { index: usize, len: usize },
}

/// Script-VM failures. All are consensus failures: a transaction whose
/// script trips any of these is invalid, with no retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("opcode or step budget exceeded")]
    BudgetExceeded,
    #[error("stack element of {0} bytes exceeds the element cap")]
    ElementTooLarge(usize),
    #[error("invalid signature encoding on the stack")]
    InvalidSignatureEncoding,
    #[error("VERIFY failed")]
    VerifyFailed,
    #[error("push runs past end of script")]
    TruncatedPush,
    #[error("script of {0} bytes exceeds the script cap")]
    ScriptTooLarge(usize),
}

/// Transaction-level validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("empty inputs or outputs")]
    EmptyInputsOrOutputs,
    #[error("duplicate input {0}")]
    DuplicateInput(OutPoint),
    #[error("sentinel prevout in non-coinbase input {0}")]
    SentinelPrevout(usize),
    #[error("unsupported transaction version {0}")]
    BadVersion(u32),
    #[error("malformed coinbase: {0}")]
    CoinbaseMalformed(String),
    #[error("missing UTXO {0}")]
    MissingUtxo(OutPoint),
    #[error("immature coinbase spent by input {index}: {confirmations} of {required} confirmations")]
    CoinbaseImmature {
        index: usize,
        confirmations: u64,
        required: u64,
    },
    #[error("input amount {have} below output amount {need}")]
    InsufficientInputAmount { have: u64, need: u64 },
    #[error("script failure on input {index}: {source}")]
    ScriptFailure {
        index: usize,
        source: ScriptError,
    },
    #[error("amount overflow")]
    AmountOverflow,
    #[error("oversized transaction: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("too many inputs or outputs: {0}")]
    TooManySlots(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Block validation failures, phase A (context-free) and phase B
/// (contextual). Any of these marks the block-index entry `Failed`
/// permanently; descendants become unreachable for main-chain inclusion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("proof-of-work hash above target")]
    PowInsufficient,
    #[error("wrong difficulty: got {got:#010x}, expected {expected:#010x}")]
    WrongTarget { got: u32, expected: u32 },
    #[error("target not in canonical compact form: {0:#010x}")]
    NonCanonicalTarget(u32),
    #[error("merkle root does not match transactions")]
    BadMerkleRoot,
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
    #[error("malformed coinbase: {0}")]
    CoinbaseMalformed(String),
    #[error("coinbase height commitment {claimed} != expected {expected}")]
    CoinbaseHeightMismatch { claimed: u64, expected: u64 },
    #[error("coinbase claims {got} quarks, maximum {max}")]
    CoinbaseOverclaim { got: u64, max: u64 },
    #[error("block has no coinbase")]
    NoCoinbase,
    #[error("transaction {0} is a second coinbase")]
    ExtraCoinbase(usize),
    #[error("unsupported block version {0}")]
    BadVersion(u32),
    #[error("duplicate transaction {0}")]
    DuplicateTx(Hash256),
    #[error("outpoint {0} double-spent within the block")]
    DoubleSpend(OutPoint),
    #[error("wrong parent: block links {got}, expected {expected}")]
    WrongParent { got: Hash256, expected: Hash256 },
    #[error("block too large: {size} > {max}")]
    BlockTooLarge { size: usize, max: usize },
    #[error("sigop cost {cost} exceeds cap {max}")]
    TooManySigops { cost: u64, max: u64 },
    #[error("transaction {index}: {source}")]
    Tx { index: usize, source: TxError },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Chain-level rejections that are not consensus invalidity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Parent unknown. Soft: the caller buffers the header and revisits it
    /// when the parent arrives.
    #[error("orphan header: parent {0} unknown")]
    OrphanHeader(Hash256),
    /// Reorganization would unwind past the finality window.
    #[error("reorg of depth {depth} exceeds maximum {max}")]
    ReorgTooDeep { depth: u64, max: u64 },
    /// An ancestor failed validation; the descendant is rejected terminally.
    #[error("parent {0} failed validation")]
    ParentFailed(Hash256),
    /// Validation was cooperatively cancelled (a better candidate arrived).
    /// Not a consensus failure: the block is not marked `Failed`.
    #[error("validation cancelled")]
    Cancelled,
    #[error("unknown block {0}")]
    UnknownBlock(Hash256),
}

/// Durable-store failures.
///
/// `Io` is a backend failure surfaced to the caller, which stops writing
/// and may retry once the backend recovers. `Corruption` is fatal: the
/// writer halts and the operator must intervene.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage I/O: {0}")]
    Io(String),
    #[error("storage corruption: {0}")]
    Corruption(String),
    #[error("missing UTXO {0}")]
    MissingUtxo(OutPoint),
    #[error("duplicate UTXO {0}")]
    DuplicateUtxo(OutPoint),
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block {0}")]
    DuplicateBlock(Hash256),
    #[error("undo record missing for block {0}")]
    UndoMissing(Hash256),
    #[error("empty chain: no blocks connected")]
    EmptyChain,
}

/// Mempool admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")]
    AlreadyExists(Hash256),
    #[error("conflicts with pool transaction {existing} on outpoint {outpoint}")]
    Conflict {
        existing: Hash256,
        outpoint: OutPoint,
    },
    #[error("pool full")]
    PoolFull,
    #[error(transparent)]
    Tx(#[from] TxError),
}

/// Top-level error for callers that cross module boundaries.
#[derive(Error, Debug)]
pub enum QuantaError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
}
