//! Transaction validation.
//!
//! Two levels, mirroring the block pipeline:
//!
//! - **Structural** ([`check_transaction`]): context-free checks on format
//!   and internal consistency.
//! - **Contextual** ([`validate_transaction`] /
//!   [`check_transaction_inputs`]): UTXO-aware checks — input existence,
//!   coinbase maturity, amount conservation, and script evaluation.
//!
//! Coinbase transactions are only structurally validated here; their claim
//! against subsidy + fees is a block-level rule.

use std::collections::HashSet;

use crate::codec::Reader;
use crate::constants::{
    MAX_COINBASE_SCRIPT, MAX_SCRIPT_BYTES, MAX_TX_BYTES, MAX_TX_SLOTS, MIN_COINBASE_SCRIPT,
    TX_VERSION,
};
use crate::error::TxError;
use crate::script;
use crate::types::{OutPoint, Transaction, TxOutput, UtxoEntry};

/// Summary of a successfully validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total amount of all spent inputs in quarks.
    pub total_input: u64,
    /// Total amount of all created outputs in quarks.
    pub total_output: u64,
    /// Fee in quarks (`total_input - total_output`).
    pub fee: u64,
}

/// Validate transaction structure (context-free).
///
/// Checks on every transaction: supported version, at least one input and
/// one output, slot and size caps, per-script caps, no output-amount
/// overflow. Coinbase transactions additionally need the sentinel input and
/// a 2–100 byte unlock script opening with a canonical height commitment;
/// regular transactions may not carry sentinel prevouts or duplicate
/// inputs.
pub fn check_transaction(tx: &Transaction) -> Result<(), TxError> {
    if tx.version != TX_VERSION {
        return Err(TxError::BadVersion(tx.version));
    }

    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TxError::EmptyInputsOrOutputs);
    }

    if tx.inputs.len() > MAX_TX_SLOTS {
        return Err(TxError::TooManySlots(tx.inputs.len()));
    }
    if tx.outputs.len() > MAX_TX_SLOTS {
        return Err(TxError::TooManySlots(tx.outputs.len()));
    }

    for input in &tx.inputs {
        if input.unlock_script.len() > MAX_SCRIPT_BYTES {
            return Err(TxError::Codec(crate::error::CodecError::OversizedScript {
                len: input.unlock_script.len(),
                max: MAX_SCRIPT_BYTES,
            }));
        }
    }
    for output in &tx.outputs {
        if output.script.len() > MAX_SCRIPT_BYTES {
            return Err(TxError::Codec(crate::error::CodecError::OversizedScript {
                len: output.script.len(),
                max: MAX_SCRIPT_BYTES,
            }));
        }
    }

    if tx.total_output_amount().is_none() {
        return Err(TxError::AmountOverflow);
    }

    let size = tx.encoded_size();
    if size > MAX_TX_BYTES {
        return Err(TxError::Oversized { size, max: MAX_TX_BYTES });
    }

    if tx.is_coinbase() {
        check_coinbase_structure(tx)?;
    } else {
        check_regular_structure(tx)?;
    }

    Ok(())
}

fn check_coinbase_structure(tx: &Transaction) -> Result<(), TxError> {
    let unlock = &tx.inputs[0].unlock_script;
    if unlock.len() < MIN_COINBASE_SCRIPT || unlock.len() > MAX_COINBASE_SCRIPT {
        return Err(TxError::CoinbaseMalformed(format!(
            "unlock script of {} bytes outside {MIN_COINBASE_SCRIPT}..={MAX_COINBASE_SCRIPT}",
            unlock.len(),
        )));
    }
    // The height commitment must parse; its value is a contextual check.
    coinbase_height(tx)?;
    Ok(())
}

fn check_regular_structure(tx: &Transaction) -> Result<(), TxError> {
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.previous_output.is_sentinel() {
            return Err(TxError::SentinelPrevout(i));
        }
        if !seen.insert(input.previous_output) {
            return Err(TxError::DuplicateInput(input.previous_output));
        }
    }
    Ok(())
}

/// Read the height committed at the start of a coinbase unlock script
/// (a canonical VarInt; trailing bytes are free-form miner data).
pub fn coinbase_height(tx: &Transaction) -> Result<u64, TxError> {
    if !tx.is_coinbase() {
        return Err(TxError::CoinbaseMalformed("not a coinbase".into()));
    }
    let mut reader = Reader::new(&tx.inputs[0].unlock_script);
    reader
        .read_varint()
        .map_err(|_| TxError::CoinbaseMalformed("unreadable height commitment".into()))
}

/// Resolve and check a regular transaction's inputs against a UTXO view,
/// without running scripts.
///
/// `height` is the height of the block the transaction would confirm in
/// (coinbase maturity is measured against it). Returns the validation
/// summary plus the resolved previous outputs, in input order, for the
/// caller's script-verification pass.
pub fn check_transaction_inputs<F>(
    tx: &Transaction,
    get_utxo: F,
    height: u64,
) -> Result<(ValidatedTransaction, Vec<TxOutput>), TxError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    debug_assert!(!tx.is_coinbase());

    let mut total_input: u64 = 0;
    let mut prevouts = Vec::with_capacity(tx.inputs.len());

    for (i, input) in tx.inputs.iter().enumerate() {
        let utxo = get_utxo(&input.previous_output)
            .ok_or(TxError::MissingUtxo(input.previous_output))?;

        if utxo.is_coinbase {
            let confirmations = height.saturating_sub(utxo.height as u64);
            if confirmations < crate::constants::COINBASE_MATURITY {
                return Err(TxError::CoinbaseImmature {
                    index: i,
                    confirmations,
                    required: crate::constants::COINBASE_MATURITY,
                });
            }
        }

        total_input = total_input
            .checked_add(utxo.output.amount)
            .ok_or(TxError::AmountOverflow)?;
        prevouts.push(utxo.output);
    }

    let total_output = tx.total_output_amount().ok_or(TxError::AmountOverflow)?;
    if total_input < total_output {
        return Err(TxError::InsufficientInputAmount {
            have: total_input,
            need: total_output,
        });
    }

    Ok((
        ValidatedTransaction {
            total_input,
            total_output,
            fee: total_input - total_output,
        },
        prevouts,
    ))
}

/// Full contextual validation of a regular transaction: structure, inputs,
/// and script evaluation. This is the single-transaction entry point used
/// for mempool admission; block validation batches the script pass instead.
pub fn validate_transaction<F>(
    tx: &Transaction,
    get_utxo: F,
    height: u64,
) -> Result<ValidatedTransaction, TxError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    if tx.is_coinbase() {
        return Err(TxError::CoinbaseMalformed(
            "coinbase cannot be validated standalone".into(),
        ));
    }

    check_transaction(tx)?;
    let (validated, prevouts) = check_transaction_inputs(tx, get_utxo, height)?;

    for (i, prevout) in prevouts.iter().enumerate() {
        script::verify_input(tx, i, prevout)
            .map_err(|source| TxError::ScriptFailure { index: i, source })?;
    }

    Ok(validated)
}

/// Signature-operation cost of one transaction: one unit per
/// `CHECK_SIG_PQ` across its unlock scripts and the locking scripts it
/// executes.
pub fn sigop_cost(tx: &Transaction, prevouts: &[TxOutput]) -> u64 {
    let mut cost = 0u64;
    for input in &tx.inputs {
        cost += script::count_sigops(&input.unlock_script);
    }
    for prevout in prevouts {
        cost += script::count_sigops(&prevout.script);
    }
    cost
}
