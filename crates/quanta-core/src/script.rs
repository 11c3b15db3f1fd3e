//! Stack-machine script interpreter.
//!
//! Outputs carry a locking script; inputs carry an unlocking script. To
//! spend, the unlock script (push-only) runs first, then the locking script
//! continues on the same stack. The spend is valid when execution completes
//! without error and the final stack top is truthy.
//!
//! The opcode set is deliberately small: constant pushes, basic stack
//! manipulation, equality, tagged hashing, and the post-quantum
//! signature-verify opcode [`OP_CHECK_SIG_PQ`]. There is no control flow.
//!
//! Execution limits: at most [`MAX_OPCODES`] non-push operations,
//! [`MAX_STACK_ELEMENTS`] stack entries, and [`MAX_SCRIPT_STEPS`] total
//! interpreter steps. Stack elements are byte strings of at most
//! [`MAX_STACK_ELEMENT_SIZE`] bytes — sized for ML-DSA-65 signatures and
//! public keys, which must travel the stack to reach the verify opcode.

use crate::constants::MAX_SCRIPT_BYTES;
use crate::crypto;
use crate::error::ScriptError;
use crate::hash::{hash_tagged, TAG_SCRIPT};
use crate::types::{Transaction, TxOutput};

/// Maximum size of one stack element in bytes.
pub const MAX_STACK_ELEMENT_SIZE: usize = 4_096;
/// Maximum number of stack elements.
pub const MAX_STACK_ELEMENTS: usize = 1_000;
/// Maximum executed non-push opcodes per input.
pub const MAX_OPCODES: usize = 201;
/// Maximum interpreter steps (all opcodes, pushes included) per input.
pub const MAX_SCRIPT_STEPS: usize = 10_000;

/// Push the empty byte string.
pub const OP_0: u8 = 0x00;
/// Highest direct-push opcode: `0x01..=0x4B` push that many literal bytes.
pub const OP_PUSH_MAX: u8 = 0x4B;
/// Push, length in the next byte.
pub const OP_PUSHDATA1: u8 = 0x4C;
/// Push, length in the next two bytes (LE).
pub const OP_PUSHDATA2: u8 = 0x4D;
/// Push the byte string `[0x01]`.
pub const OP_TRUE: u8 = 0x51;
/// No operation.
pub const OP_NOP: u8 = 0x61;
/// Fail unless the popped top is truthy.
pub const OP_VERIFY: u8 = 0x69;
/// Drop the top element.
pub const OP_DROP: u8 = 0x75;
/// Duplicate the top element.
pub const OP_DUP: u8 = 0x76;
/// Swap the top two elements.
pub const OP_SWAP: u8 = 0x7C;
/// Pop two, push equality as a boolean.
pub const OP_EQUAL: u8 = 0x87;
/// `OP_EQUAL` then `OP_VERIFY`.
pub const OP_EQUAL_VERIFY: u8 = 0x88;
/// Pop one, push its tagged hash.
pub const OP_HASH: u8 = 0xA9;
/// Pop public key then signature, verify over the input's sighash, push
/// the outcome as a boolean.
pub const OP_CHECK_SIG_PQ: u8 = 0xAC;

/// Everything `OP_CHECK_SIG_PQ` needs to recompute the signature hash.
pub struct SigContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub prevout_script: &'a [u8],
    pub amount: u64,
}

/// Whether a stack element is truthy: non-empty with any non-zero byte.
fn truthy(element: &[u8]) -> bool {
    element.iter().any(|&b| b != 0)
}

/// The interpreter. One instance runs the unlock and lock scripts of a
/// single input, sharing its stack and budgets across both.
#[derive(Debug)]
pub struct Vm {
    stack: Vec<Vec<u8>>,
    ops: usize,
    steps: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            ops: 0,
            steps: 0,
        }
    }

    fn push(&mut self, element: Vec<u8>) -> Result<(), ScriptError> {
        if element.len() > MAX_STACK_ELEMENT_SIZE {
            return Err(ScriptError::ElementTooLarge(element.len()));
        }
        if self.stack.len() >= MAX_STACK_ELEMENTS {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(element);
        Ok(())
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    /// Run a script. `ctx` supplies the signature context; scripts executed
    /// without one fail on `OP_CHECK_SIG_PQ`. `push_only` restricts the
    /// opcode set to constant pushes (enforced for unlock scripts).
    pub fn run(
        &mut self,
        script: &[u8],
        ctx: Option<&SigContext<'_>>,
        push_only: bool,
    ) -> Result<(), ScriptError> {
        if script.len() > MAX_SCRIPT_BYTES {
            return Err(ScriptError::ScriptTooLarge(script.len()));
        }

        let mut pc = 0usize;
        while pc < script.len() {
            self.steps += 1;
            if self.steps > MAX_SCRIPT_STEPS {
                return Err(ScriptError::BudgetExceeded);
            }

            let opcode = script[pc];
            pc += 1;

            // Constant pushes.
            if opcode == OP_0 {
                self.push(Vec::new())?;
                continue;
            }
            if (1..=OP_PUSH_MAX).contains(&opcode) {
                pc = self.push_literal(script, pc, opcode as usize)?;
                continue;
            }
            if opcode == OP_PUSHDATA1 {
                let len = *script.get(pc).ok_or(ScriptError::TruncatedPush)? as usize;
                pc = self.push_literal(script, pc + 1, len)?;
                continue;
            }
            if opcode == OP_PUSHDATA2 {
                let lo = *script.get(pc).ok_or(ScriptError::TruncatedPush)?;
                let hi = *script.get(pc + 1).ok_or(ScriptError::TruncatedPush)?;
                let len = u16::from_le_bytes([lo, hi]) as usize;
                pc = self.push_literal(script, pc + 2, len)?;
                continue;
            }
            if opcode == OP_TRUE {
                self.push(vec![1])?;
                continue;
            }

            if push_only {
                return Err(ScriptError::InvalidOpcode(opcode));
            }

            self.ops += 1;
            if self.ops > MAX_OPCODES {
                return Err(ScriptError::BudgetExceeded);
            }

            match opcode {
                OP_NOP => {}
                OP_DUP => {
                    let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                    self.push(top)?;
                }
                OP_DROP => {
                    self.pop()?;
                }
                OP_SWAP => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(ScriptError::StackUnderflow);
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                OP_EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(if a == b { vec![1] } else { Vec::new() })?;
                }
                OP_EQUAL_VERIFY => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    if a != b {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                OP_VERIFY => {
                    let top = self.pop()?;
                    if !truthy(&top) {
                        return Err(ScriptError::VerifyFailed);
                    }
                }
                OP_HASH => {
                    let top = self.pop()?;
                    self.push(hash_tagged(TAG_SCRIPT, &top).0.to_vec())?;
                }
                OP_CHECK_SIG_PQ => {
                    let pubkey = self.pop()?;
                    let signature = self.pop()?;
                    let ok = self.check_sig(ctx, &pubkey, &signature)?;
                    self.push(if ok { vec![1] } else { Vec::new() })?;
                }
                other => return Err(ScriptError::InvalidOpcode(other)),
            }
        }

        Ok(())
    }

    fn push_literal(
        &mut self,
        script: &[u8],
        start: usize,
        len: usize,
    ) -> Result<usize, ScriptError> {
        let end = start.checked_add(len).ok_or(ScriptError::TruncatedPush)?;
        if end > script.len() {
            return Err(ScriptError::TruncatedPush);
        }
        self.push(script[start..end].to_vec())?;
        Ok(end)
    }

    fn check_sig(
        &self,
        ctx: Option<&SigContext<'_>>,
        pubkey: &[u8],
        signature: &[u8],
    ) -> Result<bool, ScriptError> {
        let Some(ctx) = ctx else {
            // No transaction context (e.g. a lock script evaluated
            // standalone): signatures cannot verify.
            return Ok(false);
        };
        // Reject byte strings that cannot possibly be a key or signature of
        // the configured scheme before touching the verifier.
        if !crypto::is_public_key_len(pubkey.len()) || !crypto::is_signature_len(signature.len())
        {
            return Err(ScriptError::InvalidSignatureEncoding);
        }
        let sighash = crypto::tx_sighash(
            ctx.tx,
            ctx.input_index,
            ctx.prevout_script,
            ctx.amount,
        )
        .map_err(|_| ScriptError::InvalidSignatureEncoding)?;
        Ok(crypto::verify_signature(pubkey, sighash.as_bytes(), signature).is_ok())
    }

    /// Whether the final stack is in the accepting state.
    pub fn succeeded(&self) -> bool {
        self.stack.last().is_some_and(|top| truthy(top))
    }

    #[cfg(test)]
    fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }
}

/// Verify one input: run its unlock script (push-only), then the prevout's
/// locking script, on a shared stack. Errors on any VM fault or when the
/// final stack top is not truthy.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    prevout: &TxOutput,
) -> Result<(), ScriptError> {
    let ctx = SigContext {
        tx,
        input_index,
        prevout_script: &prevout.script,
        amount: prevout.amount,
    };
    let mut vm = Vm::new();
    vm.run(&tx.inputs[input_index].unlock_script, None, true)?;
    vm.run(&prevout.script, Some(&ctx), false)?;
    if vm.succeeded() {
        Ok(())
    } else {
        Err(ScriptError::VerifyFailed)
    }
}

/// Count signature operations in a script without executing it: one unit
/// per [`OP_CHECK_SIG_PQ`], with push payloads skipped. Counting stops at a
/// truncated push (such a script fails execution anyway).
pub fn count_sigops(script: &[u8]) -> u64 {
    let mut count = 0u64;
    let mut pc = 0usize;
    while pc < script.len() {
        let opcode = script[pc];
        pc += 1;
        match opcode {
            op if (1..=OP_PUSH_MAX).contains(&op) => pc += op as usize,
            OP_PUSHDATA1 => {
                let Some(&len) = script.get(pc) else { break };
                pc += 1 + len as usize;
            }
            OP_PUSHDATA2 => {
                let (Some(&lo), Some(&hi)) = (script.get(pc), script.get(pc + 1)) else {
                    break;
                };
                pc += 2 + u16::from_le_bytes([lo, hi]) as usize;
            }
            OP_CHECK_SIG_PQ => count += 1,
            _ => {}
        }
    }
    count
}

/// Incremental script assembly.
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self { script: Vec::new() }
    }

    pub fn push_op(mut self, opcode: u8) -> Self {
        self.script.push(opcode);
        self
    }

    /// Push `data` with the minimal push encoding.
    pub fn push_data(mut self, data: &[u8]) -> Self {
        debug_assert!(data.len() <= u16::MAX as usize);
        match data.len() {
            0 => self.script.push(OP_0),
            n if n <= OP_PUSH_MAX as usize => self.script.push(n as u8),
            n if n <= u8::MAX as usize => {
                self.script.push(OP_PUSHDATA1);
                self.script.push(n as u8);
            }
            n => {
                self.script.push(OP_PUSHDATA2);
                self.script.extend_from_slice(&(n as u16).to_le_bytes());
            }
        }
        self.script.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.script
    }
}

/// Standard locking script paying to a hashed public key:
/// `DUP HASH <pubkey_hash> EQUAL_VERIFY CHECK_SIG_PQ`.
pub fn pay_to_pubkey_hash(pubkey_hash: &crate::types::Hash256) -> Vec<u8> {
    ScriptBuilder::new()
        .push_op(OP_DUP)
        .push_op(OP_HASH)
        .push_data(pubkey_hash.as_bytes())
        .push_op(OP_EQUAL_VERIFY)
        .push_op(OP_CHECK_SIG_PQ)
        .build()
}

/// Standard unlocking script for [`pay_to_pubkey_hash`]:
/// `<signature> <pubkey>`.
pub fn unlock_with(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
    ScriptBuilder::new()
        .push_data(signature)
        .push_data(pubkey)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::{Hash256, OutPoint, TxInput};

    fn run(script: &[u8]) -> Result<Vm, ScriptError> {
        let mut vm = Vm::new();
        vm.run(script, None, false)?;
        Ok(vm)
    }

    // ------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------

    #[test]
    fn direct_push() {
        let script = ScriptBuilder::new().push_data(b"abc").build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack(), &[b"abc".to_vec()]);
    }

    #[test]
    fn op_0_pushes_empty() {
        let vm = run(&[OP_0]).unwrap();
        assert_eq!(vm.stack(), &[Vec::<u8>::new()]);
        assert!(!vm.succeeded());
    }

    #[test]
    fn op_true_is_truthy() {
        let vm = run(&[OP_TRUE]).unwrap();
        assert!(vm.succeeded());
    }

    #[test]
    fn pushdata1_and_2() {
        let long = vec![7u8; 200];
        let longer = vec![9u8; 600];
        let script = ScriptBuilder::new().push_data(&long).push_data(&longer).build();
        assert_eq!(script[0], OP_PUSHDATA1);
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack(), &[long, longer]);
    }

    #[test]
    fn truncated_push_rejected() {
        // Claims 5 bytes, provides 2.
        assert_eq!(run(&[0x05, 1, 2]).unwrap_err(), ScriptError::TruncatedPush);
        assert_eq!(run(&[OP_PUSHDATA1]).unwrap_err(), ScriptError::TruncatedPush);
        assert_eq!(run(&[OP_PUSHDATA2, 0x01]).unwrap_err(), ScriptError::TruncatedPush);
    }

    #[test]
    fn oversized_element_rejected() {
        let huge = vec![0u8; MAX_STACK_ELEMENT_SIZE + 1];
        let script = ScriptBuilder::new().push_data(&huge).build();
        assert!(matches!(
            run(&script).unwrap_err(),
            ScriptError::ElementTooLarge(_)
        ));
    }

    // ------------------------------------------------------------------
    // Stack manipulation
    // ------------------------------------------------------------------

    #[test]
    fn dup_drop_swap() {
        let script = ScriptBuilder::new()
            .push_data(b"a")
            .push_data(b"b")
            .push_op(OP_DUP)   // a b b
            .push_op(OP_DROP)  // a b
            .push_op(OP_SWAP)  // b a
            .build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack(), &[b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn underflow_errors() {
        assert_eq!(run(&[OP_DUP]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(run(&[OP_DROP]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(run(&[OP_TRUE, OP_SWAP]).unwrap_err(), ScriptError::StackUnderflow);
        assert_eq!(run(&[OP_TRUE, OP_EQUAL]).unwrap_err(), ScriptError::StackUnderflow);
    }

    // ------------------------------------------------------------------
    // Equality / verify / hash
    // ------------------------------------------------------------------

    #[test]
    fn equal_pushes_boolean() {
        let eq = ScriptBuilder::new().push_data(b"x").push_data(b"x").push_op(OP_EQUAL).build();
        assert!(run(&eq).unwrap().succeeded());

        let ne = ScriptBuilder::new().push_data(b"x").push_data(b"y").push_op(OP_EQUAL).build();
        assert!(!run(&ne).unwrap().succeeded());
    }

    #[test]
    fn equal_verify_fails_fast() {
        let script = ScriptBuilder::new()
            .push_data(b"x")
            .push_data(b"y")
            .push_op(OP_EQUAL_VERIFY)
            .build();
        assert_eq!(run(&script).unwrap_err(), ScriptError::VerifyFailed);
    }

    #[test]
    fn verify_consumes_top() {
        let script = ScriptBuilder::new().push_op(OP_TRUE).push_op(OP_VERIFY).build();
        let vm = run(&script).unwrap();
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn verify_rejects_false() {
        assert_eq!(run(&[OP_0, OP_VERIFY]).unwrap_err(), ScriptError::VerifyFailed);
    }

    #[test]
    fn hash_is_tagged() {
        let script = ScriptBuilder::new().push_data(b"data").push_op(OP_HASH).build();
        let vm = run(&script).unwrap();
        assert_eq!(vm.stack()[0], hash_tagged(TAG_SCRIPT, b"data").0.to_vec());
    }

    // ------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------

    #[test]
    fn invalid_opcode_rejected() {
        assert_eq!(run(&[0xFE]).unwrap_err(), ScriptError::InvalidOpcode(0xFE));
    }

    #[test]
    fn opcode_budget_enforced() {
        let script = vec![OP_NOP; MAX_OPCODES + 1];
        assert_eq!(run(&script).unwrap_err(), ScriptError::BudgetExceeded);
    }

    #[test]
    fn opcode_budget_allows_exactly_201() {
        let mut script = vec![OP_NOP; MAX_OPCODES];
        script.insert(0, OP_TRUE);
        assert!(run(&script).unwrap().succeeded());
    }

    #[test]
    fn stack_element_budget_enforced() {
        let script = vec![OP_TRUE; MAX_STACK_ELEMENTS + 1];
        assert_eq!(run(&script).unwrap_err(), ScriptError::StackOverflow);
    }

    #[test]
    fn push_only_rejects_operations() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.run(&[OP_TRUE, OP_DUP], None, true).unwrap_err(),
            ScriptError::InvalidOpcode(OP_DUP)
        );
    }

    // ------------------------------------------------------------------
    // Sigops
    // ------------------------------------------------------------------

    #[test]
    fn sigop_counting_skips_push_payloads() {
        // Push payload containing the CHECK_SIG_PQ byte must not count.
        let script = ScriptBuilder::new()
            .push_data(&[OP_CHECK_SIG_PQ; 4])
            .push_op(OP_CHECK_SIG_PQ)
            .build();
        assert_eq!(count_sigops(&script), 1);
    }

    #[test]
    fn sigop_counting_p2pkh() {
        assert_eq!(count_sigops(&pay_to_pubkey_hash(&Hash256([1; 32]))), 1);
        assert_eq!(count_sigops(&[]), 0);
    }

    // ------------------------------------------------------------------
    // End-to-end pay-to-pubkey-hash
    // ------------------------------------------------------------------

    fn signed_spend(kp: &KeyPair, prevout: &TxOutput) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Hash256([9; 32]), index: 0 },
                unlock_script: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount: prevout.amount - 1, script: vec![OP_TRUE] }],
            lock_time: 0,
        };
        crypto::sign_input(&mut tx, 0, kp, prevout).unwrap();
        tx
    }

    #[test]
    fn p2pkh_round_trip_verifies() {
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 1_000,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let tx = signed_spend(&kp, &prevout);
        assert!(verify_input(&tx, 0, &prevout).is_ok());
    }

    #[test]
    fn p2pkh_wrong_key_fails() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let prevout = TxOutput {
            amount: 1_000,
            script: pay_to_pubkey_hash(&owner.public_key().key_hash()),
        };
        let tx = signed_spend(&thief, &prevout);
        // Thief's pubkey hash differs: EQUAL_VERIFY fails.
        assert_eq!(verify_input(&tx, 0, &prevout).unwrap_err(), ScriptError::VerifyFailed);
    }

    #[test]
    fn p2pkh_tampered_output_fails() {
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 1_000,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let mut tx = signed_spend(&kp, &prevout);
        // Change an output after signing: signature no longer covers the tx.
        tx.outputs[0].amount -= 1;
        assert_eq!(verify_input(&tx, 0, &prevout).unwrap_err(), ScriptError::VerifyFailed);
    }

    #[test]
    fn garbage_signature_encoding_errors() {
        let kp = KeyPair::generate();
        let prevout = TxOutput {
            amount: 1_000,
            script: pay_to_pubkey_hash(&kp.public_key().key_hash()),
        };
        let mut tx = signed_spend(&kp, &prevout);
        // Keep the pubkey (hash check passes), mangle the signature length.
        tx.inputs[0].unlock_script =
            unlock_with(&[0u8; 10], kp.public_key().as_bytes());
        assert_eq!(
            verify_input(&tx, 0, &prevout).unwrap_err(),
            ScriptError::InvalidSignatureEncoding
        );
    }

    #[test]
    fn anyone_can_spend_empty_lock_fails() {
        // An empty locking script leaves whatever the unlock pushed; an
        // empty unlock leaves an empty stack, which is not accepting.
        let prevout = TxOutput { amount: 1, script: vec![] };
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint { txid: Hash256([9; 32]), index: 0 },
                unlock_script: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOutput { amount: 1, script: vec![OP_TRUE] }],
            lock_time: 0,
        };
        assert_eq!(verify_input(&tx, 0, &prevout).unwrap_err(), ScriptError::VerifyFailed);
    }
}
