//! Canonical binary encoding of the wire types.
//!
//! Integers are little-endian fixed-width. Sequences and byte strings are
//! length-prefixed with a variable-length integer: one byte below 0xFD,
//! otherwise `0xFD + u16`, `0xFE + u32`, or `0xFF + u64`. A VarInt whose
//! chosen width could have been shorter is non-minimal and rejected, as are
//! truncated inputs, cap violations, and trailing bytes after a top-level
//! structure.
//!
//! Caps enforced at decode: block ≤ [`MAX_BLOCK_BYTES`], transaction ≤
//! [`MAX_TX_BYTES`], script ≤ [`MAX_SCRIPT_BYTES`], inputs/outputs per
//! transaction ≤ [`MAX_TX_SLOTS`].

use crate::constants::{MAX_BLOCK_BYTES, MAX_SCRIPT_BYTES, MAX_TX_BYTES, MAX_TX_SLOTS};
use crate::error::CodecError;
use crate::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, UndoRecord,
    UtxoEntry,
};

/// UTXO value flag bit: the output was created by a coinbase transaction.
const FLAG_COINBASE: u8 = 0x01;

/// Types with a canonical binary encoding.
pub trait Encodable {
    fn encode_into(&self, out: &mut Vec<u8>);
}

/// Types decodable from the canonical binary encoding.
pub trait Decodable: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Encode a value to a fresh buffer.
pub fn encode_to_vec<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode_into(&mut out);
    out
}

/// Decode a whole structure from `bytes`, rejecting trailing bytes.
pub fn decode_from_slice<T: Decodable>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut r = Reader::new(bytes);
    let value = T::decode(&mut r)?;
    r.expect_end()?;
    Ok(value)
}

/// Decode a block from raw wire bytes, enforcing the block size cap before
/// any parsing happens.
pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    if bytes.len() > MAX_BLOCK_BYTES {
        return Err(CodecError::OversizedBlock {
            len: bytes.len(),
            max: MAX_BLOCK_BYTES,
        });
    }
    decode_from_slice(bytes)
}

/// Decode a transaction from raw wire bytes, enforcing the transaction size
/// cap before any parsing happens.
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    if bytes.len() > MAX_TX_BYTES {
        return Err(CodecError::OversizedTransaction {
            len: bytes.len(),
            max: MAX_TX_BYTES,
        });
    }
    decode_from_slice(bytes)
}

/// Decode a header from raw wire bytes.
pub fn decode_header(bytes: &[u8]) -> Result<BlockHeader, CodecError> {
    decode_from_slice(bytes)
}

/// Append a VarInt in its minimal width.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(0xFD);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Byte width of a VarInt for `value`.
pub fn varint_len(value: u64) -> usize {
    if value < 0xFD {
        1
    } else if value <= u16::MAX as u64 {
        3
    } else if value <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

fn write_byte_string(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Bounds-checked cursor over an input buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let b = self.take(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(b);
        Ok(Hash256(arr))
    }

    /// Read a VarInt, rejecting non-minimal encodings.
    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let first = self.read_u8()?;
        let value = match first {
            0xFD => {
                let v = self.read_u16()? as u64;
                if v < 0xFD {
                    return Err(CodecError::NonMinimalVarInt);
                }
                v
            }
            0xFE => {
                let v = self.read_u32()? as u64;
                if v <= u16::MAX as u64 {
                    return Err(CodecError::NonMinimalVarInt);
                }
                v
            }
            0xFF => {
                let v = self.read_u64()?;
                if v <= u32::MAX as u64 {
                    return Err(CodecError::NonMinimalVarInt);
                }
                v
            }
            v => v as u64,
        };
        Ok(value)
    }

    /// Read a sequence count, bounded both by `cap` and by the bytes that
    /// could possibly remain (each element takes at least one byte).
    pub fn read_count(&mut self, cap: usize) -> Result<usize, CodecError> {
        let count = self.read_varint()?;
        if count > cap as u64 {
            return Err(CodecError::OversizedSequence { len: count, max: cap });
        }
        if count > self.remaining() as u64 {
            return Err(CodecError::UnexpectedEnd(self.pos));
        }
        Ok(count as usize)
    }

    /// Read a length-prefixed byte string, capped at `cap` bytes.
    pub fn read_byte_string(&mut self, cap: usize) -> Result<Vec<u8>, CodecError> {
        let len = self.read_varint()?;
        if len > cap as u64 {
            return Err(CodecError::OversizedScript {
                len: len as usize,
                max: cap,
            });
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Error unless the whole buffer has been consumed.
    pub fn expect_end(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

// --- OutPoint ---

impl Encodable for OutPoint {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            txid: r.read_hash()?,
            index: r.read_u32()?,
        })
    }
}

// --- TxInput / TxOutput ---

impl Encodable for TxInput {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.previous_output.encode_into(out);
        write_byte_string(out, &self.unlock_script);
        out.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Decodable for TxInput {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            previous_output: OutPoint::decode(r)?,
            unlock_script: r.read_byte_string(MAX_SCRIPT_BYTES)?,
            sequence: r.read_u32()?,
        })
    }
}

impl Encodable for TxOutput {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.amount.to_le_bytes());
        write_byte_string(out, &self.script);
    }
}

impl Decodable for TxOutput {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            amount: r.read_u64()?,
            script: r.read_byte_string(MAX_SCRIPT_BYTES)?,
        })
    }
}

// --- Transaction ---

impl Encodable for Transaction {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode_into(out);
        }
        write_varint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode_into(out);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl Decodable for Transaction {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let start = r.position();

        let version = r.read_u32()?;
        let input_count = r.read_count(MAX_TX_SLOTS)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::decode(r)?);
        }
        let output_count = r.read_count(MAX_TX_SLOTS)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::decode(r)?);
        }
        let lock_time = r.read_u32()?;

        let consumed = r.position() - start;
        if consumed > MAX_TX_BYTES {
            return Err(CodecError::OversizedTransaction {
                len: consumed,
                max: MAX_TX_BYTES,
            });
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

// --- BlockHeader / Block ---

impl Encodable for BlockHeader {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_block.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.target.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for BlockHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.read_u32()?,
            prev_block: r.read_hash()?,
            merkle_root: r.read_hash()?,
            time: r.read_u32()?,
            target: r.read_u32()?,
            nonce: r.read_u64()?,
        })
    }
}

impl Encodable for Block {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.header.encode_into(out);
        write_varint(out, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(out);
        }
    }
}

impl Decodable for Block {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::decode(r)?;
        // A transaction takes at least ~10 bytes; bounding the count by the
        // remaining bytes is enough to stop preallocation abuse.
        let tx_count = r.read_count(r.remaining())?;
        let mut transactions = Vec::with_capacity(tx_count.min(4096));
        for _ in 0..tx_count {
            transactions.push(Transaction::decode(r)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

// --- UtxoEntry (storage value format) ---

impl Encodable for UtxoEntry {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.output.amount.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.push(if self.is_coinbase { FLAG_COINBASE } else { 0 });
        write_byte_string(out, &self.output.script);
    }
}

impl Decodable for UtxoEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let amount = r.read_u64()?;
        let height = r.read_u32()?;
        let flags = r.read_u8()?;
        let script = r.read_byte_string(MAX_SCRIPT_BYTES)?;
        Ok(Self {
            output: TxOutput { amount, script },
            height,
            is_coinbase: flags & FLAG_COINBASE != 0,
        })
    }
}

// --- UndoRecord ---

impl Encodable for UndoRecord {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_varint(out, self.spent.len() as u64);
        for (outpoint, entry) in &self.spent {
            outpoint.encode_into(out);
            entry.encode_into(out);
        }
    }
}

impl Decodable for UndoRecord {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.read_count(r.remaining())?;
        let mut spent = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let outpoint = OutPoint::decode(r)?;
            let entry = UtxoEntry::decode(r)?;
            spent.push((outpoint, entry));
        }
        Ok(Self { spent })
    }
}
