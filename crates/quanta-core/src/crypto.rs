//! Post-quantum signatures for transaction inputs.
//!
//! The signature scheme is ML-DSA-65 (CRYSTALS-Dilithium level 3), consumed
//! through `pqcrypto-dilithium` with detached signatures. Public keys are
//! ~1.9 KiB and signatures ~3.2 KiB; the script VM's element cap is sized
//! for them.
//!
//! # Signing scheme
//!
//! An input signature commits to the transaction with **all** unlock
//! scripts stripped (avoiding circularity and letting inputs be signed in
//! any order), plus the index of the input being signed, the previous
//! output's locking script, and its amount:
//!
//! ```text
//! sighash = hash_tagged("quanta/sighash",
//!     encode(stripped_tx) || input_index || prevout_script || amount)
//! ```

use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use zeroize::Zeroize;

use crate::codec::{self, Encodable};
use crate::error::CryptoError;
use crate::hash::{hash_tagged, TAG_SCRIPT, TAG_SIGHASH};
use crate::script;
use crate::types::{Hash256, Transaction, TxOutput};

/// Byte length of an encoded public key.
pub fn public_key_len() -> usize {
    dilithium3::public_key_bytes()
}

/// Byte length of a detached signature.
pub fn signature_len() -> usize {
    dilithium3::signature_bytes()
}

/// Whether `len` is a plausible public key length for the scheme.
pub fn is_public_key_len(len: usize) -> bool {
    len == public_key_len()
}

/// Whether `len` is a plausible signature length for the scheme.
pub fn is_signature_len(len: usize) -> bool {
    len == signature_len()
}

/// An ML-DSA-65 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Wrap raw key bytes, validating the length and structure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        dilithium3::PublicKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { bytes: bytes.to_vec() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Tagged hash of the key bytes, as committed in pay-to-pubkey-hash
    /// locking scripts.
    pub fn key_hash(&self) -> Hash256 {
        hash_tagged(TAG_SCRIPT, &self.bytes)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.key_hash())
    }
}

/// Secret key bytes, zeroized on drop.
struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An ML-DSA-65 keypair.
pub struct KeyPair {
    public: PublicKey,
    secret: SecretBytes,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium3::keypair();
        Self {
            public: PublicKey { bytes: pk.as_bytes().to_vec() },
            secret: SecretBytes(sk.as_bytes().to_vec()),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sk = dilithium3::SecretKey::from_bytes(&self.secret.0)
            .expect("secret key bytes originate from keypair generation");
        dilithium3::detached_sign(message, &sk).as_bytes().to_vec()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Verify a detached signature.
pub fn verify_signature(
    pubkey: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let pk = dilithium3::PublicKey::from_bytes(pubkey)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = dilithium3::DetachedSignature::from_bytes(signature)
        .map_err(|_| CryptoError::InvalidSignature)?;
    dilithium3::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Compute the signature hash for one input.
pub fn tx_sighash(
    tx: &Transaction,
    input_index: usize,
    prevout_script: &[u8],
    amount: u64,
) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut stripped = tx.clone();
    for input in &mut stripped.inputs {
        input.unlock_script.clear();
    }

    let mut preimage = Vec::new();
    stripped.encode_into(&mut preimage);
    preimage.extend_from_slice(&(input_index as u32).to_le_bytes());
    codec::write_varint(&mut preimage, prevout_script.len() as u64);
    preimage.extend_from_slice(prevout_script);
    preimage.extend_from_slice(&amount.to_le_bytes());

    Ok(hash_tagged(TAG_SIGHASH, &preimage))
}

/// Sign input `index` of `tx`, installing the standard unlock script
/// `<signature> <pubkey>` for the given previous output.
pub fn sign_input(
    tx: &mut Transaction,
    index: usize,
    keypair: &KeyPair,
    prevout: &TxOutput,
) -> Result<(), CryptoError> {
    let sighash = tx_sighash(tx, index, &prevout.script, prevout.amount)?;
    let signature = keypair.sign(sighash.as_bytes());
    tx.inputs[index].unlock_script =
        script::unlock_with(&signature, keypair.public_key().as_bytes());
    Ok(())
}
