//! BIP-340 Schnorr operations over secp256k1.
//!
//! Provides key handling, pay-to-pubkey scripts, transaction signing and
//! verification, and personal-message signing. Uses `k256` for the curve
//! arithmetic and BLAKE3 for signing hashes.
//!
//! # Signing scheme
//!
//! Transaction inputs are signed over a **sighash** that commits to:
//! - Transaction version, lock_time and subnetwork
//! - All input outpoints and sequences
//! - All outputs (amount + script)
//! - The amount and script of the output being spent
//! - The index of the input being signed
//!
//! Signature scripts are excluded so inputs can be signed independently and
//! in any order, including by different devices.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use std::fmt;

use crate::constants::SIGHASH_ALL;
use crate::error::{CryptoError, TransactionError};
use crate::types::{Hash256, ScriptPublicKey, Transaction, TxOutput};

/// Domain prefix for transaction signing hashes.
const SIGHASH_DOMAIN: &[u8] = b"keyward-sighash-v1";

/// BLAKE3 context for personal-message hashing.
const MESSAGE_CONTEXT: &str = "keyward personal message v1";

/// OP_DATA_32.
const OP_DATA_32: u8 = 0x20;

/// OP_DATA_65.
const OP_DATA_65: u8 = 0x41;

/// OP_CHECKSIG (Schnorr).
const OP_CHECKSIG: u8 = 0xac;

/// Length of a signature script: push opcode, 64-byte signature, sighash type.
pub const SIGNATURE_SCRIPT_LEN: usize = 66;

/// Schnorr keypair for signing transactions and messages.
///
/// The secret scalar is zeroized on drop by `k256`.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    ///
    /// Fails for the zero scalar and values at or above the curve order.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Derive the x-only public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key().clone(),
        }
    }

    /// Sign a message, returning the raw 64-byte BIP-340 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// X-only Schnorr public key.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create a public key from its 32-byte x-only encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Create a public key from a 33-byte SEC1 compressed point by
    /// dropping its parity byte.
    pub fn from_compressed(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 33 || !matches!(bytes[0], 0x02 | 0x03) {
            return Err(CryptoError::InvalidPublicKey);
        }
        let mut xonly = [0u8; 32];
        xonly.copy_from_slice(&bytes[1..]);
        Self::from_bytes(&xonly)
    }

    /// The 32-byte x-only encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes().into()
    }

    /// Verify a 64-byte signature over a message.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig =
            Signature::try_from(signature.as_slice()).map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    /// Pay-to-pubkey locking script for this key.
    pub fn script_public_key(&self) -> ScriptPublicKey {
        pay_to_pubkey_script(&self.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

/// `OP_DATA_32 <xonly> OP_CHECKSIG`.
pub fn pay_to_pubkey_script(xonly: &[u8; 32]) -> ScriptPublicKey {
    let mut script = Vec::with_capacity(34);
    script.push(OP_DATA_32);
    script.extend_from_slice(xonly);
    script.push(OP_CHECKSIG);
    ScriptPublicKey::new(0, script)
}

/// Extract the x-only key from a pay-to-pubkey script.
pub fn extract_pubkey(script: &ScriptPublicKey) -> Option<[u8; 32]> {
    let s = &script.script;
    if s.len() != 34 || s[0] != OP_DATA_32 || s[33] != OP_CHECKSIG {
        return None;
    }
    let mut xonly = [0u8; 32];
    xonly.copy_from_slice(&s[1..33]);
    Some(xonly)
}

/// `OP_DATA_65 <sig64 || SIGHASH_ALL>`.
pub fn signature_script(signature: &[u8; 64]) -> Vec<u8> {
    let mut script = Vec::with_capacity(SIGNATURE_SCRIPT_LEN);
    script.push(OP_DATA_65);
    script.extend_from_slice(signature);
    script.push(SIGHASH_ALL);
    script
}

/// Extract the signature from a signature script.
pub fn parse_signature_script(script: &[u8]) -> Result<[u8; 64], CryptoError> {
    if script.len() != SIGNATURE_SCRIPT_LEN
        || script[0] != OP_DATA_65
        || script[SIGNATURE_SCRIPT_LEN - 1] != SIGHASH_ALL
    {
        return Err(CryptoError::InvalidSignature);
    }
    let mut sig = [0u8; 64];
    sig.copy_from_slice(&script[1..65]);
    Ok(sig)
}

/// Compute the signing hash for a transaction input.
///
/// `spent` lists the outputs consumed by the inputs, in input order.
pub fn signing_hash(
    tx: &Transaction,
    input_index: usize,
    spent: &[TxOutput],
) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }
    let spent_output = spent.get(input_index).ok_or(CryptoError::InputIndexOutOfBounds {
        index: input_index,
        len: spent.len(),
    })?;

    let mut data = Vec::new();
    data.extend_from_slice(SIGHASH_DOMAIN);
    data.extend_from_slice(&tx.version.to_le_bytes());

    // All input outpoints and sequences (no signature scripts)
    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.prev_tx_id.as_bytes());
        data.extend_from_slice(&input.output_index.to_le_bytes());
        data.extend_from_slice(&input.sequence.to_le_bytes());
        data.push(input.sig_op_count);
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        push_output(&mut data, output);
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data.extend_from_slice(&tx.subnetwork_id.0);

    // The output being spent by this input
    push_output(&mut data, spent_output);

    data.extend_from_slice(&(input_index as u64).to_le_bytes());
    data.push(SIGHASH_ALL);

    Ok(Hash256(blake3::hash(&data).into()))
}

fn push_output(data: &mut Vec<u8>, output: &TxOutput) {
    data.extend_from_slice(&output.amount.to_le_bytes());
    data.extend_from_slice(&output.script_public_key.version.to_le_bytes());
    data.extend_from_slice(&(output.script_public_key.script.len() as u64).to_le_bytes());
    data.extend_from_slice(&output.script_public_key.script);
}

/// Signing hashes for every input, in input order.
pub fn signing_hashes(tx: &Transaction, spent: &[TxOutput]) -> Result<Vec<Hash256>, CryptoError> {
    (0..tx.inputs.len())
        .map(|index| signing_hash(tx, index, spent))
        .collect()
}

/// Sign a transaction input in place.
pub fn sign_transaction_input(
    tx: &mut Transaction,
    input_index: usize,
    spent: &[TxOutput],
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index, spent)?;
    let signature = keypair.sign(sighash.as_bytes());
    tx.inputs[input_index].signature_script = signature_script(&signature);
    Ok(())
}

/// Verify a transaction input's signature against the script it spends.
///
/// Checks that:
/// 1. The spent script is pay-to-pubkey and names a valid key
/// 2. The input carries a well-formed signature script
/// 3. The Schnorr signature verifies against the sighash
pub fn verify_transaction_input(
    tx: &Transaction,
    input_index: usize,
    spent: &[TxOutput],
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index, spent)?;
    let xonly = extract_pubkey(&spent[input_index].script_public_key)
        .ok_or(CryptoError::ScriptMismatch)?;
    let pk = PublicKey::from_bytes(&xonly)?;
    let sig = parse_signature_script(&tx.inputs[input_index].signature_script)?;
    pk.verify(sighash.as_bytes(), &sig)
}

/// Verify every input of a signed transaction.
pub fn verify_transaction(tx: &Transaction, spent: &[TxOutput]) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }
    if spent.len() != tx.inputs.len() {
        return Err(TransactionError::SpentOutputMismatch {
            spent: spent.len(),
            inputs: tx.inputs.len(),
        });
    }
    for index in 0..tx.inputs.len() {
        if tx.inputs[index].signature_script.is_empty() {
            return Err(TransactionError::MissingSignature(index));
        }
        verify_transaction_input(tx, index, spent)
            .map_err(|source| TransactionError::InvalidSignature { index, source })?;
    }
    Ok(())
}

/// Hash of a personal message, domain-separated from transaction sighashes.
pub fn message_hash(message: &[u8]) -> Hash256 {
    let mut hasher = blake3::Hasher::new_derive_key(MESSAGE_CONTEXT);
    hasher.update(message);
    Hash256(hasher.finalize().into())
}

/// Sign a personal message.
pub fn sign_message(keypair: &KeyPair, message: &[u8]) -> [u8; 64] {
    keypair.sign(message_hash(message).as_bytes())
}

/// Verify a personal-message signature.
pub fn verify_message(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    public_key.verify(message_hash(message).as_bytes(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput};

    fn keypair(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32]).unwrap()
    }

    fn spending_tx(owner: &KeyPair, n_inputs: usize) -> (Transaction, Vec<TxOutput>) {
        let inputs = (0..n_inputs)
            .map(|i| {
                TxInput::unsigned(OutPoint {
                    transaction_id: Hash256([i as u8 + 1; 32]),
                    index: i as u32,
                })
            })
            .collect();
        let outputs = vec![TxOutput {
            amount: 9_000,
            script_public_key: keypair(0xEE).public_key().script_public_key(),
        }];
        let spent = (0..n_inputs)
            .map(|i| TxOutput {
                amount: 5_000 + i as u64,
                script_public_key: owner.public_key().script_public_key(),
            })
            .collect();
        (Transaction::new(inputs, outputs), spent)
    }

    // --- KeyPair ---

    #[test]
    fn keypair_generate_unique() {
        assert_ne!(KeyPair::generate().public_key(), KeyPair::generate().public_key());
    }

    #[test]
    fn keypair_rejects_zero_scalar() {
        assert_eq!(
            KeyPair::from_secret_bytes(&[0u8; 32]).unwrap_err(),
            CryptoError::InvalidSecretKey
        );
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let debug = format!("{:?}", keypair(7));
        assert!(debug.contains("KeyPair"));
        assert!(!debug.contains(&hex::encode([7u8; 32])));
    }

    // --- PublicKey ---

    #[test]
    fn pubkey_roundtrip() {
        let pk = keypair(3).public_key();
        assert_eq!(PublicKey::from_bytes(&pk.to_bytes()).unwrap(), pk);
    }

    #[test]
    fn pubkey_from_compressed_drops_parity() {
        let pk = keypair(3).public_key();
        let mut compressed = vec![0x03];
        compressed.extend_from_slice(&pk.to_bytes());
        assert_eq!(PublicKey::from_compressed(&compressed).unwrap(), pk);
        assert!(PublicKey::from_compressed(&compressed[1..]).is_err());
    }

    #[test]
    fn sign_verify_message_bytes() {
        let kp = keypair(9);
        let sig = kp.sign(b"hello");
        assert!(kp.public_key().verify(b"hello", &sig).is_ok());
        assert_eq!(
            kp.public_key().verify(b"other", &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    // --- Scripts ---

    #[test]
    fn p2pk_script_roundtrip() {
        let pk = keypair(4).public_key();
        let script = pk.script_public_key();
        assert_eq!(script.script.len(), 34);
        assert_eq!(extract_pubkey(&script), Some(pk.to_bytes()));
    }

    #[test]
    fn signature_script_roundtrip() {
        let sig = [0x5A; 64];
        let script = signature_script(&sig);
        assert_eq!(script.len(), SIGNATURE_SCRIPT_LEN);
        assert_eq!(parse_signature_script(&script).unwrap(), sig);
        assert!(parse_signature_script(&script[..65]).is_err());
    }

    // --- Transactions ---

    #[test]
    fn sign_and_verify_all_inputs() {
        let owner = keypair(1);
        let (mut tx, spent) = spending_tx(&owner, 3);
        for i in 0..3 {
            sign_transaction_input(&mut tx, i, &spent, &owner).unwrap();
        }
        assert!(verify_transaction(&tx, &spent).is_ok());
    }

    #[test]
    fn inputs_sign_in_any_order() {
        let owner = keypair(1);
        let (mut tx, spent) = spending_tx(&owner, 2);
        sign_transaction_input(&mut tx, 1, &spent, &owner).unwrap();
        sign_transaction_input(&mut tx, 0, &spent, &owner).unwrap();
        assert!(verify_transaction(&tx, &spent).is_ok());
    }

    #[test]
    fn foreign_key_fails_verification() {
        let owner = keypair(1);
        let (mut tx, spent) = spending_tx(&owner, 1);
        sign_transaction_input(&mut tx, 0, &spent, &keypair(2)).unwrap();
        assert_eq!(
            verify_transaction_input(&tx, 0, &spent),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn sighash_commits_to_spent_amount() {
        let owner = keypair(1);
        let (tx, spent) = spending_tx(&owner, 1);
        let mut altered = spent.clone();
        altered[0].amount += 1;
        assert_ne!(
            signing_hash(&tx, 0, &spent).unwrap(),
            signing_hash(&tx, 0, &altered).unwrap()
        );
    }

    #[test]
    fn sighash_differs_per_input() {
        let owner = keypair(1);
        let (tx, spent) = spending_tx(&owner, 2);
        let hashes = signing_hashes(&tx, &spent).unwrap();
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn tampered_output_breaks_signature() {
        let owner = keypair(1);
        let (mut tx, spent) = spending_tx(&owner, 1);
        sign_transaction_input(&mut tx, 0, &spent, &owner).unwrap();
        tx.outputs[0].amount -= 1;
        assert!(verify_transaction(&tx, &spent).is_err());
    }

    #[test]
    fn unsigned_input_reported() {
        let owner = keypair(1);
        let (tx, spent) = spending_tx(&owner, 1);
        assert_eq!(
            verify_transaction(&tx, &spent),
            Err(TransactionError::MissingSignature(0))
        );
    }

    #[test]
    fn out_of_bounds_index() {
        let owner = keypair(1);
        let (tx, spent) = spending_tx(&owner, 1);
        assert_eq!(
            signing_hash(&tx, 1, &spent),
            Err(CryptoError::InputIndexOutOfBounds { index: 1, len: 1 })
        );
    }

    // --- Messages ---

    #[test]
    fn message_signature_domain_separated() {
        let kp = keypair(5);
        let sig = sign_message(&kp, b"login");
        assert!(verify_message(&kp.public_key(), b"login", &sig).is_ok());
        // A raw signature over the same bytes is not a message signature.
        let raw = kp.sign(b"login");
        assert!(verify_message(&kp.public_key(), b"login", &raw).is_err());
    }
}
