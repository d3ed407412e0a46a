//! Core chain types: hashes, outpoints, UTXOs, transactions.
//!
//! All monetary values are in sompi and use u64. Byte fields cross the JSON
//! boundary as lowercase hex; the serialized transaction is what relay and
//! broadcast logic consume.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    self, BASE_TX_SIZE, MASS_PER_INPUT, SUBNETWORK_ID_NATIVE, TX_VERSION,
};
use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs and signing hashes (BLAKE3). Orders
/// lexicographically by bytes, which matches the order of its hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
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

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
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

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter encoding byte vectors as hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(bytes: T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub transaction_id: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

/// Locking script of an output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ScriptPublicKey {
    /// Script version.
    pub version: u16,
    /// Raw script bytes.
    #[serde(with = "hex_bytes")]
    pub script: Vec<u8>,
}

impl ScriptPublicKey {
    pub fn new(version: u16, script: Vec<u8>) -> Self {
        Self { version, script }
    }
}

/// An unspent transaction output as reported by an indexer.
///
/// Immutable once fetched and identified by `txid:vout`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct UnspentOutput {
    pub txid: Hash256,
    pub vout: u32,
    /// Encoded owner address.
    pub address: String,
    pub script_public_key: ScriptPublicKey,
    /// Value in sompi.
    pub satoshis: u64,
    /// DAA score of the block that accepted the output.
    pub block_daa_score: u64,
}

impl UnspentOutput {
    /// The `txid:vout` identifier.
    pub fn id(&self) -> String {
        self.outpoint().to_string()
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            transaction_id: self.txid,
            index: self.vout,
        }
    }

    /// Whether the output is at least `confirmation_count` scores deep.
    ///
    /// Outputs reported from a score above `chain_score` are never confirmed.
    pub fn is_confirmed(&self, chain_score: u64, confirmation_count: u64) -> bool {
        chain_score
            .checked_sub(self.block_daa_score)
            .is_some_and(|depth| depth >= confirmation_count)
    }

    /// The output this UTXO represents, as committed to by a sighash.
    pub fn as_output(&self) -> TxOutput {
        TxOutput {
            amount: self.satoshis,
            script_public_key: self.script_public_key.clone(),
        }
    }
}

/// 20-byte subnetwork identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SubnetworkId(pub [u8; 20]);

impl SubnetworkId {
    pub const NATIVE: Self = Self(SUBNETWORK_ID_NATIVE);
}

impl Serialize for SubnetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SubnetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Transaction input spending a previous output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub prev_tx_id: Hash256,
    pub output_index: u32,
    pub sequence: u64,
    pub sig_op_count: u8,
    /// Empty until the input is signed.
    #[serde(with = "hex_bytes")]
    pub signature_script: Vec<u8>,
}

impl TxInput {
    /// Unsigned input spending `outpoint`.
    pub fn unsigned(outpoint: OutPoint) -> Self {
        Self {
            prev_tx_id: outpoint.transaction_id,
            output_index: outpoint.index,
            sequence: 0,
            sig_op_count: 1,
            signature_script: Vec::new(),
        }
    }

    pub fn previous_outpoint(&self) -> OutPoint {
        OutPoint {
            transaction_id: self.prev_tx_id,
            index: self.output_index,
        }
    }
}

/// Transaction output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    /// Value in sompi.
    pub amount: u64,
    pub script_public_key: ScriptPublicKey,
}

/// A UTXO-chain transaction in its relay JSON shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub version: u16,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
    pub subnetwork_id: SubnetworkId,
}

impl Transaction {
    /// Unsigned native transaction.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
            subnetwork_id: SubnetworkId::NATIVE,
        }
    }

    /// Transaction ID: BLAKE3 over the witness-stripped encoding.
    ///
    /// Signature scripts are excluded so the id is fixed before signing and
    /// cannot be malleated by re-encoding a signature.
    pub fn id(&self) -> Hash256 {
        let mut data = Vec::with_capacity(64 + self.inputs.len() * 48 + self.outputs.len() * 48);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.prev_tx_id.as_bytes());
            data.extend_from_slice(&input.output_index.to_le_bytes());
            data.extend_from_slice(&input.sequence.to_le_bytes());
            data.push(input.sig_op_count);
        }
        data.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.amount.to_le_bytes());
            data.extend_from_slice(&output.script_public_key.version.to_le_bytes());
            data.extend_from_slice(&(output.script_public_key.script.len() as u64).to_le_bytes());
            data.extend_from_slice(&output.script_public_key.script);
        }
        data.extend_from_slice(&self.lock_time.to_le_bytes());
        data.extend_from_slice(&self.subnetwork_id.0);
        Hash256(blake3::hash(&data).into())
    }

    /// Sum of output amounts, failing if it does not fit a value field.
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount).ok_or(TransactionError::ValueOverflow)
        })
    }

    /// Estimated mass of the transaction once every input is signed.
    pub fn mass(&self) -> u64 {
        let outputs: u64 = self
            .outputs
            .iter()
            .map(|o| constants::output_mass(o.script_public_key.script.len() as u64))
            .sum();
        BASE_TX_SIZE + MASS_PER_INPUT * self.inputs.len() as u64 + outputs
    }

    /// Whether every input carries a signature script.
    pub fn is_fully_signed(&self) -> bool {
        self.inputs.iter().all(|i| !i.signature_script.is_empty())
    }

    /// Serialize to the relay JSON format.
    pub fn to_json(&self) -> Result<String, TransactionError> {
        serde_json::to_string(self).map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Parse the relay JSON format.
    pub fn from_json(s: &str) -> Result<Self, TransactionError> {
        serde_json::from_str(s).map_err(|e| TransactionError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_utxo(score: u64) -> UnspentOutput {
        UnspentOutput {
            txid: Hash256([0x11; 32]),
            vout: 3,
            address: "kaspatest1example".into(),
            script_public_key: ScriptPublicKey::new(0, vec![0x20; 34]),
            satoshis: 5_000,
            block_daa_score: score,
        }
    }

    fn sample_tx() -> Transaction {
        Transaction::new(
            vec![TxInput::unsigned(OutPoint {
                transaction_id: Hash256([0x11; 32]),
                index: 0,
            })],
            vec![TxOutput {
                amount: 1_000,
                script_public_key: ScriptPublicKey::new(0, vec![0xAB; 34]),
            }],
        )
    }

    #[test]
    fn hash_display_and_parse() {
        let h = Hash256([0xAB; 32]);
        let s = h.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<Hash256>().unwrap(), h);
    }

    #[test]
    fn hash_order_matches_hex_order() {
        let a = Hash256([0x0F; 32]);
        let b = Hash256([0xF0; 32]);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn utxo_id_is_txid_colon_vout() {
        let u = sample_utxo(0);
        assert_eq!(u.id(), format!("{}:3", "11".repeat(32)));
    }

    #[test]
    fn confirmation_boundary() {
        let u = sample_utxo(100);
        assert!(u.is_confirmed(110, 10));
        assert!(!u.is_confirmed(109, 10));
    }

    #[test]
    fn future_output_never_confirmed() {
        let u = sample_utxo(500);
        assert!(!u.is_confirmed(100, 0));
    }

    #[test]
    fn json_shape_uses_boundary_field_names() {
        let json: serde_json::Value = serde_json::from_str(&sample_tx().to_json().unwrap()).unwrap();
        assert_eq!(json["version"], 0);
        assert_eq!(json["lockTime"], 0);
        assert_eq!(json["subnetworkId"], "00".repeat(20));
        let input = &json["inputs"][0];
        assert_eq!(input["prevTxId"], "11".repeat(32));
        assert_eq!(input["outputIndex"], 0);
        assert_eq!(input["sequence"], 0);
        assert_eq!(input["signatureScript"], "");
        let output = &json["outputs"][0];
        assert_eq!(output["amount"], 1_000);
        assert_eq!(output["scriptPublicKey"]["script"], "ab".repeat(34));
    }

    #[test]
    fn json_parses_back() {
        let tx = sample_tx();
        assert_eq!(Transaction::from_json(&tx.to_json().unwrap()).unwrap(), tx);
    }

    #[test]
    fn id_ignores_signature_scripts() {
        let unsigned = sample_tx();
        let mut signed = unsigned.clone();
        signed.inputs[0].signature_script = vec![0x41; 66];
        assert_eq!(unsigned.id(), signed.id());
    }

    #[test]
    fn id_commits_to_outputs() {
        let a = sample_tx();
        let mut b = a.clone();
        b.outputs[0].amount += 1;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn total_output_overflow() {
        let mut tx = sample_tx();
        tx.outputs[0].amount = u64::MAX;
        tx.outputs.push(tx.outputs[0].clone());
        assert_eq!(tx.total_output(), Err(TransactionError::ValueOverflow));
    }

    #[test]
    fn mass_grows_per_input() {
        let one = sample_tx();
        let mut two = one.clone();
        two.inputs.push(two.inputs[0].clone());
        assert_eq!(two.mass() - one.mass(), MASS_PER_INPUT);
    }

    #[test]
    fn fully_signed_flag() {
        let mut tx = sample_tx();
        assert!(!tx.is_fully_signed());
        tx.inputs[0].signature_script = vec![1];
        assert!(tx.is_fully_signed());
    }
}
