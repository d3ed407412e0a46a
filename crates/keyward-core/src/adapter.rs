//! Validating adapter for raw indexer responses.
//!
//! Indexers return loosely typed JSON: amounts and scores as decimal strings,
//! an optional nested script object, and the accepting block's DAA score
//! under a field named `confirmations`. Everything is checked here and turned
//! into the fixed [`UnspentOutput`] model before any selection logic sees it.

use serde::Deserialize;

use crate::error::AdapterError;
use crate::traits::NetworkInfo;
use crate::types::{Hash256, ScriptPublicKey, UnspentOutput};

/// Script object as reported by the indexer.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawScriptPublicKey {
    pub script_public_key: Option<String>,
    pub version: Option<u16>,
}

/// UTXO as reported by the indexer.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawUtxo {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    pub address: Option<String>,
    pub script_public_key: Option<RawScriptPublicKey>,
    /// Decimal string in sompi.
    pub value: Option<String>,
    /// DAA score of the accepting block, as a decimal string.
    pub confirmations: Option<String>,
}

/// Network info as reported by the indexer.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawNetworkInfo {
    pub virtual_daa_score: Option<String>,
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, AdapterError> {
    value.trim().parse::<u64>().map_err(|_| AdapterError::InvalidField {
        field,
        value: value.to_string(),
    })
}

impl TryFrom<RawUtxo> for UnspentOutput {
    type Error = AdapterError;

    fn try_from(raw: RawUtxo) -> Result<Self, Self::Error> {
        let txid_hex = raw.txid.ok_or(AdapterError::MissingField("txid"))?;
        let txid = Hash256::from_hex(&txid_hex).map_err(|_| AdapterError::InvalidField {
            field: "txid",
            value: txid_hex.clone(),
        })?;
        let vout = raw.vout.ok_or(AdapterError::MissingField("vout"))?;
        let address = raw.address.ok_or(AdapterError::MissingField("address"))?;
        let satoshis = parse_u64("value", &raw.value.ok_or(AdapterError::MissingField("value"))?)?;
        let block_daa_score = parse_u64(
            "confirmations",
            &raw.confirmations.ok_or(AdapterError::MissingField("confirmations"))?,
        )?;

        // A missing script object maps to an empty script, as the indexer
        // omits it for some legacy outputs.
        let raw_script = raw.script_public_key.unwrap_or_default();
        let script_hex = raw_script.script_public_key.unwrap_or_default();
        let script = hex::decode(&script_hex).map_err(|_| AdapterError::InvalidField {
            field: "scriptPublicKey",
            value: script_hex.clone(),
        })?;

        Ok(UnspentOutput {
            txid,
            vout,
            address,
            script_public_key: ScriptPublicKey::new(raw_script.version.unwrap_or(0), script),
            satoshis,
            block_daa_score,
        })
    }
}

impl TryFrom<RawNetworkInfo> for NetworkInfo {
    type Error = AdapterError;

    fn try_from(raw: RawNetworkInfo) -> Result<Self, Self::Error> {
        let score = raw
            .virtual_daa_score
            .ok_or(AdapterError::MissingField("virtualDaaScore"))?;
        Ok(NetworkInfo {
            current_chain_score: parse_u64("virtualDaaScore", &score)?,
        })
    }
}

/// Parse and validate a JSON array of raw indexer UTXOs.
pub fn utxos_from_json(json: &str) -> Result<Vec<UnspentOutput>, AdapterError> {
    let raw: Vec<RawUtxo> = serde_json::from_str(json).map_err(|e| AdapterError::InvalidField {
        field: "body",
        value: e.to_string(),
    })?;
    raw.into_iter().map(UnspentOutput::try_from).collect()
}
