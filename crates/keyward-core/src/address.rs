//! Address encoding.
//!
//! Addresses use Bech32m encoding ([BIP-350]) with human-readable prefixes:
//! - Mainnet: `kaspa1...`
//! - Testnet: `kaspatest1...`
//!
//! Each address encodes a version byte (0 = Schnorr pay-to-pubkey) and the
//! 32-byte x-only public key itself, so the locking script can be rebuilt
//! from the address alone.
//!
//! [BIP-350]: https://github.com/bitcoin/bips/blob/master/bip-0350.mediawiki

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{self, PublicKey};
use crate::error::AddressError;
use crate::types::ScriptPublicKey;

/// Bech32m checksum constant (BIP-350).
const BECH32M_CONST: u32 = 0x2bc830a3;

/// Bech32 character set for encoding 5-bit values.
const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Schnorr pay-to-pubkey address version.
pub const ADDRESS_VERSION: u8 = 0;

/// Network identifier determining the address prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Mainnet (HRP: "kaspa").
    Mainnet,
    /// Testnet (HRP: "kaspatest").
    #[default]
    Testnet,
}

impl Network {
    /// Human-readable prefix for this network.
    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "kaspa",
            Network::Testnet => "kaspatest",
        }
    }

    /// Look up network from a human-readable prefix.
    pub fn from_hrp(hrp: &str) -> Result<Self, AddressError> {
        match hrp {
            "kaspa" => Ok(Network::Mainnet),
            "kaspatest" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetwork(hrp.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        })
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(AddressError::UnknownNetwork(other.to_string())),
        }
    }
}

/// A pay-to-pubkey address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    version: u8,
    payload: [u8; 32],
}

impl Address {
    /// Create an address from an x-only public key encoding.
    pub fn from_xonly(xonly: [u8; 32], network: Network) -> Self {
        Self {
            network,
            version: ADDRESS_VERSION,
            payload: xonly,
        }
    }

    /// Create an address from a public key and network.
    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        Self::from_xonly(public_key.to_bytes(), network)
    }

    /// Recover the address a pay-to-pubkey script pays to.
    pub fn from_script(script: &ScriptPublicKey, network: Network) -> Result<Self, AddressError> {
        let xonly = crypto::extract_pubkey(script).ok_or(AddressError::NonStandardScript)?;
        Ok(Self::from_xonly(xonly, network))
    }

    /// The x-only key encoded in this address.
    pub fn payload(&self) -> &[u8; 32] {
        &self.payload
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The address version byte.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Locking script paying to this address.
    pub fn script_public_key(&self) -> ScriptPublicKey {
        crypto::pay_to_pubkey_script(&self.payload)
    }

    /// Encode this address as a Bech32m string.
    pub fn encode(&self) -> String {
        let hrp = self.network.hrp();
        let data_5bit = to_5bit(&self.payload);

        let mut payload = Vec::with_capacity(1 + data_5bit.len());
        payload.push(self.version);
        payload.extend_from_slice(&data_5bit);

        let checksum = bech32m_create_checksum(hrp, &payload);

        let mut result = String::with_capacity(hrp.len() + 1 + payload.len() + 6);
        result.push_str(hrp);
        result.push('1');
        for &d in payload.iter().chain(checksum.iter()) {
            result.push(CHARSET[d as usize] as char);
        }
        result
    }

    /// Decode a Bech32m address string.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::MixedCase);
        }

        let s_lower = s.to_ascii_lowercase();
        let sep_pos = s_lower.rfind('1').ok_or(AddressError::MissingSeparator)?;
        if sep_pos == 0 {
            return Err(AddressError::InvalidHrp);
        }
        // 6 checksum chars + 1 version char after separator
        if sep_pos + 8 > s_lower.len() {
            return Err(AddressError::InvalidLength);
        }

        let hrp = &s_lower[..sep_pos];
        let data_part = &s_lower[sep_pos + 1..];

        let mut data = Vec::with_capacity(data_part.len());
        for c in data_part.chars() {
            let pos = CHARSET
                .iter()
                .position(|&ch| ch as char == c)
                .ok_or(AddressError::InvalidCharacter(c))?;
            data.push(pos as u8);
        }

        if !bech32m_verify_checksum(hrp, &data) {
            return Err(AddressError::InvalidChecksum);
        }

        let payload = &data[..data.len() - 6];
        let version = payload[0];
        if version != ADDRESS_VERSION {
            return Err(AddressError::InvalidVersion(version));
        }

        let key_bytes =
            convert_bits(&payload[1..], 5, 8, false).ok_or(AddressError::InvalidPadding)?;
        let xonly: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength)?;

        let network = Network::from_hrp(hrp)?;
        Ok(Self {
            network,
            version,
            payload: xonly,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

// --- Bech32m internals ---

fn bech32m_polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    let mut chk: u32 = 1;
    for &v in values {
        let b = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (v as u32);
        for (i, &g) in GEN.iter().enumerate() {
            if (b >> i) & 1 != 0 {
                chk ^= g;
            }
        }
    }
    chk
}

fn bech32m_hrp_expand(hrp: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(hrp.len() * 2 + 1);
    ret.extend(hrp.bytes().map(|c| c >> 5));
    ret.push(0);
    ret.extend(hrp.bytes().map(|c| c & 31));
    ret
}

fn bech32m_create_checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
    let mut values = bech32m_hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let polymod = bech32m_polymod(&values) ^ BECH32M_CONST;
    let mut checksum = [0u8; 6];
    for (i, c) in checksum.iter_mut().enumerate() {
        *c = ((polymod >> (5 * (5 - i))) & 31) as u8;
    }
    checksum
}

fn bech32m_verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = bech32m_hrp_expand(hrp);
    values.extend_from_slice(data);
    bech32m_polymod(&values) == BECH32M_CONST
}

/// 8-bit to padded 5-bit groups. Infallible for byte input.
fn to_5bit(data: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::with_capacity(data.len() * 8 / 5 + 1);
    for &value in data {
        acc = (acc << 8) | value as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            ret.push(((acc >> bits) & 31) as u8);
        }
    }
    if bits > 0 {
        ret.push(((acc << (5 - bits)) & 31) as u8);
    }
    ret
}

/// Convert between bit widths.
fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::new();
    let maxv = (1u32 << to_bits) - 1;
    for &value in data {
        let v = value as u32;
        if v >> from_bits != 0 {
            return None;
        }
        acc = (acc << from_bits) | v;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }
    if pad {
        if bits > 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return None;
    }
    Some(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn sample() -> Address {
        Address::from_xonly([0xAA; 32], Network::Mainnet)
    }

    #[test]
    fn network_hrp_roundtrip() {
        for net in [Network::Mainnet, Network::Testnet] {
            assert_eq!(Network::from_hrp(net.hrp()).unwrap(), net);
            assert_eq!(net.to_string().parse::<Network>().unwrap(), net);
        }
        assert_eq!(
            Network::from_hrp("bitcoin").unwrap_err(),
            AddressError::UnknownNetwork("bitcoin".into())
        );
    }

    #[test]
    fn encode_prefixes() {
        assert!(sample().encode().starts_with("kaspa1"));
        let test = Address::from_xonly([0xAA; 32], Network::Testnet);
        assert!(test.encode().starts_with("kaspatest1"));
    }

    #[test]
    fn encode_length() {
        // "kaspa" (5) + "1" + version (1) + 52 data chars + 6 checksum
        assert_eq!(sample().encode().len(), 65);
    }

    #[test]
    fn decode_roundtrip() {
        let addr = sample();
        assert_eq!(Address::decode(&addr.encode()).unwrap(), addr);
    }

    #[test]
    fn decode_uppercase() {
        let addr = sample();
        let upper = addr.encode().to_ascii_uppercase();
        assert_eq!(Address::decode(&upper).unwrap(), addr);
    }

    #[test]
    fn decode_rejects_mixed_case() {
        let mut s = sample().encode();
        s.replace_range(0..1, "K");
        assert_eq!(Address::decode(&s).unwrap_err(), AddressError::MixedCase);
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let mut s = sample().encode();
        let last = s.pop().unwrap();
        s.push(if last == 'q' { 'p' } else { 'q' });
        assert_eq!(Address::decode(&s).unwrap_err(), AddressError::InvalidChecksum);
    }

    #[test]
    fn decode_rejects_unknown_char() {
        let s = format!("kaspa1{}", "b".repeat(59));
        assert_eq!(Address::decode(&s).unwrap_err(), AddressError::InvalidCharacter('b'));
    }

    #[test]
    fn script_roundtrip() {
        let kp = KeyPair::from_secret_bytes(&[5; 32]).unwrap();
        let addr = Address::from_public_key(&kp.public_key(), Network::Testnet);
        assert_eq!(addr.script_public_key(), kp.public_key().script_public_key());
        assert_eq!(
            Address::from_script(&addr.script_public_key(), Network::Testnet).unwrap(),
            addr
        );
    }

    #[test]
    fn non_p2pk_script_rejected() {
        let script = ScriptPublicKey::new(0, vec![0x76, 0xa9]);
        assert_eq!(
            Address::from_script(&script, Network::Mainnet).unwrap_err(),
            AddressError::NonStandardScript
        );
    }

    #[test]
    fn serde_as_string() {
        let addr = sample();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.encode()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest::proptest! {
        #[test]
        fn any_key_roundtrips(key in proptest::prelude::any::<[u8; 32]>(), mainnet in proptest::prelude::any::<bool>()) {
            let net = if mainnet { Network::Mainnet } else { Network::Testnet };
            let addr = Address::from_xonly(key, net);
            proptest::prop_assert_eq!(Address::decode(&addr.encode()).unwrap(), addr);
        }
    }
}
