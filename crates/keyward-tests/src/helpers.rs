//! Shared helpers for integration tests: fixtures, an in-memory UTXO
//! source, and simulated hardware and air-gapped devices.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use keyward_core::address::{Address, Network};
use keyward_core::crypto::{KeyPair, sign_message};
use keyward_core::error::SourceError;
use keyward_core::traits::{NetworkInfo, UtxoSource};
use keyward_core::types::{Hash256, UnspentOutput};
use keyward_secret::hd::derive_addresses;
use keyward_secret::{
    Curve, KdfParams, RevealableSeed, SecretError, SecretSession, SeedEnvelope, derive_private_key, encrypt_seed,
    root_fingerprint,
};
use keyward_wallet::account::AccountStore;
use keyward_wallet::airgap::{QrScanner, SignDataType, SignRequest, SignatureResponse};
use keyward_wallet::keyring::{
    AirGapAccount, HardwareTransport, QrKeyring, SoftwareKeyring, TransportError, account_path,
};
use keyward_wallet::WalletError;

/// Cheap KDF parameters so tests stay fast.
pub const TEST_KDF: KdfParams = KdfParams::new(8, 1, 1);

pub const PASSWORD: &str = "integration-password";

/// Entropy used by the derivation scenario.
pub const SCENARIO_ENTROPY: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

/// Envelope over the seed for `entropy`, sealed with [`PASSWORD`].
pub fn envelope(entropy: &[u8]) -> SeedEnvelope {
    let seed = RevealableSeed::from_entropy(entropy, "").unwrap();
    encrypt_seed(&seed, PASSWORD.as_bytes(), TEST_KDF).unwrap()
}

/// Software keyring over [`SCENARIO_ENTROPY`] with its account store.
pub fn software_keyring(wallet_id: &str) -> (SoftwareKeyring, Arc<AccountStore>) {
    let accounts = Arc::new(AccountStore::new());
    let keyring = SoftwareKeyring::new(
        wallet_id,
        envelope(&SCENARIO_ENTROPY),
        PASSWORD,
        Arc::new(SecretSession::unlocked()),
        Arc::clone(&accounts),
        Network::Testnet,
    )
    .unwrap();
    (keyring, accounts)
}

/// A confirmed-at-`score` output of `satoshis` locked to `owner`.
///
/// `i` makes the txid unique.
pub fn utxo(owner: &Address, i: u32, satoshis: u64, score: u64) -> UnspentOutput {
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&i.to_be_bytes());
    txid[31] = 0x5a;
    UnspentOutput {
        txid: Hash256(txid),
        vout: i % 3,
        address: owner.to_string(),
        script_public_key: owner.script_public_key(),
        satoshis,
        block_daa_score: score,
    }
}

/// One output per value, with scores 0, 1, 2, ...
pub fn fund(owner: &Address, values: &[u64]) -> Vec<UnspentOutput> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| utxo(owner, i as u32, v, i as u64))
        .collect()
}

/// A fixed address nobody in the tests controls.
pub fn recipient() -> Address {
    Address::from_xonly([0x77; 32], Network::Testnet)
}

/// In-memory indexer.
#[derive(Default)]
pub struct MemoryUtxoSource {
    pub chain_score: u64,
    pub utxos: Mutex<Vec<UnspentOutput>>,
    pub offline: bool,
}

impl MemoryUtxoSource {
    pub fn new(chain_score: u64, utxos: Vec<UnspentOutput>) -> Self {
        Self {
            chain_score,
            utxos: Mutex::new(utxos),
            offline: false,
        }
    }
}

#[async_trait]
impl UtxoSource for MemoryUtxoSource {
    async fn network_info(&self) -> Result<NetworkInfo, SourceError> {
        if self.offline {
            return Err(SourceError::Unavailable("indexer offline".into()));
        }
        Ok(NetworkInfo {
            current_chain_score: self.chain_score,
        })
    }

    async fn query_utxos(&self, address: &str) -> Result<Vec<UnspentOutput>, SourceError> {
        if self.offline {
            return Err(SourceError::Unavailable("indexer offline".into()));
        }
        Ok(self.utxos.lock().iter().filter(|u| u.address == address).cloned().collect())
    }
}

/// Signing key at `path` of the seed inside `envelope`.
fn key_at(envelope: &SeedEnvelope, path: &str) -> Result<KeyPair, SecretError> {
    derive_private_key(envelope, PASSWORD.as_bytes(), Curve::Secp256k1, path, |secret| {
        KeyPair::from_secret_bytes(secret).map_err(|e| SecretError::KeyDerivation(e.to_string()))
    })
}

/// Hardware device holding the seed of an envelope.
///
/// Counts digest requests and can be switched into a disconnected state.
pub struct SimulatedHardware {
    envelope: SeedEnvelope,
    pub disconnected: Mutex<bool>,
    pub digests_signed: Mutex<usize>,
    /// Highest account index the device exposes.
    pub max_index: u32,
}

impl SimulatedHardware {
    pub fn new(entropy: &[u8], max_index: u32) -> Self {
        Self {
            envelope: envelope(entropy),
            disconnected: Mutex::new(false),
            digests_signed: Mutex::new(0),
            max_index,
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        if *self.disconnected.lock() {
            return Err(TransportError("usb transfer failed".into()));
        }
        Ok(())
    }

    fn key(&self, path: &str) -> Result<KeyPair, TransportError> {
        key_at(&self.envelope, path).map_err(|e| TransportError(e.to_string()))
    }
}

#[async_trait]
impl HardwareTransport for SimulatedHardware {
    async fn public_key(&self, path: &str) -> Result<Option<Vec<u8>>, TransportError> {
        self.check()?;
        let exposed = (0..=self.max_index).any(|i| account_path(i) == path);
        if !exposed {
            return Ok(None);
        }
        let keys = derive_addresses(&self.envelope, PASSWORD.as_bytes(), Curve::Secp256k1, path, &[String::new()])
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(keys.into_iter().next().map(|k| k.public_key))
    }

    async fn sign_digest(&self, path: &str, digest: &[u8; 32]) -> Result<[u8; 64], TransportError> {
        self.check()?;
        *self.digests_signed.lock() += 1;
        Ok(self.key(path)?.sign(digest))
    }

    async fn sign_message(&self, path: &str, message: &[u8]) -> Result<[u8; 64], TransportError> {
        self.check()?;
        Ok(sign_message(&self.key(path)?, message))
    }
}

/// How a simulated air-gapped device answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceBehavior {
    Honest,
    /// Valid signatures under a fresh request id.
    ForeignRequestId,
    /// Garbage instead of a signature UR.
    Malformed,
    /// One flipped bit in the first signature.
    Tampered,
    /// Drops the last signature of a batch.
    ShortBatch,
    /// Never answers.
    Hang,
}

/// Offline device reached through QR codes.
///
/// Decodes the request it is shown, signs with the seed it holds and
/// answers according to its [`DeviceBehavior`].
pub struct AirGapDevice {
    envelope: SeedEnvelope,
    pub behavior: Mutex<DeviceBehavior>,
    pub requests: Mutex<Vec<SignRequest>>,
}

impl AirGapDevice {
    pub fn new(entropy: &[u8], behavior: DeviceBehavior) -> Self {
        Self {
            envelope: envelope(entropy),
            behavior: Mutex::new(behavior),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Account export as the device would show it.
    pub fn export_accounts(&self, indexes: &[u32]) -> Vec<AirGapAccount> {
        let xfp = root_fingerprint(&self.envelope, PASSWORD.as_bytes(), Curve::Secp256k1).unwrap();
        let rel: Vec<String> = indexes.iter().map(|i| format!("0/{i}")).collect();
        derive_addresses(&self.envelope, PASSWORD.as_bytes(), Curve::Secp256k1, "m/44'/111111'/0'", &rel)
            .unwrap()
            .into_iter()
            .zip(indexes)
            .map(|(key, &index)| AirGapAccount {
                index,
                path: key.path,
                public_key: Some(key.public_key),
                xfp: Some(xfp.clone()),
            })
            .collect()
    }

    fn answer(&self, request: &SignRequest) -> Result<Vec<u8>, WalletError> {
        let key = key_at(&self.envelope, &request.path)?;
        Ok(match request.data_type {
            SignDataType::Transaction => request.digests()?.iter().flat_map(|d| key.sign(d)).collect(),
            SignDataType::Message => sign_message(&key, &request.sign_data).to_vec(),
        })
    }
}

#[async_trait]
impl QrScanner for AirGapDevice {
    async fn scan(&self, request_ur: &str) -> Result<String, WalletError> {
        let request = SignRequest::from_ur(request_ur)?;
        self.requests.lock().push(request.clone());
        let behavior = *self.behavior.lock();

        let mut signature = self.answer(&request)?;
        let mut request_id = request.request_id;
        match behavior {
            DeviceBehavior::Honest => {}
            DeviceBehavior::ForeignRequestId => {
                let mut bytes = *request_id.as_bytes();
                bytes[0] ^= 0xff;
                request_id = Uuid::from_bytes(bytes);
            }
            DeviceBehavior::Malformed => return Ok("ur:keyward-signature/not-hex".into()),
            DeviceBehavior::Tampered => signature[10] ^= 0x01,
            DeviceBehavior::ShortBatch => signature.truncate(signature.len() - 64),
            DeviceBehavior::Hang => return std::future::pending().await,
        }
        SignatureResponse {
            request_id,
            signature,
        }
        .to_ur()
    }
}

/// QR keyring talking to `device` with accounts `indexes` imported.
pub fn qr_keyring(device: Arc<AirGapDevice>, indexes: &[u32]) -> (QrKeyring, Arc<AccountStore>) {
    let accounts = Arc::new(AccountStore::new());
    let records = device.export_accounts(indexes);
    let keyring = QrKeyring::new("qr-wallet", records, device, Arc::clone(&accounts), Network::Testnet);
    (keyring, accounts)
}
