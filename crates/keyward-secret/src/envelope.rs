//! Password-encrypted seed envelopes.
//!
//! An envelope is the only persisted form of a mnemonic-derived seed. The
//! plaintext [`RevealableSeed`] exists only inside a scope that asked for it
//! and is zeroized when that scope ends.
//!
//! # Text form
//! ```text
//! |RP|::v1::<uuid>::<hex(sealed blob)>
//! ```
//! The sealed blob is the self-describing format of
//! [`encrypt_with_password`](crate::store::encrypt_with_password).

use bip39::{Language, Mnemonic};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::SecretError;
use crate::session::SecretSession;
use crate::store::{self, KdfParams};

/// Tag that starts every seed envelope.
pub const SEED_TAG: &str = "|RP|";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Language tag for English word lists.
pub const LANG_ENGLISH: u8 = 0;

/// Decrypted seed material.
///
/// `entropy_with_lang_prefixed` is the BIP-39 entropy preceded by a single
/// language tag byte. `seed` is the 64-byte BIP-39 seed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RevealableSeed {
    entropy_with_lang_prefixed: Vec<u8>,
    seed: Vec<u8>,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct SeedJson {
    entropy_with_lang_prefixed: String,
    seed: String,
}

impl RevealableSeed {
    pub fn new(entropy_with_lang_prefixed: Vec<u8>, seed: Vec<u8>) -> Self {
        Self {
            entropy_with_lang_prefixed,
            seed,
        }
    }

    /// Build from raw BIP-39 entropy, computing the seed with `passphrase`.
    pub fn from_entropy(entropy: &[u8], passphrase: &str) -> Result<Self, SecretError> {
        let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
            .map_err(|e| SecretError::InvalidMnemonic(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));

        let mut prefixed = Vec::with_capacity(entropy.len() + 1);
        prefixed.push(LANG_ENGLISH);
        prefixed.extend_from_slice(entropy);
        Ok(Self::new(prefixed, seed.to_vec()))
    }

    /// Entropy without the language tag.
    pub fn entropy(&self) -> &[u8] {
        self.entropy_with_lang_prefixed.get(1..).unwrap_or_default()
    }

    pub fn language_tag(&self) -> Option<u8> {
        self.entropy_with_lang_prefixed.first().copied()
    }

    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    /// The mnemonic phrase for this entropy.
    pub fn mnemonic(&self) -> Result<Zeroizing<String>, SecretError> {
        if self.language_tag() != Some(LANG_ENGLISH) {
            return Err(SecretError::InvalidMnemonic("unknown language tag".into()));
        }
        let mnemonic = Mnemonic::from_entropy_in(Language::English, self.entropy())
            .map_err(|e| SecretError::InvalidMnemonic(e.to_string()))?;
        Ok(Zeroizing::new(mnemonic.to_string()))
    }

    fn to_json(&self) -> Result<Zeroizing<Vec<u8>>, SecretError> {
        let json = SeedJson {
            entropy_with_lang_prefixed: hex::encode(&self.entropy_with_lang_prefixed),
            seed: hex::encode(&self.seed),
        };
        serde_json::to_vec(&json)
            .map(Zeroizing::new)
            .map_err(|e| SecretError::Corrupted(e.to_string()))
    }

    fn from_json(bytes: &[u8]) -> Result<Self, SecretError> {
        let json: SeedJson =
            serde_json::from_slice(bytes).map_err(|e| SecretError::Corrupted(e.to_string()))?;
        let entropy = hex::decode(&json.entropy_with_lang_prefixed)
            .map_err(|e| SecretError::Corrupted(e.to_string()))?;
        let seed = hex::decode(&json.seed).map_err(|e| SecretError::Corrupted(e.to_string()))?;
        Ok(Self::new(entropy, seed))
    }
}

impl fmt::Debug for RevealableSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealableSeed")
            .field("entropy_with_lang_prefixed", &"[REDACTED]")
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

/// Encrypted seed with its identity and format version.
///
/// Immutable once created; a password change produces a new envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedEnvelope {
    version: u32,
    id: Uuid,
    payload: Vec<u8>,
}

impl SeedEnvelope {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The sealed blob.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Display for SeedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SEED_TAG}::v{}::{}::{}",
            self.version,
            self.id,
            hex::encode(&self.payload)
        )
    }
}

impl FromStr for SeedEnvelope {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SEED_TAG)
            .ok_or_else(|| SecretError::UnknownEnvelopeTag(s.chars().take(4).collect()))?;
        let rest = rest
            .strip_prefix("::v")
            .ok_or_else(|| SecretError::Corrupted("missing envelope version".into()))?;
        let (version, rest) = rest
            .split_once("::")
            .ok_or_else(|| SecretError::Corrupted("truncated envelope".into()))?;
        let version: u32 = version
            .parse()
            .map_err(|_| SecretError::Corrupted(format!("bad envelope version: {version}")))?;
        if version != ENVELOPE_VERSION {
            return Err(SecretError::UnsupportedEnvelopeVersion(version));
        }

        let (id, payload) = rest
            .split_once("::")
            .ok_or_else(|| SecretError::Corrupted("truncated envelope".into()))?;
        let id = Uuid::parse_str(id).map_err(|e| SecretError::Corrupted(e.to_string()))?;
        let payload = hex::decode(payload.trim()).map_err(|e| SecretError::Corrupted(e.to_string()))?;
        store::SealedBlob::parse(&payload)?;

        Ok(Self {
            version,
            id,
            payload,
        })
    }
}

/// Encrypt a seed under `password` into a new envelope.
pub fn encrypt_seed(
    seed: &RevealableSeed,
    password: &[u8],
    params: KdfParams,
) -> Result<SeedEnvelope, SecretError> {
    seal(Uuid::new_v4(), seed, password, params)
}

fn seal(
    id: Uuid,
    seed: &RevealableSeed,
    password: &[u8],
    params: KdfParams,
) -> Result<SeedEnvelope, SecretError> {
    let json = seed.to_json()?;
    let payload = store::encrypt_with_password(password, &json, params)?;
    Ok(SeedEnvelope {
        version: ENVELOPE_VERSION,
        id,
        payload,
    })
}

/// Decrypt an envelope.
///
/// Fails with [`SecretError::WrongPassword`] on a wrong password.
pub fn reveal_seed(envelope: &SeedEnvelope, password: &[u8]) -> Result<Zeroizing<RevealableSeed>, SecretError> {
    let json = store::decrypt_with_password(password, &envelope.payload)?;
    RevealableSeed::from_json(&json).map(Zeroizing::new)
}

/// Run `f` with the revealed seed. The seed is zeroized before this returns,
/// whether `f` succeeds or not.
pub fn with_revealed_seed<T, F>(envelope: &SeedEnvelope, password: &[u8], f: F) -> Result<T, SecretError>
where
    F: FnOnce(&RevealableSeed) -> Result<T, SecretError>,
{
    let seed = reveal_seed(envelope, password)?;
    let result = f(&seed);
    drop(seed);
    result
}

/// [`reveal_seed`] with the password-derived key taken from, or stored
/// into, the session's cache. Fails with [`SecretError::SessionLocked`]
/// on a locked session.
pub fn reveal_seed_in(
    session: &SecretSession,
    envelope: &SeedEnvelope,
    password: &[u8],
) -> Result<Zeroizing<RevealableSeed>, SecretError> {
    let sealed = store::SealedBlob::parse(&envelope.payload)?;
    let key = session.derive_key_cached(password, sealed.salt, sealed.params)?;
    let json = sealed.open(&key)?;
    RevealableSeed::from_json(&json).map(Zeroizing::new)
}

/// [`with_revealed_seed`] through the session's derived-key cache.
pub fn with_revealed_seed_in<T, F>(
    session: &SecretSession,
    envelope: &SeedEnvelope,
    password: &[u8],
    f: F,
) -> Result<T, SecretError>
where
    F: FnOnce(&RevealableSeed) -> Result<T, SecretError>,
{
    let seed = reveal_seed_in(session, envelope, password)?;
    let result = f(&seed);
    drop(seed);
    result
}

/// Re-encrypt under a new password. The envelope keeps its id but gets a
/// fresh salt and IV. On failure the input envelope is still valid.
pub fn reencrypt(
    envelope: &SeedEnvelope,
    old_password: &[u8],
    new_password: &[u8],
    params: KdfParams,
) -> Result<SeedEnvelope, SecretError> {
    with_revealed_seed(envelope, old_password, |seed| {
        seal(envelope.id, seed, new_password, params)
    })
}

pub async fn encrypt_seed_async(
    seed: RevealableSeed,
    password: &[u8],
    params: KdfParams,
) -> Result<SeedEnvelope, SecretError> {
    let password = Zeroizing::new(password.to_vec());
    store::offload(move || encrypt_seed(&seed, &password, params)).await
}

pub async fn reveal_seed_async(
    envelope: &SeedEnvelope,
    password: &[u8],
) -> Result<Zeroizing<RevealableSeed>, SecretError> {
    let envelope = envelope.clone();
    let password = Zeroizing::new(password.to_vec());
    store::offload(move || reveal_seed(&envelope, &password)).await
}

/// An envelope persisted as a single text file.
#[derive(Clone, Debug)]
pub struct EnvelopeFile {
    path: PathBuf,
}

impl EnvelopeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<SeedEnvelope, SecretError> {
        let text = fs::read_to_string(&self.path)?;
        text.trim().parse()
    }

    /// Write the envelope through a synced temporary sibling and rename it
    /// into place. The previous file stays intact until the rename.
    pub fn save(&self, envelope: &SeedEnvelope) -> Result<(), SecretError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        let written = (|| -> Result<(), SecretError> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(envelope.to_string().as_bytes())?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &self.path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })?;
        tracing::debug!(path = %self.path.display(), "envelope saved");
        Ok(())
    }

    /// Re-encrypt the stored envelope under a new password.
    pub fn change_password(
        &self,
        old_password: &[u8],
        new_password: &[u8],
        params: KdfParams,
    ) -> Result<SeedEnvelope, SecretError> {
        let current = self.load()?;
        let next = reencrypt(&current, old_password, new_password, params)?;
        self.save(&next)?;
        tracing::info!(id = %next.id(), "envelope password changed");
        Ok(next)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
