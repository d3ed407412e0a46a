//! Hash, HMAC, password KDF and AES-256-GCM primitives.
//!
//! Every hash and HMAC rejects zero-length keys and data: an empty buffer is
//! far more likely to be an uninitialized secret than a real input. Each has
//! an async twin that returns the same bytes and moves large inputs onto the
//! blocking pool.
//!
//! # Password-sealed wire format
//! ```text
//! m_cost (4 LE) || t_cost (4 LE) || p_cost (4 LE) || salt (32) || iv (12) || ciphertext + tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::SecretError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Inputs at or above this size are hashed on the blocking pool.
pub const ASYNC_OFFLOAD_THRESHOLD: usize = 64 * 1024;

/// Salt length for password-sealed blobs.
pub const SALT_LEN: usize = 32;

/// Minimum salt accepted by [`derive_key`].
pub const MIN_SALT_LEN: usize = 8;

/// AES-GCM nonce length.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

const PARAMS_LEN: usize = 12;

const MIN_SEALED_LEN: usize = PARAMS_LEN + SALT_LEN + IV_LEN + TAG_LEN;

/// 256-bit symmetric key.
pub type SymmetricKey = Zeroizing<[u8; 32]>;

fn require_data(data: &[u8]) -> Result<(), SecretError> {
    if data.is_empty() {
        return Err(SecretError::InvalidInput("zero-length data is not supported".into()));
    }
    Ok(())
}

fn require_key(key: &[u8]) -> Result<(), SecretError> {
    if key.is_empty() {
        return Err(SecretError::InvalidInput("zero-length key is not supported".into()));
    }
    Ok(())
}

pub fn sha256(data: &[u8]) -> Result<[u8; 32], SecretError> {
    require_data(data)?;
    Ok(Sha256::digest(data).into())
}

pub fn sha512(data: &[u8]) -> Result<[u8; 64], SecretError> {
    require_data(data)?;
    Ok(Sha512::digest(data).into())
}

/// RIPEMD-160 of SHA-256, as used for key fingerprints.
pub fn hash160(data: &[u8]) -> Result<[u8; 20], SecretError> {
    let inner = sha256(data)?;
    Ok(Ripemd160::digest(inner).into())
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], SecretError> {
    require_key(key)?;
    require_data(data)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SecretError::InvalidInput(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64], SecretError> {
    require_key(key)?;
    require_data(data)?;
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .map_err(|e| SecretError::InvalidInput(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Run a CPU-heavy closure on the blocking pool.
pub(crate) async fn offload<T, F>(f: F) -> Result<T, SecretError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SecretError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SecretError::Task(e.to_string()))?
}

pub async fn sha256_async(data: &[u8]) -> Result<[u8; 32], SecretError> {
    if data.len() < ASYNC_OFFLOAD_THRESHOLD {
        return sha256(data);
    }
    let owned = Zeroizing::new(data.to_vec());
    offload(move || sha256(&owned)).await
}

pub async fn sha512_async(data: &[u8]) -> Result<[u8; 64], SecretError> {
    if data.len() < ASYNC_OFFLOAD_THRESHOLD {
        return sha512(data);
    }
    let owned = Zeroizing::new(data.to_vec());
    offload(move || sha512(&owned)).await
}

pub async fn hmac_sha256_async(key: &[u8], data: &[u8]) -> Result<[u8; 32], SecretError> {
    if data.len() < ASYNC_OFFLOAD_THRESHOLD {
        return hmac_sha256(key, data);
    }
    let key = Zeroizing::new(key.to_vec());
    let data = Zeroizing::new(data.to_vec());
    offload(move || hmac_sha256(&key, &data)).await
}

pub async fn hmac_sha512_async(key: &[u8], data: &[u8]) -> Result<[u8; 64], SecretError> {
    if data.len() < ASYNC_OFFLOAD_THRESHOLD {
        return hmac_sha512(key, data);
    }
    let key = Zeroizing::new(key.to_vec());
    let data = Zeroizing::new(data.to_vec());
    offload(move || hmac_sha512(&key, &data)).await
}

/// Argon2id cost parameters. Stored alongside every sealed blob so a blob
/// stays decodable after the defaults change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB.
    pub m_cost: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Lanes.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Largest accepted memory cost: 1 GiB.
    pub const MAX_M_COST: u32 = 1024 * 1024;
    pub const MAX_T_COST: u32 = 16;
    pub const MAX_P_COST: u32 = 16;

    pub const fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self { m_cost, t_cost, p_cost }
    }

    /// Reject costs outside the bounds this store will ever run.
    pub fn validate(&self) -> Result<(), SecretError> {
        if self.m_cost > Self::MAX_M_COST || self.t_cost > Self::MAX_T_COST || self.p_cost > Self::MAX_P_COST {
            return Err(SecretError::InvalidInput(format!(
                "kdf params out of range: m_cost={} (max {}), t_cost={} (max {}), p_cost={} (max {})",
                self.m_cost,
                Self::MAX_M_COST,
                self.t_cost,
                Self::MAX_T_COST,
                self.p_cost,
                Self::MAX_P_COST
            )));
        }
        Ok(())
    }

    fn to_bytes(self) -> [u8; PARAMS_LEN] {
        let mut out = [0u8; PARAMS_LEN];
        out[..4].copy_from_slice(&self.m_cost.to_le_bytes());
        out[4..8].copy_from_slice(&self.t_cost.to_le_bytes());
        out[8..].copy_from_slice(&self.p_cost.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8; PARAMS_LEN]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            m_cost: word(0),
            t_cost: word(4),
            p_cost: word(8),
        }
    }
}

/// Derive a 256-bit key from a password and salt.
///
/// The password is pre-hashed with SHA-256 and then stretched with
/// Argon2id. Identical `(password, salt, params)` always give the same key.
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<SymmetricKey, SecretError> {
    if password.is_empty() {
        return Err(SecretError::InvalidInput("zero-length password is not supported".into()));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(SecretError::InvalidInput(format!(
            "salt must be at least {MIN_SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    params.validate()?;
    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| SecretError::InvalidInput(format!("kdf params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let prehash = Zeroizing::new(sha256(password)?);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(prehash.as_slice(), salt, &mut key[..])
        .map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt with AES-256-GCM under an explicit key and IV.
///
/// Never reuse an IV with the same key.
pub fn encrypt(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>, SecretError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| SecretError::Encryption(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| SecretError::Encryption(e.to_string()))
}

/// Decrypt data produced by [`encrypt`].
///
/// A wrong key or any tampering fails the authentication tag and returns
/// [`SecretError::WrongPassword`].
pub fn decrypt(key: &[u8; 32], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
    if ciphertext.len() < TAG_LEN {
        return Err(SecretError::Corrupted(format!(
            "ciphertext too short: {} < {TAG_LEN}",
            ciphertext.len()
        )));
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| SecretError::Encryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SecretError::WrongPassword)
}

/// Fresh random IV.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Parsed view of a password-sealed blob.
#[derive(Debug)]
pub struct SealedBlob<'a> {
    pub params: KdfParams,
    pub salt: &'a [u8],
    pub iv: [u8; IV_LEN],
    pub ciphertext: &'a [u8],
}

impl<'a> SealedBlob<'a> {
    pub fn parse(blob: &'a [u8]) -> Result<Self, SecretError> {
        if blob.len() < MIN_SEALED_LEN {
            return Err(SecretError::Corrupted(format!(
                "sealed data too short: {} < {MIN_SEALED_LEN}",
                blob.len()
            )));
        }
        let (params, rest) = blob.split_at(PARAMS_LEN);
        let (salt, rest) = rest.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);

        let mut params_bytes = [0u8; PARAMS_LEN];
        params_bytes.copy_from_slice(params);
        let params = KdfParams::from_bytes(&params_bytes);
        params.validate().map_err(|e| SecretError::Corrupted(e.to_string()))?;
        let mut iv_bytes = [0u8; IV_LEN];
        iv_bytes.copy_from_slice(iv);

        Ok(Self {
            params,
            salt,
            iv: iv_bytes,
            ciphertext,
        })
    }

    /// Decrypt with an already-derived key.
    pub fn open(&self, key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
        decrypt(key, &self.iv, self.ciphertext)
    }
}

/// Seal plaintext under a password with a fresh salt and IV.
pub fn encrypt_with_password(
    password: &[u8],
    plaintext: &[u8],
    params: KdfParams,
) -> Result<Vec<u8>, SecretError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let iv = random_iv();

    let key = derive_key(password, &salt, params)?;
    let ciphertext = encrypt(&key, &iv, plaintext)?;

    let mut out = Vec::with_capacity(PARAMS_LEN + SALT_LEN + IV_LEN + ciphertext.len());
    out.extend_from_slice(&params.to_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a blob produced by [`encrypt_with_password`].
pub fn decrypt_with_password(password: &[u8], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
    let sealed = SealedBlob::parse(blob)?;
    let key = derive_key(password, sealed.salt, sealed.params)?;
    sealed.open(&key)
}

pub async fn encrypt_with_password_async(
    password: &[u8],
    plaintext: &[u8],
    params: KdfParams,
) -> Result<Vec<u8>, SecretError> {
    let password = Zeroizing::new(password.to_vec());
    let plaintext = Zeroizing::new(plaintext.to_vec());
    offload(move || encrypt_with_password(&password, &plaintext, params)).await
}

pub async fn decrypt_with_password_async(
    password: &[u8],
    blob: &[u8],
) -> Result<Zeroizing<Vec<u8>>, SecretError> {
    let password = Zeroizing::new(password.to_vec());
    let blob = blob.to_vec();
    offload(move || decrypt_with_password(&password, &blob)).await
}

// --- Password verification string ---

/// Tag prefixed to a password verification token.
pub const VERIFY_STRING_TAG: &str = "|VS|";

const VERIFY_STRING: &[u8] = b"keyward-verify-string-v1";

/// Seal a known constant under `password` so the password can later be
/// checked without touching any credential.
pub fn encrypt_verify_string(password: &[u8], params: KdfParams) -> Result<String, SecretError> {
    let sealed = encrypt_with_password(password, VERIFY_STRING, params)?;
    Ok(format!("{VERIFY_STRING_TAG}{}", hex::encode(sealed)))
}

/// Check `password` against a token from [`encrypt_verify_string`].
pub fn verify_password(token: &str, password: &[u8]) -> Result<(), SecretError> {
    let body = token
        .strip_prefix(VERIFY_STRING_TAG)
        .ok_or_else(|| SecretError::UnknownEnvelopeTag(token.chars().take(4).collect()))?;
    let blob = hex::decode(body).map_err(|e| SecretError::Corrupted(e.to_string()))?;
    let plain = decrypt_with_password(password, &blob)?;
    if plain.as_slice() != VERIFY_STRING {
        return Err(SecretError::WrongPassword);
    }
    Ok(())
}
