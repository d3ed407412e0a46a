//! Process-local secret session.
//!
//! A [`SecretSession`] owns the ephemeral key used to hold passwords as
//! sensitive-text tokens in memory, plus a cache of password-derived keys.
//! It is created explicitly and dropped or locked explicitly; nothing here is
//! global state.

use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::SecretError;
use crate::store::{self, IV_LEN, KdfParams, SymmetricKey};

/// Prefix of an encoded sensitive-text token.
pub const SENSITIVE_PREFIX: &str = "SENSITIVE_ENCODE::AES::";

/// Random 256-bit key for sensitive-text tokens.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveTextKey([u8; 32]);

impl SensitiveTextKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SensitiveTextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SensitiveTextKey([REDACTED])")
    }
}

/// Whether `text` is an encoded sensitive-text token.
pub fn is_sensitive_text(text: &str) -> bool {
    text.starts_with(SENSITIVE_PREFIX)
}

/// Encrypt `text` into a token. Already-encoded input is returned unchanged.
pub fn encode_sensitive_text(text: &str, key: &SensitiveTextKey) -> Result<String, SecretError> {
    if is_sensitive_text(text) {
        return Ok(text.to_string());
    }
    let iv = store::random_iv();
    let ciphertext = store::encrypt(key.as_bytes(), &iv, text.as_bytes())?;
    let mut body = Vec::with_capacity(IV_LEN + ciphertext.len());
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);
    Ok(format!("{SENSITIVE_PREFIX}{}", hex::encode(body)))
}

/// Decrypt a token produced by [`encode_sensitive_text`].
pub fn decode_sensitive_text(token: &str, key: &SensitiveTextKey) -> Result<Zeroizing<String>, SecretError> {
    let body = token
        .strip_prefix(SENSITIVE_PREFIX)
        .ok_or(SecretError::NotSensitiveText)?;
    let bytes = hex::decode(body).map_err(|_| SecretError::SensitiveTextDecode)?;
    if bytes.len() < IV_LEN {
        return Err(SecretError::SensitiveTextDecode);
    }
    let (iv, ciphertext) = bytes.split_at(IV_LEN);
    let mut iv_bytes = [0u8; IV_LEN];
    iv_bytes.copy_from_slice(iv);
    let plain = store::decrypt(key.as_bytes(), &iv_bytes, ciphertext)
        .map_err(|_| SecretError::SensitiveTextDecode)?;
    let text = String::from_utf8(plain.to_vec()).map_err(|_| SecretError::SensitiveTextDecode)?;
    Ok(Zeroizing::new(text))
}

struct CachedKey {
    password_tag: [u8; 32],
    params: KdfParams,
    key: SymmetricKey,
}

struct SessionState {
    text_key: SensitiveTextKey,
    /// Derived keys by salt.
    derived: HashMap<Vec<u8>, CachedKey>,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        for cached in self.derived.values_mut() {
            cached.password_tag.zeroize();
        }
    }
}

/// Explicit holder of session-scoped secrets.
///
/// Shareable across tasks behind an `Arc`. Every secret-bearing call fails
/// with [`SecretError::SessionLocked`] until [`unlock`](Self::unlock).
pub struct SecretSession {
    inner: RwLock<Option<SessionState>>,
}

impl Default for SecretSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretSession {
    /// A locked session.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// A session that is already unlocked with a fresh key.
    pub fn unlocked() -> Self {
        let session = Self::new();
        session.unlock();
        session
    }

    /// Unlock with a fresh sensitive-text key. Unlocking an open session
    /// keeps its key so existing tokens stay decodable.
    pub fn unlock(&self) {
        let mut guard = self.inner.write();
        if guard.is_none() {
            *guard = Some(SessionState {
                text_key: SensitiveTextKey::generate(),
                derived: HashMap::new(),
            });
            tracing::debug!("secret session unlocked");
        }
    }

    /// Drop the session key and every cached derived key.
    pub fn lock(&self) {
        if self.inner.write().take().is_some() {
            tracing::debug!("secret session locked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn encode(&self, text: &str) -> Result<String, SecretError> {
        let guard = self.inner.read();
        let state = guard.as_ref().ok_or(SecretError::SessionLocked)?;
        encode_sensitive_text(text, &state.text_key)
    }

    pub fn decode(&self, token: &str) -> Result<Zeroizing<String>, SecretError> {
        let guard = self.inner.read();
        let state = guard.as_ref().ok_or(SecretError::SessionLocked)?;
        decode_sensitive_text(token, &state.text_key)
    }

    /// [`store::derive_key`] with a per-salt cache.
    ///
    /// A cached key is returned only when both the password tag and the KDF
    /// parameters match. The KDF runs without holding the session lock.
    pub fn derive_key_cached(
        &self,
        password: &[u8],
        salt: &[u8],
        params: KdfParams,
    ) -> Result<SymmetricKey, SecretError> {
        let tag = {
            let guard = self.inner.read();
            let state = guard.as_ref().ok_or(SecretError::SessionLocked)?;
            let tag = store::hmac_sha256(state.text_key.as_bytes(), password)?;
            let hit = state
                .derived
                .get(salt)
                .filter(|cached| cached.password_tag == tag && cached.params == params);
            if let Some(cached) = hit {
                return Ok(cached.key.clone());
            }
            tag
        };

        let key = store::derive_key(password, salt, params)?;

        let mut guard = self.inner.write();
        // Locked while deriving: hand the key back but do not cache it.
        if let Some(state) = guard.as_mut() {
            state.derived.insert(
                salt.to_vec(),
                CachedKey {
                    password_tag: tag,
                    params,
                    key: key.clone(),
                },
            );
        }
        Ok(key)
    }

    /// Number of derived keys currently cached.
    pub fn cached_key_count(&self) -> usize {
        self.inner.read().as_ref().map_or(0, |s| s.derived.len())
    }
}

impl fmt::Debug for SecretSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSession")
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}
