//! Secret store error types.

use thiserror::Error;

/// Errors raised by the secret store, envelopes and HD derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// Zero-length key or data, or an otherwise unusable primitive input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The password did not authenticate the ciphertext.
    #[error("incorrect password")]
    WrongPassword,

    /// Ciphertext or envelope bytes are truncated or malformed.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Envelope string does not start with a known tag.
    #[error("unknown envelope tag: {0}")]
    UnknownEnvelopeTag(String),

    /// Envelope was written by a newer format version.
    #[error("unsupported envelope version: {0}")]
    UnsupportedEnvelopeVersion(u32),

    /// Sensitive text did not decrypt under the current session key.
    #[error("sensitive text cannot be decoded with this session key")]
    SensitiveTextDecode,

    /// Input is not an encoded sensitive text token.
    #[error("not an encoded sensitive text")]
    NotSensitiveText,

    /// Session was locked; unlock before using session-bound secrets.
    #[error("secret session is locked")]
    SessionLocked,

    /// Malformed derivation path or a step the curve cannot take.
    #[error("invalid derivation path: {0}")]
    InvalidPath(String),

    /// Curve is recognized but not supported for derivation.
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Child key derivation failed.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Invalid BIP-39 mnemonic phrase or entropy.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Cipher setup or encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// I/O error while persisting an envelope.
    #[error("I/O error: {0}")]
    Io(String),

    /// A blocking worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for SecretError {
    fn from(e: std::io::Error) -> Self {
        SecretError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wrong_password() {
        assert_eq!(SecretError::WrongPassword.to_string(), "incorrect password");
    }

    #[test]
    fn display_invalid_input() {
        let e = SecretError::InvalidInput("zero-length data is not supported".into());
        assert_eq!(e.to_string(), "invalid input: zero-length data is not supported");
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(SecretError::from(io), SecretError::Io("gone".into()));
    }
}
