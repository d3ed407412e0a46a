//! Wallet error types.

use keyward_core::error::{AddressError, CryptoError, SourceError, TransactionError};
use keyward_secret::SecretError;
use thiserror::Error;

/// Errors raised by coin selection, keyrings and air-gapped signing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Confirmed outputs do not cover the target.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Confirmed value available in sompi.
        have: u64,
        /// Required amount in sompi.
        need: u64,
    },

    /// A running total exceeded the maximum representable amount.
    #[error("amount overflow: total exceeds maximum supply")]
    AmountOverflow,

    /// Zero, dust or otherwise unusable amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The transfer needs more inputs than one transaction can carry.
    #[error("too many inputs required; at most {max_sendable} sompi can be sent in one transaction")]
    UtxoLimitExceeded {
        /// Sum of the largest spendable outputs that fit in one transaction.
        max_sendable: u64,
    },

    /// No account exists at this index.
    #[error("account not found at index {0}")]
    AccountNotFound(u32),

    /// Cached account record carries no public key.
    #[error("account has no public key")]
    MissingPublicKey,

    /// Air-gap request cannot be built without the master fingerprint.
    #[error("missing master key fingerprint")]
    MissingFingerprint,

    /// A scanned QR payload is malformed or answers another request.
    #[error("invalid QR code: {0}")]
    InvalidQrCode(String),

    /// Hardware device transport failed.
    #[error("device communication failed: {0}")]
    DeviceCommunication(String),

    /// The keyring cannot produce this kind of signature.
    #[error("unsupported sign scheme: {0}")]
    UnsupportedSignScheme(String),

    /// The user cancelled signing.
    #[error("signing cancelled")]
    SigningCancelled,

    /// The air-gap session already reached a terminal state.
    #[error("signing session is closed")]
    SessionClosed,

    /// Transaction build error.
    #[error("build error: {0}")]
    BuildError(String),

    /// Secret store or envelope failure.
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// Signature or key failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Transaction validation failure.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Address encoding failure.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// UTXO source failure.
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl WalletError {
    /// Whether the user should be prompted for their password again.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, WalletError::Secret(SecretError::WrongPassword))
    }

    /// Whether the user should be asked to scan again.
    pub fn is_invalid_qr_code(&self) -> bool {
        matches!(self, WalletError::InvalidQrCode(_))
    }
}
