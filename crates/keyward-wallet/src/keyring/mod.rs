//! Keyrings: account preparation and signing behind one async interface.
//!
//! Three backends share the [`Keyring`] trait and are dispatched through
//! the closed [`AnyKeyring`] set:
//!
//! - [`SoftwareKeyring`]: keys derived from an encrypted seed envelope
//! - [`HardwareKeyring`]: keys held by a device behind [`HardwareTransport`]
//! - [`QrKeyring`]: keys held by an offline device reached over QR codes
//!
//! Every backend re-verifies the signed transaction against the signer's
//! address before returning it.

pub mod hardware;
pub mod qr;
pub mod software;

pub use hardware::{HardwareKeyring, HardwareTransport, TransportError};
pub use qr::{AirGapAccount, QrKeyring};
pub use software::SoftwareKeyring;

use async_trait::async_trait;
use std::fmt;

use keyward_core::address::Address;
use keyward_core::crypto::{signature_script, verify_transaction};
use keyward_core::error::CryptoError;
use keyward_core::types::Transaction;

use crate::account::{Account, KeyringKind};
use crate::builder::UnsignedTransaction;
use crate::error::WalletError;

/// Account derivation prefix; accounts live at `<prefix>/0/<index>`.
pub const DEFAULT_PATH_PREFIX: &str = "m/44'/111111'/0'";

/// Full path of the receive key at `index`.
pub fn account_path(index: u32) -> String {
    format!("{DEFAULT_PATH_PREFIX}/0/{index}")
}

/// Which accounts to prepare.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrepareAccountsParams {
    pub indexes: Vec<u32>,
    /// Ask the device to prove it owns each address (QR only).
    pub verify_address: bool,
}

impl PrepareAccountsParams {
    pub fn indexes(indexes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            indexes: indexes.into_iter().collect(),
            verify_address: false,
        }
    }
}

/// Signature algorithm requested for a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignScheme {
    /// BIP-340 Schnorr.
    #[default]
    Schnorr,
    Ecdsa,
}

impl fmt::Display for SignScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignScheme::Schnorr => "schnorr",
            SignScheme::Ecdsa => "ecdsa",
        })
    }
}

/// A message to sign with the account at `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageToSign {
    pub index: u32,
    pub message: Vec<u8>,
    pub scheme: SignScheme,
}

/// A signed personal message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedMessage {
    pub address: Address,
    pub message: Vec<u8>,
    pub signature: [u8; 64],
}

/// A fully signed and verified transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    /// Hex transaction id.
    pub txid: String,
    /// Relay JSON.
    pub raw_tx: String,
    pub encoded_tx: Transaction,
}

/// Operations every keyring backend provides.
#[async_trait]
pub trait Keyring: Send + Sync {
    fn kind(&self) -> KeyringKind;

    /// Resolve and cache the accounts at the requested indexes, in order.
    async fn prepare_accounts(&self, params: &PrepareAccountsParams) -> Result<Vec<Account>, WalletError>;

    /// Sign every input of `unsigned` with the account at `index`.
    async fn sign_transaction(&self, index: u32, unsigned: &UnsignedTransaction) -> Result<SignedTx, WalletError>;

    /// Sign messages, returning results in input order.
    async fn sign_message(&self, messages: &[MessageToSign]) -> Result<Vec<SignedMessage>, WalletError>;
}

/// The closed set of keyring backends.
pub enum AnyKeyring {
    Software(SoftwareKeyring),
    Hardware(HardwareKeyring),
    Qr(QrKeyring),
}

#[async_trait]
impl Keyring for AnyKeyring {
    fn kind(&self) -> KeyringKind {
        match self {
            AnyKeyring::Software(k) => k.kind(),
            AnyKeyring::Hardware(k) => k.kind(),
            AnyKeyring::Qr(k) => k.kind(),
        }
    }

    async fn prepare_accounts(&self, params: &PrepareAccountsParams) -> Result<Vec<Account>, WalletError> {
        match self {
            AnyKeyring::Software(k) => k.prepare_accounts(params).await,
            AnyKeyring::Hardware(k) => k.prepare_accounts(params).await,
            AnyKeyring::Qr(k) => k.prepare_accounts(params).await,
        }
    }

    async fn sign_transaction(&self, index: u32, unsigned: &UnsignedTransaction) -> Result<SignedTx, WalletError> {
        match self {
            AnyKeyring::Software(k) => k.sign_transaction(index, unsigned).await,
            AnyKeyring::Hardware(k) => k.sign_transaction(index, unsigned).await,
            AnyKeyring::Qr(k) => k.sign_transaction(index, unsigned).await,
        }
    }

    async fn sign_message(&self, messages: &[MessageToSign]) -> Result<Vec<SignedMessage>, WalletError> {
        match self {
            AnyKeyring::Software(k) => k.sign_message(messages).await,
            AnyKeyring::Hardware(k) => k.sign_message(messages).await,
            AnyKeyring::Qr(k) => k.sign_message(messages).await,
        }
    }
}

/// Fail for any scheme other than Schnorr.
pub(crate) fn ensure_schnorr(scheme: SignScheme) -> Result<(), WalletError> {
    match scheme {
        SignScheme::Schnorr => Ok(()),
        other => Err(WalletError::UnsupportedSignScheme(other.to_string())),
    }
}

/// Write one signature script per input.
pub(crate) fn attach_signatures(tx: &mut Transaction, signatures: &[[u8; 64]]) -> Result<(), WalletError> {
    if signatures.len() != tx.inputs.len() {
        return Err(WalletError::BuildError(format!(
            "{} signatures for {} inputs",
            signatures.len(),
            tx.inputs.len()
        )));
    }
    for (input, sig) in tx.inputs.iter_mut().zip(signatures) {
        input.signature_script = signature_script(sig);
    }
    Ok(())
}

/// Check a signed transaction before handing it out.
///
/// Every spent output must be locked to `account`, every input signature
/// must verify, and the txid must equal the unsigned transaction's.
pub(crate) fn finalize_signed(
    unsigned: &UnsignedTransaction,
    signed: Transaction,
    account: &Account,
) -> Result<SignedTx, WalletError> {
    let expected_script = account.address.script_public_key();
    if unsigned.signer != account.address
        || unsigned.spent.iter().any(|u| u.script_public_key != expected_script)
    {
        return Err(CryptoError::ScriptMismatch.into());
    }

    verify_transaction(&signed, &unsigned.spent_outputs())?;

    let txid = signed.id();
    if txid != unsigned.tx.id() {
        return Err(WalletError::BuildError("transaction changed during signing".into()));
    }

    let raw_tx = signed.to_json()?;
    tracing::info!(%txid, inputs = signed.inputs.len(), keyring = %account.keyring, "transaction signed");
    Ok(SignedTx {
        txid: txid.to_string(),
        raw_tx,
        encoded_tx: signed,
    })
}
