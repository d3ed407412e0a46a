//! # keyward-wallet
//! Coin selection, transfer building, account storage and signing through
//! software, hardware and air-gapped keyrings.
//!
//! # Modules
//!
//! - [`account`]: concurrent account store
//! - [`airgap`]: QR sign requests, responses and the session state machine
//! - [`builder`]: fee-aware transfer builder on top of the selector
//! - [`coin_selection`]: deterministic confirmation-aware UTXO selection
//! - [`error`]: `WalletError` enum
//! - [`keyring`]: `Keyring` trait and its three backends

pub mod account;
pub mod airgap;
pub mod builder;
pub mod coin_selection;
pub mod error;
pub mod keyring;

pub use account::{Account, AccountStore, KeyringKind};
pub use airgap::{AirGapSession, AirGapState, QrScanner, SignDataType, SignRequest, SignatureResponse};
pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{Selection, SortPriority, UtxoSelector};
pub use error::WalletError;
pub use keyring::{AnyKeyring, Keyring, PrepareAccountsParams, SignScheme, SignedMessage, SignedTx};
