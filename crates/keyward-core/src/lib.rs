//! # keyward-core
//! Chain data model, Schnorr signing primitives and address encoding shared
//! by the secret store, the coin selector and every keyring backend.
//!
//! # Modules
//!
//! - [`adapter`]: validating conversion of raw indexer responses
//! - [`address`]: Bech32m addresses over x-only public keys
//! - [`constants`]: amount ceilings, confirmation depth, mass weights
//! - [`crypto`]: BIP-340 keys, sighash, input signing and verification
//! - [`error`]: error enums for the modules above
//! - [`traits`]: `UtxoSource` boundary toward network collaborators
//! - [`types`]: hashes, outpoints, UTXOs, transactions

pub mod adapter;
pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod traits;
pub mod types;
