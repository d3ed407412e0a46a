//! # keyward-secret
//! Password-based protection of seed material, session-scoped sensitive
//! text, and HD derivation from encrypted seed envelopes.
//!
//! # Modules
//!
//! - [`error`]: `SecretError` enum
//! - [`store`]: hashes, HMACs, Argon2id KDF, AES-256-GCM, password blobs
//! - [`session`]: explicit session holding the sensitive-text key and KDF cache
//! - [`envelope`]: `|RP|` seed envelopes, scoped reveal, atomic re-encryption
//! - [`hd`]: BIP-32 / SLIP-10 batch derivation with a path cache
//! - [`mnemonic`]: BIP-39 generation, parsing and backup

pub mod envelope;
pub mod error;
pub mod hd;
pub mod mnemonic;
pub mod session;
pub mod store;

pub use envelope::{
    EnvelopeFile, RevealableSeed, SeedEnvelope, encrypt_seed, reencrypt, reveal_seed, reveal_seed_in,
    with_revealed_seed, with_revealed_seed_in,
};
pub use error::SecretError;
pub use hd::{
    Curve, DerivedKey, ExtendedKey, derive_addresses, derive_addresses_in, derive_private_key, derive_private_key_in,
    root_fingerprint,
};
pub use session::{SecretSession, SensitiveTextKey};
pub use store::KdfParams;
