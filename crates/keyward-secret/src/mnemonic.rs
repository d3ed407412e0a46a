//! BIP-39 mnemonic backup and restoration.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::envelope::RevealableSeed;
use crate::error::SecretError;

/// Word counts BIP-39 defines.
pub const WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Collapse whitespace and lowercase the phrase.
fn normalize(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(
        phrase
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
    )
}

/// Parse a phrase into seed material, applying the optional BIP-39
/// passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<RevealableSeed, SecretError> {
    let normalized = normalize(phrase);
    let mnemonic = Mnemonic::parse_in(Language::English, normalized.as_str())
        .map_err(|e| SecretError::InvalidMnemonic(e.to_string()))?;
    let entropy = Zeroizing::new(mnemonic.to_entropy());
    RevealableSeed::from_entropy(&entropy, passphrase)
}

/// The phrase that restores `seed`.
pub fn seed_to_mnemonic(seed: &RevealableSeed) -> Result<Zeroizing<String>, SecretError> {
    seed.mnemonic()
}

/// Whether `phrase` is a valid English BIP-39 mnemonic.
pub fn validate_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse_in(Language::English, normalize(phrase).as_str()).is_ok()
}

/// Generate a fresh random phrase of `word_count` words.
pub fn generate_mnemonic(word_count: usize) -> Result<Zeroizing<String>, SecretError> {
    if !WORD_COUNTS.contains(&word_count) {
        return Err(SecretError::InvalidMnemonic(format!(
            "word count must be one of {WORD_COUNTS:?}, got {word_count}"
        )));
    }
    let mut entropy = Zeroizing::new(vec![0u8; word_count / 3 * 4]);
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| SecretError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}
