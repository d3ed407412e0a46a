//! Chain constants.
//!
//! All monetary values are in sompi (1 KAS = 10^8 sompi).

/// Sompi per whole coin.
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Largest amount a transaction value field can carry.
pub const MAX_SOMPI: u64 = u64::MAX;

/// DAA-score distance after which an output counts as confirmed.
pub const CONFIRMATION_COUNT: u64 = 10;

/// Smallest output value relay nodes accept.
pub const DUST_AMOUNT: u64 = 600;

/// Default fee rate in sompi per gram of mass.
pub const DEFAULT_FEE_RATE: u64 = 1;

/// Maximum number of inputs a single transfer may spend.
pub const MAX_UTXO_SIZE: usize = 84;

/// Mass ceiling for a transaction accepted into the orphan pool.
pub const MAX_ORPHAN_TX_MASS: u64 = 100_000;

/// Current transaction version.
pub const TX_VERSION: u16 = 0;

/// Native subnetwork identifier (all zero).
pub const SUBNETWORK_ID_NATIVE: [u8; 20] = [0u8; 20];

/// Sighash type committed to by every signature (SIGHASH_ALL).
pub const SIGHASH_ALL: u8 = 0x01;

// --- Mass weights ---

/// Mass per serialized transaction byte.
pub const MASS_PER_TX_BYTE: u64 = 1;

/// Mass per script-public-key byte in outputs.
pub const MASS_PER_SCRIPT_PUB_KEY_BYTE: u64 = 10;

/// Mass per signature operation.
pub const MASS_PER_SIG_OP: u64 = 1000;

/// Serialized size of the fixed transaction fields.
pub const BASE_TX_SIZE: u64 = 94;

/// Serialized size of one signed P2PK input.
pub const INPUT_SIZE: u64 = 118;

/// Serialized size of one output, excluding its script.
pub const OUTPUT_BASE_SIZE: u64 = 18;

/// Mass contributed by one signed P2PK input.
pub const MASS_PER_INPUT: u64 = INPUT_SIZE * MASS_PER_TX_BYTE + MASS_PER_SIG_OP;

/// Mass contributed by one output with a script of `script_len` bytes.
pub const fn output_mass(script_len: u64) -> u64 {
    (OUTPUT_BASE_SIZE + script_len) * MASS_PER_TX_BYTE
        + (2 + script_len) * MASS_PER_SCRIPT_PUB_KEY_BYTE
}
