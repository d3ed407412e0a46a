//! CLI configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `keyward.toml` (in the data directory or at `--config`), then
//! `KEYWARD_*` environment variables with `__` separating nested keys,
//! e.g. `KEYWARD_KDF__M_COST=65536`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyward_core::address::Network;
use keyward_core::constants::{CONFIRMATION_COUNT, DEFAULT_FEE_RATE};
use keyward_secret::KdfParams;
use serde::{Deserialize, Serialize};

/// Argon2id cost parameters as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            m_cost: params.m_cost,
            t_cost: params.t_cost,
            p_cost: params.p_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory holding the seed envelope.
    pub data_dir: PathBuf,
    /// `mainnet` or `testnet`.
    pub network: String,
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
    pub kdf: KdfConfig,
    pub confirmation_count: u64,
    /// Fee per unit of mass, in sompi.
    pub fee_rate: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("keyward"),
            network: "testnet".to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            kdf: KdfConfig::default(),
            confirmation_count: CONFIRMATION_COUNT,
            fee_rate: DEFAULT_FEE_RATE,
        }
    }
}

impl CliConfig {
    /// Load defaults, then the config file, then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let file = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| defaults.data_dir.join("keyward.toml"));

        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).context("Failed to encode default config")?)
            .add_source(config::File::from(file.as_path()).required(explicit.is_some()))
            .add_source(config::Environment::with_prefix("KEYWARD").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", file.display()))?;

        layered
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Location of the seed envelope.
    pub fn envelope_path(&self) -> PathBuf {
        self.data_dir.join("seed.envelope")
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(self.kdf.m_cost, self.kdf.t_cost, self.kdf.p_cost)
    }

    pub fn network(&self) -> Result<Network> {
        self.network
            .parse()
            .with_context(|| format!("Unknown network: {}", self.network))
    }
}
