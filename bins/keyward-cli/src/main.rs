//! keyward: command-line front end for the Keyward secret store.
//!
//! Creates and restores password-protected seed envelopes, derives
//! addresses, and builds and signs transfers from a JSON UTXO snapshot.
//! Nothing here talks to the network; UTXOs come from files.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use keyward_core::address::{Address, Network};
use keyward_core::adapter::utxos_from_json;
use keyward_core::constants::SOMPI_PER_KAS;
use keyward_core::types::UnspentOutput;
use keyward_secret::mnemonic::{generate_mnemonic, mnemonic_to_seed};
use keyward_secret::{Curve, EnvelopeFile, SecretSession, derive_addresses, encrypt_seed, root_fingerprint};
use keyward_wallet::keyring::{DEFAULT_PATH_PREFIX, Keyring, PrepareAccountsParams, SoftwareKeyring};
use keyward_wallet::{AccountStore, SortPriority, TransactionBuilder, UtxoSelector};
use tracing::info;

use crate::config::CliConfig;

/// Keyward command-line interface.
#[derive(Parser)]
#[command(name = "keyward")]
#[command(version, about = "Seed envelopes, derivation and offline signing.")]
struct Cli {
    /// Config file (default: <data dir>/keyward.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new mnemonic and seal it into the envelope file.
    Create(CreateArgs),
    /// Seal an existing mnemonic into the envelope file.
    Restore,
    /// Change the envelope password.
    Passwd,
    /// Derive addresses or public keys.
    Addresses(AddressesArgs),
    /// Print the master key fingerprint.
    Fingerprint(FingerprintArgs),
    /// Run coin selection over a UTXO snapshot.
    Select(SelectArgs),
    /// Build and sign a transfer from a UTXO snapshot.
    Sign(SignArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Mnemonic length (12, 15, 18, 21 or 24).
    #[arg(long, default_value_t = 24)]
    words: usize,
}

#[derive(Args)]
struct AddressesArgs {
    /// First account index.
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Number of accounts.
    #[arg(long, default_value_t = 5)]
    count: u32,

    /// Curve (secp256k1 or ed25519).
    #[arg(long, default_value = "secp256k1")]
    curve: String,

    /// Account path prefix.
    #[arg(long, default_value = DEFAULT_PATH_PREFIX)]
    prefix: String,
}

#[derive(Args)]
struct FingerprintArgs {
    /// Curve (secp256k1 or ed25519).
    #[arg(long, default_value = "secp256k1")]
    curve: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Priority {
    /// Oldest outputs first.
    Score,
    /// Largest outputs first.
    Value,
}

impl From<Priority> for SortPriority {
    fn from(p: Priority) -> Self {
        match p {
            Priority::Score => SortPriority::DaaScore,
            Priority::Value => SortPriority::Satoshis,
        }
    }
}

#[derive(Args)]
struct SelectArgs {
    /// JSON file with the indexer's UTXO list.
    #[arg(long)]
    utxos: PathBuf,

    /// Amount to cover, in sompi.
    #[arg(long)]
    amount: u64,

    /// Current virtual DAA score.
    #[arg(long)]
    chain_score: u64,

    #[arg(long, value_enum, default_value = "score")]
    priority: Priority,
}

#[derive(Args)]
struct SignArgs {
    /// JSON file with the indexer's UTXO list.
    #[arg(long)]
    utxos: PathBuf,

    /// Current virtual DAA score.
    #[arg(long)]
    chain_score: u64,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Amount to send, in sompi.
    #[arg(long)]
    amount: u64,

    /// Sending account index.
    #[arg(long, default_value_t = 0)]
    index: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = CliConfig::load(cli.config.as_deref())?;
    init_logging(&cfg.log_level, &cfg.log_format);

    match cli.command {
        Commands::Create(args) => create(&cfg, args),
        Commands::Restore => restore(&cfg),
        Commands::Passwd => passwd(&cfg),
        Commands::Addresses(args) => addresses(&cfg, args),
        Commands::Fingerprint(args) => fingerprint(&cfg, args),
        Commands::Select(args) => select(&cfg, args),
        Commands::Sign(args) => sign(&cfg, args).await,
    }
}

fn create(cfg: &CliConfig, args: CreateArgs) -> Result<()> {
    let file = EnvelopeFile::new(cfg.envelope_path());
    if file.exists() {
        bail!("Envelope already exists: {}", file.path().display());
    }

    let phrase = generate_mnemonic(args.words).context("Failed to generate mnemonic")?;
    let password = prompt_new_password()?;
    seal(cfg, &file, &phrase, &password)?;

    println!("\nMNEMONIC ({} words, shown once):", args.words);
    println!("  {}", phrase.as_str());
    println!("\nEnvelope saved to: {}", file.path().display());
    Ok(())
}

fn restore(cfg: &CliConfig) -> Result<()> {
    let file = EnvelopeFile::new(cfg.envelope_path());
    if file.exists() {
        bail!("Envelope already exists: {}", file.path().display());
    }

    let phrase = prompt_password("Mnemonic")?;
    let password = prompt_new_password()?;
    seal(cfg, &file, &phrase, &password)?;

    println!("Envelope restored to: {}", file.path().display());
    Ok(())
}

fn seal(cfg: &CliConfig, file: &EnvelopeFile, phrase: &str, password: &str) -> Result<()> {
    let seed = mnemonic_to_seed(phrase, "").context("Invalid mnemonic")?;
    let envelope = encrypt_seed(&seed, password.as_bytes(), cfg.kdf_params()).context("Failed to seal seed")?;
    file.save(&envelope)
        .with_context(|| format!("Failed to write {}", file.path().display()))?;
    info!(id = %envelope.id(), "envelope created");
    Ok(())
}

fn passwd(cfg: &CliConfig) -> Result<()> {
    let file = existing_envelope(cfg)?;
    let old = prompt_password("Current password")?;
    let new = prompt_new_password()?;
    file.change_password(old.as_bytes(), new.as_bytes(), cfg.kdf_params())
        .context("Failed to change password (check current password)")?;
    println!("Password changed.");
    Ok(())
}

fn addresses(cfg: &CliConfig, args: AddressesArgs) -> Result<()> {
    let curve: Curve = args.curve.parse()?;
    let network = cfg.network()?;
    let envelope = existing_envelope(cfg)?.load().context("Failed to read envelope")?;
    let password = prompt_password("Password")?;

    let end = args
        .start
        .checked_add(args.count)
        .context("Account range overflows")?;
    let rel: Vec<String> = (args.start..end)
        .map(|i| match curve {
            Curve::Secp256k1 => format!("0/{i}"),
            Curve::Ed25519 => format!("0'/{i}'"),
        })
        .collect();

    let keys = derive_addresses(&envelope, password.as_bytes(), curve, &args.prefix, &rel)
        .context("Derivation failed (check password)")?;
    for key in keys {
        match curve {
            Curve::Secp256k1 => {
                let xonly: [u8; 32] = key.public_key[1..]
                    .try_into()
                    .context("Unexpected public key length")?;
                println!("{}  {}", key.path, Address::from_xonly(xonly, network));
            }
            Curve::Ed25519 => println!("{}  {}", key.path, hex::encode(&key.public_key)),
        }
    }
    Ok(())
}

fn fingerprint(cfg: &CliConfig, args: FingerprintArgs) -> Result<()> {
    let curve: Curve = args.curve.parse()?;
    let envelope = existing_envelope(cfg)?.load().context("Failed to read envelope")?;
    let password = prompt_password("Password")?;
    let xfp = root_fingerprint(&envelope, password.as_bytes(), curve).context("Failed to open envelope")?;
    println!("{xfp}");
    Ok(())
}

fn select(cfg: &CliConfig, args: SelectArgs) -> Result<()> {
    let utxos = load_utxos(&args.utxos)?;
    let selection = UtxoSelector::select(
        &utxos,
        args.amount,
        args.chain_score,
        cfg.confirmation_count,
        args.priority.into(),
    )
    .context("Coin selection failed")?;

    for id in &selection.utxo_ids {
        println!("{id}");
    }
    println!(
        "\n{} outputs, total {} KAS, mass {}",
        selection.utxos.len(),
        format_kas(selection.total_value),
        selection.mass
    );
    Ok(())
}

async fn sign(cfg: &CliConfig, args: SignArgs) -> Result<()> {
    let network = cfg.network()?;
    let to: Address = args.to.parse().context("Invalid recipient address")?;
    if to.network() != network {
        bail!("Recipient is on {}, wallet is on {}", to.network(), network);
    }
    let utxos = load_utxos(&args.utxos)?;
    let envelope = existing_envelope(cfg)?.load().context("Failed to read envelope")?;
    let password = prompt_password("Password")?;

    let keyring = SoftwareKeyring::new(
        "cli",
        envelope,
        &password,
        Arc::new(SecretSession::unlocked()),
        Arc::new(AccountStore::new()),
        network,
    )?;
    let account = keyring
        .prepare_accounts(&PrepareAccountsParams::indexes([args.index]))
        .await
        .context("Failed to derive account (check password)")?
        .into_iter()
        .next()
        .context("No account derived")?;

    let owned: Vec<UnspentOutput> = utxos
        .into_iter()
        .filter(|u| u.address == account.address.to_string())
        .collect();
    let unsigned = TransactionBuilder::new(account.address.clone())
        .fee_rate(cfg.fee_rate)
        .confirmation_count(cfg.confirmation_count)
        .build(&owned, args.chain_score, &to, args.amount)
        .context("Failed to build transaction")?;
    info!(
        inputs = unsigned.spent.len(),
        fee = unsigned.fee,
        max_send = unsigned.has_max_send,
        "transfer built"
    );

    let signed = keyring
        .sign_transaction(args.index, &unsigned)
        .await
        .context("Signing failed")?;
    eprintln!("txid: {}", signed.txid);
    eprintln!("fee:  {} KAS", format_kas(unsigned.fee));
    println!("{}", signed.raw_tx);
    Ok(())
}

fn existing_envelope(cfg: &CliConfig) -> Result<EnvelopeFile> {
    let file = EnvelopeFile::new(cfg.envelope_path());
    if !file.exists() {
        bail!("No envelope at {} (run `keyward create` first)", file.path().display());
    }
    Ok(file)
}

fn load_utxos(path: &Path) -> Result<Vec<UnspentOutput>> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    utxos_from_json(&json).with_context(|| format!("Invalid UTXO list in {}", path.display()))
}

fn format_kas(sompi: u64) -> String {
    format!("{}.{:08}", sompi / SOMPI_PER_KAS, sompi % SOMPI_PER_KAS)
}

fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")
}

fn prompt_new_password() -> Result<String> {
    let password = prompt_password("New password")?;
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    if password != prompt_password("Confirm password")? {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
