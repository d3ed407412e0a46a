//! Keyring backed by a connected hardware device.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use keyward_core::address::{Address, Network};
use keyward_core::crypto::{PublicKey, signing_hashes, verify_message};

use super::{
    Keyring, MessageToSign, PrepareAccountsParams, SignedMessage, SignedTx, account_path, attach_signatures,
    ensure_schnorr, finalize_signed,
};
use crate::account::{Account, AccountStore, KeyringKind};
use crate::builder::UnsignedTransaction;
use crate::error::WalletError;

/// Failure reported by a device transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for WalletError {
    fn from(e: TransportError) -> Self {
        WalletError::DeviceCommunication(e.0)
    }
}

/// Commands a hardware device answers.
#[async_trait]
pub trait HardwareTransport: Send + Sync {
    /// 33-byte compressed public key at `path`, or `None` when the device
    /// has no key there.
    async fn public_key(&self, path: &str) -> Result<Option<Vec<u8>>, TransportError>;

    /// Schnorr signature over one 32-byte input digest.
    async fn sign_digest(&self, path: &str, digest: &[u8; 32]) -> Result<[u8; 64], TransportError>;

    /// Schnorr signature over a personal message.
    async fn sign_message(&self, path: &str, message: &[u8]) -> Result<[u8; 64], TransportError>;
}

/// Signs through a [`HardwareTransport`], one request at a time.
pub struct HardwareKeyring {
    wallet_id: String,
    transport: Arc<dyn HardwareTransport>,
    accounts: Arc<AccountStore>,
    network: Network,
}

impl HardwareKeyring {
    pub fn new(
        wallet_id: impl Into<String>,
        transport: Arc<dyn HardwareTransport>,
        accounts: Arc<AccountStore>,
        network: Network,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            transport,
            accounts,
            network,
        }
    }

    fn account(&self, index: u32) -> Result<Account, WalletError> {
        self.accounts
            .get(&Account::make_id(&self.wallet_id, &account_path(index)))
            .ok_or(WalletError::AccountNotFound(index))
    }
}

#[async_trait]
impl Keyring for HardwareKeyring {
    fn kind(&self) -> KeyringKind {
        KeyringKind::Hardware
    }

    async fn prepare_accounts(&self, params: &PrepareAccountsParams) -> Result<Vec<Account>, WalletError> {
        let mut accounts = Vec::with_capacity(params.indexes.len());
        for &index in &params.indexes {
            let path = account_path(index);
            let public_key = self
                .transport
                .public_key(&path)
                .await?
                .ok_or(WalletError::AccountNotFound(index))?;
            let key = PublicKey::from_compressed(&public_key)?;
            let account = Account {
                id: Account::make_id(&self.wallet_id, &path),
                index,
                path,
                public_key,
                address: Address::from_public_key(&key, self.network),
                keyring: KeyringKind::Hardware,
            };
            self.accounts.upsert(account.clone());
            accounts.push(account);
        }
        tracing::debug!(wallet = %self.wallet_id, count = accounts.len(), "hardware accounts prepared");
        Ok(accounts)
    }

    async fn sign_transaction(&self, index: u32, unsigned: &UnsignedTransaction) -> Result<SignedTx, WalletError> {
        let account = self.account(index)?;
        let digests = signing_hashes(&unsigned.tx, &unsigned.spent_outputs())?;

        let mut signatures = Vec::with_capacity(digests.len());
        for digest in &digests {
            signatures.push(self.transport.sign_digest(&account.path, digest.as_bytes()).await?);
        }

        let mut tx = unsigned.tx.clone();
        attach_signatures(&mut tx, &signatures)?;
        finalize_signed(unsigned, tx, &account)
    }

    async fn sign_message(&self, messages: &[MessageToSign]) -> Result<Vec<SignedMessage>, WalletError> {
        let mut signed = Vec::with_capacity(messages.len());
        for m in messages {
            ensure_schnorr(m.scheme)?;
            let account = self.account(m.index)?;
            let signature = self.transport.sign_message(&account.path, &m.message).await?;
            let key = PublicKey::from_compressed(&account.public_key)?;
            verify_message(&key, &m.message, &signature)?;
            signed.push(SignedMessage {
                address: account.address,
                message: m.message.clone(),
                signature,
            });
        }
        Ok(signed)
    }
}
