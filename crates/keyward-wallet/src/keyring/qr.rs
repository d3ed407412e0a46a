//! Keyring backed by an offline device reached over QR codes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use keyward_core::address::{Address, Network};
use keyward_core::crypto::{PublicKey, signing_hashes, verify_message};

use super::{
    Keyring, MessageToSign, PrepareAccountsParams, SignedMessage, SignedTx, attach_signatures, ensure_schnorr,
    finalize_signed,
};
use crate::account::{Account, AccountStore, KeyringKind};
use crate::airgap::{AirGapSession, QrScanner, SignDataType, SignRequestParams};
use crate::builder::UnsignedTransaction;
use crate::error::WalletError;

/// Account record imported from the offline device's export QR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirGapAccount {
    pub index: u32,
    pub path: String,
    /// 33-byte compressed public key, absent on incomplete imports.
    pub public_key: Option<Vec<u8>>,
    /// Master key fingerprint, 8 hex characters.
    pub xfp: Option<String>,
}

/// Signs by exchanging QR codes with an offline device.
pub struct QrKeyring {
    wallet_id: String,
    records: Vec<AirGapAccount>,
    scanner: Arc<dyn QrScanner>,
    accounts: Arc<AccountStore>,
    network: Network,
    cancel: Mutex<CancellationToken>,
}

impl QrKeyring {
    pub fn new(
        wallet_id: impl Into<String>,
        records: Vec<AirGapAccount>,
        scanner: Arc<dyn QrScanner>,
        accounts: Arc<AccountStore>,
        network: Network,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            records,
            scanner,
            accounts,
            network,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Cancel every scan in flight. Later requests start fresh.
    pub fn cancel(&self) {
        let mut guard = self.cancel.lock();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    fn record(&self, index: u32) -> Result<&AirGapAccount, WalletError> {
        self.records
            .iter()
            .find(|r| r.index == index)
            .ok_or(WalletError::AccountNotFound(index))
    }

    fn account(&self, index: u32) -> Result<(Account, &AirGapAccount), WalletError> {
        let record = self.record(index)?;
        let account = self
            .accounts
            .get(&Account::make_id(&self.wallet_id, &record.path))
            .ok_or(WalletError::AccountNotFound(index))?;
        Ok((account, record))
    }

    fn to_account(&self, record: &AirGapAccount) -> Result<Account, WalletError> {
        let public_key = record.public_key.clone().ok_or(WalletError::MissingPublicKey)?;
        let key = PublicKey::from_compressed(&public_key)?;
        Ok(Account {
            id: Account::make_id(&self.wallet_id, &record.path),
            index: record.index,
            path: record.path.clone(),
            public_key,
            address: Address::from_public_key(&key, self.network),
            keyring: KeyringKind::Qr,
        })
    }

    /// One request/response round. Returns the session holding the
    /// response so the caller can verify and close it.
    async fn exchange(
        &self,
        account: &Account,
        record: &AirGapAccount,
        sign_data: Vec<u8>,
        data_type: SignDataType,
    ) -> Result<(AirGapSession, Vec<[u8; 64]>), WalletError> {
        let mut session = AirGapSession::new(SignRequestParams {
            path: account.path.clone(),
            sign_data,
            data_type,
            xfp: record.xfp.clone(),
            address: account.address.to_string(),
            origin: None,
        })?;
        session.await_response(self.scanner.as_ref(), &self.cancel_token()).await?;
        match session.signatures() {
            Ok(signatures) => Ok((session, signatures)),
            Err(e) => {
                session.reject()?;
                Err(e)
            }
        }
    }

    /// Two-way scan: the device signs a fresh challenge with the account
    /// key and the signature must verify against the cached public key.
    pub async fn verify_address(&self, account: &Account) -> Result<(), WalletError> {
        let record = self.record(account.index)?;
        let challenge = format!("keyward verify {} {}", account.address, Uuid::new_v4()).into_bytes();
        let (mut session, signatures) = self
            .exchange(account, record, challenge.clone(), SignDataType::Message)
            .await?;
        let key = PublicKey::from_compressed(&account.public_key)?;
        match verify_message(&key, &challenge, &signatures[0]) {
            Ok(()) => {
                session.mark_verified()?;
                tracing::info!(address = %account.address, "air-gap address verified");
                Ok(())
            }
            Err(e) => {
                session.reject()?;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Keyring for QrKeyring {
    fn kind(&self) -> KeyringKind {
        KeyringKind::Qr
    }

    async fn prepare_accounts(&self, params: &PrepareAccountsParams) -> Result<Vec<Account>, WalletError> {
        let mut accounts = Vec::with_capacity(params.indexes.len());
        for &index in &params.indexes {
            let account = self.to_account(self.record(index)?)?;
            if params.verify_address {
                self.verify_address(&account).await?;
            }
            self.accounts.upsert(account.clone());
            accounts.push(account);
        }
        tracing::debug!(wallet = %self.wallet_id, count = accounts.len(), "air-gap accounts prepared");
        Ok(accounts)
    }

    async fn sign_transaction(&self, index: u32, unsigned: &UnsignedTransaction) -> Result<SignedTx, WalletError> {
        let (account, record) = self.account(index)?;
        let sign_data: Vec<u8> = signing_hashes(&unsigned.tx, &unsigned.spent_outputs())?
            .iter()
            .flat_map(|h| h.0)
            .collect();

        let (mut session, signatures) = self
            .exchange(&account, record, sign_data, SignDataType::Transaction)
            .await?;

        let mut tx = unsigned.tx.clone();
        let verified = match attach_signatures(&mut tx, &signatures) {
            Ok(()) => finalize_signed(unsigned, tx, &account),
            Err(e) => Err(e),
        };
        match verified {
            Ok(signed) => {
                session.mark_verified()?;
                Ok(signed)
            }
            Err(e) => {
                session.reject()?;
                Err(e)
            }
        }
    }

    async fn sign_message(&self, messages: &[MessageToSign]) -> Result<Vec<SignedMessage>, WalletError> {
        let mut signed = Vec::with_capacity(messages.len());
        for m in messages {
            ensure_schnorr(m.scheme)?;
            let (account, record) = self.account(m.index)?;
            let (mut session, signatures) = self
                .exchange(&account, record, m.message.clone(), SignDataType::Message)
                .await?;
            let key = PublicKey::from_compressed(&account.public_key)?;
            if let Err(e) = verify_message(&key, &m.message, &signatures[0]) {
                session.reject()?;
                return Err(e.into());
            }
            session.mark_verified()?;
            signed.push(SignedMessage {
                address: account.address,
                message: m.message.clone(),
                signature: signatures[0],
            });
        }
        Ok(signed)
    }
}
