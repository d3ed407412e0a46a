//! Keyring backed by an encrypted seed envelope.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use zeroize::Zeroizing;

use keyward_core::address::{Address, Network};
use keyward_core::crypto::{KeyPair, PublicKey, sign_message, signing_hashes};
use keyward_secret::hd::{derive_addresses_async_in, derive_private_key_in};
use keyward_secret::{Curve, SecretError, SecretSession, SeedEnvelope};

use super::{
    DEFAULT_PATH_PREFIX, Keyring, MessageToSign, PrepareAccountsParams, SignedMessage, SignedTx,
    account_path, attach_signatures, ensure_schnorr, finalize_signed,
};
use crate::account::{Account, AccountStore, KeyringKind};
use crate::builder::UnsignedTransaction;
use crate::error::WalletError;

/// Signs with keys derived on demand from a seed envelope.
///
/// The wallet password is kept only as a sensitive-text token under the
/// session key; locking the session makes the keyring unusable until a
/// new one is built.
pub struct SoftwareKeyring {
    wallet_id: String,
    envelope: SeedEnvelope,
    password_token: String,
    session: Arc<SecretSession>,
    accounts: Arc<AccountStore>,
    network: Network,
}

impl SoftwareKeyring {
    pub fn new(
        wallet_id: impl Into<String>,
        envelope: SeedEnvelope,
        password: &str,
        session: Arc<SecretSession>,
        accounts: Arc<AccountStore>,
        network: Network,
    ) -> Result<Self, WalletError> {
        let password_token = session.encode(password)?;
        Ok(Self {
            wallet_id: wallet_id.into(),
            envelope,
            password_token,
            session,
            accounts,
            network,
        })
    }

    fn password(&self) -> Result<Zeroizing<String>, WalletError> {
        Ok(self.session.decode(&self.password_token)?)
    }

    fn account(&self, index: u32) -> Result<Account, WalletError> {
        self.accounts
            .get(&Account::make_id(&self.wallet_id, &account_path(index)))
            .ok_or(WalletError::AccountNotFound(index))
    }

    /// Derive the signing key for `path` on the blocking pool.
    async fn keypair(&self, path: &str) -> Result<KeyPair, WalletError> {
        let envelope = self.envelope.clone();
        let password = self.password()?;
        let path = path.to_string();
        let session = Arc::clone(&self.session);
        let keypair = tokio::task::spawn_blocking(move || {
            derive_private_key_in(&session, &envelope, password.as_bytes(), Curve::Secp256k1, &path, |secret| {
                KeyPair::from_secret_bytes(secret).map_err(|e| SecretError::KeyDerivation(e.to_string()))
            })
        })
        .await
        .map_err(|e| SecretError::Task(e.to_string()))??;
        Ok(keypair)
    }
}

#[async_trait]
impl Keyring for SoftwareKeyring {
    fn kind(&self) -> KeyringKind {
        KeyringKind::Software
    }

    async fn prepare_accounts(&self, params: &PrepareAccountsParams) -> Result<Vec<Account>, WalletError> {
        let rel_paths: Vec<String> = params.indexes.iter().map(|i| format!("0/{i}")).collect();
        let password = self.password()?;
        let derived = derive_addresses_async_in(
            Arc::clone(&self.session),
            &self.envelope,
            password.as_bytes(),
            Curve::Secp256k1,
            DEFAULT_PATH_PREFIX,
            &rel_paths,
        )
        .await?;

        let mut accounts = Vec::with_capacity(derived.len());
        for (index, key) in params.indexes.iter().zip(derived) {
            let public_key = PublicKey::from_compressed(&key.public_key)?;
            let account = Account {
                id: Account::make_id(&self.wallet_id, &key.path),
                index: *index,
                path: key.path,
                public_key: key.public_key,
                address: Address::from_public_key(&public_key, self.network),
                keyring: KeyringKind::Software,
            };
            self.accounts.upsert(account.clone());
            accounts.push(account);
        }
        tracing::debug!(wallet = %self.wallet_id, count = accounts.len(), "software accounts prepared");
        Ok(accounts)
    }

    async fn sign_transaction(&self, index: u32, unsigned: &UnsignedTransaction) -> Result<SignedTx, WalletError> {
        let account = self.account(index)?;
        let keypair = self.keypair(&account.path).await?;

        let mut tx = unsigned.tx.clone();
        let signatures: Vec<[u8; 64]> = signing_hashes(&tx, &unsigned.spent_outputs())?
            .iter()
            .map(|digest| keypair.sign(digest.as_bytes()))
            .collect();
        attach_signatures(&mut tx, &signatures)?;

        finalize_signed(unsigned, tx, &account)
    }

    async fn sign_message(&self, messages: &[MessageToSign]) -> Result<Vec<SignedMessage>, WalletError> {
        let signed = try_join_all(messages.iter().map(|m| async move {
            ensure_schnorr(m.scheme)?;
            let account = self.account(m.index)?;
            let keypair = self.keypair(&account.path).await?;
            Ok::<_, WalletError>(SignedMessage {
                address: account.address,
                message: m.message.clone(),
                signature: sign_message(&keypair, &m.message),
            })
        }))
        .await?;
        tracing::debug!(count = signed.len(), "messages signed");
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::tests::transfer;
    use crate::keyring::SignScheme;
    use keyward_core::crypto::{verify_message, verify_transaction};
    use keyward_secret::{KdfParams, RevealableSeed, encrypt_seed};

    const TEST_KDF: KdfParams = KdfParams::new(8, 1, 1);

    const PASSWORD: &str = "correct horse";

    fn keyring(session: Arc<SecretSession>) -> SoftwareKeyring {
        let seed = RevealableSeed::from_entropy(&[0x11; 16], "").unwrap();
        let envelope = encrypt_seed(&seed, PASSWORD.as_bytes(), TEST_KDF).unwrap();
        SoftwareKeyring::new("w1", envelope, PASSWORD, session, Arc::new(AccountStore::new()), Network::Testnet)
            .unwrap()
    }

    #[tokio::test]
    async fn prepares_accounts_in_order() {
        let kr = keyring(Arc::new(SecretSession::unlocked()));
        let accounts = kr.prepare_accounts(&PrepareAccountsParams::indexes([2, 0])).await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].index, 2);
        assert_eq!(accounts[0].path, account_path(2));
        assert_eq!(accounts[1].id, format!("w1--{}", account_path(0)));
        assert_eq!(accounts[0].public_key.len(), 33);
        assert_ne!(accounts[0].address, accounts[1].address);
    }

    #[tokio::test]
    async fn signs_verifiable_transaction() {
        let kr = keyring(Arc::new(SecretSession::unlocked()));
        let account = kr.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap().remove(0);
        let unsigned = transfer(&account.address);
        let signed = kr.sign_transaction(0, &unsigned).await.unwrap();
        assert!(signed.encoded_tx.is_fully_signed());
        verify_transaction(&signed.encoded_tx, &unsigned.spent_outputs()).unwrap();
        assert_eq!(signed.txid, unsigned.tx.id().to_string());
    }

    #[tokio::test]
    async fn unknown_index_not_found() {
        let kr = keyring(Arc::new(SecretSession::unlocked()));
        let account = kr.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap().remove(0);
        let err = kr.sign_transaction(5, &transfer(&account.address)).await.unwrap_err();
        assert_eq!(err, WalletError::AccountNotFound(5));
    }

    #[tokio::test]
    async fn messages_signed_in_order() {
        let kr = keyring(Arc::new(SecretSession::unlocked()));
        let accounts = kr.prepare_accounts(&PrepareAccountsParams::indexes([0, 1])).await.unwrap();
        let messages: Vec<MessageToSign> = (0..4u32)
            .map(|i| MessageToSign {
                index: i % 2,
                message: format!("message {i}").into_bytes(),
                scheme: SignScheme::Schnorr,
            })
            .collect();
        let signed = kr.sign_message(&messages).await.unwrap();
        assert_eq!(signed.len(), 4);
        for (i, s) in signed.iter().enumerate() {
            assert_eq!(s.message, messages[i].message);
            let account = &accounts[i % 2];
            assert_eq!(s.address, account.address);
            let pk = PublicKey::from_compressed(&account.public_key).unwrap();
            verify_message(&pk, &s.message, &s.signature).unwrap();
        }
    }

    #[tokio::test]
    async fn ecdsa_message_rejected() {
        let kr = keyring(Arc::new(SecretSession::unlocked()));
        kr.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap();
        let err = kr
            .sign_message(&[MessageToSign {
                index: 0,
                message: b"hi".to_vec(),
                scheme: SignScheme::Ecdsa,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedSignScheme(_)));
    }

    #[tokio::test]
    async fn repeated_signing_reuses_session_key() {
        let session = Arc::new(SecretSession::unlocked());
        let kr = keyring(Arc::clone(&session));
        let account = kr.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap().remove(0);
        let unsigned = transfer(&account.address);
        kr.sign_transaction(0, &unsigned).await.unwrap();
        kr.sign_transaction(0, &unsigned).await.unwrap();
        assert_eq!(session.cached_key_count(), 1);
    }

    #[tokio::test]
    async fn locked_session_blocks_signing() {
        let session = Arc::new(SecretSession::unlocked());
        let kr = keyring(Arc::clone(&session));
        session.lock();
        let err = kr.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap_err();
        assert_eq!(err, WalletError::Secret(SecretError::SessionLocked));
    }
}
