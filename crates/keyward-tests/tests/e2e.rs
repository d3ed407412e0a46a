//! End-to-end flows across the secret store, selector and keyrings.
//!
//! Each test starts from a seed envelope or a simulated device, prepares
//! accounts, funds them through an in-memory indexer, builds a transfer
//! and signs it, checking the signed result against the chain rules.

use std::sync::Arc;

use keyward_core::address::Network;
use keyward_core::constants::{CONFIRMATION_COUNT, SOMPI_PER_KAS};
use keyward_core::crypto::{PublicKey, verify_message, verify_transaction};
use keyward_core::traits::UtxoSource;
use keyward_core::types::Transaction;
use keyward_secret::hd::derive_addresses_individually;
use keyward_secret::{Curve, EnvelopeFile, SecretError, derive_addresses, reencrypt, reveal_seed};
use keyward_tests::helpers::*;
use keyward_wallet::account::{AccountStore, KeyringKind};
use keyward_wallet::airgap::SignDataType;
use keyward_wallet::builder::TransactionBuilder;
use keyward_wallet::coin_selection::{SortPriority, UtxoSelector};
use keyward_wallet::keyring::{
    AnyKeyring, HardwareKeyring, Keyring, MessageToSign, PrepareAccountsParams, SignScheme,
};
use keyward_wallet::WalletError;

const CHAIN: u64 = 50_000;

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

#[test]
fn batched_and_per_path_derivation_agree() {
    let env = envelope(&SCENARIO_ENTROPY);
    let paths: Vec<String> = ["0/0", "0/1", "44'/0'/0'/0/0"].iter().map(|s| s.to_string()).collect();

    let batched = derive_addresses(&env, PASSWORD.as_bytes(), Curve::Secp256k1, "m", &paths).unwrap();
    let single = derive_addresses_individually(&env, PASSWORD.as_bytes(), Curve::Secp256k1, "m", &paths).unwrap();

    assert_eq!(batched.len(), 3);
    assert_eq!(batched[2].path, "m/44'/0'/0'/0/0");
    assert_eq!(batched[2].extended_key, single[2].extended_key);
    assert_eq!(batched, single);
    assert_ne!(batched[0].public_key, batched[1].public_key);
    assert_eq!(batched[0].parent_fingerprint, batched[1].parent_fingerprint);
}

#[test]
fn ed25519_rejects_unhardened_steps() {
    let env = envelope(&SCENARIO_ENTROPY);
    let err = derive_addresses(&env, PASSWORD.as_bytes(), Curve::Ed25519, "m/44'/501'", &["0/0".to_string()])
        .unwrap_err();
    assert!(matches!(err, SecretError::InvalidPath(_)));
}

#[test]
fn wrong_password_surfaces_distinctly() {
    let env = envelope(&SCENARIO_ENTROPY);
    let err = derive_addresses(&env, b"not it", Curve::Secp256k1, "m", &["0".to_string()]).unwrap_err();
    let wallet: WalletError = err.into();
    assert!(wallet.is_wrong_password());
    assert_eq!(wallet.to_string(), "incorrect password");
}

#[test]
fn envelope_file_password_change() {
    let dir = tempfile::tempdir().unwrap();
    let file = EnvelopeFile::new(dir.path().join("seed.envelope"));
    let env = envelope(&SCENARIO_ENTROPY);
    file.save(&env).unwrap();

    file.change_password(PASSWORD.as_bytes(), b"new-password", TEST_KDF).unwrap();
    let reloaded = file.load().unwrap();
    assert_eq!(reloaded.id(), env.id());
    assert_eq!(
        reveal_seed(&reloaded, PASSWORD.as_bytes()).unwrap_err(),
        SecretError::WrongPassword
    );
    let before = reveal_seed(&env, PASSWORD.as_bytes()).unwrap();
    let after = reveal_seed(&reloaded, b"new-password").unwrap();
    assert_eq!(before.seed(), after.seed());

    // Failing re-encryption leaves the file alone.
    assert!(file.change_password(b"wrong", b"other", TEST_KDF).is_err());
    assert_eq!(file.load().unwrap().to_string(), reloaded.to_string());
    assert!(reencrypt(&reloaded, b"wrong", b"x", TEST_KDF).is_err());
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[test]
fn five_hundred_outputs_select_lowest_scores() {
    let owner = recipient();
    let value = 1_000;
    // Scores repeat in groups of five and arrive scrambled.
    let mut utxos: Vec<_> = (0..500u32)
        .map(|i| {
            let scrambled = (i * 317) % 500;
            utxo(&owner, scrambled, value, u64::from(scrambled / 5))
        })
        .collect();
    utxos.reverse();

    let selection = UtxoSelector::select(&utxos, 101 * value, CHAIN, CONFIRMATION_COUNT, SortPriority::DaaScore)
        .unwrap();

    let mut expected = utxos.clone();
    expected.sort_by(|a, b| {
        (a.block_daa_score, std::cmp::Reverse(a.satoshis), a.txid, a.vout).cmp(&(
            b.block_daa_score,
            std::cmp::Reverse(b.satoshis),
            b.txid,
            b.vout,
        ))
    });
    expected.truncate(101);

    assert_eq!(selection.utxos.len(), 101);
    assert_eq!(selection.utxos, expected);
    assert_eq!(selection.total_value, 101 * value);
    assert!(selection.utxos.iter().all(|u| u.block_daa_score <= 20));
}

// ---------------------------------------------------------------------------
// Software keyring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn software_flow_from_indexer_to_signed_tx() {
    let (keyring, accounts) = software_keyring("hd-1");
    let account = keyring
        .prepare_accounts(&PrepareAccountsParams::indexes([0]))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(accounts.len(), 1);

    let source = MemoryUtxoSource::new(
        CHAIN,
        fund(&account.address, &[3 * SOMPI_PER_KAS, 2 * SOMPI_PER_KAS, SOMPI_PER_KAS]),
    );
    let info = source.network_info().await.unwrap();
    let utxos = source.query_utxos(&account.address.to_string()).await.unwrap();
    assert_eq!(utxos.len(), 3);

    let unsigned = TransactionBuilder::new(account.address.clone())
        .build(&utxos, info.current_chain_score, &recipient(), 4 * SOMPI_PER_KAS)
        .unwrap();
    assert_eq!(unsigned.spent.len(), 2);
    assert!(!unsigned.has_max_send);

    let signed = keyring.sign_transaction(0, &unsigned).await.unwrap();
    verify_transaction(&signed.encoded_tx, &unsigned.spent_outputs()).unwrap();

    let relayed = Transaction::from_json(&signed.raw_tx).unwrap();
    assert_eq!(relayed.id().to_string(), signed.txid);
    assert_eq!(relayed.outputs[0].amount, 4 * SOMPI_PER_KAS);
    let change = relayed.outputs[1].amount;
    assert_eq!(5 * SOMPI_PER_KAS - 4 * SOMPI_PER_KAS - change, unsigned.fee);
}

#[tokio::test]
async fn software_max_send_spends_everything() {
    let (keyring, _) = software_keyring("hd-max");
    let account = keyring
        .prepare_accounts(&PrepareAccountsParams::indexes([0]))
        .await
        .unwrap()
        .remove(0);
    let utxos = fund(&account.address, &[SOMPI_PER_KAS, SOMPI_PER_KAS]);

    let unsigned = TransactionBuilder::new(account.address.clone())
        .build(&utxos, CHAIN, &recipient(), 2 * SOMPI_PER_KAS)
        .unwrap();
    assert!(unsigned.has_max_send);
    assert_eq!(unsigned.tx.outputs.len(), 1);
    assert_eq!(unsigned.tx.outputs[0].amount + unsigned.fee, 2 * SOMPI_PER_KAS);

    keyring.sign_transaction(0, &unsigned).await.unwrap();
}

#[tokio::test]
async fn concurrent_message_signing_keeps_order() {
    let (keyring, _) = software_keyring("hd-msg");
    let accounts = keyring.prepare_accounts(&PrepareAccountsParams::indexes(0..3)).await.unwrap();
    let messages: Vec<MessageToSign> = (0..9u32)
        .map(|i| MessageToSign {
            index: i % 3,
            message: format!("login nonce {i}").into_bytes(),
            scheme: SignScheme::Schnorr,
        })
        .collect();

    let signed = keyring.sign_message(&messages).await.unwrap();
    for (i, s) in signed.iter().enumerate() {
        let account = &accounts[i % 3];
        assert_eq!(s.message, messages[i].message);
        let key = PublicKey::from_compressed(&account.public_key).unwrap();
        verify_message(&key, &s.message, &s.signature).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Hardware keyring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hardware_and_software_agree_on_addresses() {
    let (software, _) = software_keyring("hd-cmp");
    let device = Arc::new(SimulatedHardware::new(&SCENARIO_ENTROPY, 4));
    let hardware = HardwareKeyring::new("hw-cmp", device, Arc::new(AccountStore::new()), Network::Testnet);

    let a = software.prepare_accounts(&PrepareAccountsParams::indexes(0..3)).await.unwrap();
    let b = hardware.prepare_accounts(&PrepareAccountsParams::indexes(0..3)).await.unwrap();
    for (s, h) in a.iter().zip(&b) {
        assert_eq!(s.address, h.address);
        assert_eq!(s.path, h.path);
        assert_eq!(h.keyring, KeyringKind::Hardware);
    }
}

#[tokio::test]
async fn hardware_flow_signs_each_input() {
    let device = Arc::new(SimulatedHardware::new(&SCENARIO_ENTROPY, 2));
    let keyring = AnyKeyring::Hardware(HardwareKeyring::new(
        "hw-1",
        device.clone(),
        Arc::new(AccountStore::new()),
        Network::Testnet,
    ));
    assert_eq!(keyring.kind(), KeyringKind::Hardware);

    let account = keyring.prepare_accounts(&PrepareAccountsParams::indexes([1])).await.unwrap().remove(0);
    let utxos = fund(&account.address, &[SOMPI_PER_KAS; 4]);
    let unsigned = TransactionBuilder::new(account.address.clone())
        .build(&utxos, CHAIN, &recipient(), 3 * SOMPI_PER_KAS)
        .unwrap();

    let signed = keyring.sign_transaction(1, &unsigned).await.unwrap();
    assert_eq!(*device.digests_signed.lock(), unsigned.tx.inputs.len());
    verify_transaction(&signed.encoded_tx, &unsigned.spent_outputs()).unwrap();
}

#[tokio::test]
async fn hardware_disconnect_is_device_error() {
    let device = Arc::new(SimulatedHardware::new(&SCENARIO_ENTROPY, 2));
    let keyring = HardwareKeyring::new("hw-2", device.clone(), Arc::new(AccountStore::new()), Network::Testnet);
    let account = keyring.prepare_accounts(&PrepareAccountsParams::indexes([0])).await.unwrap().remove(0);
    let unsigned = TransactionBuilder::new(account.address.clone())
        .build(&fund(&account.address, &[SOMPI_PER_KAS]), CHAIN, &recipient(), SOMPI_PER_KAS / 2)
        .unwrap();

    *device.disconnected.lock() = true;
    let err = keyring.sign_transaction(0, &unsigned).await.unwrap_err();
    assert_eq!(err, WalletError::DeviceCommunication("usb transfer failed".into()));
}

#[tokio::test]
async fn hardware_unknown_index() {
    let device = Arc::new(SimulatedHardware::new(&SCENARIO_ENTROPY, 1));
    let keyring = HardwareKeyring::new("hw-3", device, Arc::new(AccountStore::new()), Network::Testnet);
    let err = keyring.prepare_accounts(&PrepareAccountsParams::indexes([0, 7])).await.unwrap_err();
    assert_eq!(err, WalletError::AccountNotFound(7));
}

// ---------------------------------------------------------------------------
// QR keyring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn qr_flow_signs_through_airgap() {
    let device = Arc::new(AirGapDevice::new(&SCENARIO_ENTROPY, DeviceBehavior::Honest));
    let (keyring, _) = qr_keyring(device.clone(), &[0, 1]);
    let keyring = AnyKeyring::Qr(keyring);

    let params = PrepareAccountsParams {
        indexes: vec![0],
        verify_address: true,
    };
    let account = keyring.prepare_accounts(&params).await.unwrap().remove(0);
    assert_eq!(device.requests.lock().len(), 1);
    assert_eq!(device.requests.lock()[0].data_type, SignDataType::Message);

    let utxos = fund(&account.address, &[SOMPI_PER_KAS, SOMPI_PER_KAS, SOMPI_PER_KAS]);
    let unsigned = TransactionBuilder::new(account.address.clone())
        .build(&utxos, CHAIN, &recipient(), 2 * SOMPI_PER_KAS)
        .unwrap();
    let signed = keyring.sign_transaction(0, &unsigned).await.unwrap();
    verify_transaction(&signed.encoded_tx, &unsigned.spent_outputs()).unwrap();

    let requests = device.requests.lock();
    let tx_request = &requests[1];
    assert_eq!(tx_request.data_type, SignDataType::Transaction);
    assert_eq!(tx_request.sign_data.len(), 32 * unsigned.tx.inputs.len());
    assert_eq!(tx_request.origin, "keyward");
    assert_eq!(tx_request.address, account.address.to_string());
    assert_ne!(requests[0].request_id, tx_request.request_id);
}

#[tokio::test]
async fn qr_software_and_device_share_addresses() {
    let (software, _) = software_keyring("hd-qr");
    let device = Arc::new(AirGapDevice::new(&SCENARIO_ENTROPY, DeviceBehavior::Honest));
    let (qr, _) = qr_keyring(device, &[0, 1]);

    let a = software.prepare_accounts(&PrepareAccountsParams::indexes([0, 1])).await.unwrap();
    let b = qr.prepare_accounts(&PrepareAccountsParams::indexes([0, 1])).await.unwrap();
    assert_eq!(a[1].address, b[1].address);
}
