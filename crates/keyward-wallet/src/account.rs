//! Concurrent account store shared by every keyring.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;

use keyward_core::address::Address;

/// Which keyring variant owns an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyringKind {
    Software,
    Hardware,
    Qr,
}

impl fmt::Display for KeyringKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyringKind::Software => "hd",
            KeyringKind::Hardware => "hw",
            KeyringKind::Qr => "qr",
        })
    }
}

/// A derived account. Holds public material only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// `<wallet>--<path>`.
    pub id: String,
    pub index: u32,
    /// Full derivation path.
    pub path: String,
    /// 33-byte compressed public key.
    pub public_key: Vec<u8>,
    pub address: Address,
    pub keyring: KeyringKind,
}

impl Account {
    pub fn make_id(wallet_id: &str, path: &str) -> String {
        format!("{wallet_id}--{path}")
    }
}

/// Accounts by id.
///
/// Writes for one id go through that shard's entry lock, so concurrent
/// preparation of the same account cannot interleave partial records.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: DashMap<String, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account. Returns `true` if it was new.
    pub fn upsert(&self, account: Account) -> bool {
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get() != &account {
                    tracing::debug!(id = %account.id, "account record replaced");
                    existing.insert(account);
                }
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(account);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.get(id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::address::Network;
    use std::sync::Arc;

    fn account(index: u32, keyring: KeyringKind) -> Account {
        let path = format!("m/44'/111111'/0'/0/{index}");
        Account {
            id: Account::make_id("w1", &path),
            index,
            path,
            public_key: vec![0x02; 33],
            address: Address::from_xonly([index as u8 + 1; 32], Network::Testnet),
            keyring,
        }
    }

    #[test]
    fn upsert_reports_new() {
        let store = AccountStore::new();
        assert!(store.upsert(account(0, KeyringKind::Software)));
        assert!(!store.upsert(account(0, KeyringKind::Software)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_replaces_changed_record() {
        let store = AccountStore::new();
        let mut a = account(0, KeyringKind::Software);
        store.upsert(a.clone());
        a.public_key = vec![0x03; 33];
        assert!(!store.upsert(a.clone()));
        assert_eq!(store.get(&a.id), Some(a));
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_upserts_keep_one_record() {
        let store = Arc::new(AccountStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.upsert(account(7, KeyringKind::Software)) })
            })
            .collect();
        let mut created = 0;
        for h in handles {
            if h.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.len(), 1);
    }
}
