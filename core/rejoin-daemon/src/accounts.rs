//! The immutable set of accounts the daemon supervises.

use rejoin_protocol::{log_path, AccountEntry, AccountRegistry, RegistryError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::AccountsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub entry: AccountEntry,
    pub log_path: PathBuf,
}

impl Account {
    pub fn new(id: impl Into<String>, entry: AccountEntry, log_dir: &Path) -> Self {
        let id = id.into();
        let log_path = log_path(log_dir, &id);
        Self {
            id,
            entry,
            log_path,
        }
    }

    pub fn package(&self) -> &str {
        &self.entry.pkg
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountSet {
    accounts: BTreeMap<String, Account>,
}

impl AccountSet {
    pub fn from_registry(registry: &AccountRegistry, log_dir: &Path) -> Self {
        let accounts = registry
            .iter()
            .map(|(id, entry)| (id.clone(), Account::new(id.clone(), entry.clone(), log_dir)))
            .collect();
        Self { accounts }
    }

    pub fn get(&self, account_id: &str) -> Option<&Account> {
        self.accounts.get(account_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.accounts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl FromIterator<Account> for AccountSet {
    fn from_iter<T: IntoIterator<Item = Account>>(iter: T) -> Self {
        Self {
            accounts: iter
                .into_iter()
                .map(|account| (account.id.clone(), account))
                .collect(),
        }
    }
}

/// Loads the registry and keeps the accounts matching the package prefix.
pub fn load_accounts(config: &AccountsConfig) -> Result<AccountSet, RegistryError> {
    let registry = AccountRegistry::load(&config.accounts_file)?
        .filter_by_package_prefix(&config.package_prefix);
    Ok(AccountSet::from_registry(&registry, &config.log_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_accounts_filters_and_derives_log_paths() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let accounts_file = temp_dir.path().join("accounts.json");
        fs_err::write(
            &accounts_file,
            r#"{"alice": {"pkg": "com.roblox.client", "gid": "1"},
                "other": {"pkg": "org.example", "gid": "2"}}"#,
        )
        .expect("write registry");

        let config = AccountsConfig {
            accounts_file,
            log_dir: temp_dir.path().join("logs"),
            package_prefix: "com.roblox".to_string(),
        };
        let accounts = load_accounts(&config).expect("load accounts");

        assert_eq!(accounts.len(), 1);
        let alice = accounts.get("alice").expect("alice");
        assert_eq!(alice.package(), "com.roblox.client");
        assert_eq!(alice.log_path, temp_dir.path().join("logs").join("alice.log"));
        assert_eq!(accounts.ids().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn load_accounts_missing_registry_is_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = AccountsConfig {
            accounts_file: temp_dir.path().join("missing.json"),
            log_dir: temp_dir.path().to_path_buf(),
            package_prefix: String::new(),
        };
        assert!(matches!(
            load_accounts(&config),
            Err(RegistryError::NotFound(_))
        ));
    }
}
