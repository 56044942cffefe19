//! Account registry: the JSON file mapping account ids to their launch targets.
//!
//! ```json
//! { "alice": { "pkg": "com.roblox.client", "gid": "920587237" } }
//! ```

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Account registry not found: {0}")]
    NotFound(PathBuf),

    #[error("Account registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Account registry malformed: {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Package (launch target) that hosts the session.
    pub pkg: String,
    /// Game/place the session should rejoin.
    #[serde(default)]
    pub gid: String,
}

impl AccountEntry {
    pub fn new(pkg: impl Into<String>, gid: impl Into<String>) -> Self {
        Self {
            pkg: pkg.into(),
            gid: gid.into(),
        }
    }

    /// Numeric game ids can be deep-linked; anything else needs a plain launch.
    pub fn numeric_game_id(&self) -> Option<&str> {
        let gid = self.gid.trim();
        if !gid.is_empty() && gid.bytes().all(|b| b.is_ascii_digit()) {
            Some(gid)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountRegistry {
    accounts: BTreeMap<String, AccountEntry>,
}

impl AccountRegistry {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(path.to_path_buf()))
            }
            Err(err) => return Err(RegistryError::Io(err)),
        };
        serde_json::from_slice(&data).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`AccountRegistry::load`], but a missing file is an empty registry.
    pub fn load_or_default(path: &Path) -> Result<Self, RegistryError> {
        match Self::load(path) {
            Err(RegistryError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(self).map_err(|source| RegistryError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn upsert(&mut self, account_id: impl Into<String>, entry: AccountEntry) {
        self.accounts.insert(account_id.into(), entry);
    }

    pub fn get(&self, account_id: &str) -> Option<&AccountEntry> {
        self.accounts.get(account_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AccountEntry)> {
        self.accounts.iter()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Keeps only accounts whose package starts with `prefix`. An empty prefix
    /// keeps everything.
    pub fn filter_by_package_prefix(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        Self {
            accounts: self
                .accounts
                .into_iter()
                .filter(|(_, entry)| entry.pkg.starts_with(prefix))
                .collect(),
        }
    }
}
