//! Account registry commands: `accounts`, `register`, `discover`.

use rejoin_protocol::{AccountEntry, AccountRegistry};
use std::path::Path;
use tracing::{info, warn};

use crate::device;
use crate::error::CliError;

pub fn format_accounts(registry: &AccountRegistry) -> String {
    if registry.is_empty() {
        return "No accounts configured.".to_string();
    }
    registry
        .iter()
        .map(|(account_id, entry)| {
            let gid = if entry.gid.is_empty() { "-" } else { entry.gid.as_str() };
            format!("- {}: package={}, game_id={}", account_id, entry.pkg, gid)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn list(accounts_file: &Path) -> Result<String, CliError> {
    let registry = AccountRegistry::load_or_default(accounts_file)?;
    Ok(format_accounts(&registry))
}

/// Adds or replaces one account. The username comes from the package's
/// prefs.xml unless `user` is given. Returns the account id.
pub fn register(
    accounts_file: &Path,
    data_root: &Path,
    package: &str,
    game_id: &str,
    user: Option<&str>,
) -> Result<String, CliError> {
    let account_id = match user {
        Some(user) => user.trim().to_string(),
        None => device::read_username(data_root, package)?,
    };
    validate_account_id(&account_id)?;

    let mut registry = AccountRegistry::load_or_default(accounts_file)?;
    registry.upsert(account_id.clone(), AccountEntry::new(package, game_id.trim()));
    registry.save(accounts_file)?;
    info!(account = %account_id, package, game_id, "Account registered");
    Ok(account_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub package: String,
    pub username: Option<String>,
}

pub fn discover_packages(data_root: &Path, packages: Vec<String>) -> Vec<Discovered> {
    packages
        .into_iter()
        .map(|package| {
            let username = match device::read_username(data_root, &package) {
                Ok(username) => Some(username),
                Err(err) => {
                    warn!(package = %package, error = %err, "No username for package");
                    None
                }
            };
            Discovered { package, username }
        })
        .collect()
}

/// Registers every discovered package that has a username under `game_id`.
/// Returns the registered account ids.
pub fn register_discovered(
    accounts_file: &Path,
    discovered: &[Discovered],
    game_id: &str,
) -> Result<Vec<String>, CliError> {
    let mut registry = AccountRegistry::load_or_default(accounts_file)?;
    let mut registered = Vec::new();
    for item in discovered {
        let Some(username) = item.username.as_deref() else {
            continue;
        };
        if validate_account_id(username).is_err() {
            warn!(package = %item.package, username, "Skipping unusable username");
            continue;
        }
        registry.upsert(username, AccountEntry::new(item.package.clone(), game_id.trim()));
        registered.push(username.to_string());
    }
    if !registered.is_empty() {
        registry.save(accounts_file)?;
        info!(count = registered.len(), game_id, "Discovered accounts registered");
    }
    Ok(registered)
}

pub fn format_discovered(discovered: &[Discovered]) -> String {
    if discovered.is_empty() {
        return "No matching packages installed.".to_string();
    }
    discovered
        .iter()
        .map(|item| match &item.username {
            Some(username) => format!("- {}: {}", item.package, username),
            None => format!("- {}: (no username)", item.package),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Account ids double as log file names.
pub fn validate_account_id(account_id: &str) -> Result<(), CliError> {
    let valid = !account_id.is_empty()
        && account_id != "."
        && account_id != ".."
        && !account_id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(CliError::InvalidAccountId(account_id.to_string()))
    }
}
