use rejoin_protocol::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("No username found in {0}")]
    UsernameNotFound(PathBuf),

    #[error("Package listing failed: {0}")]
    PackageListing(String),

    #[error("Invalid --details JSON: {0}")]
    InvalidDetails(#[source] serde_json::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Android ID must be non-empty and alphanumeric: {0:?}")]
    InvalidAndroidId(String),

    #[error("{command} failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("Account id must be a plain file name: {0:?}")]
    InvalidAccountId(String),
}
