//! Event-log record types shared by rejoin-daemon and its tooling.
//!
//! The monitored session appends one JSON object per line to its account's
//! log file. The daemon is the only reader; the CLI reuses the same types to
//! append well-formed records, so the schema cannot drift between the two.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod registry;

pub use registry::{AccountEntry, AccountRegistry, RegistryError};

pub const MAX_LINE_BYTES: usize = 64 * 1024;
pub const LOG_FILE_EXTENSION: &str = "log";
pub const DEFAULT_LOG_DIR: &str = "/sdcard/RonixExploit/workspace/Report Rejoin";
pub const DEFAULT_ACCOUNTS_FILE: &str = "/sdcard/Download/accounts.json";
pub const DEFAULT_PACKAGE_PREFIX: &str = "com.roblox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Running,
    Error,
    Kick,
    Crash,
    Disconnect,
    TeleportBegin,
    TeleportEnd,
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Running => "RUNNING",
            EventKind::Error => "ERROR",
            EventKind::Kick => "KICK",
            EventKind::Crash => "CRASH",
            EventKind::Disconnect => "DISCONNECT",
            EventKind::TeleportBegin => "TELEPORT_BEGIN",
            EventKind::TeleportEnd => "TELEPORT_END",
            EventKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(EventKind::Running),
            "ERROR" => Ok(EventKind::Error),
            "KICK" => Ok(EventKind::Kick),
            "CRASH" => Ok(EventKind::Crash),
            "DISCONNECT" => Ok(EventKind::Disconnect),
            "TELEPORT_BEGIN" => Ok(EventKind::TeleportBegin),
            "TELEPORT_END" => Ok(EventKind::TeleportEnd),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// Severity as reported by the monitored session. Unrecognised values are
/// treated as informational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Minor,
    Severe,
    #[default]
    #[serde(other)]
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Minor => "MINOR",
            Severity::Severe => "SEVERE",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "MINOR" => Ok(Severity::Minor),
            "SEVERE" => Ok(Severity::Severe),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One line of an account's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unix timestamp in seconds; fractional values are allowed.
    pub t: f64,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Value>,
    pub event: EventKind,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// Loggers disagree on field types; a kick must not be lost because its code
// arrived as a number or its severity as null.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => text.parse().unwrap_or_default(),
        _ => Severity::Info,
    })
}

impl LogRecord {
    pub fn new(event: EventKind, t: f64) -> Self {
        Self {
            t,
            user: None,
            uid: None,
            event,
            code: None,
            severity: Severity::Info,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line is empty")]
    Empty,

    #[error("line exceeds {MAX_LINE_BYTES} bytes")]
    TooLong,

    #[error("line is not a valid record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp must be a finite, non-negative number of seconds")]
    InvalidTimestamp,
}

pub fn parse_record(line: &str) -> Result<LogRecord, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    if trimmed.len() > MAX_LINE_BYTES {
        return Err(ParseError::TooLong);
    }

    let record: LogRecord = serde_json::from_str(trimmed)?;
    if !record.t.is_finite() || record.t < 0.0 {
        return Err(ParseError::InvalidTimestamp);
    }
    Ok(record)
}

pub fn encode_record(record: &LogRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(record)
}

/// Location of an account's event log inside the shared log directory.
pub fn log_path(log_dir: &Path, account_id: &str) -> PathBuf {
    log_dir.join(format!("{}.{}", account_id, LOG_FILE_EXTENSION))
}
