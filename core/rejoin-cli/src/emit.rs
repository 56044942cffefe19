//! `emit`: append one record to an account's event log.

use chrono::Utc;
use fs_err::OpenOptions;
use rejoin_protocol::{encode_record, log_path, EventKind, LogRecord, Severity};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::accounts::validate_account_id;
use crate::error::CliError;

pub struct EmitRequest<'a> {
    pub account: &'a str,
    pub event: EventKind,
    pub code: Option<&'a str>,
    pub severity: Severity,
    pub details: Option<&'a str>,
}

pub fn build_record(request: &EmitRequest<'_>, t: f64) -> Result<LogRecord, CliError> {
    let mut record = LogRecord::new(request.event, t).with_severity(request.severity);
    record.user = Some(request.account.to_string());
    if let Some(code) = request.code.filter(|code| !code.is_empty()) {
        record = record.with_code(code);
    }
    if let Some(details) = request.details {
        let value = serde_json::from_str(details).map_err(CliError::InvalidDetails)?;
        record = record.with_details(value);
    }
    Ok(record)
}

/// Appends the record as one line and returns the log path written to.
pub fn run(log_dir: &Path, request: &EmitRequest<'_>) -> Result<PathBuf, CliError> {
    validate_account_id(request.account)?;
    let t = Utc::now().timestamp_millis() as f64 / 1000.0;
    let record = build_record(request, t)?;
    let line = encode_record(&record).map_err(CliError::Encode)?;

    fs_err::create_dir_all(log_dir)?;
    let path = log_path(log_dir, request.account);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(format!("{}\n", line).as_bytes())?;

    info!(
        account = %request.account,
        event = %record.event,
        code = record.code(),
        "Event appended"
    );
    Ok(path)
}
