//! Events flowing from the watchers and the stale sweep into the scheduler.

use chrono::{DateTime, Utc};
use rejoin_protocol::{parse_record, EventKind, LogRecord, Severity};

use crate::classifier::{CODE_HEARTBEAT_STALE, CODE_TELEPORT_TIMEOUT};
use crate::state::timestamp_from_secs;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub record: LogRecord,
    /// Generated by the daemon rather than read from a log.
    pub synthetic: bool,
}

impl MonitorEvent {
    /// Parses one log line for `account_id`. Returns `None` for anything that
    /// is not a well-formed record.
    pub fn from_line(account_id: &str, line: &str) -> Option<Self> {
        let record = parse_record(line).ok()?;
        let timestamp = timestamp_from_secs(record.t)?;
        Some(Self {
            account_id: account_id.to_string(),
            timestamp,
            record,
            synthetic: false,
        })
    }

    pub fn heartbeat_stale(account_id: &str, now: DateTime<Utc>) -> Self {
        Self::synthetic(account_id, now, CODE_HEARTBEAT_STALE)
    }

    pub fn teleport_timeout(account_id: &str, now: DateTime<Utc>) -> Self {
        Self::synthetic(account_id, now, CODE_TELEPORT_TIMEOUT)
    }

    fn synthetic(account_id: &str, now: DateTime<Utc>, code: &str) -> Self {
        let t = now.timestamp_millis() as f64 / 1000.0;
        Self {
            account_id: account_id.to_string(),
            timestamp: now,
            record: LogRecord::new(EventKind::Error, t)
                .with_code(code)
                .with_severity(Severity::Severe),
            synthetic: true,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.record.event
    }

    /// Short description used as the remediation reason in logs.
    pub fn describe(&self) -> String {
        match self.record.code.as_deref() {
            Some(code) if !code.is_empty() => format!("{}:{}", self.record.event, code),
            _ => self.record.event.to_string(),
        }
    }
}
