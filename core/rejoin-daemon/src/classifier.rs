//! Severity classification for parsed log records.

use rejoin_protocol::{EventKind, LogRecord, Severity};

pub const CODE_HEARTBEAT_STALE: &str = "HEARTBEAT_STALE";
pub const CODE_PLAYER_REMOVED: &str = "PLAYER_REMOVED";
pub const CODE_TELEPORT_TIMEOUT: &str = "TELEPORT_TIMEOUT";

// Client error codes that always end the session.
const FATAL_CODE_PREFIXES: [&str; 5] = [
    "ERROR_267",
    "ERROR_268",
    "ERROR_273",
    "ERROR_277",
    "ERROR_279",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Unparseable input. Does not count as a sign of life.
    Ignore,
    Normal,
    Severe,
}

pub fn classify(record: Option<&LogRecord>) -> Verdict {
    let Some(record) = record else {
        return Verdict::Ignore;
    };

    if is_severe(record) {
        Verdict::Severe
    } else {
        Verdict::Normal
    }
}

fn is_severe(record: &LogRecord) -> bool {
    if record.severity == Severity::Severe {
        return true;
    }
    if matches!(
        record.event,
        EventKind::Kick | EventKind::Crash | EventKind::Disconnect
    ) {
        return true;
    }

    let code = record.code();
    code.contains(CODE_HEARTBEAT_STALE)
        || code.contains(CODE_PLAYER_REMOVED)
        || FATAL_CODE_PREFIXES
            .iter()
            .any(|prefix| code.starts_with(prefix))
}
