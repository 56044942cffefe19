//! Periodic status reports.
//!
//! The reporter runs on its own thread and only reads monitoring state.
//! Anything that goes wrong here (no webhook configured, network down,
//! screenshot tool missing) skips the cycle and never reaches the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::accounts::AccountSet;
use crate::config::ReportConfig;
use crate::process::{ProcessInfo, ProcessProbe};
use crate::state::{elapsed_between, MonitorStore};

const STOP_POLL: Duration = Duration::from_millis(250);
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);
const SCREENSHOT_FILE_NAME: &str = "rejoin-status.png";
/// Discord rejects a message whose `content` exceeds this many characters.
pub const WEBHOOK_CONTENT_LIMIT: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("No webhook configured")]
    NotConfigured,

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Report I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub package: String,
    pub running: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_remediation: Option<DateTime<Utc>>,
    pub remediations: u64,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub accounts: Vec<AccountStatus>,
}

impl StatusSnapshot {
    pub fn running_count(&self) -> usize {
        self.accounts.iter().filter(|status| status.running).count()
    }

    pub fn total_remediations(&self) -> u64 {
        self.accounts.iter().map(|status| status.remediations).sum()
    }
}

pub fn build_snapshot(
    accounts: &AccountSet,
    store: &MonitorStore,
    processes: &HashMap<String, ProcessInfo>,
    now: DateTime<Utc>,
) -> StatusSnapshot {
    let statuses = accounts
        .iter()
        .map(|account| {
            let state = store.get(&account.id).unwrap_or_default();
            let process = processes
                .get(account.package())
                .copied()
                .unwrap_or_default();
            AccountStatus {
                account_id: account.id.clone(),
                package: account.package().to_string(),
                running: process.running,
                last_seen: state.last_seen,
                last_remediation: state.last_remediation,
                remediations: state.remediation_count,
                memory_bytes: process.memory_bytes,
                cpu_percent: process.cpu_percent,
            }
        })
        .collect();

    StatusSnapshot {
        generated_at: now,
        accounts: statuses,
    }
}

pub fn format_report(snapshot: &StatusSnapshot) -> String {
    let now = snapshot.generated_at;
    let mut lines = vec![
        format!(
            "Rejoin status {}",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!(
            "Accounts: {} | running: {} | rejoins: {}",
            snapshot.accounts.len(),
            snapshot.running_count(),
            snapshot.total_remediations()
        ),
    ];

    for status in &snapshot.accounts {
        let state = if status.running { "RUNNING" } else { "STOPPED" };
        let seen = status
            .last_seen
            .map(|at| format!("seen {} ago", humanize(elapsed_between(at, now))))
            .unwrap_or_else(|| "never seen".to_string());
        let rejoined = status
            .last_remediation
            .map(|at| format!("last rejoin {} ago", humanize(elapsed_between(at, now))))
            .unwrap_or_else(|| "no rejoins".to_string());
        let mut line = format!(
            "- {} [{}] {} | {} | {} (x{})",
            status.account_id, status.package, state, seen, rejoined, status.remediations
        );
        if status.memory_bytes > 0 {
            line.push_str(&format!(
                " | mem {} MB, cpu {:.0}%",
                status.memory_bytes / (1024 * 1024),
                status.cpu_percent
            ));
        }
        lines.push(line);
    }

    lines.join("\n")
}

fn humanize(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Splits `text` into pieces of at most `limit` characters, breaking at
/// newlines where possible. Concatenating the pieces yields `text`.
pub fn split_content(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        for c in line.chars() {
            if current_len == limit {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(c);
            current_len += 1;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub trait NotificationSink: Send {
    fn send(&self, text: &str, screenshot: Option<&Path>) -> Result<(), ReportError>;
}

/// Posts to a Discord-style webhook: JSON `{"content": ...}`, or multipart
/// with `payload_json` plus the image when a screenshot is attached.
pub struct WebhookSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, ReportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl WebhookSink {
    fn post(&self, content: &str, screenshot: Option<&Path>) -> Result<(), ReportError> {
        let payload = json!({ "content": content });
        let request = match screenshot {
            Some(path) => {
                let form = reqwest::blocking::multipart::Form::new()
                    .text("payload_json", payload.to_string())
                    .file("file", path)?;
                self.client.post(&self.url).multipart(form)
            }
            None => self.client.post(&self.url).json(&payload),
        };

        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Status report delivered");
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(ReportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl NotificationSink for WebhookSink {
    /// Long reports go out as several messages; the screenshot rides on the
    /// first.
    fn send(&self, text: &str, screenshot: Option<&Path>) -> Result<(), ReportError> {
        let chunks = split_content(text, WEBHOOK_CONTENT_LIMIT);
        if chunks.len() > 1 {
            debug!(messages = chunks.len(), "Splitting status report");
        }
        for (index, chunk) in chunks.iter().enumerate() {
            let attachment = if index == 0 { screenshot } else { None };
            self.post(chunk, attachment)?;
        }
        Ok(())
    }
}

/// Runs the configured screenshot command, substituting `{path}`.
pub fn capture_screenshot(template: &[String], path: &Path) -> Result<PathBuf, ReportError> {
    let argv: Vec<String> = template
        .iter()
        .map(|part| part.replace("{path}", &path.to_string_lossy()))
        .collect();
    let Some((program, args)) = argv.split_first() else {
        return Err(ReportError::Screenshot("no screenshot command".to_string()));
    };

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| ReportError::Screenshot(format!("{}: {}", program, err)))?;
    if !status.success() {
        return Err(ReportError::Screenshot(format!("{} exited with {}", program, status)));
    }
    if !path.exists() {
        return Err(ReportError::Screenshot(format!(
            "{} produced no file at {}",
            program,
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

pub struct StatusReporter {
    config: ReportConfig,
    accounts: Arc<AccountSet>,
    store: Arc<MonitorStore>,
    probe: Box<dyn ProcessProbe>,
    sink: Option<Box<dyn NotificationSink>>,
    screenshot_dir: PathBuf,
}

impl StatusReporter {
    pub fn new(
        config: ReportConfig,
        accounts: Arc<AccountSet>,
        store: Arc<MonitorStore>,
        probe: Box<dyn ProcessProbe>,
        sink: Option<Box<dyn NotificationSink>>,
    ) -> Self {
        let screenshot_dir = config.resolved_screenshot_dir();
        Self {
            config,
            accounts,
            store,
            probe,
            sink,
            screenshot_dir,
        }
    }

    pub fn snapshot(&mut self, now: DateTime<Utc>) -> StatusSnapshot {
        let packages: Vec<&str> = self.accounts.iter().map(|account| account.package()).collect();
        let processes = self.probe.probe(&packages);
        build_snapshot(&self.accounts, &self.store, &processes, now)
    }

    /// Builds and sends one report.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<StatusSnapshot, ReportError> {
        let snapshot = self.snapshot(now);
        let Some(sink) = self.sink.as_ref() else {
            return Err(ReportError::NotConfigured);
        };

        let text = format_report(&snapshot);
        let screenshot = if self.config.send_screenshot {
            let path = self.screenshot_dir.join(SCREENSHOT_FILE_NAME);
            match capture_screenshot(&self.config.screenshot_command, &path) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, "Screenshot unavailable; sending text only");
                    None
                }
            }
        } else {
            None
        };

        sink.send(&text, screenshot.as_deref())?;
        info!(
            accounts = snapshot.accounts.len(),
            running = snapshot.running_count(),
            "Status report sent"
        );
        Ok(snapshot)
    }
}

pub fn spawn_reporter(
    mut reporter: StatusReporter,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let interval = reporter.config.interval().max(Duration::from_secs(1));
    thread::Builder::new()
        .name("status-report".to_string())
        .spawn(move || {
            let mut next_report = Instant::now() + interval;
            while !stop.load(Ordering::Relaxed) {
                if Instant::now() < next_report {
                    thread::sleep(STOP_POLL.min(next_report.saturating_duration_since(Instant::now())));
                    continue;
                }
                next_report = Instant::now() + interval;
                match reporter.run_cycle(Utc::now()) {
                    Ok(_) => {}
                    Err(ReportError::NotConfigured) => {
                        debug!("Status report skipped: no webhook configured");
                    }
                    Err(err) => warn!(error = %err, "Status report skipped"),
                }
            }
            debug!("Status reporter stopped");
        })
}
