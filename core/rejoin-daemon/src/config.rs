//! Runtime configuration, loaded from `~/.rejoin/config.toml`.
//!
//! Every field has a default so a missing file, or a file that only sets a
//! couple of keys, still produces a usable config.

use rejoin_protocol::{DEFAULT_ACCOUNTS_FILE, DEFAULT_LOG_DIR, DEFAULT_PACKAGE_PREFIX};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".rejoin/config.toml";
pub const CONFIG_PATH_ENV: &str = "REJOIN_CONFIG";
pub const WEBHOOK_URL_ENV: &str = "REJOIN_WEBHOOK_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHome,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default = "default_first_remediation_delay_secs")]
    pub first_remediation_delay_secs: f64,
    #[serde(default = "default_first_jitter_secs")]
    pub first_jitter_secs: f64,
    #[serde(default = "default_steady_jitter_min_secs")]
    pub steady_jitter_min_secs: f64,
    #[serde(default = "default_steady_jitter_max_secs")]
    pub steady_jitter_max_secs: f64,
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: f64,
    #[serde(default = "default_teleport_timeout_secs")]
    pub teleport_timeout_secs: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_parallel_remediations")]
    pub max_parallel_remediations: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            first_remediation_delay_secs: default_first_remediation_delay_secs(),
            first_jitter_secs: default_first_jitter_secs(),
            steady_jitter_min_secs: default_steady_jitter_min_secs(),
            steady_jitter_max_secs: default_steady_jitter_max_secs(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            teleport_timeout_secs: default_teleport_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            max_parallel_remediations: default_max_parallel_remediations(),
        }
    }
}

impl MonitorConfig {
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn first_remediation_delay(&self) -> Duration {
        secs(self.first_remediation_delay_secs)
    }

    pub fn first_jitter(&self) -> Duration {
        secs(self.first_jitter_secs)
    }

    pub fn steady_jitter(&self) -> (Duration, Duration) {
        (
            secs(self.steady_jitter_min_secs),
            secs(self.steady_jitter_max_secs),
        )
    }

    pub fn heartbeat_stale(&self) -> Duration {
        secs(self.heartbeat_stale_secs)
    }

    pub fn teleport_timeout(&self) -> Duration {
        secs(self.teleport_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_accounts_file")]
    pub accounts_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_package_prefix")]
    pub package_prefix: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            accounts_file: default_accounts_file(),
            log_dir: default_log_dir(),
            package_prefix: default_package_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_interval_minutes")]
    pub interval_minutes: f64,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub send_screenshot: bool,
    #[serde(default = "default_screenshot_command")]
    pub screenshot_command: Vec<String>,
    /// Where captures are written; the system temp dir when unset.
    #[serde(default)]
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_report_interval_minutes(),
            webhook_url: None,
            send_screenshot: false,
            screenshot_command: default_screenshot_command(),
            screenshot_dir: None,
        }
    }
}

impl ReportConfig {
    pub fn interval(&self) -> Duration {
        secs(self.interval_minutes * 60.0)
    }

    pub fn resolved_screenshot_dir(&self) -> PathBuf {
        self.screenshot_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Webhook from the config file, or from `REJOIN_WEBHOOK_URL` when unset.
    pub fn resolved_webhook_url(&self) -> Option<String> {
        self.webhook_url
            .clone()
            .or_else(|| std::env::var(WEBHOOK_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Argv templates for the remediation commands. `{package}`, `{game_id}` and
/// `{account}` are substituted per account.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_stop_command")]
    pub stop_command: Vec<String>,
    #[serde(default = "default_deep_link_command")]
    pub deep_link_command: Vec<String>,
    #[serde(default = "default_launch_command")]
    pub launch_command: Vec<String>,
    /// A command still running after this long is killed.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stop_command: default_stop_command(),
            deep_link_command: default_deep_link_command(),
            launch_command: default_launch_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        secs(self.command_timeout_secs).max(Duration::from_millis(1))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RejoinConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

fn default_cooldown_secs() -> f64 {
    20.0
}

fn default_first_remediation_delay_secs() -> f64 {
    30.0
}

fn default_first_jitter_secs() -> f64 {
    5.0
}

fn default_steady_jitter_min_secs() -> f64 {
    3.0
}

fn default_steady_jitter_max_secs() -> f64 {
    8.0
}

fn default_heartbeat_stale_secs() -> f64 {
    45.0
}

fn default_teleport_timeout_secs() -> f64 {
    60.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    600
}

fn default_max_parallel_remediations() -> usize {
    4
}

fn default_accounts_file() -> PathBuf {
    PathBuf::from(DEFAULT_ACCOUNTS_FILE)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_package_prefix() -> String {
    DEFAULT_PACKAGE_PREFIX.to_string()
}

fn default_report_interval_minutes() -> f64 {
    10.0
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn default_screenshot_command() -> Vec<String> {
    argv(&["screencap", "-p", "{path}"])
}

fn default_stop_command() -> Vec<String> {
    argv(&["am", "force-stop", "{package}"])
}

fn default_deep_link_command() -> Vec<String> {
    argv(&[
        "am",
        "start",
        "-a",
        "android.intent.action.VIEW",
        "-d",
        "roblox://placeId={game_id}",
        "{package}",
    ])
}

fn default_launch_command() -> Vec<String> {
    argv(&[
        "monkey",
        "-p",
        "{package}",
        "-c",
        "android.intent.category.LAUNCHER",
        "1",
    ])
}

fn default_command_timeout_secs() -> f64 {
    30.0
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<RejoinConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(RejoinConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<RejoinConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(Some(temp_dir.path().join("missing.toml"))).expect("load config");
        assert_eq!(config.monitor.cooldown(), Duration::from_secs(20));
        assert_eq!(config.monitor.first_remediation_delay(), Duration::from_secs(30));
        assert_eq!(config.monitor.heartbeat_stale(), Duration::from_secs(45));
        assert_eq!(config.report.interval(), Duration::from_secs(600));
        assert_eq!(config.accounts.package_prefix, "com.roblox");
        assert!(!config.report.send_screenshot);
        assert_eq!(config.executor.stop_command[0], "am");
        assert_eq!(config.executor.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.report.resolved_screenshot_dir(), std::env::temp_dir());
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[monitor]
cooldown_secs = 12.5
heartbeat_stale_secs = 90
settle_ms = 0

[accounts]
log_dir = "/tmp/rejoin-logs"
package_prefix = ""

[report]
interval_minutes = 0.5
webhook_url = "https://example.invalid/hook"
send_screenshot = true
screenshot_dir = "/tmp/rejoin-shots"

[executor]
stop_command = ["sh", "-c", "echo stop {package}"]
command_timeout_secs = 2.5
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.monitor.cooldown(), Duration::from_millis(12_500));
        assert_eq!(config.monitor.heartbeat_stale(), Duration::from_secs(90));
        assert_eq!(config.monitor.settle(), Duration::ZERO);
        assert_eq!(config.monitor.first_remediation_delay(), Duration::from_secs(30));
        assert_eq!(config.accounts.log_dir, PathBuf::from("/tmp/rejoin-logs"));
        assert_eq!(config.accounts.package_prefix, "");
        assert_eq!(config.report.interval(), Duration::from_secs(30));
        assert_eq!(
            config.report.resolved_webhook_url().as_deref(),
            Some("https://example.invalid/hook")
        );
        assert!(config.report.send_screenshot);
        assert_eq!(config.executor.stop_command.len(), 3);
        assert_eq!(config.executor.launch_command[0], "monkey");
        assert_eq!(config.executor.command_timeout(), Duration::from_millis(2_500));
        assert_eq!(
            config.report.resolved_screenshot_dir(),
            PathBuf::from("/tmp/rejoin-shots")
        );
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[monitor\ncooldown_secs = ").expect("write config");
        assert!(matches!(
            load_config(Some(path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let config = MonitorConfig {
            cooldown_secs: -5.0,
            steady_jitter_min_secs: f64::NAN,
            ..MonitorConfig::default()
        };
        assert_eq!(config.cooldown(), Duration::ZERO);
        assert_eq!(config.steady_jitter().0, Duration::ZERO);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
