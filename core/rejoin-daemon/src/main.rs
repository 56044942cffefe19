//! Rejoin daemon entrypoint.
//!
//! One watcher thread per account tails its event log and forwards lines to a
//! single consumer loop. The consumer owns the scheduler; remediations run on
//! a small worker pool so one slow relaunch never blocks another account.

use chrono::Utc;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod accounts;
mod classifier;
mod config;
mod event;
mod executor;
mod heartbeat;
mod process;
mod remediation;
mod report;
mod scheduler;
mod state;
mod watcher;

use accounts::load_accounts;
use config::{load_config, RejoinConfig};
use event::MonitorEvent;
use executor::CommandExecutor;
use heartbeat::StaleDetector;
use process::SysinfoProbe;
use remediation::RemediationPool;
use report::{NotificationSink, StatusReporter, WebhookSink};
use scheduler::{RemediationPolicy, Scheduler};
use state::MonitorStore;
use watcher::{spawn_watcher, LogTailer, WatchLine};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const DEBUG_LOG_ENV: &str = "REJOIN_DEBUG_LOG";

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            RejoinConfig::default()
        }
    };

    let accounts = match load_accounts(&config.accounts) {
        Ok(accounts) => accounts,
        Err(err) => {
            error!(
                error = %err,
                path = %config.accounts.accounts_file.display(),
                "Failed to load account registry"
            );
            std::process::exit(1);
        }
    };
    if accounts.is_empty() {
        error!(
            path = %config.accounts.accounts_file.display(),
            prefix = %config.accounts.package_prefix,
            "No accounts to supervise"
        );
        std::process::exit(1);
    }
    let accounts = Arc::new(accounts);

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&stop)) {
            warn!(error = %err, signal, "Failed to install signal handler");
        }
    }

    let store = Arc::new(MonitorStore::new(accounts.ids()));
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let pool = match RemediationPool::start(
        config.monitor.max_parallel_remediations,
        config.monitor.settle(),
        executor,
        Arc::clone(&store),
    ) {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "Failed to start remediation workers");
            std::process::exit(1);
        }
    };
    let policy = RemediationPolicy::from(&config.monitor);
    let mut scheduler = Scheduler::new(policy, Arc::clone(&accounts), Arc::clone(&store), pool);
    let mut detector = StaleDetector::from_config(&config.monitor);

    let (sender, receiver) = mpsc::channel::<WatchLine>();
    let mut watchers = Vec::with_capacity(accounts.len());
    for account in accounts.iter() {
        let tailer = LogTailer::new(&account.log_path);
        match spawn_watcher(
            account.id.clone(),
            tailer,
            config.monitor.poll_interval(),
            sender.clone(),
            Arc::clone(&stop),
        ) {
            Ok(handle) => watchers.push(handle),
            Err(err) => {
                error!(account = %account.id, error = %err, "Failed to start watcher");
            }
        }
    }
    drop(sender);

    let reporter = StatusReporter::new(
        config.report.clone(),
        Arc::clone(&accounts),
        Arc::clone(&store),
        Box::new(SysinfoProbe::new()),
        notification_sink(&config),
    );
    let reporter_handle = match report::spawn_reporter(reporter, Arc::clone(&stop)) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(error = %err, "Failed to start status reporter");
            None
        }
    };

    info!(
        accounts = accounts.len(),
        cooldown_secs = policy.cooldown.as_secs_f64(),
        first_delay_secs = policy.first_delay.as_secs_f64(),
        stale_secs = config.monitor.heartbeat_stale().as_secs_f64(),
        workers = config.monitor.max_parallel_remediations,
        "Rejoin daemon started"
    );

    while !stop.load(Ordering::Relaxed) {
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(message) => {
                match MonitorEvent::from_line(&message.account_id, &message.line) {
                    Some(event) => {
                        scheduler.on_event(&event, Utc::now());
                    }
                    None => {
                        debug!(account = %message.account_id, "Dropping unparseable log line");
                    }
                }
                if detector.is_due() {
                    detector.sweep(&mut scheduler, Utc::now());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                detector.sweep(&mut scheduler, Utc::now());
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("All watchers exited");
                break;
            }
        }
    }

    info!("Rejoin daemon shutting down");
    stop.store(true, Ordering::Relaxed);
    drop(scheduler);
    for handle in watchers {
        let _ = handle.join();
    }
    if let Some(handle) = reporter_handle {
        let _ = handle.join();
    }
}

fn notification_sink(config: &RejoinConfig) -> Option<Box<dyn NotificationSink>> {
    let url = config.report.resolved_webhook_url()?;
    match WebhookSink::new(url) {
        Ok(sink) => Some(Box::new(sink)),
        Err(err) => {
            warn!(error = %err, "Failed to build webhook client; status reports disabled");
            None
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
