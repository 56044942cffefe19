//! Stop/start primitives for a supervised session.
//!
//! The scheduler only decides when to act; how a session is stopped or
//! launched lives behind [`SessionExecutor`]. The production implementation
//! runs configurable argv templates (Android `am`/`monkey` by default).

use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::accounts::Account;
use crate::config::ExecutorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No command configured for {0}")]
    EmptyCommand(&'static str),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMethod {
    /// Launched straight into the account's game.
    DeepLink,
    /// Plain app launch by package name.
    Launch,
}

pub trait SessionExecutor: Send + Sync {
    fn stop(&self, account: &Account) -> Result<(), ExecutorError>;
    fn start(&self, account: &Account) -> Result<LaunchMethod, ExecutorError>;
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }
}

impl SessionExecutor for CommandExecutor {
    fn stop(&self, account: &Account) -> Result<(), ExecutorError> {
        run_command(
            "stop",
            &render(&self.config.stop_command, account),
            self.config.command_timeout(),
        )
    }

    fn start(&self, account: &Account) -> Result<LaunchMethod, ExecutorError> {
        if account.entry.numeric_game_id().is_some() {
            match run_command(
                "deep link",
                &render(&self.config.deep_link_command, account),
                self.config.command_timeout(),
            ) {
                Ok(()) => return Ok(LaunchMethod::DeepLink),
                Err(err) => {
                    tracing::warn!(
                        account = %account.id,
                        error = %err,
                        "Deep link failed; falling back to plain launch"
                    );
                }
            }
        }

        run_command(
            "launch",
            &render(&self.config.launch_command, account),
            self.config.command_timeout(),
        )?;
        Ok(LaunchMethod::Launch)
    }
}

fn render(template: &[String], account: &Account) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            part.replace("{package}", &account.entry.pkg)
                .replace("{game_id}", account.entry.gid.trim())
                .replace("{account}", &account.id)
        })
        .collect()
}

fn run_command(
    label: &'static str,
    argv: &[String],
    timeout: Duration,
) -> Result<(), ExecutorError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ExecutorError::EmptyCommand(label));
    };
    let command = argv.join(" ");
    let spawn_error = |source: std::io::Error| ExecutorError::Spawn {
        command: command.clone(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    if child.wait_timeout(timeout).map_err(spawn_error)?.is_none() {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExecutorError::TimedOut {
            command: command.clone(),
            timeout,
        });
    }

    let output = child.wait_with_output().map_err(spawn_error)?;
    if output.status.success() {
        tracing::debug!(command = %command, "Command succeeded");
        return Ok(());
    }

    Err(ExecutorError::Failed {
        command,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
