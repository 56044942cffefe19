//! rejoin-cli: operator tooling for the rejoin daemon.
//!
//! ## Subcommands
//!
//! - `accounts`: List the account registry
//! - `register`: Add one package as an account (username from prefs.xml)
//! - `discover`: List installed client packages, optionally registering them
//! - `android-id`: Set the device's Android ID (root)
//! - `emit`: Append an event record to an account's log (manual testing)

mod accounts;
mod device;
mod emit;
mod error;
mod logging;

use clap::{Parser, Subcommand};
use rejoin_protocol::{
    EventKind, Severity, DEFAULT_ACCOUNTS_FILE, DEFAULT_LOG_DIR, DEFAULT_PACKAGE_PREFIX,
};
use std::path::PathBuf;

use error::CliError;

#[derive(Parser)]
#[command(name = "rejoin-cli")]
#[command(about = "Account and event-log tooling for rejoin-daemon")]
#[command(version)]
struct Cli {
    /// Account registry JSON
    #[arg(long, global = true, default_value = DEFAULT_ACCOUNTS_FILE)]
    accounts_file: PathBuf,

    /// Directory holding per-account event logs
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Root of per-package app data (prefs.xml lookup)
    #[arg(long, global = true, default_value = device::DEFAULT_DATA_ROOT)]
    data_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured accounts
    Accounts,

    /// Register a package as an account
    Register {
        /// Package name (e.g., com.roblox.client)
        #[arg(long)]
        package: String,

        /// Place id to rejoin
        #[arg(long)]
        game_id: String,

        /// Account name; read from the package's prefs.xml when omitted
        #[arg(long)]
        user: Option<String>,
    },

    /// List installed packages and their usernames
    Discover {
        #[arg(long, default_value = DEFAULT_PACKAGE_PREFIX)]
        prefix: String,

        /// Register every discovered account with this place id
        #[arg(long)]
        game_id: Option<String>,
    },

    /// Set the device's Android ID (requires root)
    AndroidId {
        #[arg(long)]
        id: String,
    },

    /// Append an event record to an account's log
    Emit {
        #[arg(long)]
        account: String,

        /// RUNNING, ERROR, KICK, CRASH, DISCONNECT, TELEPORT_BEGIN, TELEPORT_END
        #[arg(long)]
        event: EventKind,

        #[arg(long)]
        code: Option<String>,

        /// INFO, MINOR or SEVERE
        #[arg(long, default_value = "INFO")]
        severity: Severity,

        /// Arbitrary JSON payload
        #[arg(long)]
        details: Option<String>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "rejoin-cli failed");
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, CliError> {
    match cli.command {
        Commands::Accounts => accounts::list(&cli.accounts_file),
        Commands::Register {
            package,
            game_id,
            user,
        } => {
            let account_id = accounts::register(
                &cli.accounts_file,
                &cli.data_root,
                &package,
                &game_id,
                user.as_deref(),
            )?;
            Ok(format!("Registered {} ({})", account_id, package))
        }
        Commands::Discover { prefix, game_id } => {
            let packages = device::list_packages(&prefix)?;
            let discovered = accounts::discover_packages(&cli.data_root, packages);
            let mut output = accounts::format_discovered(&discovered);
            if let Some(game_id) = game_id {
                let registered =
                    accounts::register_discovered(&cli.accounts_file, &discovered, &game_id)?;
                output.push_str(&format!("\nRegistered {} account(s)", registered.len()));
            }
            Ok(output)
        }
        Commands::AndroidId { id } => {
            device::set_android_id(&id)?;
            Ok(format!("Android ID set to {}", id.trim()))
        }
        Commands::Emit {
            account,
            event,
            code,
            severity,
            details,
        } => {
            let request = emit::EmitRequest {
                account: &account,
                event,
                code: code.as_deref(),
                severity,
                details: details.as_deref(),
            };
            let path = emit::run(&cli.log_dir, &request)?;
            Ok(format!("Appended {} to {}", event, path.display()))
        }
    }
}
