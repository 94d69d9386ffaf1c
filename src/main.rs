use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

mod cli;
mod core;
mod daemon;
mod providers;

use crate::core::settings::Settings;

#[derive(Parser)]
#[command(name = "player-poller")]
#[command(author, version, about = "Polls a rate-limited player API for many accounts")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling daemon until interrupted
    Daemon,

    /// Show tracked accounts and the last recorded backoff state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch and clean a single player once
    Poll {
        /// Player UUID
        uuid: String,

        /// Also fetch the status endpoint
        #[arg(long)]
        status: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn log_filter(debug: bool) -> EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// The returned handle lets `debug = true` in the config raise the level
/// once settings are loaded.
fn init_logging(debug: bool, json: bool) -> FilterHandle {
    let (filter, handle) = reload::Layer::new(log_filter(debug));

    let journald = std::env::var_os("JOURNAL_STREAM")
        .and_then(|_| tracing_journald::layer().ok());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(journald)
        .init();

    handle
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    let log_filter_handle = init_logging(cli.verbose, cli.log_json);
    let settings = load_settings(cli.config.as_ref())?;
    if settings.debug && !cli.verbose {
        if let Err(e) = log_filter_handle.reload(log_filter(true)) {
            tracing::warn!(error = %e, "Failed to raise log level");
        }
    }

    match cli.command {
        Commands::Daemon => {
            let config_path = cli.config.or_else(Settings::config_path);
            daemon::run(settings, config_path).await
        }
        Commands::Status { json } => cli::status::run(&settings, json).await,
        Commands::Poll { uuid, status, json } => {
            cli::poll::run(&settings, &uuid, status, json).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}
