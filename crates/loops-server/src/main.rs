use std::fmt;

use clap::{Parser, Subcommand};
use loops_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use loops_server::{app, observability};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "loops-server")]
#[command(about = "Loops email provider controllers and webhook")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "LOOPS_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Contact and ContactGroupMembership controllers
    Manager,
    /// Run the signed webhook receiver alone, over a private in-memory store no controller reads
    ///
    /// Memberships and removals it records are never pushed to Loops. Use `run`
    /// to serve the webhook and the controllers over one store.
    Webhook,
    /// Run controllers and webhook over one shared store
    Run,
    /// Print version information
    Version,
}

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config or LOOPS_CONFIG
    Explicit,
    /// Default path (loops.toml)
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => write!(f, "--config / LOOPS_CONFIG"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let cli = Cli::parse();
    if matches!(cli.command, Commands::Version) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    let (config_path, source) = match cli.config {
        Some(path) => (path, ConfigSource::Explicit),
        None => (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default),
    };
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&cfg.logging);
    tracing::info!(path = %config_path, source = %source, "Configuration loaded");

    let shutdown = CancellationToken::new();
    app::cancel_on_ctrl_c(shutdown.clone());

    let result = match cli.command {
        Commands::Manager => async {
            let store = app::prepare_store(&cfg).await?;
            app::run_manager(&cfg, store, shutdown).await
        }
        .await,
        Commands::Webhook => async {
            tracing::warn!(
                "webhook runs without controllers; recorded memberships are not synced to Loops"
            );
            let store = app::prepare_store(&cfg).await?;
            let listener = app::bind(&cfg).await?;
            app::serve_webhook(&cfg, store, listener, shutdown).await
        }
        .await,
        Commands::Run => app::run_all(&cfg, shutdown).await,
        Commands::Version => Ok(()),
    };

    if let Err(err) = result {
        tracing::error!(error = format!("{err:#}"), "exiting with error");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
