//! Geomaker CLI: terminal front end for image-classification sessions.
//!
//! Provides one-shot subcommands and an interactive REPL.

mod commands;
mod repl;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Geomaker: simulated image-classification sessions with an assistant
#[derive(Parser, Debug)]
#[command(name = "geomaker", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory (holds `.geomaker/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Assistant provider override: gemini, openai or mock
    #[arg(long)]
    provider: Option<String>,

    /// Fixed RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand (starts the interactive session if omitted)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Ingest an archive, train, and print a summary
    Run {
        /// ZIP archive with one folder per class
        archive: PathBuf,
        /// Override the configured number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Override early-stopping patience
        #[arg(long)]
        patience: Option<usize>,
        /// Milliseconds between epochs
        #[arg(long)]
        tick_ms: Option<u64>,
        /// Write every export into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Train on an archive, then run a simulated prediction on one image
    Inspect {
        archive: PathBuf,
        image: PathBuf,
        #[arg(long)]
        tick_ms: Option<u64>,
    },
    /// Print the session context handed to the assistant
    Context {
        /// Archive to ingest first
        archive: Option<PathBuf>,
        /// Complete a training run before serializing
        #[arg(long)]
        train: bool,
        /// Declared classification domain
        #[arg(long)]
        domain: Option<String>,
    },
    /// Ask the assistant one question about a session
    Chat {
        message: String,
        #[arg(long)]
        archive: Option<PathBuf>,
        #[arg(long)]
        train: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the current configuration
    Show,
}

/// Overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub provider: Option<String>,
    pub seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("ai", "geomaker", "geomaker")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "geomaker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let overrides = Overrides {
        provider: cli.provider,
        seed: cli.seed,
    };

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace, &overrides).await;
    }

    let config = commands::load_app_config(&workspace, &overrides)?;
    repl::run_interactive(config, workspace).await
}
