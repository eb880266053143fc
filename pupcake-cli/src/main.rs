//! pupcake CLI: tune, cross-validate and evaluate binary image classifiers.

mod commands;

use clap::Parser;
use pupcake_ml::ModelKind;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// pupcake: compare image classifier architectures on a binary task
#[derive(Parser, Debug)]
#[command(name = "pupcake", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (relative paths in the configuration resolve here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces <workspace>/pupcake.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Tune, cross-validate and evaluate models
    Run {
        /// Models to process, in order
        #[arg(long, value_delimiter = ',', default_value = "MLP,CNN,MobileNet", value_parser = parse_model)]
        models: Vec<ModelKind>,
        /// Number of cross-validation folds
        #[arg(long)]
        kfold: Option<usize>,
        /// Dataset root holding train/ and test/
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Check the dataset layout and report image counts
    Check {
        /// Dataset root holding train/ and test/
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Show which models have cached tuned and fold-trained artifacts
    Status,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to <workspace>/pupcake.toml
    Init,
}

fn parse_model(name: &str) -> Result<ModelKind, String> {
    name.parse::<ModelKind>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "pupcake", "pupcake")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "pupcake.log");
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

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
