//! GaitFuse CLI - GEI-fused video person re-identification evaluation.
//!
//! Scores query tracklets against a gallery using appearance embeddings
//! concatenated with gait energy image descriptors, and reports CMC and mAP.
//!
//! # Usage
//!
//! ```bash
//! # Score exported clip embeddings against a gallery
//! gaitfuse evaluate --query query.jsonl --gallery gallery.jsonl
//!
//! # Check that every gallery sample has a GEI descriptor
//! gaitfuse gei check gallery.jsonl --phase gallery
//!
//! # Average every evaluation recorded in a result file
//! gaitfuse results result.txt
//!
//! # View configuration
//! gaitfuse config show
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// GaitFuse - GEI-fused video person re-identification evaluation.
#[derive(Parser, Debug)]
#[command(name = "gaitfuse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "GAITFUSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Score query manifests against a gallery and report CMC/mAP
    Evaluate(cli::evaluate::EvaluateArgs),

    /// Inspect the GEI descriptor store
    Gei(cli::gei::GeiArgs),

    /// Summarize result files
    Results(cli::results::ResultsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => gaitfuse_core::Config::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => gaitfuse_core::Config::load().map_err(|e| {
            anyhow::anyhow!(
                "Failed to load config {}: {e}",
                gaitfuse_core::Config::default_path().display()
            )
        })?,
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("GaitFuse v{}", gaitfuse_core::VERSION);

    match cli.command {
        Commands::Evaluate(args) => cli::evaluate::execute(args, config).await,
        Commands::Gei(args) => cli::gei::execute(args, config).await,
        Commands::Results(args) => cli::results::execute(args).await,
        Commands::Config(args) => cli::config::execute(args, config, cli.config).await,
    }
}
