//! The `gaitfuse config` command for configuration management.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use gaitfuse_core::Config;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize a new config file with defaults
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Parse and validate a config file
    Validate {
        /// File to validate (defaults to the active config file)
        file: Option<PathBuf>,
    },
}

/// Execute the config command.
///
/// `active` is the loaded configuration, `explicit` the `--config` path if one was given.
pub async fn execute(
    args: ConfigArgs,
    active: Config,
    explicit: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = explicit.unwrap_or_else(Config::default_path);

    match args.command {
        ConfigCommand::Show => {
            println!("{}", active.to_toml()?);
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at: {}\nUse --force to overwrite.",
                    path.display()
                );
            }

            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let toml = Config::default().to_toml()?;
            std::fs::write(&path, toml)?;

            tracing::info!("Config file created at: {}", path.display());
            println!("Configuration initialized at: {}", path.display());
        }

        ConfigCommand::Validate { file } => {
            let target = file.unwrap_or(path);
            let config = Config::load_from(&target)?;
            config.model.pretrained_weights()?;
            println!(
                "{} is valid (arch {}, {} epochs, GEI dim {})",
                target.display(),
                config.model.arch,
                config.training.max_epoch,
                config.gei.descriptor_dim
            );
        }
    }

    Ok(())
}
