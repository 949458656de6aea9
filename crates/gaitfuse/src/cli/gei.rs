//! The `gaitfuse gei` command for inspecting the descriptor store.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use gaitfuse_core::{Config, GeiStore, Manifest, Phase, SampleMeta};

use super::expand_path;

/// Arguments for the `gei` command.
#[derive(Args, Debug)]
pub struct GeiArgs {
    /// GEI descriptor directory (overrides config)
    #[arg(long, global = true)]
    pub gei_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: GeiCommand,
}

/// Subcommands for the descriptor store.
#[derive(Subcommand, Debug)]
pub enum GeiCommand {
    /// Print the descriptor file a sample resolves to
    Key {
        /// Partition-local identity label
        #[arg(long)]
        identity: u32,

        /// Camera id
        #[arg(long)]
        camera: u32,

        /// Sequence type, e.g. nm-01
        #[arg(long)]
        sequence: String,

        /// Partition: train, val, query or gallery
        #[arg(long, value_parser = parse_phase, default_value = "query")]
        phase: Phase,
    },

    /// Report manifest samples without a descriptor file
    Check {
        /// Sample manifest (JSON Lines)
        manifest: PathBuf,

        /// Partition the manifest belongs to
        #[arg(long, value_parser = parse_phase, default_value = "query")]
        phase: Phase,

        /// Also read every present descriptor and check its length
        #[arg(long)]
        deep: bool,
    },
}

fn parse_phase(s: &str) -> Result<Phase, String> {
    Phase::parse(s).ok_or_else(|| format!("unknown phase '{s}' (expected train, val, query or gallery)"))
}

/// Execute the gei command.
pub async fn execute(args: GeiArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(dir) = &args.gei_dir {
        config.gei.dir = expand_path(dir);
    }
    let store = GeiStore::new(&config.gei_dir(), &config.gei);

    match args.command {
        GeiCommand::Key {
            identity,
            camera,
            sequence,
            phase,
        } => {
            let meta = SampleMeta::new(identity, camera, sequence);
            let path = store.path_for(&meta, phase);
            let status = if path.exists() { "present" } else { "missing" };
            println!("{} ({status})", path.display());
        }

        GeiCommand::Check {
            manifest,
            phase,
            deep,
        } => {
            let manifest = Manifest::load(&expand_path(&manifest))?;
            let samples = manifest.samples();
            let missing = store.missing(&samples, phase);

            for meta in &missing {
                println!("missing\t{}", store.path_for(meta, phase).display());
            }

            let mut malformed = 0usize;
            if deep {
                for meta in samples.iter().filter(|m| !missing.contains(m)) {
                    if let Err(e) = store.load(meta, phase) {
                        println!("invalid\t{e}");
                        malformed += 1;
                    }
                }
            }

            tracing::info!(
                "{} samples checked against {}: {} missing, {} malformed",
                samples.len(),
                store.root().display(),
                missing.len(),
                malformed
            );
            if !missing.is_empty() || malformed > 0 {
                anyhow::bail!(
                    "{} of {} samples have no usable GEI descriptor",
                    missing.len() + malformed,
                    samples.len()
                );
            }
            println!("All {} descriptors present", samples.len());
        }
    }

    Ok(())
}
