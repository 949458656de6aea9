//! The `gaitfuse results` command: average recorded evaluations.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use gaitfuse_core::report::summarize;

use super::expand_path;

/// Arguments for the `results` command.
#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Result files written by training or `gaitfuse evaluate`
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Also append each summary to this file
    #[arg(long)]
    pub append: Option<PathBuf>,

    /// Print summaries as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the results command.
pub async fn execute(args: ResultsArgs) -> anyhow::Result<()> {
    let mut rendered = String::new();

    for file in &args.files {
        let path = expand_path(file);
        let Some(summary) = summarize(&path)? else {
            tracing::warn!("No evaluations found in {}", path.display());
            continue;
        };
        tracing::info!(
            "{}: averaged {} evaluations",
            path.display(),
            summary.evaluations
        );

        if args.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            print!("{}", summary.render());
        }
        rendered.push_str(&summary.render());
    }

    if let Some(target) = &args.append {
        if rendered.is_empty() {
            return Ok(());
        }
        let target = expand_path(target);
        let mut file = OpenOptions::new().create(true).append(true).open(&target)?;
        file.write_all(rendered.as_bytes())?;
        tracing::info!("Summaries appended to {}", target.display());
    }

    Ok(())
}
