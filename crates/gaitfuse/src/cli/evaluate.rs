//! The `gaitfuse evaluate` command: offline query/gallery scoring.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use gaitfuse_core::data::{BatchSource, RawBatch};
use gaitfuse_core::{
    Config, ExclusionPolicy, Manifest, Phase, PoolMode, PrecomputedEmbeddings, ResultLog,
    RetrievalMetrics, RetrievalPipeline,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use super::expand_path;

/// Arguments for the `evaluate` command.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Query manifest (JSON Lines, one tracklet per line)
    #[arg(long)]
    pub query: PathBuf,

    /// Gallery manifest (JSON Lines, one tracklet per line)
    #[arg(long)]
    pub gallery: PathBuf,

    /// GEI descriptor directory (overrides config)
    #[arg(long)]
    pub gei_dir: Option<PathBuf>,

    /// Clip pooling: mean or max (overrides config)
    #[arg(long, value_parser = parse_pool)]
    pub pool: Option<PoolMode>,

    /// Gallery exclusion: identity-camera-sequence, identity-camera or none
    #[arg(long, value_parser = parse_exclusion)]
    pub exclusion: Option<ExclusionPolicy>,

    /// Comma-separated CMC ranks to report (overrides config)
    #[arg(long, value_delimiter = ',')]
    pub ranks: Option<Vec<usize>>,

    /// Write the metrics JSON to this file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Result file to append to (overrides config)
    #[arg(long)]
    pub result_file: Option<PathBuf>,

    /// Don't append to the result file
    #[arg(long)]
    pub no_result_file: bool,
}

fn parse_pool(s: &str) -> Result<PoolMode, String> {
    PoolMode::parse(s).ok_or_else(|| format!("unknown pool mode '{s}' (expected mean or max)"))
}

fn parse_exclusion(s: &str) -> Result<ExclusionPolicy, String> {
    ExclusionPolicy::parse(s).ok_or_else(|| {
        format!("unknown exclusion policy '{s}' (expected identity-camera-sequence, identity-camera or none)")
    })
}

/// Machine-readable evaluation outcome.
#[derive(Debug, Serialize)]
struct EvaluationReport {
    map: f64,
    /// CMC value per requested rank
    cmc: BTreeMap<usize, f64>,
    num_queries: usize,
    num_scored: usize,
    pool: PoolMode,
    exclusion: ExclusionPolicy,
}

/// Execute the evaluate command.
pub async fn execute(args: EvaluateArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(dir) = &args.gei_dir {
        config.gei.dir = expand_path(dir);
    }
    if let Some(pool) = args.pool {
        config.evaluation.pool = pool;
    }
    if let Some(exclusion) = args.exclusion {
        config.evaluation.exclusion = exclusion;
    }
    if let Some(ranks) = args.ranks.clone() {
        if ranks.is_empty() || ranks.contains(&0) {
            anyhow::bail!("--ranks must list positive ranks, e.g. 1,5,10,20");
        }
        config.evaluation.ranks = ranks;
    }

    let query = Manifest::load(&expand_path(&args.query))?;
    let gallery = Manifest::load(&expand_path(&args.gallery))?;
    tracing::info!(
        "Loaded {} query and {} gallery samples (GEI store: {})",
        query.len(),
        gallery.len(),
        config.gei_dir().display()
    );

    let pipeline = RetrievalPipeline::new(&config);
    let metrics = tokio::task::spawn_blocking(move || score(&pipeline, query, gallery)).await??;

    let report = EvaluationReport {
        map: metrics.map,
        cmc: metrics.at_ranks(&config.evaluation.ranks).into_iter().collect(),
        num_queries: metrics.num_queries,
        num_scored: metrics.num_scored,
        pool: config.evaluation.pool,
        exclusion: config.evaluation.exclusion,
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            let path = expand_path(path);
            std::fs::write(&path, format!("{json}\n"))?;
            tracing::info!("Metrics written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }

    if !args.no_result_file {
        let path = args
            .result_file
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| config.result_file());
        let mut log = ResultLog::open_append(&path)?;
        log.append(&metrics, &config.evaluation.ranks)?;
        tracing::info!("Appended results to {}", log.path().display());
    }

    Ok(())
}

/// Extract both feature sets with a progress bar, then score them.
fn score(
    pipeline: &RetrievalPipeline,
    query: Manifest,
    gallery: Manifest,
) -> anyhow::Result<RetrievalMetrics> {
    let progress = create_progress_bar((query.len() + gallery.len()) as u64)?;
    let mut embedder = PrecomputedEmbeddings;

    progress.set_message("query");
    let mut query = Tracked::new(query.into_source(), progress.clone());
    let query = pipeline.extract(&mut embedder, &mut query, Phase::Query)?;

    progress.set_message("gallery");
    let mut gallery = Tracked::new(gallery.into_source(), progress.clone());
    let gallery = pipeline.extract(&mut embedder, &mut gallery, Phase::Gallery)?;
    progress.finish_and_clear();

    Ok(pipeline.score(&query, &gallery)?)
}

/// Advances a progress bar as batches are drawn from the wrapped source.
struct Tracked<S> {
    inner: S,
    progress: ProgressBar,
}

impl<S> Tracked<S> {
    fn new(inner: S, progress: ProgressBar) -> Self {
        Self { inner, progress }
    }
}

impl<S: BatchSource> BatchSource for Tracked<S> {
    type Frames = S::Frames;

    fn num_batches(&self) -> usize {
        self.inner.num_batches()
    }

    fn batches(
        &mut self,
    ) -> Box<dyn Iterator<Item = gaitfuse_core::Result<RawBatch<S::Frames>>> + '_> {
        let progress = self.progress.clone();
        Box::new(self.inner.batches().inspect(move |_| progress.inc(1)))
    }
}

/// Create a progress bar for feature extraction.
fn create_progress_bar(total: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )?
            .progress_chars("##-"),
    );
    pb.set_message("starting...");
    Ok(pb)
}
