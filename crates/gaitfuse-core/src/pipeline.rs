//! Query/gallery retrieval: extract fused features, rank, score.

use crate::config::{Config, EvaluationConfig};
use crate::data::{AlignedLoader, BatchSource};
use crate::distance::squared_euclidean;
use crate::error::Result;
use crate::eval::{evaluate, RetrievalMetrics};
use crate::features::{extract_features, FeatureSet};
use crate::gei::GeiStore;
use crate::model::ClipEmbedder;
use crate::types::Phase;

/// Runs one retrieval evaluation over a query and a gallery partition.
#[derive(Clone)]
pub struct RetrievalPipeline {
    store: GeiStore,
    evaluation: EvaluationConfig,
}

impl RetrievalPipeline {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            GeiStore::new(&config.gei_dir(), &config.gei),
            config.evaluation.clone(),
        )
    }

    pub fn from_parts(store: GeiStore, evaluation: EvaluationConfig) -> Self {
        Self { store, evaluation }
    }

    pub fn store(&self) -> &GeiStore {
        &self.store
    }

    pub fn evaluation(&self) -> &EvaluationConfig {
        &self.evaluation
    }

    /// Extract the fused features of one retrieval partition.
    pub fn extract<'a, E, F: 'a>(
        &'a self,
        embedder: &mut E,
        source: &'a mut dyn BatchSource<Frames = F>,
        phase: Phase,
    ) -> Result<FeatureSet>
    where
        E: ClipEmbedder<Frames = F> + ?Sized,
    {
        let name = match phase {
            Phase::Gallery => "gallery",
            _ => "query",
        };
        let mut loader = AlignedLoader::new(source, &self.store, phase).with_batch_size(1);
        extract_features(embedder, &mut loader, self.evaluation.pool, name)
    }

    /// Rank the gallery for every query and compute CMC and mAP.
    pub fn score(&self, query: &FeatureSet, gallery: &FeatureSet) -> Result<RetrievalMetrics> {
        tracing::info!("Computing distance matrix");
        let distmat = squared_euclidean(query.features.view(), gallery.features.view())?;

        tracing::info!("Computing CMC and mAP");
        let metrics = evaluate(
            distmat.view(),
            &query.meta,
            &gallery.meta,
            self.evaluation.exclusion,
        )?;
        log_metrics(&metrics, &self.evaluation.ranks);
        Ok(metrics)
    }

    /// Extract both partitions and score them.
    pub fn run<E, F>(
        &self,
        embedder: &mut E,
        query: &mut dyn BatchSource<Frames = F>,
        gallery: &mut dyn BatchSource<Frames = F>,
    ) -> Result<RetrievalMetrics>
    where
        E: ClipEmbedder<Frames = F> + ?Sized,
    {
        let query = self.extract(embedder, query, Phase::Query)?;
        let gallery = self.extract(embedder, gallery, Phase::Gallery)?;
        self.score(&query, &gallery)
    }
}

/// Log a metrics block at info level.
pub fn log_metrics(metrics: &RetrievalMetrics, ranks: &[usize]) {
    tracing::info!("Results ----------");
    tracing::info!("mAP: {:.1}%", metrics.map * 100.0);
    tracing::info!("CMC curve");
    for (rank, value) in metrics.at_ranks(ranks) {
        tracing::info!("Rank-{:<3}: {:.1}%", rank, value * 100.0);
    }
    if metrics.num_scored < metrics.num_queries {
        tracing::warn!(
            "{} of {} queries had no valid match and were not scored",
            metrics.num_queries - metrics.num_scored,
            metrics.num_queries
        );
    }
}
