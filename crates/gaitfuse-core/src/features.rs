//! Fused feature extraction for the query and gallery sets.

use ndarray::{Array1, Array2, ArrayView1};

use crate::data::AlignedLoader;
use crate::error::{DataError, EvalError, EvalResult, Result};
use crate::fusion::{fuse_clips, PoolMode};
use crate::model::ClipEmbedder;
use crate::types::SampleMeta;

/// Fused feature matrix `[num_samples, D1 + D2]` with per-row metadata.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub features: Array2<f32>,
    pub meta: Vec<SampleMeta>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.ncols()
    }
}

/// Accumulates fused vectors one sample at a time.
#[derive(Debug)]
pub struct FeatureSetBuilder {
    name: &'static str,
    rows: Vec<Array1<f32>>,
    meta: Vec<SampleMeta>,
}

impl FeatureSetBuilder {
    /// `name` ("query" or "gallery") is used in error messages.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// Append one fused vector; all vectors must share one dimensionality.
    pub fn push(&mut self, feature: Array1<f32>, meta: SampleMeta) -> EvalResult<()> {
        if let Some(first) = self.rows.first() {
            if first.len() != feature.len() {
                return Err(EvalError::DimensionMismatch {
                    context: format!("{} feature {}", self.name, self.rows.len()),
                    expected: first.len(),
                    actual: feature.len(),
                });
            }
        }
        self.rows.push(feature);
        self.meta.push(meta);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stack the rows into a [`FeatureSet`]. An empty set is an error.
    pub fn finish(self) -> EvalResult<FeatureSet> {
        let Some(first) = self.rows.first() else {
            return Err(EvalError::EmptySet(self.name));
        };
        let dim = first.len();
        let views: Vec<ArrayView1<'_, f32>> = self.rows.iter().map(|r| r.view()).collect();
        let features = ndarray::stack(ndarray::Axis(0), &views).map_err(|_| {
            EvalError::DimensionMismatch {
                context: format!("{} feature stack", self.name),
                expected: dim,
                actual: 0,
            }
        })?;
        Ok(FeatureSet {
            features,
            meta: self.meta,
        })
    }
}

/// Embed, pool and fuse every sample a retrieval loader yields.
///
/// Retrieval loaders serve one tracklet per batch; each tracklet's clips are
/// pooled with `pool` and joined with that batch's own descriptor row.
pub fn extract_features<'a, E, F: 'a>(
    embedder: &mut E,
    loader: &mut AlignedLoader<'a, F>,
    pool: PoolMode,
    name: &'static str,
) -> Result<FeatureSet>
where
    E: ClipEmbedder<Frames = F> + ?Sized,
{
    let phase = loader.phase();
    let mut builder = FeatureSetBuilder::new(name);

    for batch in loader.batches() {
        let batch = batch?;
        if batch.len() != 1 {
            return Err(DataError::BatchMismatch {
                context: format!("{phase} loader (one tracklet per batch)"),
                expected: 1,
                actual: batch.len(),
            }
            .into());
        }

        let clips = embedder.embed_clips(&batch.frames)?;
        let fused = fuse_clips(clips.view(), batch.descriptors.row(0), pool)?;
        let meta = batch.meta.into_iter().next().ok_or(EvalError::EmptySet(name))?;
        builder.push(fused, meta)?;
    }

    let set = builder.finish()?;
    tracing::info!(
        "Extracted features for {} matrix: {} x {}",
        name,
        set.len(),
        set.dim()
    );
    Ok(set)
}
