//! Feature fusion: clip pooling plus concatenation with the GEI descriptor.
//!
//! A fused vector is always `[pooled embedding (D1) | descriptor (D2)]`.
//! Fusion is positional: row `i` of an embedding batch is joined with row
//! `i` of the descriptor batch, nothing else.

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, EvalError, EvalResult};

/// Reduction applied over the clip axis of a multi-clip tracklet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Elementwise mean over clips
    #[default]
    #[serde(alias = "avg")]
    Mean,
    /// Elementwise maximum over clips
    Max,
}

impl PoolMode {
    /// Parse a pool mode name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" => Some(Self::Mean),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// Reduce `[num_clips, D1]` clip embeddings to a single `D1` vector.
pub fn pool_clips(clips: ArrayView2<'_, f32>, mode: PoolMode) -> EvalResult<Array1<f32>> {
    if clips.nrows() == 0 {
        return Err(EvalError::NoClips);
    }
    let pooled = match mode {
        PoolMode::Mean => clips.mean_axis(Axis(0)).ok_or(EvalError::NoClips)?,
        PoolMode::Max => clips.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &x| acc.max(x)),
    };
    Ok(pooled)
}

/// Concatenate one embedding with its descriptor.
pub fn fuse(embedding: ArrayView1<'_, f32>, descriptor: ArrayView1<'_, f32>) -> Array1<f32> {
    let mut fused = Array1::zeros(embedding.len() + descriptor.len());
    fused.slice_mut(s![..embedding.len()]).assign(&embedding);
    fused.slice_mut(s![embedding.len()..]).assign(&descriptor);
    fused
}

/// Pool a tracklet's clips and append its descriptor.
pub fn fuse_clips(
    clips: ArrayView2<'_, f32>,
    descriptor: ArrayView1<'_, f32>,
    mode: PoolMode,
) -> EvalResult<Array1<f32>> {
    let pooled = pool_clips(clips, mode)?;
    Ok(fuse(pooled.view(), descriptor))
}

/// Fuse a batch of single-clip embeddings `[B, D1]` with descriptors `[B, D2]`.
///
/// Fails when the two blocks disagree on batch size; they come from
/// independent producers and a silent truncation would pair the wrong rows.
pub fn fuse_batch(
    embeddings: ArrayView2<'_, f32>,
    descriptors: ArrayView2<'_, f32>,
) -> Result<Array2<f32>, DataError> {
    if embeddings.nrows() != descriptors.nrows() {
        return Err(DataError::BatchMismatch {
            context: "embedding/descriptor fusion".to_string(),
            expected: embeddings.nrows(),
            actual: descriptors.nrows(),
        });
    }
    concatenate(Axis(1), &[embeddings.view(), descriptors.view()]).map_err(|e| DataError::BatchMismatch {
        context: format!("embedding/descriptor fusion: {e}"),
        expected: embeddings.nrows(),
        actual: descriptors.nrows(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_pool() {
        let clips = array![[1.0, 2.0], [3.0, 6.0]];
        let pooled = pool_clips(clips.view(), PoolMode::Mean).unwrap();
        assert_eq!(pooled, array![2.0, 4.0]);
    }

    #[test]
    fn test_max_pool_is_elementwise() {
        let clips = array![[1.0, 9.0, -3.0], [4.0, 2.0, -1.0]];
        let pooled = pool_clips(clips.view(), PoolMode::Max).unwrap();
        assert_eq!(pooled, array![4.0, 9.0, -1.0]);
    }

    #[test]
    fn test_pool_rejects_zero_clips() {
        let clips = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            pool_clips(clips.view(), PoolMode::Mean),
            Err(EvalError::NoClips)
        ));
    }

    #[test]
    fn test_single_clip_pool_is_identity() {
        let clips = array![[0.5, -0.25, 7.0]];
        for mode in [PoolMode::Mean, PoolMode::Max] {
            let pooled = pool_clips(clips.view(), mode).unwrap();
            assert_eq!(pooled, array![0.5, -0.25, 7.0]);
        }
    }

    #[test]
    fn test_fuse_places_embedding_first() {
        let fused = fuse(array![1.0, 2.0].view(), array![10.0, 20.0, 30.0].view());
        assert_eq!(fused, array![1.0, 2.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_fuse_clips() {
        let clips = array![[0.0, 2.0], [2.0, 4.0]];
        let fused = fuse_clips(clips.view(), array![9.0].view(), PoolMode::Mean).unwrap();
        assert_eq!(fused, array![1.0, 3.0, 9.0]);
    }

    #[test]
    fn test_fuse_batch_keeps_rows_paired() {
        // Each row's descriptor encodes its position so a cross-pairing would show.
        let embeddings = array![[0.0, 0.1], [1.0, 1.1], [2.0, 2.1]];
        let descriptors = array![[100.0], [101.0], [102.0]];
        let fused = fuse_batch(embeddings.view(), descriptors.view()).unwrap();

        assert_eq!(fused.dim(), (3, 3));
        for i in 0..3 {
            let expected = fuse(embeddings.row(i), descriptors.row(i));
            assert_eq!(fused.row(i), expected);
        }
    }

    /// Descriptors borrowed from a longer-lived block, embeddings from a local.
    fn fuse_with_store_block(descriptors: ArrayView2<'_, f32>) -> Array2<f32> {
        let embeddings = descriptors.mapv(|v| v * 2.0);
        fuse_batch(embeddings.view(), descriptors).unwrap()
    }

    #[test]
    fn test_fuse_batch_accepts_views_of_different_owners() {
        let block = array![[1.0, 2.0], [3.0, 4.0]];
        let fused = fuse_with_store_block(block.slice(s![.., 1..]));
        assert_eq!(fused, array![[4.0, 2.0], [8.0, 4.0]]);
    }

    #[test]
    fn test_fuse_batch_rejects_size_mismatch() {
        let embeddings = Array2::<f32>::zeros((4, 2));
        let descriptors = Array2::<f32>::zeros((3, 5));
        let err = fuse_batch(embeddings.view(), descriptors.view()).unwrap_err();
        assert!(matches!(
            err,
            DataError::BatchMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_pool_mode_parse() {
        assert_eq!(PoolMode::parse("avg"), Some(PoolMode::Mean));
        assert_eq!(PoolMode::parse("MAX"), Some(PoolMode::Max));
        assert_eq!(PoolMode::parse("median"), None);
    }
}
