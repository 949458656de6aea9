//! Query x gallery squared Euclidean distance matrix.
//!
//! Expands `||q - g||^2 = ||q||^2 + ||g||^2 - 2 q.g` so the whole matrix
//! costs one `[M, D] x [D, N]` product plus two broadcasts.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{EvalError, EvalResult};

/// Compute the `[M, N]` matrix of squared Euclidean distances.
///
/// Cancellation in the expanded form can leave entries slightly below zero
/// for near-identical vectors; those are clamped to zero. A non-finite
/// entry (NaN or infinite features on either side) is an error.
pub fn squared_euclidean(
    query: ArrayView2<'_, f32>,
    gallery: ArrayView2<'_, f32>,
) -> EvalResult<Array2<f32>> {
    if query.ncols() != gallery.ncols() {
        return Err(EvalError::DimensionMismatch {
            context: "query and gallery features".to_string(),
            expected: query.ncols(),
            actual: gallery.ncols(),
        });
    }

    let query_norms = query.map_axis(Axis(1), |row| row.dot(&row));
    let gallery_norms = gallery.map_axis(Axis(1), |row| row.dot(&row));

    let mut distmat = query.dot(&gallery.t());
    distmat *= -2.0;
    distmat += &query_norms.insert_axis(Axis(1));
    distmat += &gallery_norms.insert_axis(Axis(0));
    distmat.mapv_inplace(|d| if d < 0.0 { 0.0 } else { d });

    if let Some(((i, j), _)) = distmat.indexed_iter().find(|(_, d)| !d.is_finite()) {
        return Err(EvalError::NonFiniteDistance {
            query: i,
            gallery: j,
        });
    }

    tracing::debug!(
        "Computed {}x{} distance matrix over {} dims",
        query.nrows(),
        gallery.nrows(),
        query.ncols()
    );
    Ok(distmat)
}
