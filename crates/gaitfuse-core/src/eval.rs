//! Rank-based retrieval scoring: CMC curve and mean average precision.
//!
//! For every query the gallery is ranked by ascending distance. Entries the
//! [`ExclusionPolicy`] marks as same-capture duplicates are dropped from the
//! ranking, the rest are matched on identity. Queries left without a single
//! valid match are skipped and do not count towards either metric.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::types::SampleMeta;

/// Which gallery entries are removed from a query's ranking.
///
/// Only entries sharing the query's identity are ever removed; the policy
/// decides how much of the capture context must also coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionPolicy {
    /// Same identity, camera and sequence type
    #[default]
    IdentityCameraSequence,
    /// Same identity and camera, whatever the sequence type
    IdentityCamera,
    /// Keep every entry
    None,
}

impl ExclusionPolicy {
    /// Whether `gallery` is dropped from the ranking of `query`.
    pub fn excludes(self, query: &SampleMeta, gallery: &SampleMeta) -> bool {
        let same_capture = query.identity == gallery.identity && query.camera_id == gallery.camera_id;
        match self {
            Self::IdentityCameraSequence => {
                same_capture && query.sequence_type == gallery.sequence_type
            }
            Self::IdentityCamera => same_capture,
            Self::None => false,
        }
    }

    /// Parse a policy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "identity-camera-sequence" => Some(Self::IdentityCameraSequence),
            "identity-camera" => Some(Self::IdentityCamera),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Outcome of scoring a query set against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    /// `cmc[k]` is the fraction of scored queries matched within rank `k + 1`
    pub cmc: Vec<f64>,

    /// Mean average precision over scored queries
    pub map: f64,

    /// Queries in the input
    pub num_queries: usize,

    /// Queries with at least one valid match
    pub num_scored: usize,
}

impl RetrievalMetrics {
    /// CMC value at a 1-based rank.
    ///
    /// Ranks past the end of the gallery report the last value: no further
    /// candidates exist to change it.
    pub fn rank(&self, rank: usize) -> f64 {
        if rank == 0 {
            return 0.0;
        }
        self.cmc
            .get(rank - 1)
            .or_else(|| self.cmc.last())
            .copied()
            .unwrap_or(0.0)
    }

    /// Rank-1 accuracy.
    pub fn rank1(&self) -> f64 {
        self.rank(1)
    }

    /// CMC values at the requested ranks.
    pub fn at_ranks(&self, ranks: &[usize]) -> Vec<(usize, f64)> {
        ranks.iter().map(|&r| (r, self.rank(r))).collect()
    }
}

/// Per-query result before aggregation.
#[derive(Debug, Clone, PartialEq)]
struct QueryScore {
    /// 0-based position of the first match among valid entries
    first_match: usize,
    /// Number of valid entries in the ranking
    num_valid: usize,
    average_precision: f64,
}

/// Score a distance matrix.
///
/// `distmat[i][j]` is the distance from `query[i]` to `gallery[j]`. The CMC
/// curve has one entry per gallery item. Fails when the metadata does not
/// line up with the matrix, or when no query could be scored at all.
pub fn evaluate(
    distmat: ArrayView2<'_, f32>,
    query: &[SampleMeta],
    gallery: &[SampleMeta],
    policy: ExclusionPolicy,
) -> EvalResult<RetrievalMetrics> {
    let (num_q, num_g) = distmat.dim();
    if query.len() != num_q {
        return Err(EvalError::MetadataLength {
            side: "query",
            expected: num_q,
            actual: query.len(),
        });
    }
    if gallery.len() != num_g {
        return Err(EvalError::MetadataLength {
            side: "gallery",
            expected: num_g,
            actual: gallery.len(),
        });
    }

    let mut cmc_hits = vec![0usize; num_g];
    let mut ap_sum = 0.0;
    let mut num_scored = 0usize;

    for (q_idx, q_meta) in query.iter().enumerate() {
        let row = distmat.row(q_idx);
        let mut order: Vec<usize> = (0..num_g).collect();
        // sort_by is stable, so ties keep gallery order
        order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));

        let matches: Vec<bool> = order
            .iter()
            .map(|&g_idx| &gallery[g_idx])
            .filter(|g_meta| !policy.excludes(q_meta, g_meta))
            .map(|g_meta| g_meta.identity == q_meta.identity)
            .collect();

        let Some(score) = score_query(&matches) else {
            tracing::trace!("Query {} has no valid match, skipped", q_idx);
            continue;
        };

        num_scored += 1;
        ap_sum += score.average_precision;
        // Hit from the first match onwards; padding past the valid entries
        // stays at 1 because the query is already matched.
        debug_assert!(score.first_match < score.num_valid);
        cmc_hits[score.first_match] += 1;
    }

    if num_scored == 0 {
        return Err(EvalError::NoValidQueries { num_queries: num_q });
    }

    let mut running = 0usize;
    let cmc = cmc_hits
        .iter()
        .map(|&hits| {
            running += hits;
            running as f64 / num_scored as f64
        })
        .collect();

    if num_scored < num_q {
        tracing::debug!(
            "{} of {} queries had no valid gallery match and were skipped",
            num_q - num_scored,
            num_q
        );
    }

    Ok(RetrievalMetrics {
        cmc,
        map: ap_sum / num_scored as f64,
        num_queries: num_q,
        num_scored,
    })
}

/// Score one query's match vector (valid entries only, in rank order).
fn score_query(matches: &[bool]) -> Option<QueryScore> {
    let first_match = matches.iter().position(|&m| m)?;

    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (k, _) in matches.iter().enumerate().filter(|&(_, &m)| m) {
        hits += 1;
        precision_sum += hits as f64 / (k + 1) as f64;
    }

    Some(QueryScore {
        first_match,
        num_valid: matches.len(),
        average_precision: precision_sum / hits as f64,
    })
}
