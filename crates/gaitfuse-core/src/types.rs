//! Core data types shared across the re-identification pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity / camera / sequence-type triple attached to every tracklet.
///
/// This is all the pipeline ever needs to know about a sample besides its
/// frames: it keys the GEI descriptor on disk and drives the match and
/// exclusion rules during scoring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleMeta {
    /// Person identity label, in the label space of the sample's partition
    pub identity: u32,

    /// Camera the tracklet was captured by
    pub camera_id: u32,

    /// Capture condition tag (e.g. "nm-01", "bg-02")
    pub sequence_type: String,
}

impl SampleMeta {
    pub fn new(identity: u32, camera_id: u32, sequence_type: impl Into<String>) -> Self {
        Self {
            identity,
            camera_id,
            sequence_type: sequence_type.into(),
        }
    }
}

/// Dataset partition a batch was drawn from.
///
/// Identity labels are numbered independently per partition, so the phase
/// decides how an identity maps onto the GEI store's file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Val,
    Query,
    Gallery,
}

impl Phase {
    /// Whether batches of this phase carry a variable number of clips per sample.
    pub fn is_retrieval(self) -> bool {
        matches!(self, Phase::Query | Phase::Gallery)
    }

    /// Parse a phase name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "train" => Some(Self::Train),
            "val" | "validation" => Some(Self::Val),
            "query" => Some(Self::Query),
            "gallery" => Some(Self::Gallery),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Val => write!(f, "val"),
            Phase::Query => write!(f, "query"),
            Phase::Gallery => write!(f, "gallery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!(Phase::parse("train"), Some(Phase::Train));
        assert_eq!(Phase::parse("VAL"), Some(Phase::Val));
        assert_eq!(Phase::parse("gallery"), Some(Phase::Gallery));
        assert_eq!(Phase::parse("trian"), None);
    }

    #[test]
    fn test_phase_display_roundtrips_through_parse() {
        for phase in [Phase::Train, Phase::Val, Phase::Query, Phase::Gallery] {
            assert_eq!(Phase::parse(&phase.to_string()), Some(phase));
        }
    }

    #[test]
    fn test_retrieval_phases() {
        assert!(Phase::Query.is_retrieval());
        assert!(Phase::Gallery.is_retrieval());
        assert!(!Phase::Train.is_retrieval());
        assert!(!Phase::Val.is_retrieval());
    }
}
