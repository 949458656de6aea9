//! Descriptor file naming.
//!
//! Files are named `{identity:0W}-{sequence_type}-c{camera_id}.npy`. The
//! identity written to disk is the store's global numbering; each partition
//! reaches it through its own offset.

use crate::config::GeiConfig;
use crate::types::{Phase, SampleMeta};

/// Offsets and padding that map partition-local identities onto file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyScheme {
    /// Zero-padding width of the identity field
    pub identity_width: usize,
    /// Offset applied to training identities
    pub train_offset: u32,
    /// Offset applied to validation identities
    pub val_offset: u32,
}

impl KeyScheme {
    pub fn from_config(config: &GeiConfig) -> Self {
        Self {
            identity_width: config.identity_width,
            train_offset: config.train_identity_offset,
            val_offset: config.val_identity_offset,
        }
    }

    /// Offset added to identities of the given phase.
    pub fn identity_offset(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Train => self.train_offset,
            Phase::Val => self.val_offset,
            Phase::Query | Phase::Gallery => 0,
        }
    }

    /// Store-global identity for a sample of the given phase.
    pub fn store_identity(&self, identity: u32, phase: Phase) -> u32 {
        identity + self.identity_offset(phase)
    }

    /// Descriptor file name for one sample.
    pub fn file_name(&self, meta: &SampleMeta, phase: Phase) -> String {
        format!(
            "{:0width$}-{}-c{}.npy",
            self.store_identity(meta.identity, phase),
            meta.sequence_type,
            meta.camera_id,
            width = self.identity_width
        )
    }
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::from_config(&GeiConfig::default())
    }
}
