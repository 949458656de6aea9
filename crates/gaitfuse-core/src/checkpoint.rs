//! Checkpoint persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File name of the best-so-far checkpoint.
const BEST_CHECKPOINT: &str = "best_model.json";

/// Model snapshot written after an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub state_dict: S,
    pub rank1: f64,
    /// 0-based epoch the snapshot was taken after
    pub epoch: usize,
}

/// Destination for checkpoints.
pub trait CheckpointSink<S> {
    /// Persist `checkpoint`; `is_best` marks a new best rank-1.
    fn save(&mut self, checkpoint: &Checkpoint<S>, is_best: bool) -> Result<()>;
}

/// Writes checkpoints as JSON files into a directory.
///
/// Every save lands in `checkpoint_ep{N}.json` (N is 1-based); a best save is
/// also copied to `best_model.json`.
pub struct JsonCheckpointSink {
    dir: PathBuf,
}

impl JsonCheckpointSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a checkpoint for `epoch` (0-based) is written to.
    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("checkpoint_ep{}.json", epoch + 1))
    }

    /// Path of the best checkpoint.
    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl<S: Serialize> CheckpointSink<S> for JsonCheckpointSink {
    fn save(&mut self, checkpoint: &Checkpoint<S>, is_best: bool) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(checkpoint.epoch);
        let json = serde_json::to_vec(checkpoint)?;
        std::fs::write(&path, &json)?;
        tracing::info!("Saved checkpoint to {:?}", path);

        if is_best {
            std::fs::copy(&path, self.best_path())?;
            tracing::info!("New best rank-1 {:.1}% at epoch {}", checkpoint.rank1 * 100.0, checkpoint.epoch + 1);
        }
        Ok(())
    }
}
