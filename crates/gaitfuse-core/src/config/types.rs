//! Sub-configuration structs with defaults matching the reference training setup.

use crate::error::ConfigError;
use crate::eval::ExclusionPolicy;
use crate::fusion::PoolMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// GEI descriptor store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeiConfig {
    /// Directory holding one `.npy` descriptor per tracklet
    pub dir: PathBuf,

    /// Length of every descriptor (D2)
    pub descriptor_dim: usize,

    /// Zero-padding width of the identity field in file names
    pub identity_width: usize,

    /// Added to training identities (labels start at 0, files at 001)
    pub train_identity_offset: u32,

    /// Added to validation identities, whose labels restart at 0 after
    /// the training identities in the descriptor store
    pub val_identity_offset: u32,

    /// Keep loaded descriptors in memory across epochs
    pub cache: bool,
}

impl Default for GeiConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.gaitfuse/gei"),
            descriptor_dim: 2048,
            identity_width: 3,
            train_identity_offset: 1,
            val_identity_offset: 69,
            cache: false,
        }
    }
}

/// Backbone architectures the training setup knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// ResNet-50 with temporal average pooling
    Resnet50Tp,
    /// ResNet-50 with temporal attention
    Resnet50Ta,
    /// ResNet-50 followed by an RNN over frames
    ResnetRnn,
    /// 3D ResNet-50 initialised from Kinetics weights
    Resnet503d,
}

impl Architecture {
    /// All supported architecture names.
    pub const NAMES: [&'static str; 4] = ["resnet50tp", "resnet50ta", "resnetrnn", "resnet503d"];

    /// Parse an architecture name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resnet50tp" => Some(Self::Resnet50Tp),
            "resnet50ta" => Some(Self::Resnet50Ta),
            "resnetrnn" => Some(Self::ResnetRnn),
            "resnet503d" => Some(Self::Resnet503d),
            _ => None,
        }
    }

    /// 3D convolution weights cannot be trained from scratch here.
    pub fn requires_pretrained(self) -> bool {
        matches!(self, Self::Resnet503d)
    }
}

/// Backbone model settings.
///
/// The backbone itself lives outside this crate; these values are checked
/// up front so a bad name or missing weights file fails before any data loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Architecture name
    pub arch: String,

    /// Pretrained weights file (required by resnet503d)
    pub pretrained: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            arch: "resnet50tp".to_string(),
            pretrained: None,
        }
    }
}

impl ModelConfig {
    /// Resolve the configured architecture name.
    pub fn architecture(&self) -> Result<Architecture, ConfigError> {
        Architecture::parse(&self.arch).ok_or_else(|| ConfigError::UnsupportedArchitecture {
            name: self.arch.clone(),
            supported: Architecture::NAMES.join(", "),
        })
    }

    /// Resolve the pretrained weights path (with ~ expansion).
    ///
    /// Returns `Ok(None)` when the architecture does not need weights and none
    /// were configured. A configured path that does not exist is always an error.
    pub fn pretrained_weights(&self) -> Result<Option<PathBuf>, ConfigError> {
        let arch = self.architecture()?;
        match &self.pretrained {
            Some(path) => {
                let expanded = PathBuf::from(
                    shellexpand::tilde(&path.to_string_lossy()).into_owned(),
                );
                if expanded.exists() {
                    Ok(Some(expanded))
                } else {
                    Err(ConfigError::MissingPretrained(expanded))
                }
            }
            None if arch.requires_pretrained() => {
                Err(ConfigError::MissingPretrained(PathBuf::from("<unset>")))
            }
            None => Ok(None),
        }
    }
}

/// Training loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Maximum epochs to run
    pub max_epoch: usize,

    /// Epoch to resume from
    pub start_epoch: usize,

    /// Samples per train/val batch
    pub train_batch: usize,

    /// Samples per query/gallery batch. Clip counts vary per tracklet, so this must be 1.
    pub test_batch: usize,

    /// Emit a progress line every N batches
    pub print_freq: usize,

    /// Evaluate every N epochs. 0 evaluates only after the final epoch.
    pub eval_step: usize,

    /// Directory for checkpoints
    pub save_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epoch: 400,
            start_epoch: 0,
            train_batch: 16,
            test_batch: 1,
            print_freq: 80,
            eval_step: 50,
            save_dir: PathBuf::from("log"),
        }
    }
}

impl TrainingConfig {
    /// Whether the epoch (0-based) ends with an evaluation pass.
    pub fn evaluates_after(&self, epoch: usize) -> bool {
        let completed = epoch + 1;
        (self.eval_step > 0 && completed % self.eval_step == 0) || completed == self.max_epoch
    }
}

/// Retrieval evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// CMC ranks to report
    pub ranks: Vec<usize>,

    /// How clip embeddings are reduced to one vector per tracklet
    pub pool: PoolMode,

    /// Which same-identity gallery entries are excluded per query
    pub exclusion: ExclusionPolicy,

    /// Text file each evaluation appends its metrics to
    pub result_file: PathBuf,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ranks: vec![1, 5, 10, 20],
            pool: PoolMode::Mean,
            exclusion: ExclusionPolicy::default(),
            result_file: PathBuf::from("result.txt"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,

    /// Also write plain-text logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_parse() {
        assert_eq!(Architecture::parse("resnet50tp"), Some(Architecture::Resnet50Tp));
        assert_eq!(Architecture::parse("resnet503d"), Some(Architecture::Resnet503d));
        assert_eq!(Architecture::parse("vgg16"), None);
    }

    #[test]
    fn test_unsupported_architecture_lists_names() {
        let config = ModelConfig {
            arch: "vgg16".to_string(),
            pretrained: None,
        };
        let err = config.architecture().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vgg16"));
        assert!(msg.contains("resnet50tp"));
    }

    #[test]
    fn test_resnet503d_requires_pretrained() {
        let config = ModelConfig {
            arch: "resnet503d".to_string(),
            pretrained: None,
        };
        assert!(matches!(
            config.pretrained_weights(),
            Err(ConfigError::MissingPretrained(_))
        ));
    }

    #[test]
    fn test_missing_pretrained_file_is_error() {
        let config = ModelConfig {
            arch: "resnet50tp".to_string(),
            pretrained: Some(PathBuf::from("/nonexistent/resnet-50-kinetics.pth")),
        };
        let err = config.pretrained_weights().unwrap_err();
        assert!(err.to_string().contains("resnet-50-kinetics.pth"));
    }

    #[test]
    fn test_existing_pretrained_file_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("weights.pth");
        std::fs::write(&weights, b"stub").unwrap();

        let config = ModelConfig {
            arch: "resnet503d".to_string(),
            pretrained: Some(weights.clone()),
        };
        assert_eq!(config.pretrained_weights().unwrap(), Some(weights));
    }

    #[test]
    fn test_2d_arch_without_weights_is_fine() {
        let config = ModelConfig::default();
        assert_eq!(config.pretrained_weights().unwrap(), None);
    }

    #[test]
    fn test_eval_cadence() {
        let config = TrainingConfig {
            max_epoch: 120,
            eval_step: 50,
            ..TrainingConfig::default()
        };
        assert!(!config.evaluates_after(0));
        assert!(config.evaluates_after(49));
        assert!(config.evaluates_after(99));
        assert!(!config.evaluates_after(100));
        assert!(config.evaluates_after(119));
    }

    #[test]
    fn test_eval_step_zero_evaluates_only_at_end() {
        let config = TrainingConfig {
            max_epoch: 3,
            eval_step: 0,
            ..TrainingConfig::default()
        };
        assert!(!config.evaluates_after(0));
        assert!(!config.evaluates_after(1));
        assert!(config.evaluates_after(2));
    }
}
