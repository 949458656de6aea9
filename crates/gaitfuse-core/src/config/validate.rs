//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    ///
    /// Does not touch the filesystem; see [`super::ModelConfig::pretrained_weights`]
    /// for the weights-file check.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.gei.descriptor_dim == 0 {
            return Err(ConfigError::ValidationError(
                "gei.descriptor_dim must be > 0".into(),
            ));
        }
        if self.gei.identity_width == 0 {
            return Err(ConfigError::ValidationError(
                "gei.identity_width must be > 0".into(),
            ));
        }
        if self.training.train_batch == 0 {
            return Err(ConfigError::ValidationError(
                "training.train_batch must be > 0".into(),
            ));
        }
        if self.training.test_batch != 1 {
            return Err(ConfigError::ValidationError(format!(
                "training.test_batch must be 1 (got {}): tracklets carry a variable number of clips",
                self.training.test_batch
            )));
        }
        if self.training.print_freq == 0 {
            return Err(ConfigError::ValidationError(
                "training.print_freq must be > 0".into(),
            ));
        }
        if self.training.max_epoch == 0 {
            return Err(ConfigError::ValidationError(
                "training.max_epoch must be > 0".into(),
            ));
        }
        if self.training.start_epoch > self.training.max_epoch {
            return Err(ConfigError::ValidationError(format!(
                "training.start_epoch ({}) must not exceed training.max_epoch ({})",
                self.training.start_epoch, self.training.max_epoch
            )));
        }
        if self.evaluation.ranks.is_empty() {
            return Err(ConfigError::ValidationError(
                "evaluation.ranks must not be empty".into(),
            ));
        }
        if self.evaluation.ranks.contains(&0) {
            return Err(ConfigError::ValidationError(
                "evaluation.ranks are 1-based; 0 is not a rank".into(),
            ));
        }
        self.model.architecture()?;
        Ok(())
    }
}
