//! Seams to the learning side of the system.
//!
//! The backbone network, its loss functions and its optimizer live outside
//! this crate. The training loop and the feature extractor only see them
//! through these traits, so any tensor library can sit behind them.

use ndarray::{Array2, ArrayView2};

use crate::error::Result;

/// Whether the backbone records gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout/batch-norm in training behaviour, gradients recorded
    Train,
    /// Inference only, no gradients
    Eval,
}

/// Result of a training-style forward pass over one batch.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// `[batch, num_classes]` identity logits
    pub logits: Array2<f32>,
    /// `[batch, D1]` per-sample embedding
    pub embedding: Array2<f32>,
}

/// Anything that turns a tracklet's clips into clip embeddings.
pub trait ClipEmbedder {
    /// Input the embedder consumes for one tracklet.
    type Frames;

    /// Embed every clip of a single tracklet, returning `[num_clips, D1]`.
    fn embed_clips(&mut self, frames: &Self::Frames) -> Result<Array2<f32>>;
}

/// The re-identification backbone.
pub trait Backbone: ClipEmbedder {
    /// Serializable parameter snapshot stored in checkpoints.
    type State;

    /// Switch between training and inference behaviour.
    fn set_mode(&mut self, mode: Mode);

    /// Forward a batch together with its GEI descriptors (`[batch, D2]`).
    fn forward(
        &mut self,
        frames: &Self::Frames,
        descriptors: ArrayView2<'_, f32>,
    ) -> Result<ForwardOutput>;

    /// Snapshot of the current parameters.
    fn state_dict(&self) -> Self::State;
}

/// Loss over one batch.
pub trait Criterion {
    /// `features` are the fused `[batch, D1 + D2]` vectors; `labels` the identities.
    fn loss(
        &self,
        logits: ArrayView2<'_, f32>,
        features: ArrayView2<'_, f32>,
        labels: &[u32],
    ) -> Result<f32>;
}

/// Parameter update rule, including its learning-rate schedule.
pub trait Optimizer<B: ?Sized> {
    /// Clear accumulated gradients.
    fn zero_grad(&mut self) {}

    /// Back-propagate `loss` and update the model.
    fn step(&mut self, model: &mut B, loss: f32) -> Result<()>;

    /// Called once after every epoch (learning-rate decay).
    fn on_epoch_end(&mut self, _epoch: usize) {}
}
