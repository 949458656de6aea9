//! Batches and the loader that keeps frames and GEI descriptors together.
//!
//! Sampling, decoding and augmentation belong to an external loader exposed
//! through [`BatchSource`]. [`AlignedLoader`] wraps one source and loads the
//! descriptors of each batch as it is drawn, so a batch's frames, metadata
//! and descriptors travel in one [`AlignedBatch`] and can never drift apart.

use ndarray::Array2;

use crate::error::{DataError, Result};
use crate::gei::GeiStore;
use crate::types::{Phase, SampleMeta};

/// One batch as produced by the external loader.
#[derive(Debug, Clone)]
pub struct RawBatch<F> {
    /// Frames (or clips) of every sample, in loader order
    pub frames: F,
    /// Metadata of every sample, same order as `frames`
    pub meta: Vec<SampleMeta>,
}

impl<F> RawBatch<F> {
    pub fn new(frames: F, meta: Vec<SampleMeta>) -> Self {
        Self { frames, meta }
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Identity labels in batch order.
    pub fn identities(&self) -> Vec<u32> {
        self.meta.iter().map(|m| m.identity).collect()
    }
}

/// A batch whose GEI descriptors have been loaded alongside it.
#[derive(Debug, Clone)]
pub struct AlignedBatch<F> {
    /// Frames handed to the backbone
    pub frames: F,
    /// Sample metadata in batch order
    pub meta: Vec<SampleMeta>,
    /// `[batch, descriptor_dim]`, row `i` belongs to `meta[i]`
    pub descriptors: Array2<f32>,
}

impl<F> AlignedBatch<F> {
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Identity labels in batch order.
    pub fn identities(&self) -> Vec<u32> {
        self.meta.iter().map(|m| m.identity).collect()
    }
}

/// External producer of batches for one dataset partition.
///
/// Every call to [`BatchSource::batches`] starts a fresh pass (one epoch).
pub trait BatchSource {
    /// Whatever the backbone consumes: image tensors, clip stacks, embeddings...
    type Frames;

    /// Number of batches a full pass yields.
    fn num_batches(&self) -> usize;

    /// Start a pass over the partition.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<RawBatch<Self::Frames>>> + '_>;
}

/// A [`BatchSource`] over batches already held in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource<F> {
    batches: Vec<RawBatch<F>>,
}

impl<F: Clone> InMemorySource<F> {
    pub fn new(batches: Vec<RawBatch<F>>) -> Self {
        Self { batches }
    }
}

impl<F: Clone> BatchSource for InMemorySource<F> {
    type Frames = F;

    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<RawBatch<F>>> + '_> {
        Box::new(self.batches.iter().cloned().map(Ok))
    }
}

/// Draws batches from a source and attaches their GEI descriptors.
pub struct AlignedLoader<'a, F> {
    source: &'a mut dyn BatchSource<Frames = F>,
    store: &'a GeiStore,
    phase: Phase,
    batch_size: Option<usize>,
}

impl<'a, F: 'a> AlignedLoader<'a, F> {
    /// Create a loader for the given partition.
    pub fn new(
        source: &'a mut dyn BatchSource<Frames = F>,
        store: &'a GeiStore,
        phase: Phase,
    ) -> Self {
        Self {
            source,
            store,
            phase,
            batch_size: None,
        }
    }

    /// Require every batch to hold exactly `size` samples.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn num_batches(&self) -> usize {
        self.source.num_batches()
    }

    /// Start a pass, loading descriptors batch by batch.
    pub fn batches(&mut self) -> Box<dyn Iterator<Item = Result<AlignedBatch<F>>> + '_> {
        let store = self.store;
        let phase = self.phase;
        let batch_size = self.batch_size;

        Box::new(self.source.batches().map(move |raw| {
            let raw = raw?;
            if let Some(expected) = batch_size {
                if raw.len() != expected {
                    return Err(DataError::BatchMismatch {
                        context: format!("{phase} loader"),
                        expected,
                        actual: raw.len(),
                    }
                    .into());
                }
            }
            let descriptors = store.load_batch(&raw.meta, phase)?;
            Ok(AlignedBatch {
                frames: raw.frames,
                meta: raw.meta,
                descriptors,
            })
        }))
    }
}
