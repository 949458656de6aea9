//! GaitFuse Core - multi-modal video person re-identification.
//!
//! Appearance embeddings from an external backbone are fused with
//! precomputed GEI (gait energy image) descriptors and scored as a
//! query/gallery retrieval task.
//!
//! # Architecture
//!
//! ```text
//! BatchSource → AlignedLoader (+ GeiStore) → Backbone → pool + fuse
//!             → squared Euclidean distance → CMC / mAP → ResultLog
//! ```
//!
//! The backbone, its losses and optimizer, and the sampling data loader are
//! collaborators behind the traits in [`model`] and [`data`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use gaitfuse_core::{Config, Manifest, PrecomputedEmbeddings, RetrievalPipeline};
//!
//! let config = Config::load()?;
//! let pipeline = RetrievalPipeline::new(&config);
//! let mut query = Manifest::load("query.jsonl".as_ref())?.into_source();
//! let mut gallery = Manifest::load("gallery.jsonl".as_ref())?.into_source();
//! let metrics = pipeline.run(&mut PrecomputedEmbeddings, &mut query, &mut gallery)?;
//! println!("mAP {:.1}%", metrics.map * 100.0);
//! ```

#[cfg(target_os = "macos")]
extern crate blas_src;

// Module declarations
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod distance;
pub mod error;
pub mod eval;
pub mod features;
pub mod fusion;
pub mod gei;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod train;
pub mod types;

// Re-exports for convenient access
pub use checkpoint::{Checkpoint, CheckpointSink, JsonCheckpointSink};
pub use config::Config;
pub use data::{AlignedBatch, AlignedLoader, BatchSource, InMemorySource, RawBatch};
pub use distance::squared_euclidean;
pub use error::{ConfigError, DataError, EvalError, EvalResult, GaitFuseError, Result};
pub use eval::{evaluate, ExclusionPolicy, RetrievalMetrics};
pub use features::{extract_features, FeatureSet, FeatureSetBuilder};
pub use fusion::{fuse, fuse_batch, fuse_clips, pool_clips, PoolMode};
pub use gei::{GeiStore, KeyScheme};
pub use manifest::{Manifest, ManifestEntry, ManifestSource, PrecomputedEmbeddings};
pub use model::{Backbone, ClipEmbedder, Criterion, ForwardOutput, Mode, Optimizer};
pub use pipeline::RetrievalPipeline;
pub use report::{ResultLog, ResultSummary};
pub use train::{AverageMeter, EpochStats, Trainer, TrainingLoaders, TrainingSummary};
pub use types::{Phase, SampleMeta};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
