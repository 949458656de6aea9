//! Training/validation loop.
//!
//! Each epoch runs a `train` pass (backbone in [`Mode::Train`], optimizer
//! stepping) followed by a `val` pass (backbone in [`Mode::Eval`], no
//! parameter updates), each with its own running loss average. On the
//! configured epoch cadence the query and gallery sets are scored and a
//! checkpoint is handed to the sink, flagged when rank-1 improved.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gaitfuse_core::{Config, JsonCheckpointSink, ResultLog, Trainer, TrainingLoaders};
//!
//! let config = Config::load()?;
//! let mut trainer = Trainer::new(&config)?
//!     .with_result_log(ResultLog::create(&config.result_file())?);
//! let mut sink = JsonCheckpointSink::new(config.save_dir());
//! let summary = trainer.fit(&mut backbone, &criterion, &mut optimizer, &mut sink, loaders)?;
//! println!("best rank-1 {:?}", summary.best_rank1);
//! ```

mod meter;

pub use meter::AverageMeter;

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::checkpoint::{Checkpoint, CheckpointSink};
use crate::config::{Config, TrainingConfig};
use crate::data::{AlignedLoader, BatchSource};
use crate::error::Result;
use crate::eval::RetrievalMetrics;
use crate::features::extract_features;
use crate::fusion::fuse_batch;
use crate::model::{Backbone, Criterion, Mode, Optimizer};
use crate::pipeline::RetrievalPipeline;
use crate::report::ResultLog;
use crate::types::Phase;

/// The four partitions a training run draws from.
pub struct TrainingLoaders<'a, F> {
    pub train: &'a mut dyn BatchSource<Frames = F>,
    pub val: &'a mut dyn BatchSource<Frames = F>,
    pub query: &'a mut dyn BatchSource<Frames = F>,
    pub gallery: &'a mut dyn BatchSource<Frames = F>,
}

/// Losses (and metrics, when evaluated) of one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochStats {
    /// 0-based epoch index
    pub epoch: usize,
    pub train_loss: AverageMeter,
    pub val_loss: AverageMeter,
    pub metrics: Option<RetrievalMetrics>,
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub best_rank1: Option<f64>,
    /// 0-based epoch of the best rank-1
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochStats>,
    pub elapsed: Duration,
}

/// Drives epochs over the backbone and its collaborators.
pub struct Trainer {
    training: TrainingConfig,
    pipeline: RetrievalPipeline,
    result_log: Option<ResultLog>,
}

impl Trainer {
    /// Build a trainer from the full config.
    ///
    /// Fails when the configured architecture is unknown or its pretrained
    /// weights are missing, before any data is touched.
    pub fn new(config: &Config) -> Result<Self> {
        if let Some(weights) = config.model.pretrained_weights()? {
            tracing::info!("Using pretrained weights {:?}", weights);
        }
        Ok(Self::from_parts(
            config.training.clone(),
            RetrievalPipeline::new(config),
        ))
    }

    pub fn from_parts(training: TrainingConfig, pipeline: RetrievalPipeline) -> Self {
        Self {
            training,
            pipeline,
            result_log: None,
        }
    }

    /// Append every evaluation to `log`.
    pub fn with_result_log(mut self, log: ResultLog) -> Self {
        self.result_log = Some(log);
        self
    }

    /// Run epochs `start_epoch..max_epoch`.
    pub fn fit<'a, B, C, O, S>(
        &mut self,
        model: &mut B,
        criterion: &C,
        optimizer: &mut O,
        sink: &mut S,
        loaders: TrainingLoaders<'a, B::Frames>,
    ) -> Result<TrainingSummary>
    where
        B: Backbone,
        B::Frames: 'a,
        C: Criterion + ?Sized,
        O: Optimizer<B> + ?Sized,
        S: CheckpointSink<B::State> + ?Sized,
    {
        let store = self.pipeline.store().clone();
        let batch_size = self.training.train_batch;
        let test_batch = self.training.test_batch;
        let mut train = AlignedLoader::new(loaders.train, &store, Phase::Train).with_batch_size(batch_size);
        let mut val = AlignedLoader::new(loaders.val, &store, Phase::Val).with_batch_size(batch_size);
        let mut query = AlignedLoader::new(loaders.query, &store, Phase::Query).with_batch_size(test_batch);
        let mut gallery =
            AlignedLoader::new(loaders.gallery, &store, Phase::Gallery).with_batch_size(test_batch);

        let start = Instant::now();
        let mut best: Option<(f64, usize)> = None;
        let mut history = Vec::new();

        for epoch in self.training.start_epoch..self.training.max_epoch {
            tracing::info!("==> Epoch {}/{}", epoch + 1, self.training.max_epoch);

            let print_freq = self.training.print_freq;
            let train_loss = run_phase(model, criterion, optimizer, &mut train, Mode::Train, print_freq)?;
            let val_loss = run_phase(model, criterion, optimizer, &mut val, Mode::Eval, print_freq)?;
            tracing::info!(
                "Epoch {} train loss {:.6} val loss {:.6}",
                epoch + 1,
                train_loss.avg,
                val_loss.avg
            );
            optimizer.on_epoch_end(epoch);

            let metrics = if self.training.evaluates_after(epoch) {
                tracing::info!("==> Test");
                let metrics = self.evaluate(model, &mut query, &mut gallery)?;
                let rank1 = metrics.rank1();
                let is_best = best.map_or(true, |(best_rank1, _)| rank1 > best_rank1);
                if is_best {
                    best = Some((rank1, epoch));
                }
                let checkpoint = Checkpoint {
                    state_dict: model.state_dict(),
                    rank1,
                    epoch,
                };
                sink.save(&checkpoint, is_best)?;
                Some(metrics)
            } else {
                None
            };

            history.push(EpochStats {
                epoch,
                train_loss,
                val_loss,
                metrics,
            });
        }

        let elapsed = start.elapsed();
        tracing::info!("Finished. Total elapsed time: {:.0}s", elapsed.as_secs_f64());
        if let Some((rank1, epoch)) = best {
            tracing::info!("Best rank-1 {:.1}% at epoch {}", rank1 * 100.0, epoch + 1);
        }

        Ok(TrainingSummary {
            best_rank1: best.map(|(rank1, _)| rank1),
            best_epoch: best.map(|(_, epoch)| epoch),
            history,
            elapsed,
        })
    }

    /// Score the query set against the gallery with the backbone in eval mode.
    fn evaluate<'l, B>(
        &mut self,
        model: &mut B,
        query: &mut AlignedLoader<'l, B::Frames>,
        gallery: &mut AlignedLoader<'l, B::Frames>,
    ) -> Result<RetrievalMetrics>
    where
        B: Backbone,
        B::Frames: 'l,
    {
        model.set_mode(Mode::Eval);
        let pool = self.pipeline.evaluation().pool;
        let query = extract_features(model, query, pool, "query")?;
        let gallery = extract_features(model, gallery, pool, "gallery")?;
        let metrics = self.pipeline.score(&query, &gallery)?;

        if let Some(log) = self.result_log.as_mut() {
            log.append(&metrics, &self.pipeline.evaluation().ranks)?;
        }
        Ok(metrics)
    }
}

/// One pass over a train or val loader.
///
/// Every batch is forwarded with its own descriptors, the embedding is fused
/// with the same descriptor rows, and the loss is computed on the fused
/// features. The optimizer only steps in [`Mode::Train`].
fn run_phase<'l, B, C, O>(
    model: &mut B,
    criterion: &C,
    optimizer: &mut O,
    loader: &mut AlignedLoader<'l, B::Frames>,
    mode: Mode,
    print_freq: usize,
) -> Result<AverageMeter>
where
    B: Backbone,
    B::Frames: 'l,
    C: Criterion + ?Sized,
    O: Optimizer<B> + ?Sized,
{
    model.set_mode(mode);
    let total = loader.num_batches();
    let mut losses = AverageMeter::new();

    for (batch_idx, batch) in loader.batches().enumerate() {
        let batch = batch?;
        let output = model.forward(&batch.frames, batch.descriptors.view())?;
        let features = fuse_batch(output.embedding.view(), batch.descriptors.view())?;
        let labels = batch.identities();
        let loss = criterion.loss(output.logits.view(), features.view(), &labels)?;

        optimizer.zero_grad();
        if mode == Mode::Train {
            optimizer.step(model, loss)?;
        }
        losses.update(f64::from(loss), batch.len());

        if print_freq > 0 && (batch_idx + 1) % print_freq == 0 {
            tracing::info!(
                "Batch {}/{}\t Loss {:.6} ({:.6})",
                batch_idx + 1,
                total,
                losses.val,
                losses.avg
            );
        }
    }
    Ok(losses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvaluationConfig, GeiConfig};
    use crate::error::ConfigError;
    use crate::data::{InMemorySource, RawBatch};
    use crate::error::{DataError, GaitFuseError};
    use crate::gei::tests::write_descriptor;
    use crate::gei::GeiStore;
    use crate::model::{ClipEmbedder, ForwardOutput};
    use crate::types::SampleMeta;
    use ndarray::{array, Array2, ArrayView2};

    /// Embedding is `frames * scale`; logits are all zero.
    struct ScaleBackbone {
        scale: f32,
        mode: Mode,
        forwards: Vec<Mode>,
    }

    impl ScaleBackbone {
        fn new() -> Self {
            Self {
                scale: 1.0,
                mode: Mode::Eval,
                forwards: Vec::new(),
            }
        }
    }

    impl ClipEmbedder for ScaleBackbone {
        type Frames = Array2<f32>;

        fn embed_clips(&mut self, frames: &Array2<f32>) -> Result<Array2<f32>> {
            assert_eq!(self.mode, Mode::Eval);
            Ok(frames * self.scale)
        }
    }

    impl Backbone for ScaleBackbone {
        type State = f32;

        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
        }

        fn forward(
            &mut self,
            frames: &Array2<f32>,
            descriptors: ArrayView2<'_, f32>,
        ) -> Result<ForwardOutput> {
            assert_eq!(frames.nrows(), descriptors.nrows());
            self.forwards.push(self.mode);
            Ok(ForwardOutput {
                logits: Array2::zeros((frames.nrows(), 2)),
                embedding: frames * self.scale,
            })
        }

        fn state_dict(&self) -> f32 {
            self.scale
        }
    }

    /// Loss is the mean of the fused features.
    struct MeanCriterion;

    impl Criterion for MeanCriterion {
        fn loss(
            &self,
            logits: ArrayView2<'_, f32>,
            features: ArrayView2<'_, f32>,
            labels: &[u32],
        ) -> Result<f32> {
            assert_eq!(logits.nrows(), labels.len());
            assert_eq!(features.nrows(), labels.len());
            Ok(features.mean().unwrap_or(0.0))
        }
    }

    #[derive(Default)]
    struct CountingOptimizer {
        zero_grads: usize,
        steps: usize,
        epochs_ended: Vec<usize>,
    }

    impl Optimizer<ScaleBackbone> for CountingOptimizer {
        fn zero_grad(&mut self) {
            self.zero_grads += 1;
        }

        fn step(&mut self, model: &mut ScaleBackbone, _loss: f32) -> Result<()> {
            assert_eq!(model.mode, Mode::Train);
            self.steps += 1;
            Ok(())
        }

        fn on_epoch_end(&mut self, epoch: usize) {
            self.epochs_ended.push(epoch);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Vec<(usize, f64, bool)>,
    }

    impl CheckpointSink<f32> for RecordingSink {
        fn save(&mut self, checkpoint: &Checkpoint<f32>, is_best: bool) -> Result<()> {
            self.saved.push((checkpoint.epoch, checkpoint.rank1, is_best));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        trainer: Trainer,
        train: InMemorySource<Array2<f32>>,
        val: InMemorySource<Array2<f32>>,
        query: InMemorySource<Array2<f32>>,
        gallery: InMemorySource<Array2<f32>>,
    }

    fn meta(identity: u32, camera: u32) -> SampleMeta {
        SampleMeta::new(identity, camera, "nm-01")
    }

    fn fixture(max_epoch: usize, eval_step: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        // train ids 0,1 -> 001,002; val id 0 -> 069; query/gallery ids as-is
        for name in [
            "001-nm-01-c1.npy",
            "002-nm-01-c1.npy",
            "069-nm-01-c1.npy",
            "001-nm-01-c2.npy",
            "002-nm-01-c2.npy",
            "001-nm-01-c3.npy",
            "002-nm-01-c3.npy",
        ] {
            write_descriptor(dir.path(), name, 1, 1.0);
        }
        let store = GeiStore::new(
            dir.path(),
            &GeiConfig {
                descriptor_dim: 1,
                ..GeiConfig::default()
            },
        );
        let pipeline = RetrievalPipeline::from_parts(store, EvaluationConfig::default());
        let training = TrainingConfig {
            max_epoch,
            train_batch: 2,
            print_freq: 1,
            eval_step,
            ..TrainingConfig::default()
        };

        let train_batch = || RawBatch::new(array![[1.0f32], [3.0]], vec![meta(0, 1), meta(1, 1)]);
        Fixture {
            trainer: Trainer::from_parts(training, pipeline),
            train: InMemorySource::new(vec![train_batch(), train_batch(), train_batch()]),
            val: InMemorySource::new(vec![RawBatch::new(
                array![[2.0f32], [2.0]],
                vec![meta(0, 1), meta(0, 1)],
            )]),
            query: InMemorySource::new(vec![
                RawBatch::new(array![[0.0f32]], vec![meta(1, 2)]),
                RawBatch::new(array![[10.0f32]], vec![meta(2, 2)]),
            ]),
            gallery: InMemorySource::new(vec![
                RawBatch::new(array![[0.5f32]], vec![meta(1, 3)]),
                RawBatch::new(array![[9.0f32]], vec![meta(2, 3)]),
            ]),
            _dir: dir,
        }
    }

    #[test]
    fn test_fit_runs_train_then_val_each_epoch() {
        let mut fx = fixture(4, 2);
        let mut model = ScaleBackbone::new();
        let mut optimizer = CountingOptimizer::default();
        let mut sink = RecordingSink::default();

        let summary = fx
            .trainer
            .fit(
                &mut model,
                &MeanCriterion,
                &mut optimizer,
                &mut sink,
                TrainingLoaders {
                    train: &mut fx.train,
                    val: &mut fx.val,
                    query: &mut fx.query,
                    gallery: &mut fx.gallery,
                },
            )
            .unwrap();

        // 3 train batches step, 1 val batch never does.
        assert_eq!(optimizer.steps, 4 * 3);
        assert_eq!(optimizer.zero_grads, 4 * 4);
        assert_eq!(optimizer.epochs_ended, vec![0, 1, 2, 3]);
        let per_epoch = [Mode::Train, Mode::Train, Mode::Train, Mode::Eval];
        assert_eq!(model.forwards, per_epoch.repeat(4));

        assert_eq!(summary.history.len(), 4);
        let first = &summary.history[0];
        // Fused rows: [1, 1] and [3, 1] -> mean 1.5; val rows [2, 1] -> 1.5
        assert!((first.train_loss.avg - 1.5).abs() < 1e-9);
        assert_eq!(first.train_loss.count, 6);
        assert!((first.val_loss.avg - 1.5).abs() < 1e-9);
        assert_eq!(first.val_loss.count, 2);
    }

    #[test]
    fn test_fit_evaluates_on_cadence_and_final_epoch() {
        let mut fx = fixture(5, 2);
        let mut model = ScaleBackbone::new();
        let mut optimizer = CountingOptimizer::default();
        let mut sink = RecordingSink::default();

        let summary = fx
            .trainer
            .fit(
                &mut model,
                &MeanCriterion,
                &mut optimizer,
                &mut sink,
                TrainingLoaders {
                    train: &mut fx.train,
                    val: &mut fx.val,
                    query: &mut fx.query,
                    gallery: &mut fx.gallery,
                },
            )
            .unwrap();

        // Epochs 2, 4 and the last one (5), 0-based 1, 3, 4.
        let evaluated: Vec<usize> = sink.saved.iter().map(|&(epoch, _, _)| epoch).collect();
        assert_eq!(evaluated, vec![1, 3, 4]);
        // Each query's nearest gallery entry is its own identity.
        assert!(sink.saved.iter().all(|&(_, rank1, _)| rank1 == 1.0));
        // Only the first evaluation improves on the best.
        let best_flags: Vec<bool> = sink.saved.iter().map(|&(_, _, b)| b).collect();
        assert_eq!(best_flags, vec![true, false, false]);

        assert_eq!(summary.best_rank1, Some(1.0));
        assert_eq!(summary.best_epoch, Some(1));
        assert!(summary.history[0].metrics.is_none());
        assert!(summary.history[1].metrics.is_some());
    }

    #[test]
    fn test_result_log_receives_every_evaluation() {
        let mut fx = fixture(2, 1);
        let log_dir = tempfile::tempdir().unwrap();
        let log_path = log_dir.path().join("result.txt");
        let mut trainer = fx
            .trainer
            .with_result_log(ResultLog::create(&log_path).unwrap());

        trainer
            .fit(
                &mut ScaleBackbone::new(),
                &MeanCriterion,
                &mut CountingOptimizer::default(),
                &mut RecordingSink::default(),
                TrainingLoaders {
                    train: &mut fx.train,
                    val: &mut fx.val,
                    query: &mut fx.query,
                    gallery: &mut fx.gallery,
                },
            )
            .unwrap();

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(crate::report::parse_results(&text).len(), 2);
        assert!(text.contains("Rank-1  : 100.0%"));
    }

    #[test]
    fn test_short_train_batch_is_fatal() {
        let mut fx = fixture(1, 1);
        fx.train = InMemorySource::new(vec![RawBatch::new(array![[1.0f32]], vec![meta(0, 1)])]);

        let err = fx
            .trainer
            .fit(
                &mut ScaleBackbone::new(),
                &MeanCriterion,
                &mut CountingOptimizer::default(),
                &mut RecordingSink::default(),
                TrainingLoaders {
                    train: &mut fx.train,
                    val: &mut fx.val,
                    query: &mut fx.query,
                    gallery: &mut fx.gallery,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            GaitFuseError::Data(DataError::BatchMismatch { expected: 2, actual: 1, .. })
        ));
    }

    /// Reports a failed loss computation the way an external engine would.
    struct FailingCriterion;

    impl Criterion for FailingCriterion {
        fn loss(
            &self,
            _logits: ArrayView2<'_, f32>,
            _features: ArrayView2<'_, f32>,
            _labels: &[u32],
        ) -> Result<f32> {
            Err(GaitFuseError::Model("loss is not finite".to_string()))
        }
    }

    #[test]
    fn test_criterion_error_aborts_fit() {
        let mut fx = fixture(3, 1);
        let mut optimizer = CountingOptimizer::default();
        let mut sink = RecordingSink::default();

        let err = fx
            .trainer
            .fit(
                &mut ScaleBackbone::new(),
                &FailingCriterion,
                &mut optimizer,
                &mut sink,
                TrainingLoaders {
                    train: &mut fx.train,
                    val: &mut fx.val,
                    query: &mut fx.query,
                    gallery: &mut fx.gallery,
                },
            )
            .unwrap_err();

        match err {
            GaitFuseError::Model(message) => assert_eq!(message, "loss is not finite"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(optimizer.steps, 0);
        assert!(optimizer.epochs_ended.is_empty());
        assert!(sink.saved.is_empty());
    }

    #[test]
    fn test_new_requires_pretrained_weights() {
        let mut config = Config::default();
        config.model.arch = "resnet503d".to_string();
        config.model.pretrained = None;
        assert!(matches!(
            Trainer::new(&config),
            Err(GaitFuseError::Config(ConfigError::MissingPretrained(_)))
        ));

        config.model.pretrained = Some(std::path::PathBuf::from("/nonexistent/resnet-50-kinetics.pth"));
        assert!(matches!(
            Trainer::new(&config),
            Err(GaitFuseError::Config(ConfigError::MissingPretrained(_)))
        ));
    }

    #[test]
    fn test_new_accepts_default_architecture() {
        assert!(Trainer::new(&Config::default()).is_ok());
    }
}
