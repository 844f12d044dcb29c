use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::config::DeepLearningConfig;
use crate::data::loader::{DataLoader, Dataset};
use crate::data::module::TrainingAndValidationData;
use crate::error::{Result, TrainError};
use crate::metrics::metrics_dict::MetricsDict;
use crate::network::network::Network;
use crate::optim::Optimizer;
use crate::train::module::{EpochContext, LightningHooks, TRAIN_LOSS, VAL_LOSS};

pub const BEST_CHECKPOINT_FILE_NAME: &str = "best_val_loss_checkpoint.json";
pub const LAST_CHECKPOINT_FILE_NAME: &str = "last_checkpoint.json";

/// Metrics of every epoch of a finished training run.
#[derive(Debug, Clone, Default)]
pub struct ModelTrainingResults {
    pub train_results_per_epoch: Vec<MetricsDict>,
    pub val_results_per_epoch: Vec<MetricsDict>,
}

/// Network weights plus the epoch they were taken at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub val_loss: Option<f64>,
    pub network: Network,
}

impl Checkpoint {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Checkpoint> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut checkpoint: Checkpoint = serde_json::from_reader(reader)?;
        checkpoint.network.validate()?;
        checkpoint.network.reset_buffers();
        Ok(checkpoint)
    }
}

/// Keeps the checkpoint with the lowest validation loss, plus the latest one.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    folder: PathBuf,
    best_val_loss: Option<f64>,
}

impl ModelCheckpoint {
    pub fn new(folder: impl Into<PathBuf>) -> Result<ModelCheckpoint> {
        let folder = folder.into();
        std::fs::create_dir_all(&folder)?;
        Ok(ModelCheckpoint { folder, best_val_loss: None })
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.best_val_loss
    }

    /// Writes the last checkpoint, and the best one if `val_loss` improved.
    /// Returns whether the best checkpoint was replaced.
    pub fn on_validation_end(&mut self, epoch: usize, val_loss: Option<f64>, network: &Network) -> Result<bool> {
        let checkpoint = Checkpoint { epoch, val_loss, network: network.clone() };
        checkpoint.save_json(self.folder.join(LAST_CHECKPOINT_FILE_NAME))?;

        let improved = match (val_loss, self.best_val_loss) {
            (Some(loss), _) if loss.is_nan() => false,
            (Some(loss), Some(best)) => loss < best,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            checkpoint.save_json(self.folder.join(BEST_CHECKPOINT_FILE_NAME))?;
            self.best_val_loss = val_loss;
            info!("Epoch {epoch}: new best val_loss {:.6}, checkpoint saved", checkpoint.val_loss.unwrap_or(f64::NAN));
        }
        Ok(improved)
    }
}

/// Runs the epoch loop and calls the module's hooks in a fixed order.
///
/// The trainer owns the random generator that all hooks and data loaders
/// draw from.
pub struct Trainer {
    num_epochs: usize,
    detect_anomaly: bool,
    checkpoint: Option<ModelCheckpoint>,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: &DeepLearningConfig, rng: StdRng) -> Trainer {
        Trainer {
            num_epochs: config.num_epochs,
            detect_anomaly: config.detect_anomaly,
            checkpoint: None,
            rng,
        }
    }

    /// Enables checkpointing into `folder`.
    pub fn with_checkpointing(mut self, folder: impl Into<PathBuf>) -> Result<Trainer> {
        self.checkpoint = Some(ModelCheckpoint::new(folder)?);
        Ok(self)
    }

    pub fn checkpoint(&self) -> Option<&ModelCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn rng(&self) -> &StdRng {
        &self.rng
    }

    /// Trains for the configured number of epochs: a training epoch, a
    /// validation epoch, checkpointing, then a learning rate update.
    pub fn fit<M, D>(&mut self, module: &mut M, data: &mut D) -> Result<()>
    where
        D: TrainingAndValidationData,
        M: LightningHooks<Batch = Vec<<D::Dataset as Dataset>::Item>>,
    {
        data.setup()?;
        let (mut optimizer, mut scheduler) = module.configure_optimizers();
        for epoch in 0..self.num_epochs {
            let learning_rate = scheduler.get_last_lr();
            self.run_epoch(module, data.train_dataloader()?, epoch, learning_rate, Some(&mut *optimizer))?;
            self.run_epoch(module, data.val_dataloader()?, epoch, learning_rate, None)?;

            let train_loss = module.logged_metric(TRAIN_LOSS);
            let val_loss = module.logged_metric(VAL_LOSS);
            info!(
                "Epoch {epoch}: train_loss {:.6}, val_loss {:.6}, learning rate {learning_rate:.3e}",
                train_loss.unwrap_or(f64::NAN),
                val_loss.unwrap_or(f64::NAN)
            );
            if let Some(checkpoint) = self.checkpoint.as_mut() {
                checkpoint.on_validation_end(epoch, val_loss, module.network())?;
            }
            scheduler.step();
        }
        Ok(())
    }

    fn run_epoch<M, T>(
        &mut self,
        module: &mut M,
        loader: &mut DataLoader<T>,
        epoch: usize,
        learning_rate: f64,
        mut optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<()>
    where
        T: Dataset,
        M: LightningHooks<Batch = Vec<T::Item>>,
    {
        let is_training = optimizer.is_some();
        {
            let mut ctx = EpochContext { epoch, rng: &mut self.rng, learning_rate };
            if is_training {
                module.on_train_epoch_start(&mut ctx)?;
            } else {
                module.on_validation_epoch_start(&mut ctx)?;
            }
        }

        loader.start_epoch(&mut self.rng);
        let mut batch_idx = 0;
        while let Some(batch) = loader.next_batch(&mut self.rng)? {
            match optimizer.as_mut() {
                Some(optimizer) => {
                    module.on_train_batch_start(&batch, batch_idx);
                    let output = module.training_step(&batch, batch_idx)?;
                    self.check_loss(epoch, batch_idx, output.loss)?;
                    if let Some(gradients) = output.gradients {
                        optimizer.step(module.network_mut(), &gradients, learning_rate);
                        module.after_optimizer_step();
                    }
                }
                None => {
                    module.on_validation_batch_start(&batch, batch_idx);
                    let loss = module.validation_step(&batch, batch_idx)?;
                    self.check_loss(epoch, batch_idx, loss)?;
                }
            }
            module.on_batch_end();
            batch_idx += 1;
        }

        let mut ctx = EpochContext { epoch, rng: &mut self.rng, learning_rate };
        if is_training {
            module.on_train_epoch_end(&mut ctx)
        } else {
            module.on_validation_epoch_end(&mut ctx)
        }
    }

    fn check_loss(&self, epoch: usize, batch_idx: usize, value: f64) -> Result<()> {
        if value.is_finite() {
            return Ok(());
        }
        if self.detect_anomaly {
            return Err(TrainError::NonFiniteLoss { epoch, batch_idx, value });
        }
        warn!("Epoch {epoch}, minibatch {batch_idx}: loss is {value}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::config::ScalarConfig;
    use crate::data::module::ScalarData;
    use crate::data::sample::{DatasetSplits, ScalarItem};
    use crate::optim::{create_optimizer, LrSchedule, OptimizerType, SchedulerWithWarmUp};
    use crate::train::module::StepOutput;
    use rand::SeedableRng;

    struct Recorder {
        events: Vec<String>,
        network: Network,
        loss: f64,
    }

    impl Recorder {
        fn new(loss: f64) -> Recorder {
            let mut rng = StdRng::seed_from_u64(0);
            let network = Network::new(vec![(1, 1, ActivationFunction::Identity)], &mut rng);
            Recorder { events: Vec::new(), network, loss }
        }
    }

    impl LightningHooks for Recorder {
        type Batch = Vec<ScalarItem>;

        fn configure_optimizers(&self) -> (Box<dyn Optimizer>, SchedulerWithWarmUp) {
            let scheduler = SchedulerWithWarmUp::new(0.1, 0.0, 0, 2, LrSchedule::Constant);
            (create_optimizer(OptimizerType::Sgd { momentum: 0.0 }, 0.0), scheduler)
        }

        fn on_train_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
            self.events.push(format!("train_epoch_start {}", ctx.epoch));
            Ok(())
        }

        fn on_validation_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
            self.events.push(format!("val_epoch_start {}", ctx.epoch));
            Ok(())
        }

        fn on_train_batch_start(&mut self, _batch: &Vec<ScalarItem>, batch_idx: usize) {
            self.events.push(format!("train_batch_start {batch_idx}"));
        }

        fn on_validation_batch_start(&mut self, _batch: &Vec<ScalarItem>, batch_idx: usize) {
            self.events.push(format!("val_batch_start {batch_idx}"));
        }

        fn training_step(&mut self, batch: &Vec<ScalarItem>, _batch_idx: usize) -> Result<StepOutput> {
            self.events.push(format!("training_step {}", batch.len()));
            Ok(StepOutput { loss: self.loss, gradients: None })
        }

        fn validation_step(&mut self, batch: &Vec<ScalarItem>, _batch_idx: usize) -> Result<f64> {
            self.events.push(format!("validation_step {}", batch.len()));
            Ok(self.loss)
        }

        fn on_batch_end(&mut self) {
            self.events.push("batch_end".to_string());
        }

        fn on_train_epoch_end(&mut self, _ctx: &mut EpochContext<'_>) -> Result<()> {
            self.events.push("train_epoch_end".to_string());
            Ok(())
        }

        fn on_validation_epoch_end(&mut self, _ctx: &mut EpochContext<'_>) -> Result<()> {
            self.events.push("val_epoch_end".to_string());
            Ok(())
        }

        fn network(&self) -> &Network {
            &self.network
        }

        fn network_mut(&mut self) -> &mut Network {
            &mut self.network
        }

        fn after_optimizer_step(&mut self) {
            self.events.push("after_optimizer_step".to_string());
        }

        fn logged_metric(&self, name: &str) -> Option<f64> {
            (name == VAL_LOSS).then_some(self.loss)
        }
    }

    fn data(train: usize, val: usize) -> ScalarData {
        let item = |i: usize| ScalarItem { subject_id: i.to_string(), features: vec![i as f64], label: vec![1.0] };
        let config = ScalarConfig {
            common: DeepLearningConfig { train_batch_size: 2, ..DeepLearningConfig::default() },
            ..ScalarConfig::default()
        };
        ScalarData::new(config, DatasetSplits {
            train: (0..train).map(item).collect(),
            val: (0..val).map(item).collect(),
            test: vec![],
        })
    }

    fn trainer(num_epochs: usize, detect_anomaly: bool) -> Trainer {
        let config = DeepLearningConfig { num_epochs, detect_anomaly, ..DeepLearningConfig::default() };
        Trainer::new(&config, StdRng::seed_from_u64(1))
    }

    #[test]
    fn hooks_run_in_order() {
        let mut module = Recorder::new(0.5);
        trainer(1, false).fit(&mut module, &mut data(3, 1)).unwrap();
        assert_eq!(module.events, vec![
            "train_epoch_start 0",
            "train_batch_start 0", "training_step 2", "batch_end",
            "train_batch_start 1", "training_step 1", "batch_end",
            "train_epoch_end",
            "val_epoch_start 0",
            "val_batch_start 0", "validation_step 1", "batch_end",
            "val_epoch_end",
        ]);
    }

    #[test]
    fn non_finite_loss_aborts_only_with_anomaly_detection() {
        let mut module = Recorder::new(f64::NAN);
        assert!(trainer(1, false).fit(&mut module, &mut data(1, 1)).is_ok());
        let err = trainer(1, true).fit(&mut Recorder::new(f64::NAN), &mut data(1, 1)).unwrap_err();
        assert!(matches!(err, TrainError::NonFiniteLoss { epoch: 0, batch_idx: 0, .. }));
    }

    #[test]
    fn checkpoints_track_the_best_validation_loss() {
        let dir = tempfile::tempdir().unwrap();
        let network = Recorder::new(0.0).network;
        let mut checkpoint = ModelCheckpoint::new(dir.path()).unwrap();
        assert!(checkpoint.on_validation_end(0, Some(0.8), &network).unwrap());
        assert!(!checkpoint.on_validation_end(1, Some(0.9), &network).unwrap());
        assert!(!checkpoint.on_validation_end(2, None, &network).unwrap());
        assert!(checkpoint.on_validation_end(3, Some(0.1), &network).unwrap());

        let best = Checkpoint::load_json(dir.path().join(BEST_CHECKPOINT_FILE_NAME)).unwrap();
        let last = Checkpoint::load_json(dir.path().join(LAST_CHECKPOINT_FILE_NAME)).unwrap();
        assert_eq!((best.epoch, best.val_loss), (3, Some(0.1)));
        assert_eq!(last.epoch, 3);
        assert_eq!(checkpoint.best_val_loss(), Some(0.1));
    }

    #[test]
    fn fit_writes_checkpoints_every_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(2, false).with_checkpointing(dir.path().join("checkpoints")).unwrap();
        trainer.fit(&mut Recorder::new(0.25), &mut data(2, 2)).unwrap();
        let last = Checkpoint::load_json(dir.path().join("checkpoints").join(LAST_CHECKPOINT_FILE_NAME)).unwrap();
        assert_eq!(last.epoch, 1);
        assert_eq!(trainer.checkpoint().unwrap().best_val_loss(), Some(0.25));
    }
}
