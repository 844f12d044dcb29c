//! Lifecycle bookkeeping shared by all model families.
//!
//! [`TrainingModule`] implements the hooks that the [`Trainer`] calls at
//! fixed points of every epoch: it keeps the load-time timers, the shared
//! random state and the per-epoch metric history, and delegates the
//! numerical work of each batch to a [`ModelFamily`].
//!
//! [`Trainer`]: crate::train::trainer::Trainer

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use tracing::debug;

use crate::config::DeepLearningConfig;
use crate::data::ModelExecutionMode;
use crate::error::Result;
use crate::metrics::metrics_dict::{mean, MetricType, MetricsDict, DEFAULT_HUE_KEY};
use crate::metrics::store::{store_epoch_metrics, DataFrameLoggers};
use crate::network::{gradients::Gradients, network::Network};
use crate::optim::{create_optimizer, Optimizer, SchedulerWithWarmUp};
use crate::train::random_state::{set_random_seed, RandomStateSnapshot};
use crate::train::timers::LoadTimeMonitor;

pub const TRAIN_LOSS: &str = "train_loss";
pub const VAL_LOSS: &str = "val_loss";

/// Result of one training or validation step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub loss: f64,
    /// Parameter gradients; only computed for training steps.
    pub gradients: Option<Gradients>,
}

/// What the driver hands to epoch-level hooks.
pub struct EpochContext<'a> {
    pub epoch: usize,
    pub rng: &'a mut StdRng,
    pub learning_rate: f64,
}

/// Model-family specific step logic.
pub trait ModelFamily {
    type Batch;

    /// Prepares a fresh metrics accumulator for the coming epoch.
    fn epoch_start(&mut self);

    fn training_or_validation_step(
        &mut self,
        batch: &Self::Batch,
        batch_idx: usize,
        is_training: bool,
    ) -> Result<StepOutput>;

    fn metrics_mut(&mut self) -> &mut MetricsDict;

    /// Reduces the metrics of the finished epoch.
    fn aggregate_metrics(&self) -> Result<MetricsDict>;

    /// Family-specific work once the epoch metrics have been stored.
    fn epoch_end(
        &mut self,
        _epoch: usize,
        _is_training: bool,
        _loggers: Option<&mut DataFrameLoggers>,
        _cross_validation_split_index: i32,
    ) -> Result<()> {
        Ok(())
    }

    fn network(&self) -> &Network;

    fn network_mut(&mut self) -> &mut Network;

    fn after_optimizer_step(&mut self) {}
}

/// Extension points called by the training driver, in this order per epoch:
/// train epoch start, then per batch (batch start, step, batch end), train
/// epoch end; the same for validation.
pub trait LightningHooks {
    type Batch;

    fn configure_optimizers(&self) -> (Box<dyn Optimizer>, SchedulerWithWarmUp);

    fn on_train_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()>;

    fn on_validation_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()>;

    fn on_train_batch_start(&mut self, batch: &Self::Batch, batch_idx: usize);

    fn on_validation_batch_start(&mut self, batch: &Self::Batch, batch_idx: usize);

    fn training_step(&mut self, batch: &Self::Batch, batch_idx: usize) -> Result<StepOutput>;

    fn validation_step(&mut self, batch: &Self::Batch, batch_idx: usize) -> Result<f64>;

    fn on_batch_end(&mut self);

    fn on_train_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> Result<()>;

    fn on_validation_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> Result<()>;

    fn network(&self) -> &Network;

    fn network_mut(&mut self) -> &mut Network;

    fn after_optimizer_step(&mut self);

    /// Mean of a value logged during the current epoch, e.g. `val_loss`.
    fn logged_metric(&self, name: &str) -> Option<f64>;
}

pub struct TrainingModule<F: ModelFamily> {
    config: DeepLearningConfig,
    family: F,
    timers: LoadTimeMonitor,
    pub train_metrics_per_epoch: Vec<MetricsDict>,
    pub validation_metrics_per_epoch: Vec<MetricsDict>,
    random_state: Option<RandomStateSnapshot>,
    loggers: Option<DataFrameLoggers>,
    current_epoch: usize,
    logged: BTreeMap<String, Vec<f64>>,
}

impl<F: ModelFamily> TrainingModule<F> {
    pub fn new(config: DeepLearningConfig, family: F) -> TrainingModule<F> {
        TrainingModule {
            config,
            family,
            timers: LoadTimeMonitor::default(),
            train_metrics_per_epoch: Vec::new(),
            validation_metrics_per_epoch: Vec::new(),
            random_state: None,
            loggers: None,
            current_epoch: 0,
            logged: BTreeMap::new(),
        }
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn config(&self) -> &DeepLearningConfig {
        &self.config
    }

    pub fn timers(&self) -> &LoadTimeMonitor {
        &self.timers
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Opens the CSV files for epoch and subject metrics in the logs folder.
    pub fn create_loggers_for_training(&mut self) -> Result<()> {
        self.loggers = Some(DataFrameLoggers::create(&self.config.logs_folder())?);
        Ok(())
    }

    pub fn close_all_loggers(&mut self) {
        self.loggers = None;
    }

    /// Records the loss for the driver (`train_loss` / `val_loss`) and in the
    /// family's metrics.
    pub fn write_loss(&mut self, is_training: bool, loss: f64) -> Result<()> {
        let name = if is_training { TRAIN_LOSS } else { VAL_LOSS };
        self.logged.entry(name.to_string()).or_default().push(loss);
        self.family.metrics_mut().add_metric(MetricType::Loss, loss, DEFAULT_HUE_KEY)
    }

    fn start_epoch(&mut self, ctx: &EpochContext<'_>, logged_name: &str) {
        self.current_epoch = ctx.epoch;
        self.timers.reset_timers();
        self.logged.remove(logged_name);
        self.family.epoch_start();
    }

    /// Logs timing, aggregates the epoch's metrics, stores and records them.
    pub fn epoch_end(&mut self, is_training: bool, learning_rate: f64) -> Result<MetricsDict> {
        let epoch = self.current_epoch;
        let epoch_time_seconds = self.timers.epoch_summary(epoch, is_training);

        let mut result = self.family.aggregate_metrics()?;
        result.add_metric(MetricType::LearningRate, learning_rate, DEFAULT_HUE_KEY)?;
        result.add_metric(MetricType::SecondsPerEpoch, epoch_time_seconds, DEFAULT_HUE_KEY)?;

        let split_index = self.config.cross_validation_split_index;
        if let Some(loggers) = self.loggers.as_mut() {
            let df_logger = if is_training {
                &mut loggers.train_epoch_metrics
            } else {
                &mut loggers.val_epoch_metrics
            };
            store_epoch_metrics(df_logger, epoch, &result, split_index, is_training)?;
        }
        if is_training {
            self.train_metrics_per_epoch.push(result.clone());
        } else {
            self.validation_metrics_per_epoch.push(result.clone());
        }
        self.family.epoch_end(epoch, is_training, self.loggers.as_mut(), split_index)?;
        debug!("{} epoch {epoch} finished", ModelExecutionMode::from_training_flag(is_training));
        Ok(result)
    }

    fn step(&mut self, batch: &F::Batch, batch_idx: usize, is_training: bool) -> Result<StepOutput> {
        let output = self.family.training_or_validation_step(batch, batch_idx, is_training)?;
        self.write_loss(is_training, output.loss)?;
        Ok(output)
    }
}

impl<F: ModelFamily> LightningHooks for TrainingModule<F> {
    type Batch = F::Batch;

    fn configure_optimizers(&self) -> (Box<dyn Optimizer>, SchedulerWithWarmUp) {
        let optimizer = create_optimizer(self.config.optimizer, self.config.weight_decay);
        let scheduler = SchedulerWithWarmUp::new(
            self.config.l_rate,
            self.config.min_l_rate,
            self.config.l_rate_warmup_epochs,
            self.config.num_epochs,
            self.config.l_rate_schedule.clone(),
        );
        (optimizer, scheduler)
    }

    fn on_train_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
        self.start_epoch(ctx, TRAIN_LOSS);
        // continue the random sequence where the previous training epoch stopped
        if let Some(state) = &self.random_state {
            state.restore_random_state(ctx.rng);
        }
        Ok(())
    }

    fn on_validation_epoch_start(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
        self.start_epoch(ctx, VAL_LOSS);
        // identical validation patches in every epoch
        set_random_seed(ctx.rng, self.config.get_effective_random_seed(), "Model validation");
        Ok(())
    }

    fn on_train_batch_start(&mut self, _batch: &F::Batch, batch_idx: usize) {
        self.timers.batch_start(batch_idx, true);
    }

    fn on_validation_batch_start(&mut self, _batch: &F::Batch, batch_idx: usize) {
        self.timers.batch_start(batch_idx, false);
    }

    fn training_step(&mut self, batch: &F::Batch, batch_idx: usize) -> Result<StepOutput> {
        self.step(batch, batch_idx, true)
    }

    fn validation_step(&mut self, batch: &F::Batch, batch_idx: usize) -> Result<f64> {
        Ok(self.step(batch, batch_idx, false)?.loss)
    }

    fn on_batch_end(&mut self) {
        self.timers.batch_end();
    }

    fn on_train_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
        self.random_state = Some(RandomStateSnapshot::snapshot_random_state(ctx.rng));
        self.epoch_end(true, ctx.learning_rate)?;
        Ok(())
    }

    fn on_validation_epoch_end(&mut self, ctx: &mut EpochContext<'_>) -> Result<()> {
        self.epoch_end(false, ctx.learning_rate)?;
        Ok(())
    }

    fn network(&self) -> &Network {
        self.family.network()
    }

    fn network_mut(&mut self) -> &mut Network {
        self.family.network_mut()
    }

    fn after_optimizer_step(&mut self) {
        self.family.after_optimizer_step();
    }

    fn logged_metric(&self, name: &str) -> Option<f64> {
        self.logged.get(name).filter(|v| !v.is_empty()).map(|v| mean(v, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScalarConfig;
    use crate::data::sample::ScalarItem;
    use crate::train::scalar::create_scalar_module;
    use rand::{Rng, SeedableRng};

    fn module() -> TrainingModule<crate::train::scalar::ScalarSteps> {
        let config = ScalarConfig::default();
        create_scalar_module(&config, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    fn ctx(rng: &mut StdRng, epoch: usize) -> EpochContext<'_> {
        EpochContext { epoch, rng, learning_rate: 0.01 }
    }

    #[test]
    fn validation_always_starts_from_the_same_seed() {
        let mut module = module();
        let mut rng = StdRng::seed_from_u64(7);
        module.on_validation_epoch_start(&mut ctx(&mut rng, 0)).unwrap();
        let first: u64 = rng.gen();
        let _: u64 = rng.gen();
        module.on_validation_epoch_start(&mut ctx(&mut rng, 1)).unwrap();
        assert_eq!(rng.gen::<u64>(), first);
    }

    #[test]
    fn training_resumes_where_the_previous_epoch_stopped() {
        let mut module = module();
        let mut rng = StdRng::seed_from_u64(7);
        module.on_train_epoch_start(&mut ctx(&mut rng, 0)).unwrap();
        let _: u64 = rng.gen();
        module.on_train_epoch_end(&mut ctx(&mut rng, 0)).unwrap();
        let expected = rng.clone().gen::<u64>();

        // validation reseeds the shared generator in between
        module.on_validation_epoch_start(&mut ctx(&mut rng, 0)).unwrap();
        let _: u64 = rng.gen();
        module.on_train_epoch_start(&mut ctx(&mut rng, 1)).unwrap();
        assert_eq!(rng.gen::<u64>(), expected);
    }

    #[test]
    fn epoch_end_adds_learning_rate_and_timing() {
        let mut module = module();
        let mut rng = StdRng::seed_from_u64(0);
        module.on_train_epoch_start(&mut ctx(&mut rng, 0)).unwrap();
        let batch = vec![ScalarItem { subject_id: "a".into(), features: vec![0.5], label: vec![1.0] }];
        module.training_step(&batch, 0).unwrap();
        module.on_train_epoch_end(&mut ctx(&mut rng, 0)).unwrap();

        let metrics = &module.train_metrics_per_epoch[0];
        assert_eq!(metrics.get_single_metric(MetricType::LearningRate, DEFAULT_HUE_KEY).unwrap(), 0.01);
        assert!(metrics.get_single_metric(MetricType::SecondsPerEpoch, DEFAULT_HUE_KEY).unwrap() >= 0.0);
        assert!(metrics.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap().is_finite());
        assert!(module.logged_metric(TRAIN_LOSS).is_some());
        assert!(module.logged_metric(VAL_LOSS).is_none());
        assert!(module.validation_metrics_per_epoch.is_empty());
    }
}
