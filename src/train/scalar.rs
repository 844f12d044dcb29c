use rand::Rng;
use tracing::info;

use crate::activation::activation::PosteriorNormalization;
use crate::config::ScalarConfig;
use crate::data::sample::ScalarItem;
use crate::data::ModelExecutionMode;
use crate::error::Result;
use crate::loss::ScalarLossType;
use crate::metrics::metrics_dict::MetricsDict;
use crate::metrics::scalar::{create_metrics_dict_for_scalar_models, ScalarMetricsDict};
use crate::metrics::store::DataFrameLoggers;
use crate::network::{gradients::Gradients, network::Network};
use crate::train::module::{ModelFamily, StepOutput, TrainingModule};

/// Exponential moving average of the student's weights.
#[derive(Debug, Clone)]
pub struct MeanTeacher {
    pub network: Network,
    alpha: f64,
}

impl MeanTeacher {
    pub fn new(student: &Network, alpha: f64) -> MeanTeacher {
        MeanTeacher { network: student.clone(), alpha }
    }

    /// `teacher = alpha * teacher + (1 - alpha) * student`
    pub fn update(&mut self, student: &Network) {
        let alpha = self.alpha;
        for (teacher, student) in self.network.layers.iter_mut().zip(student.layers.iter()) {
            teacher.weights = teacher.weights.map(|w| w * alpha);
            teacher.weights.add_scaled(&student.weights, 1.0 - alpha);
            teacher.biases = teacher.biases.map(|b| b * alpha);
            teacher.biases.add_scaled(&student.biases, 1.0 - alpha);
        }
    }
}

/// Steps and metrics of classification and regression models over
/// per-subject feature vectors.
pub struct ScalarSteps {
    model: Network,
    mean_teacher: Option<MeanTeacher>,
    loss: ScalarLossType,
    posterior: PosteriorNormalization,
    class_names: Vec<String>,
    metrics: ScalarMetricsDict,
}

pub type ScalarModule = TrainingModule<ScalarSteps>;

impl ScalarSteps {
    pub fn new<R: Rng + ?Sized>(config: &ScalarConfig, rng: &mut R) -> Result<ScalarSteps> {
        let model = config.common.network.build(config.num_features, config.class_names.len(), rng)?;
        let mean_teacher = config.compute_mean_teacher_model.then(|| {
            info!("Using a mean teacher model with alpha = {}", config.mean_teacher_alpha);
            MeanTeacher::new(&model, config.mean_teacher_alpha)
        });
        Ok(ScalarSteps {
            model,
            mean_teacher,
            loss: config.loss,
            posterior: config.get_post_loss_logits_normalization_function(),
            class_names: config.class_names.clone(),
            metrics: create_metrics_dict_for_scalar_models(config),
        })
    }

    pub fn mean_teacher(&self) -> Option<&MeanTeacher> {
        self.mean_teacher.as_ref()
    }

    pub fn metrics(&self) -> &ScalarMetricsDict {
        &self.metrics
    }

    /// Posteriors of the student model for a batch of feature vectors.
    pub fn forward(&mut self, features: &[Vec<f64>]) -> Vec<Vec<f64>> {
        features.iter()
            .map(|x| self.posterior.apply(&self.model.forward(x.clone())))
            .collect()
    }
}

impl ModelFamily for ScalarSteps {
    type Batch = Vec<ScalarItem>;

    fn epoch_start(&mut self) {
        self.metrics.reset();
    }

    fn training_or_validation_step(
        &mut self,
        batch: &Vec<ScalarItem>,
        _batch_idx: usize,
        is_training: bool,
    ) -> Result<StepOutput> {
        let network = match self.mean_teacher.as_mut() {
            Some(teacher) if !is_training => &mut teacher.network,
            _ => &mut self.model,
        };
        let logits: Vec<Vec<f64>> = batch.iter().map(|item| network.forward(item.features.clone())).collect();
        let labels: Vec<Vec<f64>> = batch.iter().map(|item| item.label.clone()).collect();
        let output = self.loss.evaluate(&logits, &labels);

        let gradients = if is_training {
            let mut total = Gradients::zeros_like(&self.model);
            for (item, logit_grad) in batch.iter().zip(output.logit_grads) {
                total.accumulate(&self.model.sample_gradients(&item.features, logit_grad), 1.0);
            }
            Some(total)
        } else {
            None
        };

        let posteriors: Vec<Vec<f64>> = logits.iter().map(|z| self.posterior.apply(z)).collect();
        let subject_ids: Vec<String> = batch.iter().map(|item| item.subject_id.clone()).collect();
        for (i, hue) in self.class_names.iter().enumerate() {
            let predictions: Vec<f64> = posteriors.iter().map(|p| p[i]).collect();
            let targets: Vec<f64> = labels.iter().map(|l| l[i]).collect();
            self.metrics.add_predictions(&subject_ids, &predictions, &targets, hue)?;
        }
        Ok(StepOutput { loss: output.value, gradients })
    }

    fn metrics_mut(&mut self) -> &mut MetricsDict {
        self.metrics.metrics_mut()
    }

    fn aggregate_metrics(&self) -> Result<MetricsDict> {
        self.metrics.average(false)
    }

    fn epoch_end(
        &mut self,
        epoch: usize,
        is_training: bool,
        loggers: Option<&mut DataFrameLoggers>,
        cross_validation_split_index: i32,
    ) -> Result<()> {
        let Some(loggers) = loggers else {
            return Ok(());
        };
        let df_logger = if is_training {
            &mut loggers.train_subject_metrics
        } else {
            &mut loggers.val_subject_metrics
        };
        self.metrics.store_metrics_per_subject(
            epoch,
            df_logger,
            ModelExecutionMode::from_training_flag(is_training),
            cross_validation_split_index,
        )
    }

    fn network(&self) -> &Network {
        &self.model
    }

    fn network_mut(&mut self) -> &mut Network {
        &mut self.model
    }

    fn after_optimizer_step(&mut self) {
        if let Some(teacher) = self.mean_teacher.as_mut() {
            teacher.update(&self.model);
        }
    }
}

/// Scalar module with a freshly initialised model.
pub fn create_scalar_module<R: Rng + ?Sized>(config: &ScalarConfig, rng: &mut R) -> Result<ScalarModule> {
    let steps = ScalarSteps::new(config, rng)?;
    Ok(TrainingModule::new(config.common.clone(), steps))
}
