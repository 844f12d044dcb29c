//! Experiment configuration: shared training settings plus the
//! segmentation- and scalar-specific parts, stored as JSON.

use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::activation::activation::PosteriorNormalization;
use crate::error::{Result, TrainError};
use crate::loss::loss_type::{ScalarLossType, SegmentationLossType};
use crate::network::spec::NetworkSpec;
use crate::optim::{LrSchedule, OptimizerType};

/// Name of the hue that holds segmentation background metrics.
pub const BACKGROUND_CLASS_NAME: &str = "background";

/// Settings shared by every model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepLearningConfig {
    pub random_seed: u64,
    pub num_epochs: usize,
    pub train_batch_size: usize,
    pub l_rate: f64,
    pub min_l_rate: f64,
    pub l_rate_warmup_epochs: usize,
    pub l_rate_schedule: LrSchedule,
    pub optimizer: OptimizerType,
    pub weight_decay: f64,
    pub outputs_folder: PathBuf,
    /// Index of this run within a cross-validation, or -1 outside one.
    pub cross_validation_split_index: i32,
    pub number_of_cross_validation_splits: usize,
    /// Abort training when a loss becomes NaN or infinite.
    pub detect_anomaly: bool,
    pub network: NetworkSpec,
}

impl Default for DeepLearningConfig {
    fn default() -> Self {
        DeepLearningConfig {
            random_seed: 42,
            num_epochs: 10,
            train_batch_size: 4,
            l_rate: 1e-3,
            min_l_rate: 0.0,
            l_rate_warmup_epochs: 0,
            l_rate_schedule: LrSchedule::default(),
            optimizer: OptimizerType::default(),
            weight_decay: 0.0,
            outputs_folder: PathBuf::from("outputs"),
            cross_validation_split_index: -1,
            number_of_cross_validation_splits: 0,
            detect_anomaly: false,
            network: NetworkSpec::default(),
        }
    }
}

impl DeepLearningConfig {
    pub fn checkpoint_folder(&self) -> PathBuf {
        self.outputs_folder.join("checkpoints")
    }

    pub fn logs_folder(&self) -> PathBuf {
        self.outputs_folder.join("logs")
    }

    pub fn is_cross_validation_child_run(&self) -> bool {
        self.number_of_cross_validation_splits > 0 && self.cross_validation_split_index >= 0
    }

    /// The seed offset by the split index, so that cross-validation children
    /// draw different random sequences.
    pub fn get_effective_random_seed(&self) -> u64 {
        if self.is_cross_validation_child_run() {
            self.random_seed + self.cross_validation_split_index as u64
        } else {
            self.random_seed
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.train_batch_size == 0 {
            return Err(TrainError::config("train_batch_size must be at least 1"));
        }
        if !(self.l_rate > 0.0) {
            return Err(TrainError::config(format!("l_rate must be positive, got {}", self.l_rate)));
        }
        if self.number_of_cross_validation_splits > 0
            && self.cross_validation_split_index >= self.number_of_cross_validation_splits as i32
        {
            return Err(TrainError::config(format!(
                "cross_validation_split_index {} is out of range for {} splits",
                self.cross_validation_split_index, self.number_of_cross_validation_splits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    #[serde(flatten)]
    pub common: DeepLearningConfig,
    /// Foreground structure names; class `i + 1` of the label maps.
    pub ground_truth_ids: Vec<String>,
    pub image_channels: usize,
    /// Size of the random patches fed to the model.
    pub crop_size: [usize; 3],
    /// Size of the centered region the model predicts; defaults to `crop_size`.
    pub output_size: Option<[usize; 3]>,
    pub loss: SegmentationLossType,
    pub patches_per_subject: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig {
            common: DeepLearningConfig::default(),
            ground_truth_ids: vec!["region".to_string()],
            image_channels: 1,
            crop_size: [1, 8, 8],
            output_size: None,
            loss: SegmentationLossType::CrossEntropy,
            patches_per_subject: 1,
        }
    }
}

impl SegmentationConfig {
    /// Background plus one class per ground-truth structure.
    pub fn number_of_classes(&self) -> usize {
        self.ground_truth_ids.len() + 1
    }

    pub fn get_output_size(&self) -> [usize; 3] {
        self.output_size.unwrap_or(self.crop_size)
    }

    pub fn class_and_index_names(&self) -> Vec<String> {
        std::iter::once(BACKGROUND_CLASS_NAME.to_string())
            .chain(self.ground_truth_ids.iter().cloned())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.ground_truth_ids.is_empty() {
            return Err(TrainError::config("segmentation models need at least one ground truth id"));
        }
        if self.image_channels == 0 {
            return Err(TrainError::config("image_channels must be at least 1"));
        }
        let output = self.get_output_size();
        for d in 0..3 {
            if self.crop_size[d] == 0 || output[d] == 0 || output[d] > self.crop_size[d] {
                return Err(TrainError::config(format!(
                    "output_size {output:?} must be non-empty and fit inside crop_size {:?}",
                    self.crop_size
                )));
            }
        }
        if self.patches_per_subject == 0 {
            return Err(TrainError::config("patches_per_subject must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarConfig {
    #[serde(flatten)]
    pub common: DeepLearningConfig,
    /// One name per model output: class names, or target names for regression.
    pub class_names: Vec<String>,
    pub num_features: usize,
    pub loss: ScalarLossType,
    /// Normalization from logits to posteriors; derived from `loss` when unset.
    pub posterior: Option<PosteriorNormalization>,
    pub compute_mean_teacher_model: bool,
    pub mean_teacher_alpha: f64,
}

impl Default for ScalarConfig {
    fn default() -> Self {
        ScalarConfig {
            common: DeepLearningConfig::default(),
            class_names: vec!["Default".to_string()],
            num_features: 1,
            loss: ScalarLossType::BinaryCrossEntropyWithLogits,
            posterior: None,
            compute_mean_teacher_model: false,
            mean_teacher_alpha: 0.99,
        }
    }
}

impl ScalarConfig {
    pub fn is_classification_model(&self) -> bool {
        self.loss != ScalarLossType::Mse
    }

    pub fn get_post_loss_logits_normalization_function(&self) -> PosteriorNormalization {
        self.posterior.unwrap_or(match self.loss {
            ScalarLossType::Mse => PosteriorNormalization::Identity,
            ScalarLossType::BinaryCrossEntropyWithLogits => PosteriorNormalization::Sigmoid,
            ScalarLossType::CrossEntropy => PosteriorNormalization::Softmax,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.class_names.is_empty() {
            return Err(TrainError::config("scalar models need at least one class name"));
        }
        if self.num_features == 0 {
            return Err(TrainError::config("num_features must be at least 1"));
        }
        if self.compute_mean_teacher_model && !(0.0..=1.0).contains(&self.mean_teacher_alpha) {
            return Err(TrainError::config(format!(
                "mean_teacher_alpha must lie in [0, 1], got {}",
                self.mean_teacher_alpha
            )));
        }
        Ok(())
    }
}

/// Configuration of one experiment, tagged by model category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_category", rename_all = "snake_case")]
pub enum ModelConfig {
    Segmentation(SegmentationConfig),
    Scalar(ScalarConfig),
}

impl ModelConfig {
    pub fn common(&self) -> &DeepLearningConfig {
        match self {
            ModelConfig::Segmentation(c) => &c.common,
            ModelConfig::Scalar(c) => &c.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut DeepLearningConfig {
        match self {
            ModelConfig::Segmentation(c) => &mut c.common,
            ModelConfig::Scalar(c) => &mut c.common,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ModelConfig::Segmentation(c) => c.validate(),
            ModelConfig::Scalar(c) => c.validate(),
        }
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes and validates a config from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<ModelConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: ModelConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the full config to `args.json` in the outputs folder.
    pub fn write_args_file(&self) -> Result<PathBuf> {
        let folder = &self.common().outputs_folder;
        std::fs::create_dir_all(folder)?;
        let path = folder.join("args.json");
        self.save_json(&path)?;
        Ok(path)
    }
}
