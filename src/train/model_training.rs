use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::ModelConfig;
use crate::data::loader::Dataset;
use crate::data::module::{ScalarData, SegmentationData, TrainingAndValidationData};
use crate::data::sample::{ScalarDataset, SegmentationDataset};
use crate::error::{Result, TrainError};
use crate::logging::logging_section;
use crate::train::module::{ModelFamily, TrainingModule};
use crate::train::random_state::set_random_seed;
use crate::train::scalar::create_scalar_module;
use crate::train::segmentation::create_segmentation_module;
use crate::train::trainer::{ModelTrainingResults, Trainer};

pub const DATASET_FILE_NAME: &str = "dataset.json";

/// The dataset matching a [`ModelConfig`] category.
#[derive(Debug, Clone)]
pub enum ModelDataset {
    Segmentation(SegmentationDataset),
    Scalar(ScalarDataset),
}

impl ModelDataset {
    /// Writes the train, validation and test splits to `dataset.json` in
    /// `folder`.
    pub fn write_dataset_file(&self, folder: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(folder)?;
        let path = folder.join(DATASET_FILE_NAME);
        match self {
            ModelDataset::Segmentation(d) => d.save_json(&path)?,
            ModelDataset::Scalar(d) => d.save_json(&path)?,
        }
        Ok(path)
    }
}

/// Trains a model from scratch on `dataset` and returns the metrics of
/// every training and validation epoch.
///
/// Writes `args.json`, `dataset.json`, the epoch and subject metrics CSV
/// files and the checkpoints into the config's outputs folder.
pub fn model_train(config: &ModelConfig, dataset: ModelDataset) -> Result<ModelTrainingResults> {
    config.validate()?;
    let common = config.common();
    let mut rng = StdRng::seed_from_u64(0);
    set_random_seed(&mut rng, common.get_effective_random_seed(), "Model training");

    let args_file = config.write_args_file()?;
    info!("Model configuration: {}", serde_json::to_string(config)?);
    info!("Model configuration written to {}", args_file.display());
    let dataset_file = dataset.write_dataset_file(&common.outputs_folder)?;
    info!("Dataset splits written to {}", dataset_file.display());
    if common.is_cross_validation_child_run() {
        info!(
            "Running cross validation split {} of {}",
            common.cross_validation_split_index, common.number_of_cross_validation_splits
        );
    }

    match (config, dataset) {
        (ModelConfig::Segmentation(c), ModelDataset::Segmentation(d)) => {
            let module = create_segmentation_module(c, &mut rng)?;
            fit(module, SegmentationData::new(c.clone(), d), rng)
        }
        (ModelConfig::Scalar(c), ModelDataset::Scalar(d)) => {
            let module = create_scalar_module(c, &mut rng)?;
            fit(module, ScalarData::new(c.clone(), d), rng)
        }
        _ => Err(TrainError::config("the dataset does not match the model category of the config")),
    }
}

fn fit<F, D>(mut module: TrainingModule<F>, mut data: D, rng: StdRng) -> Result<ModelTrainingResults>
where
    D: TrainingAndValidationData,
    F: ModelFamily<Batch = Vec<<D::Dataset as Dataset>::Item>>,
{
    let config = module.config().clone();
    module.family().network().log_summary();
    let checkpoint_folder = config.checkpoint_folder();
    info!("Models will be written to {}", checkpoint_folder.display());
    module.create_loggers_for_training()?;

    let mut trainer = Trainer::new(&config, rng).with_checkpointing(checkpoint_folder)?;
    {
        let _section = logging_section("Model training");
        trainer.fit(&mut module, &mut data)?;
    }
    module.close_all_loggers();

    if let Some(best) = trainer.checkpoint().and_then(|c| c.best_val_loss()) {
        info!("Lowest validation loss: {best:.6}");
    }
    Ok(ModelTrainingResults {
        train_results_per_epoch: std::mem::take(&mut module.train_metrics_per_epoch),
        val_results_per_epoch: std::mem::take(&mut module.validation_metrics_per_epoch),
    })
}
