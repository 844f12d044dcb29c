use tracing::info;

use crate::config::{ScalarConfig, SegmentationConfig};
use crate::data::loader::{CroppingDataset, DataLoader, Dataset};
use crate::data::sample::{ScalarDataset, ScalarItem, SegmentationDataset};
use crate::data::ModelExecutionMode;
use crate::error::{Result, TrainError};

/// Provides the loaders for one training run.
///
/// `setup` must be called before any loader is requested.
pub trait TrainingAndValidationData {
    type Dataset: Dataset;

    fn setup(&mut self) -> Result<()>;

    fn train_dataloader(&mut self) -> Result<&mut DataLoader<Self::Dataset>>;

    fn val_dataloader(&mut self) -> Result<&mut DataLoader<Self::Dataset>>;

    fn test_dataloader(&mut self) -> Result<&mut DataLoader<Self::Dataset>>;
}

struct Loaders<D: Dataset> {
    train: DataLoader<D>,
    val: DataLoader<D>,
}

fn not_set_up() -> TrainError {
    TrainError::Unsupported("data loaders were requested before setup()".to_string())
}

pub struct SegmentationData {
    config: SegmentationConfig,
    dataset: SegmentationDataset,
    loaders: Option<Loaders<CroppingDataset>>,
}

impl SegmentationData {
    pub fn new(config: SegmentationConfig, dataset: SegmentationDataset) -> SegmentationData {
        SegmentationData { config, dataset, loaders: None }
    }

    fn cropping(&self, mode: ModelExecutionMode) -> CroppingDataset {
        let samples = match mode {
            ModelExecutionMode::Train => self.dataset.train.clone(),
            ModelExecutionMode::Val => self.dataset.val.clone(),
            ModelExecutionMode::Test => self.dataset.test.clone(),
        };
        CroppingDataset {
            samples,
            crop_size: self.config.crop_size,
            output_size: self.config.get_output_size(),
            patches_per_subject: self.config.patches_per_subject,
        }
    }
}

impl TrainingAndValidationData for SegmentationData {
    type Dataset = CroppingDataset;

    fn setup(&mut self) -> Result<()> {
        if self.dataset.train.is_empty() {
            return Err(TrainError::EmptyDataset("the training set contains no subjects".to_string()));
        }
        let num_classes = self.config.number_of_classes();
        for sample in self.dataset.train.iter().chain(self.dataset.val.iter()) {
            sample.validate(self.config.image_channels, num_classes)?;
        }
        let batch_size = self.config.common.train_batch_size;
        self.loaders = Some(Loaders {
            train: DataLoader::new(self.cropping(ModelExecutionMode::Train), batch_size, true),
            val: DataLoader::new(self.cropping(ModelExecutionMode::Val), batch_size, false),
        });
        info!(
            "Segmentation data: {} training and {} validation subjects, {} patch(es) per subject",
            self.dataset.train.len(), self.dataset.val.len(), self.config.patches_per_subject
        );
        Ok(())
    }

    fn train_dataloader(&mut self) -> Result<&mut DataLoader<CroppingDataset>> {
        self.loaders.as_mut().map(|l| &mut l.train).ok_or_else(not_set_up)
    }

    fn val_dataloader(&mut self) -> Result<&mut DataLoader<CroppingDataset>> {
        self.loaders.as_mut().map(|l| &mut l.val).ok_or_else(not_set_up)
    }

    fn test_dataloader(&mut self) -> Result<&mut DataLoader<CroppingDataset>> {
        Err(TrainError::Unsupported(
            "For segmentation models, the test dataset should not be evaluated patch-wise.".to_string(),
        ))
    }
}

pub struct ScalarData {
    config: ScalarConfig,
    dataset: ScalarDataset,
    loaders: Option<Loaders<Vec<ScalarItem>>>,
    test: Option<DataLoader<Vec<ScalarItem>>>,
}

impl ScalarData {
    pub fn new(config: ScalarConfig, dataset: ScalarDataset) -> ScalarData {
        ScalarData { config, dataset, loaders: None, test: None }
    }

    fn check_items(&self, items: &[ScalarItem]) -> Result<()> {
        let outputs = self.config.class_names.len();
        for item in items {
            if item.features.len() != self.config.num_features || item.label.len() != outputs {
                return Err(TrainError::shape(format!(
                    "subject {}: expected {} features and {outputs} label values, got {} and {}",
                    item.subject_id, self.config.num_features, item.features.len(), item.label.len()
                )));
            }
        }
        Ok(())
    }
}

impl TrainingAndValidationData for ScalarData {
    type Dataset = Vec<ScalarItem>;

    fn setup(&mut self) -> Result<()> {
        if self.dataset.train.is_empty() {
            return Err(TrainError::EmptyDataset("the training set contains no subjects".to_string()));
        }
        self.check_items(&self.dataset.train)?;
        self.check_items(&self.dataset.val)?;
        self.check_items(&self.dataset.test)?;
        let batch_size = self.config.common.train_batch_size;
        self.loaders = Some(Loaders {
            train: DataLoader::new(self.dataset.train.clone(), batch_size, true),
            val: DataLoader::new(self.dataset.val.clone(), batch_size, false),
        });
        self.test = Some(DataLoader::new(self.dataset.test.clone(), batch_size, false));
        info!(
            "Scalar data: {} training, {} validation and {} test subjects",
            self.dataset.train.len(), self.dataset.val.len(), self.dataset.test.len()
        );
        Ok(())
    }

    fn train_dataloader(&mut self) -> Result<&mut DataLoader<Vec<ScalarItem>>> {
        self.loaders.as_mut().map(|l| &mut l.train).ok_or_else(not_set_up)
    }

    fn val_dataloader(&mut self) -> Result<&mut DataLoader<Vec<ScalarItem>>> {
        self.loaders.as_mut().map(|l| &mut l.val).ok_or_else(not_set_up)
    }

    fn test_dataloader(&mut self) -> Result<&mut DataLoader<Vec<ScalarItem>>> {
        self.test.as_mut().ok_or_else(not_set_up)
    }
}
