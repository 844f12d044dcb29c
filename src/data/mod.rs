pub mod loader;
pub mod module;
pub mod sample;
pub mod sampler;

use std::fmt;

pub use loader::{CroppingDataset, DataLoader, Dataset};
pub use module::{ScalarData, SegmentationData, TrainingAndValidationData};
pub use sample::{CroppedSample, DatasetSplits, Sample, ScalarDataset, ScalarItem, SegmentationDataset};

/// Which part of the data a model is being run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelExecutionMode {
    Train,
    Val,
    Test,
}

impl ModelExecutionMode {
    pub fn from_training_flag(is_training: bool) -> ModelExecutionMode {
        if is_training { ModelExecutionMode::Train } else { ModelExecutionMode::Val }
    }
}

impl fmt::Display for ModelExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelExecutionMode::Train => "Train",
            ModelExecutionMode::Val => "Val",
            ModelExecutionMode::Test => "Test",
        })
    }
}
