pub mod model_training;
pub mod module;
pub mod random_state;
pub mod scalar;
pub mod segmentation;
pub mod timers;
pub mod trainer;

pub use model_training::{model_train, ModelDataset, DATASET_FILE_NAME};
pub use module::{EpochContext, LightningHooks, ModelFamily, StepOutput, TrainingModule};
pub use scalar::{create_scalar_module, MeanTeacher, ScalarModule, ScalarSteps};
pub use segmentation::{create_segmentation_module, SegmentationModule, SegmentationSteps, VoxelClassifier};
pub use trainer::{Checkpoint, ModelCheckpoint, ModelTrainingResults, Trainer};
