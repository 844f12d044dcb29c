pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod metrics;
pub mod data;
pub mod train;
pub mod config;
pub mod error;
pub mod image_util;
pub mod logging;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use math::volume::ChannelVolume;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use network::network::Network;
pub use config::{DeepLearningConfig, ModelConfig, ScalarConfig, SegmentationConfig};
pub use error::{Result, TrainError};
pub use metrics::metrics_dict::{MetricType, MetricsDict};
pub use data::{ModelExecutionMode, ScalarDataset, SegmentationDataset};
pub use train::{model_train, ModelDataset, ModelTrainingResults, Trainer};
