pub mod metrics_dict;
pub mod scalar;
pub mod segmentation;
pub mod store;

pub use metrics_dict::{MetricType, MetricsDict, DEFAULT_HUE_KEY};
pub use scalar::{create_metrics_dict_for_scalar_models, ScalarMetricsDict};
pub use segmentation::aggregate_segmentation_metrics;
pub use store::{store_epoch_metrics, DataFrameLogger, DataFrameLoggers};
