//! Error types for ferrite-med.

use thiserror::Error;

/// Top-level error type for training operations.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hue '{0}' is not declared in this metrics dictionary")]
    UnknownHue(String),

    #[error("Expected exactly one value for metric {metric} (hue {hue}), found {count}")]
    MetricNotSingle {
        metric: String,
        hue: String,
        count: usize,
    },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Loss became {value} in epoch {epoch}, batch {batch_idx}")]
    NonFiniteLoss {
        epoch: usize,
        batch_idx: usize,
        value: f64,
    },

    #[error("Dataset error: {0}")]
    EmptyDataset(String),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
