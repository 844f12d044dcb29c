use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};
use crate::math::volume::ChannelVolume;

/// One subject of a segmentation dataset: the full image, its one-hot labels
/// and an optional region-of-interest mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub subject_id: String,
    pub image: ChannelVolume,
    pub labels: ChannelVolume,
    #[serde(default)]
    pub mask: Option<ChannelVolume>,
}

impl Sample {
    pub fn validate(&self, image_channels: usize, num_classes: usize) -> Result<()> {
        let volumes = [Some(&self.image), Some(&self.labels), self.mask.as_ref()];
        for volume in volumes.into_iter().flatten() {
            volume.validate().map_err(|e| match e {
                TrainError::Shape(msg) => TrainError::shape(format!("subject {}: {msg}", self.subject_id)),
                other => other,
            })?;
        }
        if self.image.channels != image_channels {
            return Err(TrainError::shape(format!(
                "subject {}: image has {} channels, expected {image_channels}",
                self.subject_id, self.image.channels
            )));
        }
        if self.labels.channels != num_classes || self.labels.shape != self.image.shape {
            return Err(TrainError::shape(format!(
                "subject {}: labels must have {num_classes} channels and shape {:?}",
                self.subject_id, self.image.shape
            )));
        }
        if let Some(mask) = &self.mask {
            if mask.channels != 1 || mask.shape != self.image.shape {
                return Err(TrainError::shape(format!(
                    "subject {}: mask must be single-channel with shape {:?}",
                    self.subject_id, self.image.shape
                )));
            }
        }
        Ok(())
    }

    pub fn mask_or_full(&self) -> ChannelVolume {
        self.mask.clone().unwrap_or_else(|| {
            let mut mask = ChannelVolume::zeros(1, self.image.shape);
            mask.data.iter_mut().for_each(|v| *v = 1.0);
            mask
        })
    }
}

/// A training patch cut from a [`Sample`].
///
/// `image`, `labels` and `mask` cover the full crop the model sees;
/// the `*_center_crop` fields cover the region the model predicts.
#[derive(Debug, Clone, PartialEq)]
pub struct CroppedSample {
    pub subject_id: String,
    pub image: ChannelVolume,
    pub labels: ChannelVolume,
    pub mask: ChannelVolume,
    pub labels_center_crop: ChannelVolume,
    pub mask_center_crop: ChannelVolume,
    /// Patch center in the coordinates of the full volume.
    pub center_indices: [usize; 3],
}

/// One subject of a scalar dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarItem {
    pub subject_id: String,
    pub features: Vec<f64>,
    /// One value per model output: 0/1 per class, or regression targets.
    pub label: Vec<f64>,
}

/// Train, validation and test subjects, as stored in a dataset JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSplits<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    #[serde(default = "Vec::new")]
    pub test: Vec<T>,
}

impl<T: serde::de::DeserializeOwned + Serialize> DatasetSplits<T> {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

pub type SegmentationDataset = DatasetSplits<Sample>;
pub type ScalarDataset = DatasetSplits<ScalarItem>;
