use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};

/// A multi-channel 3D volume stored channel-major as `[c][z][y][x]`.
///
/// Images carry one channel per modality, labels one (one-hot) channel per
/// class, masks a single channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelVolume {
    pub channels: usize,
    pub shape: [usize; 3],
    pub data: Vec<f64>,
}

impl ChannelVolume {
    pub fn zeros(channels: usize, shape: [usize; 3]) -> ChannelVolume {
        ChannelVolume { channels, shape, data: vec![0.0; channels * shape.iter().product::<usize>()] }
    }

    pub fn from_data(channels: usize, shape: [usize; 3], data: Vec<f64>) -> Result<ChannelVolume> {
        let volume = ChannelVolume { channels, shape, data };
        volume.validate()?;
        Ok(volume)
    }

    /// Checks that `data` holds exactly one value per channel and voxel.
    /// Volumes read from JSON are not checked on load.
    pub fn validate(&self) -> Result<()> {
        let expected = self.channels * self.num_voxels();
        if self.data.len() != expected {
            return Err(TrainError::shape(format!(
                "volume of {} channels and shape {:?} needs {expected} values, got {}",
                self.channels, self.shape, self.data.len()
            )));
        }
        Ok(())
    }

    /// One-hot encodes a class map (one class index per voxel).
    pub fn one_hot(class_map: &[usize], num_classes: usize, shape: [usize; 3]) -> Result<ChannelVolume> {
        let mut res = ChannelVolume::zeros(num_classes, shape);
        let n = res.num_voxels();
        if class_map.len() != n {
            return Err(TrainError::shape(format!("class map has {} voxels, expected {n}", class_map.len())));
        }
        for (v, &class) in class_map.iter().enumerate() {
            if class >= num_classes {
                return Err(TrainError::shape(format!("class index {class} exceeds {num_classes} classes")));
            }
            res.data[class * n + v] = 1.0;
        }
        Ok(res)
    }

    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }

    fn voxel_offset(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.shape[1] + y) * self.shape[2] + x
    }

    pub fn get(&self, c: usize, z: usize, y: usize, x: usize) -> f64 {
        self.data[c * self.num_voxels() + self.voxel_offset(z, y, x)]
    }

    /// All channel values of the voxel with flat index `v`.
    pub fn voxel(&self, v: usize) -> Vec<f64> {
        let n = self.num_voxels();
        (0..self.channels).map(|c| self.data[c * n + v]).collect()
    }

    pub fn channel(&self, c: usize) -> &[f64] {
        let n = self.num_voxels();
        &self.data[c * n..(c + 1) * n]
    }

    /// Flat voxel index → `[z, y, x]`.
    pub fn coordinates(&self, v: usize) -> [usize; 3] {
        let x = v % self.shape[2];
        let y = (v / self.shape[2]) % self.shape[1];
        let z = v / (self.shape[1] * self.shape[2]);
        [z, y, x]
    }

    /// Extracts the sub-volume of `size` starting at `start`.
    pub fn crop(&self, start: [usize; 3], size: [usize; 3]) -> Result<ChannelVolume> {
        for d in 0..3 {
            if start[d] + size[d] > self.shape[d] {
                return Err(TrainError::shape(format!(
                    "crop of size {size:?} at {start:?} exceeds volume shape {:?}",
                    self.shape
                )));
            }
        }
        let mut res = ChannelVolume::zeros(self.channels, size);
        let mut i = 0;
        for c in 0..self.channels {
            for z in 0..size[0] {
                for y in 0..size[1] {
                    for x in 0..size[2] {
                        res.data[i] = self.get(c, start[0] + z, start[1] + y, start[2] + x);
                        i += 1;
                    }
                }
            }
        }
        Ok(res)
    }

    /// Extracts the centered sub-volume of `size`.
    pub fn center_crop(&self, size: [usize; 3]) -> Result<ChannelVolume> {
        let mut start = [0; 3];
        for d in 0..3 {
            if size[d] > self.shape[d] {
                return Err(TrainError::shape(format!(
                    "center crop {size:?} is larger than volume shape {:?}",
                    self.shape
                )));
            }
            start[d] = (self.shape[d] - size[d]) / 2;
        }
        self.crop(start, size)
    }
}
