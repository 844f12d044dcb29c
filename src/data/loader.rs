use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::data::sample::{CroppedSample, Sample, ScalarItem};
use crate::data::sampler::random_crop;
use crate::error::Result;

/// Indexed source of training items. Items may be random (e.g. patches),
/// so `get` draws from the shared generator.
pub trait Dataset {
    type Item;

    fn len(&self) -> usize;

    fn get(&self, index: usize, rng: &mut StdRng) -> Result<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Dataset for Vec<ScalarItem> {
    type Item = ScalarItem;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize, _rng: &mut StdRng) -> Result<ScalarItem> {
        Ok(self[index].clone())
    }
}

/// Random patches from full volumes, `patches_per_subject` per subject and epoch.
#[derive(Debug, Clone)]
pub struct CroppingDataset {
    pub samples: Vec<Sample>,
    pub crop_size: [usize; 3],
    pub output_size: [usize; 3],
    pub patches_per_subject: usize,
}

impl Dataset for CroppingDataset {
    type Item = CroppedSample;

    fn len(&self) -> usize {
        self.samples.len() * self.patches_per_subject
    }

    fn get(&self, index: usize, rng: &mut StdRng) -> Result<CroppedSample> {
        let sample = &self.samples[index % self.samples.len()];
        random_crop(sample, self.crop_size, self.output_size, rng)
    }
}

/// Serves a dataset in minibatches, one epoch at a time.
///
/// `start_epoch` fixes the item order (shuffled for training); batches are
/// then materialized one by one, so that the time spent producing each batch
/// shows up between two batch hooks.
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    cursor: usize,
}

impl<D: Dataset> DataLoader<D> {
    pub fn new(dataset: D, batch_size: usize, shuffle: bool) -> DataLoader<D> {
        DataLoader { dataset, batch_size: batch_size.max(1), shuffle, order: Vec::new(), cursor: 0 }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn start_epoch(&mut self, rng: &mut StdRng) {
        self.order = (0..self.dataset.len()).collect();
        if self.shuffle {
            self.order.shuffle(rng);
        }
        self.cursor = 0;
    }

    /// The next minibatch of this epoch, or `None` once all items were served.
    pub fn next_batch(&mut self, rng: &mut StdRng) -> Result<Option<Vec<D::Item>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].iter()
            .map(|&i| self.dataset.get(i, rng))
            .collect::<Result<Vec<_>>>()?;
        self.cursor = end;
        Ok(Some(batch))
    }
}
