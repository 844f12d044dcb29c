use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::sample::{CroppedSample, Sample};
use crate::error::{Result, TrainError};

/// Cuts a random patch of `crop_size` out of `sample`.
///
/// The patch center is class-balanced: first a class is drawn uniformly
/// among those present in the labels, then a voxel of that class. The patch
/// is shifted where needed so that it lies inside the volume.
pub fn random_crop<R: Rng + ?Sized>(
    sample: &Sample,
    crop_size: [usize; 3],
    output_size: [usize; 3],
    rng: &mut R,
) -> Result<CroppedSample> {
    let shape = sample.image.shape;
    for d in 0..3 {
        if crop_size[d] > shape[d] {
            return Err(TrainError::shape(format!(
                "subject {}: crop size {crop_size:?} exceeds image shape {shape:?}",
                sample.subject_id
            )));
        }
    }

    let n = sample.labels.num_voxels();
    let present: Vec<usize> = (0..sample.labels.channels)
        .filter(|&c| sample.labels.channel(c).iter().any(|&v| v > 0.5))
        .collect();
    let center = match present.choose(rng) {
        Some(&class) => {
            let voxels: Vec<usize> = sample.labels.channel(class).iter()
                .enumerate()
                .filter(|(_, &v)| v > 0.5)
                .map(|(i, _)| i)
                .collect();
            let v = voxels.choose(rng).copied().unwrap_or(0);
            sample.labels.coordinates(v)
        }
        None => sample.labels.coordinates(rng.gen_range(0..n.max(1))),
    };

    let mut start = [0; 3];
    for d in 0..3 {
        let max_start = shape[d] - crop_size[d];
        start[d] = center[d].saturating_sub(crop_size[d] / 2).min(max_start);
    }
    let center_indices = [
        start[0] + crop_size[0] / 2,
        start[1] + crop_size[1] / 2,
        start[2] + crop_size[2] / 2,
    ];

    let image = sample.image.crop(start, crop_size)?;
    let labels = sample.labels.crop(start, crop_size)?;
    let mask = sample.mask_or_full().crop(start, crop_size)?;
    let labels_center_crop = labels.center_crop(output_size)?;
    let mask_center_crop = mask.center_crop(output_size)?;

    Ok(CroppedSample {
        subject_id: sample.subject_id.clone(),
        image,
        labels,
        mask,
        labels_center_crop,
        mask_center_crop,
        center_indices,
    })
}
