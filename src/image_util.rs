//! Voxel-wise post-processing of model posteriors.

/// Index of the maximum element in a slice; the first one on ties.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best_i, best), (i, &x)| {
            if x > best { (i, x) } else { (best_i, best) }
        })
        .0
}

/// Restricts posteriors to the region where `mask` is set.
///
/// Outside the mask every voxel becomes certain background (class 0).
pub fn apply_mask_to_posteriors(posteriors: &mut [Vec<f64>], mask: &[f64]) {
    for (p, &m) in posteriors.iter_mut().zip(mask.iter()) {
        if m <= 0.5 {
            for (c, value) in p.iter_mut().enumerate() {
                *value = if c == 0 { 1.0 } else { 0.0 };
            }
        }
    }
}

/// Class map from voxel-wise posteriors (argmax over classes).
pub fn posteriors_to_segmentation(posteriors: &[Vec<f64>]) -> Vec<usize> {
    posteriors.iter().map(|p| argmax(p)).collect()
}
