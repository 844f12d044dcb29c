use crate::config::BACKGROUND_CLASS_NAME;
use crate::error::Result;
use crate::math::volume::ChannelVolume;
use crate::metrics::metrics_dict::{mean, MetricType, MetricsDict, DEFAULT_HUE_KEY};

/// Dice of every class for every patch.
///
/// `segmentations[b]` is the class map of patch `b`; `ground_truth[b]` its
/// one-hot labels. A voxel may belong to several ground-truth classes.
/// Returns `[patch][class]`, background included; the score is NaN where
/// both the segmentation and the ground truth are empty for that class.
pub fn compute_dice_across_patches(
    segmentations: &[Vec<usize>],
    ground_truth: &[ChannelVolume],
) -> Vec<Vec<f64>> {
    segmentations.iter().zip(ground_truth.iter())
        .map(|(segmentation, labels)| {
            (0..labels.channels)
                .map(|class| {
                    let gt = labels.channel(class);
                    let mut intersection = 0usize;
                    let mut seg_count = 0usize;
                    let mut gt_count = 0usize;
                    for (&s, &g) in segmentation.iter().zip(gt.iter()) {
                        let in_seg = s == class;
                        let in_gt = g > 0.5;
                        seg_count += in_seg as usize;
                        gt_count += in_gt as usize;
                        intersection += (in_seg && in_gt) as usize;
                    }
                    let denominator = seg_count + gt_count;
                    if denominator == 0 {
                        f64::NAN
                    } else {
                        2.0 * intersection as f64 / denominator as f64
                    }
                })
                .collect()
        })
        .collect()
}

/// Number of voxels labelled with each class, background included.
pub fn get_number_of_voxels_per_class(labels: &ChannelVolume) -> Vec<f64> {
    (0..labels.channels)
        .map(|c| labels.channel(c).iter().filter(|&&v| v > 0.5).count() as f64)
        .collect()
}

/// Epoch-level reduction of segmentation metrics.
///
/// Each class hue gets its mean Dice (NaN-skipping) and mean voxel count;
/// the default hue gets the mean loss and the mean Dice over the foreground
/// structures.
pub fn aggregate_segmentation_metrics(metrics: &MetricsDict) -> Result<MetricsDict> {
    let mut averaged = metrics.average(false);
    let structure_dice: Vec<f64> = metrics.get_hue_names(false).iter()
        .filter(|hue| hue.as_str() != BACKGROUND_CLASS_NAME)
        .filter(|hue| !averaged.values(MetricType::Dice, hue).is_empty())
        .map(|hue| averaged.values(MetricType::Dice, hue)[0])
        .collect();
    if !structure_dice.is_empty() {
        averaged.add_metric_skip_nan(MetricType::Dice, mean(&structure_dice, true), DEFAULT_HUE_KEY)?;
    }
    Ok(averaged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dice_per_patch_and_class() {
        // classes: 0 background, 1 and 2 foreground; four voxels
        let gt = ChannelVolume::one_hot(&[1, 1, 0, 0], 3, [1, 1, 4]).unwrap();
        let seg = vec![1, 0, 0, 0];
        let dice = compute_dice_across_patches(&[seg], &[gt]);
        assert_eq!(dice.len(), 1);
        assert_eq!(dice[0].len(), 3);
        assert!((dice[0][0] - 0.8).abs() < 1e-12);
        assert!((dice[0][1] - 2.0 / 3.0).abs() < 1e-12);
        assert!(dice[0][2].is_nan());
    }

    #[test]
    fn voxel_counts_include_background() {
        let gt = ChannelVolume::one_hot(&[1, 1, 0, 2], 3, [1, 2, 2]).unwrap();
        assert_eq!(get_number_of_voxels_per_class(&gt), vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn aggregation_averages_dice_over_structures() {
        let mut m = MetricsDict::new([BACKGROUND_CLASS_NAME, "liver", "spleen"]);
        m.add_metric_skip_nan(MetricType::Dice, 0.99, BACKGROUND_CLASS_NAME).unwrap();
        m.add_metric(MetricType::Loss, 0.5, DEFAULT_HUE_KEY).unwrap();
        m.add_metric(MetricType::Loss, 0.3, DEFAULT_HUE_KEY).unwrap();
        m.add_metric_skip_nan(MetricType::Dice, 0.6, "liver").unwrap();
        m.add_metric_skip_nan(MetricType::Dice, 0.8, "liver").unwrap();
        m.add_metric_skip_nan(MetricType::Dice, f64::NAN, "spleen").unwrap();
        m.add_metric_skip_nan(MetricType::Dice, 0.2, "spleen").unwrap();
        m.add_metric(MetricType::VoxelCount, 10.0, "liver").unwrap();
        m.add_metric(MetricType::VoxelCount, 20.0, "liver").unwrap();

        let result = aggregate_segmentation_metrics(&m).unwrap();
        let loss = result.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap();
        assert!((loss - 0.4).abs() < 1e-12);
        assert!((result.get_single_metric(MetricType::Dice, "liver").unwrap() - 0.7).abs() < 1e-12);
        assert!((result.get_single_metric(MetricType::Dice, "spleen").unwrap() - 0.2).abs() < 1e-12);
        assert!((result.get_single_metric(MetricType::Dice, DEFAULT_HUE_KEY).unwrap() - 0.45).abs() < 1e-12);
        assert_eq!(result.get_single_metric(MetricType::VoxelCount, "liver").unwrap(), 15.0);
        assert_eq!(result.get_single_metric(MetricType::Dice, BACKGROUND_CLASS_NAME).unwrap(), 0.99);
    }
}
