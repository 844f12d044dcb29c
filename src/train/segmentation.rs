use rand::Rng;

use crate::activation::activation::softmax;
use crate::config::SegmentationConfig;
use crate::data::sample::CroppedSample;
use crate::error::{Result, TrainError};
use crate::image_util::{apply_mask_to_posteriors, posteriors_to_segmentation};
use crate::loss::SegmentationLossType;
use crate::math::volume::ChannelVolume;
use crate::metrics::metrics_dict::{MetricType, MetricsDict};
use crate::metrics::segmentation::{
    aggregate_segmentation_metrics, compute_dice_across_patches, get_number_of_voxels_per_class,
};
use crate::network::{gradients::Gradients, network::Network};
use crate::train::module::{ModelFamily, StepOutput, TrainingModule};

/// Dense network applied independently to every voxel: image channels in,
/// class logits out.
#[derive(Debug, Clone)]
pub struct VoxelClassifier {
    pub network: Network,
}

impl VoxelClassifier {
    pub fn new<R: Rng + ?Sized>(config: &SegmentationConfig, rng: &mut R) -> Result<VoxelClassifier> {
        let network = config.common.network.build(config.image_channels, config.number_of_classes(), rng)?;
        Ok(VoxelClassifier { network })
    }

    fn voxel_inputs(image: &ChannelVolume) -> Vec<Vec<f64>> {
        (0..image.num_voxels()).map(|v| image.voxel(v)).collect()
    }

    /// Logits for every voxel of `image`.
    pub fn logits(&mut self, image: &ChannelVolume) -> Result<Vec<Vec<f64>>> {
        if image.channels != self.network.input_size() {
            return Err(TrainError::shape(format!(
                "model expects {} image channels, got {}",
                self.network.input_size(), image.channels
            )));
        }
        Ok(Self::voxel_inputs(image).into_iter().map(|x| self.network.forward(x)).collect())
    }

    pub fn logits_to_posterior(logits: &[Vec<f64>]) -> Vec<Vec<f64>> {
        logits.iter().map(|z| softmax(z)).collect()
    }

    /// Voxel-wise class posteriors for `image`.
    pub fn forward(&mut self, image: &ChannelVolume) -> Result<Vec<Vec<f64>>> {
        Ok(Self::logits_to_posterior(&self.logits(image)?))
    }
}

/// Steps and metrics of segmentation models.
pub struct SegmentationSteps {
    model: VoxelClassifier,
    loss: SegmentationLossType,
    output_size: [usize; 3],
    class_names: Vec<String>,
    metrics: MetricsDict,
}

pub type SegmentationModule = TrainingModule<SegmentationSteps>;

impl SegmentationSteps {
    pub fn new<R: Rng + ?Sized>(config: &SegmentationConfig, rng: &mut R) -> Result<SegmentationSteps> {
        let class_names = config.class_and_index_names();
        Ok(SegmentationSteps {
            model: VoxelClassifier::new(config, rng)?,
            loss: config.loss,
            output_size: config.get_output_size(),
            metrics: MetricsDict::new(class_names.clone()),
            class_names,
        })
    }

    pub fn model_mut(&mut self) -> &mut VoxelClassifier {
        &mut self.model
    }

    pub fn metrics(&self) -> &MetricsDict {
        &self.metrics
    }

    /// Segmentation metrics of one batch, computed on the predicted region
    /// of each patch.
    fn compute_metrics(
        &mut self,
        batch: &[CroppedSample],
        segmentations: &[Vec<usize>],
    ) -> Result<()> {
        let ground_truth: Vec<ChannelVolume> =
            batch.iter().map(|s| s.labels_center_crop.clone()).collect();
        // hue i is label class i, background included
        for patch_dice in compute_dice_across_patches(segmentations, &ground_truth) {
            for (dice, hue) in patch_dice.into_iter().zip(self.class_names.iter()) {
                self.metrics.add_metric_skip_nan(MetricType::Dice, dice, hue)?;
            }
        }
        for sample in batch {
            let voxel_counts = get_number_of_voxels_per_class(&sample.labels);
            for (count, hue) in voxel_counts.into_iter().zip(self.class_names.iter()) {
                self.metrics.add_metric(MetricType::VoxelCount, count, hue)?;
            }
            let center = sample.center_indices.iter().map(|&c| c as f64).collect();
            self.metrics.add_diagnostics(MetricType::PatchCenter.as_str(), center);
        }
        Ok(())
    }
}

impl ModelFamily for SegmentationSteps {
    type Batch = Vec<CroppedSample>;

    fn epoch_start(&mut self) {
        self.metrics = MetricsDict::new(self.class_names.clone());
    }

    fn training_or_validation_step(
        &mut self,
        batch: &Vec<CroppedSample>,
        _batch_idx: usize,
        is_training: bool,
    ) -> Result<StepOutput> {
        let weight = 1.0 / batch.len().max(1) as f64;
        let mut gradients = is_training.then(|| Gradients::zeros_like(&self.model.network));
        let mut loss = 0.0;
        let mut segmentations = Vec::with_capacity(batch.len());

        for sample in batch {
            let image = sample.image.center_crop(self.output_size)?;
            let logits = self.model.logits(&image)?;
            let labels = &sample.labels_center_crop;
            let expected: Vec<Vec<f64>> = (0..labels.num_voxels()).map(|v| labels.voxel(v)).collect();
            let output = self.loss.evaluate(&logits, &expected);
            loss += weight * output.value;

            if let Some(total) = gradients.as_mut() {
                for (v, logit_grad) in output.logit_grads.into_iter().enumerate() {
                    let voxel_grads = self.model.network.sample_gradients(&image.voxel(v), logit_grad);
                    total.accumulate(&voxel_grads, weight);
                }
            }

            let mut posteriors = VoxelClassifier::logits_to_posterior(&logits);
            if is_training {
                apply_mask_to_posteriors(&mut posteriors, sample.mask_center_crop.channel(0));
            }
            segmentations.push(posteriors_to_segmentation(&posteriors));
        }

        self.compute_metrics(batch, &segmentations)?;
        Ok(StepOutput { loss, gradients })
    }

    fn metrics_mut(&mut self) -> &mut MetricsDict {
        &mut self.metrics
    }

    fn aggregate_metrics(&self) -> Result<MetricsDict> {
        aggregate_segmentation_metrics(&self.metrics)
    }

    fn network(&self) -> &Network {
        &self.model.network
    }

    fn network_mut(&mut self) -> &mut Network {
        &mut self.model.network
    }
}

/// Segmentation module with a freshly initialised model.
pub fn create_segmentation_module<R: Rng + ?Sized>(
    config: &SegmentationConfig,
    rng: &mut R,
) -> Result<SegmentationModule> {
    let steps = SegmentationSteps::new(config, rng)?;
    Ok(TrainingModule::new(config.common.clone(), steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::metrics_dict::DEFAULT_HUE_KEY;
    use rand::{rngs::StdRng, SeedableRng};

    fn patch(class_map: &[usize], mask: &[f64]) -> CroppedSample {
        let shape = [1, 1, class_map.len()];
        let image = ChannelVolume::from_data(
            1,
            shape,
            class_map.iter().map(|&c| c as f64 * 2.0 - 1.0).collect(),
        ).unwrap();
        let labels = ChannelVolume::one_hot(class_map, 2, shape).unwrap();
        let mask = ChannelVolume::from_data(1, shape, mask.to_vec()).unwrap();
        CroppedSample {
            subject_id: "s".into(),
            image,
            labels: labels.clone(),
            mask: mask.clone(),
            labels_center_crop: labels,
            mask_center_crop: mask,
            center_indices: [0, 0, class_map.len() / 2],
        }
    }

    fn steps() -> SegmentationSteps {
        let config = SegmentationConfig { crop_size: [1, 1, 4], ..SegmentationConfig::default() };
        SegmentationSteps::new(&config, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn posteriors_sum_to_one() {
        let mut steps = steps();
        let image = patch(&[0, 1, 1, 0], &[1.0; 4]).image;
        for p in steps.model_mut().forward(&image).unwrap() {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn training_step_records_metrics_and_gradients() {
        let mut steps = steps();
        steps.epoch_start();
        let batch = vec![patch(&[0, 1, 1, 0], &[1.0; 4]), patch(&[0, 0, 0, 0], &[1.0; 4])];
        let out = steps.training_or_validation_step(&batch, 0, true).unwrap();
        assert!(out.loss.is_finite() && out.loss > 0.0);
        assert!(out.gradients.unwrap().is_finite());

        let metrics = steps.metrics();
        assert_eq!(metrics.values(MetricType::VoxelCount, "region"), &[2.0, 0.0]);
        assert_eq!(metrics.values(MetricType::VoxelCount, "background"), &[2.0, 4.0]);
        assert_eq!(metrics.values(MetricType::Dice, "region").len(), 2);
        let background_dice = metrics.values(MetricType::Dice, "background");
        assert_eq!(background_dice.len(), 2);
        assert!(background_dice.iter().all(|d| d.is_finite()));
        assert!(metrics.values(MetricType::Dice, DEFAULT_HUE_KEY).is_empty());
        assert_eq!(metrics.diagnostics("PatchCenter"), &[vec![0.0, 0.0, 2.0], vec![0.0, 0.0, 2.0]]);
    }

    #[test]
    fn validation_step_has_no_gradients() {
        let mut steps = steps();
        steps.epoch_start();
        let out = steps.training_or_validation_step(&vec![patch(&[1, 1, 0, 0], &[1.0; 4])], 0, false).unwrap();
        assert!(out.gradients.is_none());
    }

    #[test]
    fn fully_masked_training_patch_predicts_background() {
        let mut steps = steps();
        steps.epoch_start();
        // prediction is all background, ground truth has no foreground: Dice undefined
        steps.training_or_validation_step(&vec![patch(&[0, 0, 0, 0], &[0.0; 4])], 0, true).unwrap();
        let dice = steps.metrics().values(MetricType::Dice, "region");
        assert_eq!(dice.len(), 1);
        assert!(dice[0].is_nan());
        assert_eq!(steps.metrics().values(MetricType::Dice, "background"), &[1.0]);

        steps.metrics_mut().add_metric(MetricType::Loss, 0.5, DEFAULT_HUE_KEY).unwrap();
        let aggregated = steps.aggregate_metrics().unwrap();
        assert_eq!(aggregated.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap(), 0.5);
        assert_eq!(aggregated.get_single_metric(MetricType::VoxelCount, "region").unwrap(), 0.0);
        assert_eq!(aggregated.get_single_metric(MetricType::VoxelCount, "background").unwrap(), 4.0);
        assert_eq!(aggregated.get_single_metric(MetricType::Dice, "background").unwrap(), 1.0);
    }

    #[test]
    fn validation_ignores_the_patch_mask() {
        let class_map = [1, 1, 0, 0];
        let dice_of = |mask: &[f64], is_training: bool| {
            let mut steps = steps();
            steps.epoch_start();
            let loss = steps.training_or_validation_step(&vec![patch(&class_map, mask)], 0, is_training)
                .unwrap()
                .loss;
            let metrics = steps.metrics();
            (loss, metrics.values(MetricType::Dice, "background").to_vec(), metrics.values(MetricType::Dice, "region").to_vec())
        };

        let unmasked = dice_of(&[1.0; 4], false);
        let masked = dice_of(&[0.0; 4], false);
        assert_eq!(masked, unmasked);

        // the same mask during training forces every voxel to background
        let (_, background, region) = dice_of(&[0.0; 4], true);
        assert_eq!(region, vec![0.0]);
        assert!((background[0] - 2.0 / 3.0).abs() < 1e-12);
    }
}
