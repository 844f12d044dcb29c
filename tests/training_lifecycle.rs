use std::fs;
use std::path::Path;

use ferrite_med::config::{DeepLearningConfig, ModelConfig, ScalarConfig, SegmentationConfig};
use ferrite_med::data::module::{SegmentationData, TrainingAndValidationData};
use ferrite_med::data::sample::{DatasetSplits, Sample, ScalarItem};
use ferrite_med::error::TrainError;
use ferrite_med::math::volume::ChannelVolume;
use ferrite_med::metrics::metrics_dict::{MetricType, DEFAULT_HUE_KEY};
use ferrite_med::train::trainer::{Checkpoint, BEST_CHECKPOINT_FILE_NAME, LAST_CHECKPOINT_FILE_NAME};
use ferrite_med::train::{model_train, ModelDataset, ModelTrainingResults, DATASET_FILE_NAME};

fn common(outputs: &Path, num_epochs: usize) -> DeepLearningConfig {
    DeepLearningConfig {
        num_epochs,
        train_batch_size: 2,
        l_rate: 0.05,
        outputs_folder: outputs.to_path_buf(),
        ..DeepLearningConfig::default()
    }
}

/// A 4x4 slice with a bright 2x2 square labelled as foreground.
fn subject(id: &str, offset: usize) -> Sample {
    let shape = [1, 4, 4];
    let mut class_map = vec![0; 16];
    for y in offset..offset + 2 {
        for x in offset..offset + 2 {
            class_map[y * 4 + x] = 1;
        }
    }
    let image = class_map.iter().map(|&c| if c == 1 { 1.0 } else { -1.0 }).collect();
    Sample {
        subject_id: id.to_string(),
        image: ChannelVolume::from_data(1, shape, image).unwrap(),
        labels: ChannelVolume::one_hot(&class_map, 2, shape).unwrap(),
        mask: None,
    }
}

fn segmentation_config(outputs: &Path) -> ModelConfig {
    ModelConfig::Segmentation(SegmentationConfig {
        common: common(outputs, 2),
        crop_size: [1, 3, 3],
        patches_per_subject: 2,
        ..SegmentationConfig::default()
    })
}

fn segmentation_dataset() -> ModelDataset {
    ModelDataset::Segmentation(DatasetSplits {
        train: vec![subject("a", 0), subject("b", 1), subject("c", 2)],
        val: vec![subject("d", 1)],
        test: vec![],
    })
}

fn scalar_config(outputs: &Path) -> ModelConfig {
    ModelConfig::Scalar(ScalarConfig {
        common: common(outputs, 3),
        num_features: 2,
        ..ScalarConfig::default()
    })
}

fn scalar_dataset() -> ModelDataset {
    let item = |i: usize| {
        let positive = i % 2 == 0;
        let x = if positive { 1.0 } else { -1.0 } + i as f64 * 0.01;
        ScalarItem {
            subject_id: format!("s{i}"),
            features: vec![x, 0.5 * x],
            label: vec![if positive { 1.0 } else { 0.0 }],
        }
    };
    ModelDataset::Scalar(DatasetSplits {
        train: (0..6).map(item).collect(),
        val: (6..10).map(item).collect(),
        test: vec![],
    })
}

fn losses(results: &ModelTrainingResults) -> Vec<f64> {
    results.train_results_per_epoch.iter()
        .chain(results.val_results_per_epoch.iter())
        .map(|m| m.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap())
        .collect()
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn segmentation_training_writes_metrics_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let results = model_train(&segmentation_config(dir.path()), segmentation_dataset()).unwrap();

    assert_eq!(results.train_results_per_epoch.len(), 2);
    assert_eq!(results.val_results_per_epoch.len(), 2);
    for metrics in &results.val_results_per_epoch {
        assert!(metrics.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap().is_finite());
        assert_eq!(metrics.values(MetricType::Dice, "region").len(), 1);
        assert!(metrics.get_single_metric(MetricType::VoxelCount, "region").unwrap() > 0.0);
        assert_eq!(metrics.values(MetricType::Dice, "background").len(), 1);
        assert!(metrics.get_single_metric(MetricType::VoxelCount, "background").unwrap() > 0.0);
        assert!(metrics.get_single_metric(MetricType::SecondsPerEpoch, DEFAULT_HUE_KEY).unwrap() >= 0.0);
    }

    assert!(dir.path().join("args.json").is_file());
    let ModelDataset::Segmentation(expected) = segmentation_dataset() else { unreachable!() };
    let saved = DatasetSplits::<Sample>::load_json(dir.path().join(DATASET_FILE_NAME)).unwrap();
    assert_eq!(saved, expected);
    let logs = dir.path().join("logs");
    assert!(line_count(&logs.join("train_epoch_metrics.csv")) > 2);
    assert!(line_count(&logs.join("val_epoch_metrics.csv")) > 2);

    let checkpoints = dir.path().join("checkpoints");
    let last = Checkpoint::load_json(checkpoints.join(LAST_CHECKPOINT_FILE_NAME)).unwrap();
    assert_eq!(last.epoch, 1);
    let best = Checkpoint::load_json(checkpoints.join(BEST_CHECKPOINT_FILE_NAME)).unwrap();
    assert!(best.val_loss.unwrap().is_finite());
}

#[test]
fn training_is_reproducible_for_a_fixed_seed() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let a = model_train(&segmentation_config(first.path()), segmentation_dataset()).unwrap();
    let b = model_train(&segmentation_config(second.path()), segmentation_dataset()).unwrap();
    assert_eq!(losses(&a), losses(&b));
}

#[test]
fn segmentation_models_have_no_patch_wise_test_set() {
    let config = SegmentationConfig::default();
    let mut data = SegmentationData::new(config, DatasetSplits { train: vec![subject("a", 0)], val: vec![], test: vec![] });
    data.setup().unwrap();
    let err = data.test_dataloader().err().unwrap();
    assert!(matches!(err, TrainError::Unsupported(_)));
    assert_eq!(err.to_string(), "For segmentation models, the test dataset should not be evaluated patch-wise.");
}

#[test]
fn scalar_training_stores_subject_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let results = model_train(&scalar_config(dir.path()), scalar_dataset()).unwrap();

    assert_eq!(results.train_results_per_epoch.len(), 3);
    let last = results.val_results_per_epoch.last().unwrap();
    assert_eq!(last.get_single_metric(MetricType::SubjectCount, DEFAULT_HUE_KEY).unwrap(), 4.0);
    let auc = last.get_single_metric(MetricType::AreaUnderRocCurve, DEFAULT_HUE_KEY).unwrap();
    assert!((0.0..=1.0).contains(&auc));
    assert_eq!(last.get_single_metric(MetricType::LearningRate, DEFAULT_HUE_KEY).unwrap(), 0.05);

    let logs = dir.path().join("logs");
    // header plus one row per subject and epoch
    assert_eq!(line_count(&logs.join("train_subject_metrics.csv")), 1 + 3 * 6);
    assert_eq!(line_count(&logs.join("val_subject_metrics.csv")), 1 + 3 * 4);
}

#[test]
fn scalar_training_with_mean_teacher_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scalar_config(dir.path());
    if let ModelConfig::Scalar(c) = &mut config {
        c.compute_mean_teacher_model = true;
    }
    let results = model_train(&config, scalar_dataset()).unwrap();
    assert!(losses(&results).iter().all(|l| l.is_finite()));
}

#[test]
fn truncated_volume_is_a_shape_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut short = subject("b", 1);
    short.image.data.truncate(10);
    let dataset = ModelDataset::Segmentation(DatasetSplits {
        train: vec![subject("a", 0), short],
        val: vec![subject("d", 1)],
        test: vec![],
    });
    let err = model_train(&segmentation_config(dir.path()), dataset).unwrap_err();
    assert!(matches!(err, TrainError::Shape(_)), "{err}");
    assert!(err.to_string().contains("subject b"), "{err}");
}

#[test]
fn dataset_must_match_the_model_category() {
    let dir = tempfile::tempdir().unwrap();
    let err = model_train(&scalar_config(dir.path()), segmentation_dataset()).unwrap_err();
    assert!(matches!(err, TrainError::Config(_)));
}
