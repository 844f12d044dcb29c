use std::collections::BTreeMap;

use crate::config::ScalarConfig;
use crate::data::ModelExecutionMode;
use crate::error::{Result, TrainError};
use crate::metrics::metrics_dict::{MetricType, MetricsDict, DEFAULT_HUE_KEY};
use crate::metrics::store::DataFrameLogger;

const EPS: f64 = 1e-12;

/// One subject's model output for one hue.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionEntry {
    pub subject_id: String,
    pub prediction: f64,
    pub label: f64,
}

/// Metrics dictionary for scalar models. On top of the per-batch values of
/// [`MetricsDict`] it keeps every subject's prediction and label per hue, so
/// that epoch metrics such as AUC are computed over the whole epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarMetricsDict {
    metrics: MetricsDict,
    is_classification: bool,
    entries: BTreeMap<String, Vec<PredictionEntry>>,
}

/// Hues are the class (or target) names of the model.
pub fn create_metrics_dict_for_scalar_models(config: &ScalarConfig) -> ScalarMetricsDict {
    ScalarMetricsDict::new(config.class_names.clone(), config.is_classification_model())
}

impl ScalarMetricsDict {
    pub fn new(hues: Vec<String>, is_classification: bool) -> ScalarMetricsDict {
        ScalarMetricsDict {
            metrics: MetricsDict::new(hues),
            is_classification,
            entries: BTreeMap::new(),
        }
    }

    pub fn metrics(&self) -> &MetricsDict {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsDict {
        &mut self.metrics
    }

    /// Drops all values, keeping the hues.
    pub fn reset(&mut self) {
        self.metrics = MetricsDict::new(self.metrics.get_hue_names(false));
        self.entries.clear();
    }

    pub fn add_predictions(
        &mut self,
        subject_ids: &[String],
        predictions: &[f64],
        labels: &[f64],
        hue: &str,
    ) -> Result<()> {
        if !self.metrics.get_hue_names(true).iter().any(|h| h == hue) {
            return Err(TrainError::UnknownHue(hue.to_string()));
        }
        if subject_ids.len() != predictions.len() || predictions.len() != labels.len() {
            return Err(TrainError::shape(format!(
                "{} subjects, {} predictions and {} labels",
                subject_ids.len(), predictions.len(), labels.len()
            )));
        }
        let entries = self.entries.entry(hue.to_string()).or_default();
        for ((subject_id, &prediction), &label) in subject_ids.iter().zip(predictions).zip(labels) {
            entries.push(PredictionEntry { subject_id: subject_id.clone(), prediction, label });
        }
        Ok(())
    }

    pub fn entries(&self, hue: &str) -> &[PredictionEntry] {
        self.entries.get(hue).map_or(&[], |e| e.as_slice())
    }

    /// All predictions in hue order, then insertion order.
    pub fn get_predictions(&self) -> Vec<f64> {
        self.ordered_entries().map(|e| e.prediction).collect()
    }

    pub fn get_labels(&self) -> Vec<f64> {
        self.ordered_entries().map(|e| e.label).collect()
    }

    fn ordered_entries(&self) -> impl Iterator<Item = &PredictionEntry> {
        self.metrics.get_hue_names(true).into_iter()
            .flat_map(move |hue| self.entries(&hue).iter())
    }

    /// Means of the accumulated values plus the prediction-based metrics.
    /// With `across_hues`, predictions of all hues are pooled into the
    /// default hue.
    pub fn average(&self, across_hues: bool) -> Result<MetricsDict> {
        let mut result = self.metrics.average(across_hues);
        if across_hues {
            let pooled: Vec<PredictionEntry> = self.ordered_entries().cloned().collect();
            if !pooled.is_empty() {
                self.add_prediction_metrics(&mut result, &pooled, DEFAULT_HUE_KEY)?;
            }
        } else {
            for (hue, entries) in &self.entries {
                if !entries.is_empty() {
                    self.add_prediction_metrics(&mut result, entries, hue)?;
                }
            }
        }
        Ok(result)
    }

    fn add_prediction_metrics(
        &self,
        result: &mut MetricsDict,
        entries: &[PredictionEntry],
        hue: &str,
    ) -> Result<()> {
        let predictions: Vec<f64> = entries.iter().map(|e| e.prediction).collect();
        let labels: Vec<f64> = entries.iter().map(|e| e.label).collect();
        let (p, l) = (predictions.as_slice(), labels.as_slice());
        if self.is_classification {
            result.add_metric(MetricType::AreaUnderRocCurve, area_under_roc_curve(p, l), hue)?;
            result.add_metric(MetricType::AccuracyAtThreshold05, accuracy_at_threshold(p, l, 0.5), hue)?;
            result.add_metric(MetricType::CrossEntropy, binary_cross_entropy(p, l), hue)?;
        } else {
            result.add_metric(MetricType::MeanSquaredError, mean_squared_error(p, l), hue)?;
            result.add_metric(MetricType::MeanAbsoluteError, mean_absolute_error(p, l), hue)?;
            result.add_metric(MetricType::ExplainedVariance, explained_variance(p, l), hue)?;
        }
        result.add_metric(MetricType::SubjectCount, entries.len() as f64, hue)?;
        Ok(())
    }

    /// One row per stored prediction.
    pub fn store_metrics_per_subject(
        &self,
        epoch: usize,
        df_logger: &mut DataFrameLogger,
        mode: ModelExecutionMode,
        cross_validation_split_index: i32,
    ) -> Result<()> {
        for hue in self.metrics.get_hue_names(true) {
            for entry in self.entries(&hue) {
                df_logger.add_record(&[
                    epoch.to_string(),
                    entry.subject_id.clone(),
                    hue.clone(),
                    format!("{:.6}", entry.prediction),
                    format!("{:.6}", entry.label),
                    mode.to_string(),
                    cross_validation_split_index.to_string(),
                ])?;
            }
        }
        Ok(())
    }
}

/// Rank-based (Mann-Whitney) ROC AUC; ties share their average rank.
/// NaN unless both classes are present.
pub fn area_under_roc_curve(predictions: &[f64], labels: &[f64]) -> f64 {
    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| predictions[a].total_cmp(&predictions[b]));

    let mut ranks = vec![0.0; predictions.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && predictions[order[j + 1]] == predictions[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie group i..=j
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }

    let positives = labels.iter().filter(|&&l| l >= 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return f64::NAN;
    }
    let positive_rank_sum: f64 = ranks.iter().zip(labels)
        .filter(|(_, &l)| l >= 0.5)
        .map(|(r, _)| r)
        .sum();
    let p = positives as f64;
    (positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}

pub fn accuracy_at_threshold(predictions: &[f64], labels: &[f64], threshold: f64) -> f64 {
    if predictions.is_empty() {
        return f64::NAN;
    }
    let correct = predictions.iter().zip(labels)
        .filter(|(&p, &l)| (p >= threshold) == (l >= 0.5))
        .count();
    correct as f64 / predictions.len() as f64
}

pub fn binary_cross_entropy(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() {
        return f64::NAN;
    }
    predictions.iter().zip(labels)
        .map(|(&p, &y)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>() / predictions.len() as f64
}

pub fn mean_squared_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() {
        return f64::NAN;
    }
    predictions.iter().zip(labels).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / predictions.len() as f64
}

pub fn mean_absolute_error(predictions: &[f64], labels: &[f64]) -> f64 {
    if predictions.is_empty() {
        return f64::NAN;
    }
    predictions.iter().zip(labels).map(|(p, y)| (p - y).abs()).sum::<f64>() / predictions.len() as f64
}

/// 1 − Var(y − p) / Var(y); NaN when the labels are constant.
pub fn explained_variance(predictions: &[f64], labels: &[f64]) -> f64 {
    fn variance(v: &[f64]) -> f64 {
        let m = v.iter().sum::<f64>() / v.len() as f64;
        v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64
    }
    if labels.is_empty() {
        return f64::NAN;
    }
    let label_variance = variance(labels);
    if label_variance == 0.0 {
        return f64::NAN;
    }
    let residuals: Vec<f64> = labels.iter().zip(predictions).map(|(y, p)| y - p).collect();
    1.0 - variance(&residuals) / label_variance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("subject{i}")).collect()
    }

    #[test]
    fn auc_handles_ties_and_single_class() {
        assert_eq!(area_under_roc_curve(&[0.1, 0.4, 0.35, 0.8], &[0.0, 0.0, 1.0, 1.0]), 0.75);
        assert_eq!(area_under_roc_curve(&[0.5, 0.5], &[0.0, 1.0]), 0.5);
        assert!(area_under_roc_curve(&[0.1, 0.2], &[1.0, 1.0]).is_nan());
    }

    #[test]
    fn explained_variance_of_perfect_fit_is_one() {
        assert_eq!(explained_variance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert!(explained_variance(&[1.0, 2.0], &[2.0, 2.0]).is_nan());
    }

    #[test]
    fn classification_average_reports_prediction_metrics_per_hue() {
        let mut m = ScalarMetricsDict::new(vec!["malignant".to_string()], true);
        m.add_predictions(&ids(4), &[0.9, 0.2, 0.7, 0.4], &[1.0, 0.0, 0.0, 1.0], "malignant").unwrap();
        m.metrics_mut().add_metric(MetricType::Loss, 0.7, DEFAULT_HUE_KEY).unwrap();

        let avg = m.average(false).unwrap();
        assert_eq!(avg.get_single_metric(MetricType::AccuracyAtThreshold05, "malignant").unwrap(), 0.5);
        assert_eq!(avg.get_single_metric(MetricType::AreaUnderRocCurve, "malignant").unwrap(), 0.75);
        assert_eq!(avg.get_single_metric(MetricType::SubjectCount, "malignant").unwrap(), 4.0);
        assert_eq!(avg.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap(), 0.7);
    }

    #[test]
    fn regression_average_pools_across_hues() {
        let mut m = ScalarMetricsDict::new(vec!["a".to_string(), "b".to_string()], false);
        m.add_predictions(&ids(1), &[1.0], &[2.0], "a").unwrap();
        m.add_predictions(&ids(1), &[3.0], &[3.0], "b").unwrap();
        let avg = m.average(true).unwrap();
        assert_eq!(avg.get_single_metric(MetricType::MeanSquaredError, DEFAULT_HUE_KEY).unwrap(), 0.5);
        assert_eq!(avg.get_single_metric(MetricType::MeanAbsoluteError, DEFAULT_HUE_KEY).unwrap(), 0.5);
        assert_eq!(m.get_predictions(), vec![1.0, 3.0]);
        assert_eq!(m.get_labels(), vec![2.0, 3.0]);
    }

    #[test]
    fn reset_keeps_hues_and_drops_entries() {
        let mut m = ScalarMetricsDict::new(vec!["a".to_string()], true);
        m.add_predictions(&ids(1), &[0.3], &[0.0], "a").unwrap();
        m.reset();
        assert!(m.entries("a").is_empty());
        assert!(m.add_predictions(&ids(1), &[0.3], &[0.0], "zzz").is_err());
    }

    #[test]
    fn subject_rows_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.csv");
        let mut logger = DataFrameLogger::create(&path, &crate::metrics::store::SUBJECT_METRICS_COLUMNS).unwrap();
        let mut m = ScalarMetricsDict::new(vec!["a".to_string()], true);
        m.add_predictions(&ids(2), &[0.25, 0.75], &[0.0, 1.0], "a").unwrap();
        m.store_metrics_per_subject(2, &mut logger, ModelExecutionMode::Val, 1).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(2), Some("2,subject1,a,0.750000,1.000000,Val,1"));
    }
}
