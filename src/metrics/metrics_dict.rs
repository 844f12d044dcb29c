use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};

/// Hue that every metrics dictionary carries, used for metrics that are not
/// tied to a particular structure or class.
pub const DEFAULT_HUE_KEY: &str = "Default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    Loss,
    Dice,
    VoxelCount,
    PatchCenter,
    LearningRate,
    SecondsPerEpoch,
    AreaUnderRocCurve,
    AccuracyAtThreshold05,
    CrossEntropy,
    MeanSquaredError,
    MeanAbsoluteError,
    ExplainedVariance,
    SubjectCount,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Loss => "Loss",
            MetricType::Dice => "Dice",
            MetricType::VoxelCount => "Voxel_count",
            MetricType::PatchCenter => "PatchCenter",
            MetricType::LearningRate => "LearningRate",
            MetricType::SecondsPerEpoch => "SecondsPerEpoch",
            MetricType::AreaUnderRocCurve => "AreaUnderRocCurve",
            MetricType::AccuracyAtThreshold05 => "AccuracyAtThreshold05",
            MetricType::CrossEntropy => "CrossEntropy",
            MetricType::MeanSquaredError => "MeanSquaredError",
            MetricType::MeanAbsoluteError => "MeanAbsoluteError",
            MetricType::ExplainedVariance => "ExplainedVariance",
            MetricType::SubjectCount => "SubjectCount",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HueValues {
    values: BTreeMap<MetricType, Vec<f64>>,
    skip_nan: BTreeSet<MetricType>,
}

/// Accumulates metric values per hue and metric type.
///
/// Hues are fixed at construction; the default hue always exists and comes
/// first. Values are appended per batch and reduced with [`average`].
///
/// [`average`]: MetricsDict::average
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsDict {
    hue_order: Vec<String>,
    hues: BTreeMap<String, HueValues>,
    diagnostics: BTreeMap<String, Vec<Vec<f64>>>,
}

impl Default for MetricsDict {
    fn default() -> Self {
        MetricsDict::new(Vec::<String>::new())
    }
}

impl MetricsDict {
    pub fn new<S: Into<String>>(hues: impl IntoIterator<Item = S>) -> MetricsDict {
        let mut hue_order = vec![DEFAULT_HUE_KEY.to_string()];
        for hue in hues {
            let hue = hue.into();
            if !hue_order.contains(&hue) {
                hue_order.push(hue);
            }
        }
        let hues = hue_order.iter().map(|h| (h.clone(), HueValues::default())).collect();
        MetricsDict { hue_order, hues, diagnostics: BTreeMap::new() }
    }

    fn hue_mut(&mut self, hue: &str) -> Result<&mut HueValues> {
        self.hues.get_mut(hue).ok_or_else(|| TrainError::UnknownHue(hue.to_string()))
    }

    /// Appends `value` to the list for (`hue`, `metric`).
    pub fn add_metric(&mut self, metric: MetricType, value: f64, hue: &str) -> Result<()> {
        self.hue_mut(hue)?.values.entry(metric).or_default().push(value);
        Ok(())
    }

    /// Like `add_metric`, and marks the list so that NaN values are left out
    /// when averaging.
    pub fn add_metric_skip_nan(&mut self, metric: MetricType, value: f64, hue: &str) -> Result<()> {
        let entry = self.hue_mut(hue)?;
        entry.skip_nan.insert(metric);
        entry.values.entry(metric).or_default().push(value);
        Ok(())
    }

    /// Stores a value that is carried along for inspection but never averaged.
    pub fn add_diagnostics(&mut self, name: &str, value: Vec<f64>) {
        self.diagnostics.entry(name.to_string()).or_default().push(value);
    }

    pub fn diagnostics(&self, name: &str) -> &[Vec<f64>] {
        self.diagnostics.get(name).map_or(&[], |v| v.as_slice())
    }

    /// Declared hue names in order; the default hue first when included.
    pub fn get_hue_names(&self, include_default: bool) -> Vec<String> {
        self.hue_order.iter()
            .filter(|h| include_default || h.as_str() != DEFAULT_HUE_KEY)
            .cloned()
            .collect()
    }

    pub fn values(&self, metric: MetricType, hue: &str) -> &[f64] {
        self.hues.get(hue)
            .and_then(|h| h.values.get(&metric))
            .map_or(&[], |v| v.as_slice())
    }

    pub fn metric_types(&self, hue: &str) -> Vec<MetricType> {
        self.hues.get(hue).map_or_else(Vec::new, |h| h.values.keys().copied().collect())
    }

    /// The only value stored for (`metric`, `hue`).
    pub fn get_single_metric(&self, metric: MetricType, hue: &str) -> Result<f64> {
        match self.values(metric, hue) {
            [value] => Ok(*value),
            other => Err(TrainError::MetricNotSingle {
                metric: metric.to_string(),
                hue: hue.to_string(),
                count: other.len(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hues.values().all(|h| h.values.values().all(|v| v.is_empty()))
    }

    fn mean_of(&self, hue: &HueValues, metric: MetricType) -> f64 {
        let values = hue.values.get(&metric).map_or(&[][..], |v| v.as_slice());
        mean(values, hue.skip_nan.contains(&metric))
    }

    /// Reduces every list to its mean. With `across_hues`, the per-hue means
    /// of each metric are averaged again into the default hue.
    pub fn average(&self, across_hues: bool) -> MetricsDict {
        let mut result = MetricsDict {
            hue_order: self.hue_order.clone(),
            hues: self.hue_order.iter().map(|h| (h.clone(), HueValues::default())).collect(),
            diagnostics: BTreeMap::new(),
        };

        if across_hues {
            let mut per_metric: BTreeMap<MetricType, (Vec<f64>, bool)> = BTreeMap::new();
            for hue in self.hues.values() {
                for metric in hue.values.keys() {
                    let entry = per_metric.entry(*metric).or_default();
                    entry.0.push(self.mean_of(hue, *metric));
                    entry.1 |= hue.skip_nan.contains(metric);
                }
            }
            let default = result.hues.entry(DEFAULT_HUE_KEY.to_string()).or_default();
            for (metric, (means, skip_nan)) in per_metric {
                default.values.insert(metric, vec![mean(&means, skip_nan)]);
            }
        } else {
            for (name, hue) in &self.hues {
                let target = result.hues.entry(name.clone()).or_default();
                for metric in hue.values.keys() {
                    target.values.insert(*metric, vec![self.mean_of(hue, *metric)]);
                }
            }
        }
        result
    }

    /// `(hue, metric, value)` for every list, in hue order. Fails unless each
    /// list holds exactly one value, as after `average`.
    pub fn enumerate_single_values(&self) -> Result<Vec<(String, MetricType, f64)>> {
        let mut rows = Vec::new();
        for hue in &self.hue_order {
            for metric in self.metric_types(hue) {
                rows.push((hue.clone(), metric, self.get_single_metric(metric, hue)?));
            }
        }
        Ok(rows)
    }
}

/// Mean of `values`, optionally ignoring NaN. Empty input gives NaN.
pub fn mean(values: &[f64], skip_nan: bool) -> f64 {
    let (sum, count) = values.iter()
        .filter(|v| !(skip_nan && v.is_nan()))
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hue_always_first() {
        let m = MetricsDict::new(["liver", "spleen"]);
        assert_eq!(m.get_hue_names(true), vec![DEFAULT_HUE_KEY, "liver", "spleen"]);
        assert_eq!(m.get_hue_names(false), vec!["liver", "spleen"]);
    }

    #[test]
    fn unknown_hue_is_an_error() {
        let mut m = MetricsDict::new(["liver"]);
        assert!(matches!(m.add_metric(MetricType::Dice, 0.5, "kidney"), Err(TrainError::UnknownHue(_))));
    }

    #[test]
    fn average_skips_nan_only_when_flagged() {
        let mut m = MetricsDict::new(["liver"]);
        m.add_metric_skip_nan(MetricType::Dice, 0.8, "liver").unwrap();
        m.add_metric_skip_nan(MetricType::Dice, f64::NAN, "liver").unwrap();
        m.add_metric(MetricType::Loss, 1.0, DEFAULT_HUE_KEY).unwrap();
        m.add_metric(MetricType::Loss, f64::NAN, DEFAULT_HUE_KEY).unwrap();

        let avg = m.average(false);
        assert_eq!(avg.get_single_metric(MetricType::Dice, "liver").unwrap(), 0.8);
        assert!(avg.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY).unwrap().is_nan());
    }

    #[test]
    fn all_nan_list_averages_to_nan() {
        let mut m = MetricsDict::new(["liver"]);
        m.add_metric_skip_nan(MetricType::Dice, f64::NAN, "liver").unwrap();
        assert!(m.average(false).get_single_metric(MetricType::Dice, "liver").unwrap().is_nan());
    }

    #[test]
    fn average_across_hues_collapses_into_default() {
        let mut m = MetricsDict::new(["a", "b"]);
        m.add_metric(MetricType::Dice, 0.2, "a").unwrap();
        m.add_metric(MetricType::Dice, 0.4, "a").unwrap();
        m.add_metric(MetricType::Dice, 0.9, "b").unwrap();
        let avg = m.average(true);
        let dice = avg.get_single_metric(MetricType::Dice, DEFAULT_HUE_KEY).unwrap();
        assert!((dice - 0.6).abs() < 1e-12);
        assert!(avg.values(MetricType::Dice, "a").is_empty());
    }

    #[test]
    fn single_value_lookup_and_enumeration() {
        let mut m = MetricsDict::new(["a"]);
        m.add_metric(MetricType::Loss, 1.0, DEFAULT_HUE_KEY).unwrap();
        m.add_metric(MetricType::Loss, 2.0, DEFAULT_HUE_KEY).unwrap();
        assert!(matches!(
            m.get_single_metric(MetricType::Loss, DEFAULT_HUE_KEY),
            Err(TrainError::MetricNotSingle { count: 2, .. })
        ));
        assert!(m.enumerate_single_values().is_err());

        let rows = m.average(false).enumerate_single_values().unwrap();
        assert_eq!(rows, vec![(DEFAULT_HUE_KEY.to_string(), MetricType::Loss, 1.5)]);
    }
}
