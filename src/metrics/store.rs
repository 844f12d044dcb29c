use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::metrics::metrics_dict::{MetricsDict, DEFAULT_HUE_KEY};

/// Appends rows to a CSV file. The header is written on creation and every
/// row is flushed immediately so that partial runs leave readable files.
pub struct DataFrameLogger {
    path: PathBuf,
    num_columns: usize,
    writer: BufWriter<File>,
}

impl DataFrameLogger {
    pub fn create(path: impl AsRef<Path>, columns: &[&str]) -> Result<DataFrameLogger> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{}", columns.join(","))?;
        writer.flush()?;
        Ok(DataFrameLogger { path, num_columns: columns.len(), writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_record(&mut self, values: &[String]) -> Result<()> {
        debug_assert_eq!(values.len(), self.num_columns);
        let escaped: Vec<String> = values.iter().map(|v| escape(v)).collect();
        writeln!(self.writer, "{}", escaped.join(","))?;
        self.writer.flush()?;
        Ok(())
    }
}

fn escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub const EPOCH_METRICS_COLUMNS: [&str; 5] = ["epoch", "cross_validation_split_index", "hue", "metric", "value"];
pub const SUBJECT_METRICS_COLUMNS: [&str; 7] = [
    "epoch", "subject", "hue", "prediction", "label", "mode", "cross_validation_split_index",
];

/// The CSV loggers of one training run, all under the logs folder.
pub struct DataFrameLoggers {
    pub train_epoch_metrics: DataFrameLogger,
    pub val_epoch_metrics: DataFrameLogger,
    pub train_subject_metrics: DataFrameLogger,
    pub val_subject_metrics: DataFrameLogger,
}

impl DataFrameLoggers {
    pub fn create(logs_folder: &Path) -> Result<DataFrameLoggers> {
        Ok(DataFrameLoggers {
            train_epoch_metrics: DataFrameLogger::create(
                logs_folder.join("train_epoch_metrics.csv"), &EPOCH_METRICS_COLUMNS)?,
            val_epoch_metrics: DataFrameLogger::create(
                logs_folder.join("val_epoch_metrics.csv"), &EPOCH_METRICS_COLUMNS)?,
            train_subject_metrics: DataFrameLogger::create(
                logs_folder.join("train_subject_metrics.csv"), &SUBJECT_METRICS_COLUMNS)?,
            val_subject_metrics: DataFrameLogger::create(
                logs_folder.join("val_subject_metrics.csv"), &SUBJECT_METRICS_COLUMNS)?,
        })
    }
}

/// Writes the aggregated metrics of one epoch, one row per (hue, metric),
/// and logs them.
pub fn store_epoch_metrics(
    df_logger: &mut DataFrameLogger,
    epoch: usize,
    metrics: &MetricsDict,
    cross_validation_split_index: i32,
    is_training: bool,
) -> Result<()> {
    let mut summary = Vec::new();
    for (hue, metric, value) in metrics.enumerate_single_values()? {
        df_logger.add_record(&[
            epoch.to_string(),
            cross_validation_split_index.to_string(),
            hue.clone(),
            metric.to_string(),
            format!("{value:.6}"),
        ])?;
        if hue == DEFAULT_HUE_KEY {
            summary.push(format!("{metric}: {value:.4}"));
        } else {
            summary.push(format!("{metric}/{hue}: {value:.4}"));
        }
    }
    let status = if is_training { "Train" } else { "Val" };
    info!("{status} epoch {epoch}: {}", summary.join(", "));
    debug!("epoch metrics written to {}", df_logger.path().display());
    Ok(())
}
