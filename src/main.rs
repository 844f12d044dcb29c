use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use ferrite_med::config::ModelConfig;
use ferrite_med::data::sample::DatasetSplits;
use ferrite_med::logging::init_logging;
use ferrite_med::metrics::metrics_dict::{MetricType, DEFAULT_HUE_KEY};
use ferrite_med::train::{model_train, ModelDataset};

#[derive(Parser, Debug)]
#[command(name = "ferrite-med", about = "Train segmentation and scalar models on medical images")]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model from scratch.
    Train(TrainArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Model configuration (JSON, tagged with `model_category`).
    #[arg(long)]
    config: PathBuf,
    /// Dataset with `train`, `val` and optional `test` subjects (JSON).
    #[arg(long)]
    dataset: PathBuf,
    /// Overrides `num_epochs` from the config.
    #[arg(long)]
    epochs: Option<usize>,
    /// Overrides `outputs_folder` from the config.
    #[arg(long)]
    outputs: Option<PathBuf>,
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let mut config = ModelConfig::load_json(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(epochs) = args.epochs {
        config.common_mut().num_epochs = epochs;
    }
    if let Some(outputs) = args.outputs {
        config.common_mut().outputs_folder = outputs;
    }

    let dataset = match &config {
        ModelConfig::Segmentation(_) => ModelDataset::Segmentation(DatasetSplits::load_json(&args.dataset)?),
        ModelConfig::Scalar(_) => ModelDataset::Scalar(DatasetSplits::load_json(&args.dataset)?),
    };
    let results = model_train(&config, dataset).context("training failed")?;

    if let Some(last) = results.val_results_per_epoch.last() {
        let val_loss = last.values(MetricType::Loss, DEFAULT_HUE_KEY).first().copied().unwrap_or(f64::NAN);
        info!("Finished {} epochs, last val_loss {val_loss:.6}", results.val_results_per_epoch.len());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    match cli.command {
        Command::Train(args) => run_train(args),
    }
}
