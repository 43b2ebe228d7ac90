#![recursion_limit = "256"]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use epoch_trainer::checkpoint::CheckpointStore;
use epoch_trainer::config::AppConfig;
use epoch_trainer::model::device::{self, DevicePreference, ResolvedDevice};
use epoch_trainer::model::RegressionModel;
use epoch_trainer::training::{EpochDriver, RunSummary};

/// Train the regressor for a fixed number of epochs, resuming from the
/// newest checkpoint when one exists.
#[derive(Parser)]
#[command(name = "train", about = "Resumable epoch-based training run")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Dataset directory containing train.csv and val.csv
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// CSV files have no header row
    #[arg(long)]
    no_headers: bool,

    /// Total number of epochs the run should reach
    #[arg(long)]
    epochs: Option<usize>,

    /// Preferred device
    #[arg(long, value_enum)]
    device: Option<DevicePreference>,

    /// Seed for data shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Cap on iterations per epoch (debugging)
    #[arg(long)]
    iters: Option<usize>,

    /// Iterations between loss log lines
    #[arg(long)]
    print_freq: Option<usize>,

    /// Write per-epoch statistics as JSON to this file when the run ends
    #[arg(long)]
    results: Option<PathBuf>,

    /// Override base learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Epochs at which the learning rate drops by 10x, comma separated
    #[arg(long, value_delimiter = ',')]
    lr_steps: Option<Vec<usize>>,

    /// Training batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// SGD momentum
    #[arg(long)]
    momentum: Option<f64>,

    /// SGD weight decay
    #[arg(long)]
    weight_decay: Option<f64>,

    /// Checkpoint path template, e.g. logs/model.ckpt
    #[arg(long)]
    ckpt_path: Option<PathBuf>,

    /// Number of newest checkpoints to keep
    #[arg(long)]
    max_checkpoints: Option<usize>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(dir) = self.data_dir {
            config.run.data_dir = dir;
        }
        if self.no_headers {
            config.run.csv_has_headers = false;
        }
        if let Some(epochs) = self.epochs {
            config.run.target_epochs = epochs;
        }
        if let Some(device) = self.device {
            config.run.device_preference = device;
        }
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        if self.iters.is_some() {
            config.run.max_iters = self.iters;
        }
        if let Some(freq) = self.print_freq {
            config.run.log_interval = freq;
        }
        if self.results.is_some() {
            config.run.results_path = self.results;
        }
        if self.lr.is_some() {
            config.schedule.base_lr = self.lr;
        }
        if let Some(steps) = self.lr_steps {
            config.schedule.lr_steps = steps;
        }
        if let Some(batch_size) = self.batch_size {
            config.schedule.batch_size = batch_size;
        }
        if let Some(momentum) = self.momentum {
            config.optimizer.momentum = momentum;
        }
        if let Some(weight_decay) = self.weight_decay {
            config.optimizer.weight_decay = weight_decay;
        }
        if let Some(path) = self.ckpt_path {
            config.checkpoint.checkpoint_path = path;
        }
        if let Some(max) = self.max_checkpoints {
            config.checkpoint.max_checkpoints = max;
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let print_config = cli.print_config;

    let mut app_config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    cli.apply(&mut app_config);
    app_config.validate().context("validating configuration")?;

    if print_config {
        let rendered = toml::to_string_pretty(&app_config).context("rendering configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current epoch");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("installing Ctrl-C handler")?;

    let resolved = device::resolve(app_config.run.device_preference);
    tracing::info!(device = %resolved, "selected backend");

    match resolved {
        ResolvedDevice::Cpu => train::<device::CpuBackend>(&app_config, stop),
        #[cfg(feature = "wgpu")]
        ResolvedDevice::Accelerator => train::<device::AcceleratorBackend>(&app_config, stop),
        #[cfg(not(feature = "wgpu"))]
        ResolvedDevice::Accelerator => train::<device::CpuBackend>(&app_config, stop),
    }
}

fn train<B: AutodiffBackend>(config: &AppConfig, stop: Arc<AtomicBool>) -> Result<()> {
    let device = B::Device::default();
    let model = RegressionModel::<B>::from_app_config(config, device)
        .context("building model and data pipeline")?;
    let store = CheckpointStore::from_path(&config.checkpoint.checkpoint_path)
        .context("setting up checkpoint store")?;

    let mut driver = EpochDriver::new(model, store, config.driver_config()).with_stop_flag(stop);
    match driver.run() {
        Ok(summary) => {
            report(&summary, &driver);
            export_results(config, &driver)
        }
        Err(e) => {
            tracing::error!(
                completed_epochs = driver.completed_epochs(),
                "training aborted"
            );
            // The training error is what the operator needs; an export
            // failure on top of it is only logged.
            if let Err(export) = export_results(config, &driver) {
                tracing::error!("{export:#}");
            }
            Err(e.into())
        }
    }
}

fn export_results<B: AutodiffBackend>(
    config: &AppConfig,
    driver: &EpochDriver<RegressionModel<B>>,
) -> Result<()> {
    let Some(path) = &config.run.results_path else {
        return Ok(());
    };
    driver
        .reporter()
        .write_json(path)
        .with_context(|| format!("writing results to {}", path.display()))?;
    tracing::info!(path = %path.display(), epochs = driver.reporter().len(), "wrote epoch statistics");
    Ok(())
}

fn report<B: AutodiffBackend>(summary: &RunSummary, driver: &EpochDriver<RegressionModel<B>>) {
    if summary.stopped_early {
        tracing::warn!(
            "stopped at epoch {} of {}; rerun to continue",
            summary.final_epoch,
            summary.target_epochs
        );
    }
    let reporter = driver.reporter();
    if let Some(last) = reporter.latest() {
        tracing::info!(
            "final epoch {} | train_loss: {:.4} | val_loss: {:.4} | train {:.1} it/s | eval {:.1} it/s",
            last.epoch + 1,
            last.train_loss,
            last.eval_loss,
            reporter.mean_train_throughput(),
            reporter.mean_eval_throughput()
        );
    }
}
