use std::path::{Path, PathBuf};

use crate::checkpoint::RetentionPolicy;
use crate::error::ConfigError;
use crate::model::device::DevicePreference;
use crate::schedule::ScheduleConfig;
use crate::training::driver::DriverConfig;

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub schedule: ScheduleSection,
    pub optimizer: OptimizerConfig,
    pub model: ModelConfig,
    pub checkpoint: CheckpointConfig,
}

/// Run-level options.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Dataset root; expects `train.csv` and `val.csv`.
    pub data_dir: PathBuf,
    /// First row of each CSV file is a header. When false every row must
    /// be numeric.
    pub csv_has_headers: bool,
    pub target_epochs: usize,
    pub device_preference: DevicePreference,
    pub seed: u64,
    /// Cap on iterations per epoch; `None` means a full pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iters: Option<usize>,
    /// Iterations between loss log lines.
    pub log_interval: usize,
    /// Where to write per-epoch statistics at the end of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            data_dir: PathBuf::from("data"),
            csv_has_headers: true,
            target_epochs: 50,
            device_preference: DevicePreference::Accelerator,
            seed: 3,
            max_iters: None,
            log_interval: 100,
            results_path: None,
        }
    }
}

/// Learning-rate schedule and batch sizes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// Derived from `batch_size` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_lr: Option<f64>,
    pub lr_steps: Vec<usize>,
    pub batch_size: usize,
    pub eval_batch_size: usize,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        ScheduleSection {
            base_lr: None,
            lr_steps: vec![6, 7],
            batch_size: 4,
            eval_batch_size: 2,
        }
    }
}

/// SGD parameters, passed straight through to the optimizer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub momentum: f64,
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            momentum: 0.9,
            weight_decay: 0.0001,
        }
    }
}

/// Reference regressor shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig { hidden_dim: 32 }
    }
}

/// Checkpoint naming template and retention.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub checkpoint_path: PathBuf,
    /// Values below 1 are treated as 1.
    pub max_checkpoints: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            checkpoint_path: PathBuf::from("checkpoints/model.ckpt"),
            max_checkpoints: RetentionPolicy::default().max_checkpoints,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Base learning rate: explicit, or `0.02 * batch_size / 16`.
    pub fn base_lr(&self) -> f64 {
        self.schedule
            .base_lr
            .unwrap_or(0.02 * self.schedule.batch_size as f64 / 16.0)
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig::new(self.base_lr(), self.schedule.lr_steps.clone())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.checkpoint.max_checkpoints)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            target_epochs: self.run.target_epochs,
            schedule: self.schedule_config(),
            retention: self.retention(),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.log_interval == 0 {
            return Err(ConfigError::Validation(
                "run.log_interval must be > 0".into(),
            ));
        }
        if self.run.max_iters == Some(0) {
            return Err(ConfigError::Validation(
                "run.max_iters must be > 0 when set".into(),
            ));
        }

        if let Some(lr) = self.schedule.base_lr {
            if !(lr > 0.0 && lr.is_finite()) {
                return Err(ConfigError::Validation(
                    "schedule.base_lr must be a positive number".into(),
                ));
            }
        }
        if self.schedule.lr_steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Validation(
                "schedule.lr_steps must be strictly increasing".into(),
            ));
        }
        if self.schedule.batch_size == 0 {
            return Err(ConfigError::Validation(
                "schedule.batch_size must be > 0".into(),
            ));
        }
        if self.schedule.eval_batch_size == 0 {
            return Err(ConfigError::Validation(
                "schedule.eval_batch_size must be > 0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.optimizer.momentum) {
            return Err(ConfigError::Validation(
                "optimizer.momentum must be in [0, 1)".into(),
            ));
        }
        if self.optimizer.weight_decay < 0.0 {
            return Err(ConfigError::Validation(
                "optimizer.weight_decay must be >= 0".into(),
            ));
        }

        if self.model.hidden_dim == 0 {
            return Err(ConfigError::Validation(
                "model.hidden_dim must be > 0".into(),
            ));
        }

        if self.checkpoint.checkpoint_path.file_stem().is_none() {
            return Err(ConfigError::Validation(
                "checkpoint.checkpoint_path must name a file, e.g. logs/model.ckpt".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AppConfig::default()).expect("default config serializes")
    }
}
