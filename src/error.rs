use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("corrupt checkpoint {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("checkpoint {path} does not match the current model/optimizer: {reason}")]
    Deserialization { path: PathBuf, reason: String },

    #[error("storage failure on {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid checkpoint path template {0}: expected <dir>/<prefix>.<ext>")]
    InvalidTemplate(PathBuf),
}

impl CheckpointError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CheckpointError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Which collaborator step raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Train,
    Eval,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Train => f.write_str("train"),
            Stage::Eval => f.write_str("eval"),
        }
    }
}

/// Errors that can occur during training.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("{stage} step failed at epoch {epoch}: {source}")]
    Collaborator {
        stage: Stage,
        epoch: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Errors that can occur while loading a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("dataset {0} has no rows")]
    Empty(PathBuf),

    #[error("feature count mismatch: train has {train}, eval has {eval}")]
    FeatureMismatch { train: usize, eval: usize },
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::corrupt("logs/run_ep003.ckpt", "missing field `epochs`");
        assert_eq!(
            err.to_string(),
            "corrupt checkpoint logs/run_ep003.ckpt: missing field `epochs`"
        );
    }

    #[test]
    fn test_training_error_display() {
        let err = TrainingError::Collaborator {
            stage: Stage::Eval,
            epoch: 4,
            source: "out of memory".into(),
        };
        assert_eq!(err.to_string(), "eval step failed at epoch 4: out of memory");
    }

    #[test]
    fn test_storage_error_wraps_into_training_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TrainingError = CheckpointError::storage("ckpt", io).into();
        assert!(matches!(
            err,
            TrainingError::Checkpoint(CheckpointError::Storage { .. })
        ));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("run.target_epochs must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: run.target_epochs must be > 0"
        );
    }
}
