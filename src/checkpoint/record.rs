use std::path::{Path, PathBuf};

use crate::error::CheckpointError;

/// Naming template derived from the configured checkpoint path.
///
/// `logs/maskrcnn.pth` yields directory `logs`, prefix `maskrcnn` and
/// extension `.pth`; artifacts are then named
/// `maskrcnn_ep007-loss0.421-val_loss0.389.pth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTemplate {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl CheckpointTemplate {
    pub fn parse(path: &Path) -> Result<Self, CheckpointError> {
        let invalid = || CheckpointError::InvalidTemplate(path.to_path_buf());
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid)?;
        let extension = match path.extension() {
            Some(ext) => format!(".{}", ext.to_str().ok_or_else(invalid)?),
            None => String::new(),
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(CheckpointTemplate {
            dir,
            prefix: stem.to_string(),
            extension,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Artifact file name for a completed epoch.
    pub fn file_name(&self, epoch: usize, train_loss: f32, eval_loss: f32) -> String {
        format!(
            "{}_ep{:03}-loss{:.3}-val_loss{:.3}{}",
            self.prefix, epoch, train_loss, eval_loss, self.extension
        )
    }

    /// Discovery glob: `<prefix>*<ext>`.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.extension.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.extension)
    }

    /// Parse `(epoch, train_loss, eval_loss)` back out of an artifact name.
    pub fn parse_file_name(&self, file_name: &str) -> Option<(usize, f32, f32)> {
        if !self.matches(file_name) {
            return None;
        }
        let middle = &file_name[self.prefix.len()..file_name.len() - self.extension.len()];
        let rest = middle.strip_prefix("_ep")?;
        let (epoch, rest) = rest.split_once("-loss")?;
        let (train, eval) = rest.split_once("-val_loss")?;
        if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((epoch.parse().ok()?, train.parse().ok()?, eval.parse().ok()?))
    }
}

/// Ordering key for retention and "latest" discovery.
///
/// Compares by completed epoch as an integer, then by file name so that two
/// artifacts for the same epoch still order deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreationOrder {
    epoch: usize,
    name: String,
}

/// One persisted checkpoint artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub path: PathBuf,
    pub epoch: usize,
    pub train_loss: f32,
    pub eval_loss: f32,
    pub created_order: CreationOrder,
}

impl CheckpointRecord {
    pub(crate) fn from_path(template: &CheckpointTemplate, path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let (epoch, train_loss, eval_loss) = template.parse_file_name(&name)?;
        Some(CheckpointRecord {
            path,
            epoch,
            train_loss,
            eval_loss,
            created_order: CreationOrder { epoch, name },
        })
    }
}
