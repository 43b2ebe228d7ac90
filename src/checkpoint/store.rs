use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::checkpoint::record::{CheckpointRecord, CheckpointTemplate};
use crate::checkpoint::state::{self, RunState};
use crate::error::CheckpointError;

/// How many checkpoint artifacts to keep on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetentionPolicy {
    pub max_checkpoints: usize,
}

impl RetentionPolicy {
    pub fn new(max_checkpoints: usize) -> Self {
        RetentionPolicy { max_checkpoints }
    }

    /// Effective limit. Zero would delete the only resume point, so it is
    /// treated as one.
    pub fn keep(&self) -> usize {
        self.max_checkpoints.max(1)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy { max_checkpoints: 5 }
    }
}

/// Discovers, loads, saves and prunes checkpoint artifacts for one template.
///
/// Assumes it is the only writer for its template.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    template: CheckpointTemplate,
    #[cfg(test)]
    fail_prune: bool,
}

impl CheckpointStore {
    pub fn new(template: CheckpointTemplate) -> Self {
        CheckpointStore {
            template,
            #[cfg(test)]
            fail_prune: false,
        }
    }

    /// Store whose `prune` always fails as if the directory listing broke.
    #[cfg(test)]
    pub(crate) fn with_failing_prune(mut self) -> Self {
        self.fail_prune = true;
        self
    }

    pub fn from_path(checkpoint_path: &Path) -> Result<Self, CheckpointError> {
        CheckpointTemplate::parse(checkpoint_path).map(Self::new)
    }

    pub fn template(&self) -> &CheckpointTemplate {
        &self.template
    }

    /// All artifacts matching the naming pattern, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let dir = self.template.dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::storage(dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::storage(dir, e))?;
            let path = entry.path();
            let matches_glob = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.template.matches(name));
            if !matches_glob || !path.is_file() {
                continue;
            }
            match CheckpointRecord::from_path(&self.template, path) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    path = %entry.path().display(),
                    "ignoring file that does not follow the checkpoint naming pattern"
                ),
            }
        }
        records.sort_by(|a, b| a.created_order.cmp(&b.created_order));
        Ok(records)
    }

    /// The most recently created artifact, if any.
    pub fn find_latest(&self) -> Result<Option<CheckpointRecord>, CheckpointError> {
        Ok(self.list()?.pop())
    }

    pub fn load(&self, record: &CheckpointRecord) -> Result<RunState, CheckpointError> {
        let bytes =
            fs::read(&record.path).map_err(|e| CheckpointError::storage(&record.path, e))?;
        let state = state::decode(&record.path, &bytes)?;
        if state.epoch != record.epoch {
            return Err(CheckpointError::corrupt(
                &record.path,
                format!(
                    "file name says epoch {} but document holds epoch {}",
                    record.epoch, state.epoch
                ),
            ));
        }
        tracing::debug!(
            path = %record.path.display(),
            epoch = state.epoch,
            model_bytes = state.model_state.len(),
            optimizer_bytes = state.optimizer_state.len(),
            "loaded checkpoint"
        );
        Ok(state)
    }

    /// Persist `state` under a name derived from its epoch and losses.
    ///
    /// The document is written to a hidden temp file and renamed into place,
    /// so discovery never sees a partial artifact.
    pub fn save(
        &self,
        state: &RunState,
        train_loss: f32,
        eval_loss: f32,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let dir = self.template.dir();
        fs::create_dir_all(dir).map_err(|e| CheckpointError::storage(dir, e))?;

        let name = self.template.file_name(state.epoch, train_loss, eval_loss);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!(".{name}.tmp"));

        let bytes = state::encode(state, train_loss, eval_loss)
            .map_err(|e| CheckpointError::storage(&final_path, io::Error::other(e)))?;

        if let Err(e) = write_synced(&tmp_path, &bytes).and_then(|()| fs::rename(&tmp_path, &final_path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(CheckpointError::storage(final_path, e));
        }

        tracing::info!(path = %final_path.display(), epoch = state.epoch, "saved checkpoint");
        CheckpointRecord::from_path(&self.template, final_path.clone())
            .ok_or_else(|| CheckpointError::corrupt(final_path, "saved name does not parse"))
    }

    /// Delete the oldest artifacts beyond the retention limit.
    ///
    /// A failed delete is logged and skipped; only a failed listing is
    /// returned as an error.
    pub fn prune(&self, retention: &RetentionPolicy) -> Result<Vec<PathBuf>, CheckpointError> {
        #[cfg(test)]
        if self.fail_prune {
            return Err(CheckpointError::storage(
                self.template.dir(),
                io::Error::other("listing failed"),
            ));
        }
        self.prune_with(retention, |path| fs::remove_file(path))
    }

    fn prune_with<F>(&self, retention: &RetentionPolicy, mut remove: F) -> Result<Vec<PathBuf>, CheckpointError>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let records = self.list()?;
        let keep = retention.keep();
        if records.len() <= keep {
            return Ok(Vec::new());
        }

        let excess = records.len() - keep;
        let mut removed = Vec::with_capacity(excess);
        for record in records.into_iter().take(excess) {
            match remove(&record.path) {
                Ok(()) => {
                    tracing::info!(path = %record.path.display(), "removed checkpoint");
                    removed.push(record.path);
                }
                Err(e) => tracing::warn!(
                    path = %record.path.display(),
                    error = %e,
                    "failed to remove old checkpoint"
                ),
            }
        }
        Ok(removed)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
