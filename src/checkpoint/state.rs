use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

const FORMAT_VERSION: u32 = 1;

/// Opaque serialized state owned by a collaborator. Never inspected here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBlob(Vec<u8>);

impl StateBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        StateBlob(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StateBlob {
    fn from(bytes: Vec<u8>) -> Self {
        StateBlob(bytes)
    }
}

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Epochs fully completed.
    pub epoch: usize,
    pub model_state: StateBlob,
    pub optimizer_state: StateBlob,
}

#[derive(Serialize)]
struct CheckpointDocument {
    format_version: u32,
    epochs: usize,
    train_loss: f32,
    eval_loss: f32,
    saved_at: u64,
    model: String,
    optimizer: String,
}

/// Read side: every field optional so absence is reported as corruption
/// rather than a generic parse error.
#[derive(Deserialize)]
struct RawCheckpointDocument {
    #[serde(default)]
    format_version: Option<u32>,
    #[serde(default)]
    epochs: Option<usize>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    optimizer: Option<String>,
}

pub(crate) fn encode(state: &RunState, train_loss: f32, eval_loss: f32) -> serde_json::Result<Vec<u8>> {
    let saved_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let document = CheckpointDocument {
        format_version: FORMAT_VERSION,
        epochs: state.epoch,
        train_loss,
        eval_loss,
        saved_at,
        model: STANDARD.encode(state.model_state.as_bytes()),
        optimizer: STANDARD.encode(state.optimizer_state.as_bytes()),
    };
    serde_json::to_vec(&document)
}

pub(crate) fn decode(path: &Path, bytes: &[u8]) -> Result<RunState, CheckpointError> {
    let raw: RawCheckpointDocument = serde_json::from_slice(bytes)
        .map_err(|e| CheckpointError::corrupt(path, format!("unreadable document: {e}")))?;

    if let Some(version) = raw.format_version {
        if version > FORMAT_VERSION {
            return Err(CheckpointError::corrupt(
                path,
                format!("unsupported format version {version}"),
            ));
        }
    }

    let epoch = raw
        .epochs
        .ok_or_else(|| CheckpointError::corrupt(path, "missing field `epochs`"))?;
    let model_state = decode_blob(path, "model", raw.model)?;
    let optimizer_state = decode_blob(path, "optimizer", raw.optimizer)?;

    Ok(RunState {
        epoch,
        model_state,
        optimizer_state,
    })
}

fn decode_blob(path: &Path, field: &str, value: Option<String>) -> Result<StateBlob, CheckpointError> {
    let encoded =
        value.ok_or_else(|| CheckpointError::corrupt(path, format!("missing field `{field}`")))?;
    STANDARD
        .decode(encoded)
        .map(StateBlob::new)
        .map_err(|e| CheckpointError::corrupt(path, format!("field `{field}` is not valid base64: {e}")))
}
