//! Checkpoint persistence: naming, discovery, atomic save, retention.

mod record;
mod state;
mod store;

pub use record::{CheckpointRecord, CheckpointTemplate, CreationOrder};
pub use state::{RunState, StateBlob};
pub use store::{CheckpointStore, RetentionPolicy};
