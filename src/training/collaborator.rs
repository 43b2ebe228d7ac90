use std::error::Error;

pub use crate::checkpoint::StateBlob;

pub type CollaboratorResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// What a one-epoch train or eval pass reports back.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepSummary {
    /// Mean loss over the pass.
    pub loss: f32,
    pub iterations: usize,
    pub seconds: f64,
}

impl StepSummary {
    /// Iterations per second; zero when no time was measured.
    pub fn throughput(&self) -> f64 {
        if self.seconds > 0.0 {
            self.iterations as f64 / self.seconds
        } else {
            0.0
        }
    }
}

/// Model + optimizer + data pipeline as seen by the epoch driver.
///
/// The driver never looks inside the state blobs; it only carries them
/// between `model_state`/`optimizer_state` and `restore_state`.
pub trait TrainableModel {
    /// Display name for logs.
    fn name(&self) -> &str;

    /// One full training pass at the given learning rate.
    fn train_one_epoch(&mut self, epoch: usize, learning_rate: f64) -> CollaboratorResult<StepSummary>;

    /// One full evaluation pass. Must not update parameters.
    fn eval_one_epoch(&mut self, epoch: usize) -> CollaboratorResult<StepSummary>;

    fn model_state(&self) -> CollaboratorResult<StateBlob>;

    fn optimizer_state(&self) -> CollaboratorResult<StateBlob>;

    /// Replace parameters and optimizer state with previously saved blobs.
    /// Fails if the blobs do not fit the current model/optimizer shape.
    fn restore_state(&mut self, model: &StateBlob, optimizer: &StateBlob) -> CollaboratorResult<()>;
}
