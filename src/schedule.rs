//! Step learning-rate schedule.
//!
//! The rate is `base_lr * 0.1^k` where `k` is the number of thresholds in
//! `lr_steps` that the epoch index has reached. The schedule is recomputed
//! from the epoch index every time; nothing is stored between epochs.

/// Factor applied for every threshold crossed.
pub const DECAY_FACTOR: f64 = 0.1;

/// Immutable schedule parameters for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub base_lr: f64,
    pub lr_steps: Vec<usize>,
}

impl ScheduleConfig {
    pub fn new(base_lr: f64, lr_steps: Vec<usize>) -> Self {
        ScheduleConfig { base_lr, lr_steps }
    }

    pub fn multiplier(&self, epoch: usize) -> f64 {
        multiplier(epoch, &self.lr_steps)
    }

    pub fn effective_lr(&self, epoch: usize) -> f64 {
        effective_lr(epoch, self.base_lr, &self.lr_steps)
    }
}

/// `DECAY_FACTOR` raised to the number of thresholds `<= epoch`.
///
/// `lr_steps` is expected to be sorted; an unsorted slice still yields a
/// non-increasing schedule because every threshold is counted independently.
pub fn multiplier(epoch: usize, lr_steps: &[usize]) -> f64 {
    let crossed = lr_steps.iter().filter(|&&step| step <= epoch).count();
    DECAY_FACTOR.powi(crossed as i32)
}

pub fn effective_lr(epoch: usize, base_lr: f64, lr_steps: &[usize]) -> f64 {
    base_lr * multiplier(epoch, lr_steps)
}
