use std::path::Path;

use serde::{Deserialize, Serialize};

/// Timing and throughput for one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Zero-based index of the epoch that ran.
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f32,
    pub eval_loss: f32,
    pub train_seconds: f64,
    pub eval_seconds: f64,
    /// Iterations per second.
    pub train_throughput: f64,
    pub eval_throughput: f64,
}

/// Accumulates per-epoch statistics for the lifetime of a run.
#[derive(Debug, Default)]
pub struct RunReporter {
    series: Vec<EpochStats>,
}

impl RunReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: EpochStats) {
        tracing::info!(
            epoch = stats.epoch + 1,
            train_seconds = format_args!("{:.1}", stats.train_seconds),
            eval_seconds = format_args!("{:.1}", stats.eval_seconds),
            train_it_per_sec = format_args!("{:.2}", stats.train_throughput),
            eval_it_per_sec = format_args!("{:.2}", stats.eval_throughput),
            "epoch timing"
        );
        self.series.push(stats);
    }

    pub fn series(&self) -> &[EpochStats] {
        &self.series
    }

    pub fn latest(&self) -> Option<&EpochStats> {
        self.series.last()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn total_train_seconds(&self) -> f64 {
        self.series.iter().map(|s| s.train_seconds).sum()
    }

    pub fn total_eval_seconds(&self) -> f64 {
        self.series.iter().map(|s| s.eval_seconds).sum()
    }

    pub fn mean_train_throughput(&self) -> f64 {
        mean(self.series.iter().map(|s| s.train_throughput))
    }

    pub fn mean_eval_throughput(&self) -> f64 {
        mean(self.series.iter().map(|s| s.eval_throughput))
    }

    /// Write the series as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.series)?;
        std::fs::write(path, json)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
