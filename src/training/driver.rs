use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checkpoint::{CheckpointStore, RetentionPolicy, RunState};
use crate::error::{CheckpointError, Stage, TrainingError};
use crate::schedule::ScheduleConfig;
use crate::training::collaborator::TrainableModel;
use crate::training::reporter::{EpochStats, RunReporter};

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Init,
    Resuming,
    Running,
    Terminated,
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub target_epochs: usize,
    pub schedule: ScheduleConfig,
    pub retention: RetentionPolicy,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub start_epoch: usize,
    pub final_epoch: usize,
    pub target_epochs: usize,
    pub epochs_run: usize,
    pub elapsed: Duration,
    /// A stop was requested before `target_epochs` was reached.
    pub stopped_early: bool,
}

impl RunSummary {
    pub fn already_trained(&self) -> bool {
        self.epochs_run == 0 && self.start_epoch >= self.target_epochs
    }
}

/// Runs train/eval epochs, checkpointing after each one.
///
/// Epochs run strictly one after another: the next epoch starts only once the
/// previous checkpoint is written and pruning has finished. A stop request is
/// honored at epoch boundaries only.
pub struct EpochDriver<M: TrainableModel> {
    model: M,
    store: CheckpointStore,
    config: DriverConfig,
    reporter: RunReporter,
    phase: DriverPhase,
    completed_epochs: usize,
    stop: Arc<AtomicBool>,
}

impl<M: TrainableModel> EpochDriver<M> {
    pub fn new(model: M, store: CheckpointStore, config: DriverConfig) -> Self {
        EpochDriver {
            model,
            store,
            config,
            reporter: RunReporter::new(),
            phase: DriverPhase::Init,
            completed_epochs: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned flag (e.g. set by a Ctrl-C handler) to request
    /// a stop after the current epoch.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Epochs completed and persisted so far. Valid after a failed run too.
    pub fn completed_epochs(&self) -> usize {
        self.completed_epochs
    }

    pub fn reporter(&self) -> &RunReporter {
        &self.reporter
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Restore from the latest checkpoint, if one exists. Returns the epoch to
    /// start from.
    ///
    /// A checkpoint that cannot be read or restored is fatal: retraining from
    /// scratch would silently discard progress.
    pub fn resume(&mut self) -> Result<usize, TrainingError> {
        self.phase = DriverPhase::Resuming;
        let result = self.try_resume();
        if result.is_err() {
            self.phase = DriverPhase::Terminated;
        }
        result
    }

    fn try_resume(&mut self) -> Result<usize, TrainingError> {
        let Some(record) = self.store.find_latest()? else {
            tracing::info!(model = self.model.name(), "no checkpoint found, starting fresh");
            self.completed_epochs = 0;
            return Ok(0);
        };

        let state = self.store.load(&record)?;
        self.model
            .restore_state(&state.model_state, &state.optimizer_state)
            .map_err(|e| CheckpointError::Deserialization {
                path: record.path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            path = %record.path.display(),
            epoch = state.epoch,
            "resumed from checkpoint"
        );
        self.completed_epochs = state.epoch;
        Ok(state.epoch)
    }

    /// Resume, then train until `target_epochs` or a stop request.
    pub fn run(&mut self) -> Result<RunSummary, TrainingError> {
        let since = Instant::now();
        let start_epoch = self.resume()?;
        let target = self.config.target_epochs;

        tracing::info!("already trained: {} epochs; to {} epochs", start_epoch, target);
        self.phase = DriverPhase::Running;

        let mut stopped_early = false;
        for epoch in start_epoch..target {
            if self.stop.load(Ordering::Relaxed) {
                tracing::warn!(epoch = self.completed_epochs, "stop requested, ending run at epoch boundary");
                stopped_early = true;
                break;
            }
            if let Err(e) = self.run_epoch(epoch) {
                self.phase = DriverPhase::Terminated;
                return Err(e);
            }
        }

        self.phase = DriverPhase::Terminated;
        let summary = RunSummary {
            start_epoch,
            final_epoch: self.completed_epochs,
            target_epochs: target,
            epochs_run: self.completed_epochs - start_epoch,
            elapsed: since.elapsed(),
            stopped_early,
        };

        tracing::info!(
            "total time of this training: {:.1} s",
            summary.elapsed.as_secs_f64()
        );
        if summary.already_trained() {
            tracing::info!("nothing to do: already trained {} epochs", start_epoch);
        } else {
            tracing::info!("already trained: {} epochs", summary.final_epoch);
        }
        Ok(summary)
    }

    fn run_epoch(&mut self, epoch: usize) -> Result<(), TrainingError> {
        let factor = self.config.schedule.multiplier(epoch);
        let learning_rate = self.config.schedule.effective_lr(epoch);
        tracing::info!(
            "epoch: {} | lr_epoch: {:.5}, factor: {:.5}",
            epoch + 1,
            learning_rate,
            factor
        );

        let train_start = Instant::now();
        let train = self
            .model
            .train_one_epoch(epoch, learning_rate)
            .map_err(|source| TrainingError::Collaborator {
                stage: Stage::Train,
                epoch,
                source,
            })?;
        let train_seconds = train_start.elapsed().as_secs_f64();

        let eval_start = Instant::now();
        let eval = self
            .model
            .eval_one_epoch(epoch)
            .map_err(|source| TrainingError::Collaborator {
                stage: Stage::Eval,
                epoch,
                source,
            })?;
        let eval_seconds = eval_start.elapsed().as_secs_f64();

        let trained_epoch = epoch + 1;
        let state = self.snapshot(trained_epoch, epoch)?;
        self.store.save(&state, train.loss, eval.loss)?;
        self.completed_epochs = trained_epoch;

        self.reporter.record(EpochStats {
            epoch,
            learning_rate,
            train_loss: train.loss,
            eval_loss: eval.loss,
            train_seconds,
            eval_seconds,
            train_throughput: train.throughput(),
            eval_throughput: eval.throughput(),
        });

        if let Err(e) = self.store.prune(&self.config.retention) {
            tracing::warn!(error = %e, "checkpoint pruning failed, continuing");
        }
        Ok(())
    }

    fn snapshot(&self, trained_epoch: usize, epoch: usize) -> Result<RunState, TrainingError> {
        let collaborator_failure = |source| TrainingError::Collaborator {
            stage: Stage::Train,
            epoch,
            source,
        };
        Ok(RunState {
            epoch: trained_epoch,
            model_state: self.model.model_state().map_err(collaborator_failure)?,
            optimizer_state: self.model.optimizer_state().map_err(collaborator_failure)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::checkpoint::StateBlob;
    use crate::training::collaborator::{CollaboratorResult, StepSummary};

    /// Deterministic stand-in: parameters are a counter bumped per train step.
    #[derive(Default)]
    struct FakeModel {
        params: u32,
        optimizer_steps: u32,
        train_calls: Vec<(usize, f64)>,
        eval_calls: Vec<usize>,
        fail_train_at: Option<usize>,
        fail_eval_at: Option<usize>,
        reject_restore: bool,
        stop_after_train: Option<Arc<AtomicBool>>,
    }

    impl TrainableModel for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        fn train_one_epoch(&mut self, epoch: usize, learning_rate: f64) -> CollaboratorResult<StepSummary> {
            if self.fail_train_at == Some(epoch) {
                return Err("out of memory".into());
            }
            self.train_calls.push((epoch, learning_rate));
            self.params += 1;
            self.optimizer_steps += 10;
            if let Some(stop) = &self.stop_after_train {
                stop.store(true, Ordering::Relaxed);
            }
            Ok(StepSummary {
                loss: 1.0 / (epoch + 1) as f32,
                iterations: 10,
                seconds: 0.5,
            })
        }

        fn eval_one_epoch(&mut self, epoch: usize) -> CollaboratorResult<StepSummary> {
            if self.fail_eval_at == Some(epoch) {
                return Err("eval exploded".into());
            }
            self.eval_calls.push(epoch);
            Ok(StepSummary {
                loss: 2.0 / (epoch + 1) as f32,
                iterations: 4,
                seconds: 0.25,
            })
        }

        fn model_state(&self) -> CollaboratorResult<StateBlob> {
            Ok(StateBlob::new(self.params.to_le_bytes().to_vec()))
        }

        fn optimizer_state(&self) -> CollaboratorResult<StateBlob> {
            Ok(StateBlob::new(self.optimizer_steps.to_le_bytes().to_vec()))
        }

        fn restore_state(&mut self, model: &StateBlob, optimizer: &StateBlob) -> CollaboratorResult<()> {
            if self.reject_restore {
                return Err("parameter shape mismatch".into());
            }
            let params: [u8; 4] = model.as_bytes().try_into()?;
            let steps: [u8; 4] = optimizer.as_bytes().try_into()?;
            self.params = u32::from_le_bytes(params);
            self.optimizer_steps = u32::from_le_bytes(steps);
            Ok(())
        }
    }

    fn driver_config(target_epochs: usize) -> DriverConfig {
        DriverConfig {
            target_epochs,
            schedule: ScheduleConfig::new(0.02, vec![6, 7]),
            retention: RetentionPolicy::new(5),
        }
    }

    fn store_in(dir: &Path) -> CheckpointStore {
        CheckpointStore::from_path(&dir.join("logs").join("model.ckpt")).unwrap()
    }

    fn artifact_count(dir: &Path) -> usize {
        store_in(dir).list().unwrap().len()
    }

    #[test]
    fn test_fresh_run_trains_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(3));

        let summary = driver.run().unwrap();
        assert_eq!(summary.start_epoch, 0);
        assert_eq!(summary.final_epoch, 3);
        assert_eq!(summary.epochs_run, 3);
        assert!(!summary.stopped_early);
        assert_eq!(driver.phase(), DriverPhase::Terminated);
        assert_eq!(driver.reporter().len(), 3);
        assert_eq!(driver.model().eval_calls, vec![0, 1, 2]);

        let latest = store_in(dir.path()).find_latest().unwrap().unwrap();
        assert_eq!(latest.epoch, 3);
    }

    #[test]
    fn test_learning_rate_follows_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(9));
        driver.run().unwrap();

        let lrs: Vec<f64> = driver.model().train_calls.iter().map(|&(_, lr)| lr).collect();
        for lr in &lrs[..6] {
            assert!((lr - 0.02).abs() < 1e-12);
        }
        assert!((lrs[6] - 0.002).abs() < 1e-12);
        assert!((lrs[7] - 0.0002).abs() < 1e-12);
        assert!((lrs[8] - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn test_resume_continues_from_saved_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(2));
        first.run().unwrap();
        assert_eq!(first.model().params, 2);

        let mut second = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(4));
        let summary = second.run().unwrap();
        assert_eq!(summary.start_epoch, 2);
        assert_eq!(summary.final_epoch, 4);

        let model = second.model();
        let trained: Vec<usize> = model.train_calls.iter().map(|&(e, _)| e).collect();
        assert_eq!(trained, vec![2, 3]);
        // Restored counters continue rather than restarting from zero.
        assert_eq!(model.params, 4);
        assert_eq!(model.optimizer_steps, 40);
    }

    #[test]
    fn test_saved_state_resumes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(3));
        driver.run().unwrap();
        let expected_model = driver.model().model_state().unwrap();
        let expected_optimizer = driver.model().optimizer_state().unwrap();

        let store = store_in(dir.path());
        let state = store.load(&store.find_latest().unwrap().unwrap()).unwrap();
        assert_eq!(state.epoch, 3);
        assert_eq!(state.model_state, expected_model);
        assert_eq!(state.optimizer_state, expected_optimizer);
    }

    #[test]
    fn test_already_trained_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(3))
            .run()
            .unwrap();
        let before = artifact_count(dir.path());

        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(2));
        let summary = driver.run().unwrap();
        assert!(summary.already_trained());
        assert_eq!(summary.epochs_run, 0);
        assert_eq!(summary.final_epoch, 3);
        assert!(driver.model().train_calls.is_empty());
        assert!(driver.model().eval_calls.is_empty());
        assert_eq!(artifact_count(dir.path()), before);
    }

    #[test]
    fn test_target_equal_to_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(0));
        let summary = driver.run().unwrap();
        assert!(summary.already_trained());
        assert!(driver.model().train_calls.is_empty());
        assert_eq!(artifact_count(dir.path()), 0);
    }

    #[test]
    fn test_retention_applied_each_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = driver_config(8);
        config.retention = RetentionPolicy::new(3);
        EpochDriver::new(FakeModel::default(), store_in(dir.path()), config)
            .run()
            .unwrap();

        let epochs: Vec<usize> = store_in(dir.path())
            .list()
            .unwrap()
            .iter()
            .map(|r| r.epoch)
            .collect();
        assert_eq!(epochs, vec![6, 7, 8]);
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(store.template().dir()).unwrap();
        let bad = store.template().dir().join(store.template().file_name(2, 1.0, 1.0));
        fs::write(&bad, b"not json").unwrap();

        let mut driver = EpochDriver::new(FakeModel::default(), store, driver_config(5));
        let err = driver.run().unwrap_err();
        assert!(
            matches!(err, TrainingError::Checkpoint(CheckpointError::Corrupt { .. })),
            "got {err}"
        );
        assert!(driver.model().train_calls.is_empty());
        assert_eq!(driver.phase(), DriverPhase::Terminated);
        assert!(bad.exists());
    }

    #[test]
    fn test_rejected_restore_is_deserialization_error() {
        let dir = tempfile::tempdir().unwrap();
        EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(1))
            .run()
            .unwrap();

        let model = FakeModel {
            reject_restore: true,
            ..Default::default()
        };
        let mut driver = EpochDriver::new(model, store_in(dir.path()), driver_config(3));
        let err = driver.run().unwrap_err();
        assert!(
            matches!(err, TrainingError::Checkpoint(CheckpointError::Deserialization { .. })),
            "got {err}"
        );
        assert!(driver.model().train_calls.is_empty());
    }

    #[test]
    fn test_train_failure_writes_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let model = FakeModel {
            fail_train_at: Some(2),
            ..Default::default()
        };
        let mut driver = EpochDriver::new(model, store_in(dir.path()), driver_config(5));
        let err = driver.run().unwrap_err();

        assert!(
            matches!(err, TrainingError::Collaborator { stage: Stage::Train, epoch: 2, .. }),
            "got {err}"
        );
        assert_eq!(driver.completed_epochs(), 2);
        assert_eq!(store_in(dir.path()).find_latest().unwrap().unwrap().epoch, 2);
    }

    #[test]
    fn test_eval_failure_writes_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let model = FakeModel {
            fail_eval_at: Some(0),
            ..Default::default()
        };
        let mut driver = EpochDriver::new(model, store_in(dir.path()), driver_config(5));
        let err = driver.run().unwrap_err();

        assert!(matches!(err, TrainingError::Collaborator { stage: Stage::Eval, .. }));
        assert_eq!(driver.completed_epochs(), 0);
        assert!(store_in(dir.path()).find_latest().unwrap().is_none());
    }

    #[test]
    fn test_save_failure_is_fatal_and_latest_stays_put() {
        let dir = tempfile::tempdir().unwrap();
        EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(2))
            .run()
            .unwrap();

        // The third epoch's artifact name is deterministic: block it with a directory.
        let store = store_in(dir.path());
        let blocked = store.template().dir().join(store.template().file_name(3, 1.0 / 3.0, 2.0 / 3.0));
        fs::create_dir(&blocked).unwrap();

        let mut driver = EpochDriver::new(FakeModel::default(), store_in(dir.path()), driver_config(5));
        let err = driver.run().unwrap_err();
        assert!(
            matches!(err, TrainingError::Checkpoint(CheckpointError::Storage { .. })),
            "got {err}"
        );
        assert_eq!(driver.model().train_calls.len(), 1, "no further epoch after a failed save");
        assert_eq!(driver.completed_epochs(), 2);
        assert!(driver.reporter().is_empty(), "unsaved epoch must not be reported");
        assert_eq!(store_in(dir.path()).find_latest().unwrap().unwrap().epoch, 2);
    }

    #[test]
    fn test_prune_failure_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = driver_config(4);
        config.retention = RetentionPolicy::new(1);
        let store = store_in(dir.path()).with_failing_prune();
        let mut driver = EpochDriver::new(FakeModel::default(), store, config);

        let summary = driver.run().unwrap();
        assert_eq!(summary.final_epoch, 4);
        assert_eq!(driver.reporter().len(), 4);
        // Nothing was pruned, every epoch's artifact is still there.
        assert_eq!(artifact_count(dir.path()), 4);
    }

    #[test]
    fn test_stop_request_ends_at_epoch_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let model = FakeModel {
            stop_after_train: Some(stop.clone()),
            ..Default::default()
        };
        let mut driver =
            EpochDriver::new(model, store_in(dir.path()), driver_config(5)).with_stop_flag(stop);

        let summary = driver.run().unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.final_epoch, 1);
        // The in-flight epoch still finished and was persisted.
        assert_eq!(driver.model().eval_calls, vec![0]);
        assert_eq!(store_in(dir.path()).find_latest().unwrap().unwrap().epoch, 1);
    }
}
