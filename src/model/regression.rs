use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::AppConfig;
use crate::error::DataError;
use crate::model::data::{CsvDataset, DataLoader};
use crate::model::network::{mse_loss, Regressor, RegressorConfig};
use crate::training::collaborator::{CollaboratorResult, StateBlob, StepSummary, TrainableModel};

type SgdOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, Regressor<B>, B>;

type StateRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// First-epoch warmup starts at this fraction of the scheduled rate.
const WARMUP_FACTOR: f64 = 1.0 / 1000.0;
const MIN_WARMUP_ITERS: usize = 1000;

/// Hyperparameters of the reference regressor and its data pipeline.
#[derive(Debug, Clone)]
pub struct RegressionConfig {
    pub hidden_dim: usize,
    pub momentum: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub seed: u64,
    pub max_iters: Option<usize>,
    pub log_interval: usize,
}

impl RegressionConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        RegressionConfig {
            hidden_dim: config.model.hidden_dim,
            momentum: config.optimizer.momentum,
            weight_decay: config.optimizer.weight_decay,
            batch_size: config.schedule.batch_size,
            eval_batch_size: config.schedule.eval_batch_size,
            seed: config.run.seed,
            max_iters: config.run.max_iters,
            log_interval: config.run.log_interval,
        }
    }

    fn sgd(&self) -> SgdConfig {
        let momentum = (self.momentum > 0.0).then(|| {
            MomentumConfig::new()
                .with_momentum(self.momentum)
                .with_dampening(0.0)
        });
        let weight_decay =
            (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay as f32));
        SgdConfig::new()
            .with_momentum(momentum)
            .with_weight_decay(weight_decay)
    }
}

/// Linear warmup multiplier for iteration `iter` of the first epoch.
pub fn warmup_multiplier(iter: usize, warmup_iters: usize) -> f64 {
    if iter >= warmup_iters {
        return 1.0;
    }
    let alpha = iter as f64 / warmup_iters as f64;
    WARMUP_FACTOR * (1.0 - alpha) + alpha
}

/// MLP regressor trained with SGD on in-memory CSV data.
pub struct RegressionModel<B: AutodiffBackend> {
    network: Regressor<B>,
    optimizer: SgdOptimizer<B>,
    network_config: RegressorConfig,
    config: RegressionConfig,
    train_data: CsvDataset,
    eval_data: CsvDataset,
    train_loader: DataLoader,
    eval_loader: DataLoader,
    warmup_iters: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> RegressionModel<B> {
    pub fn new(
        config: RegressionConfig,
        train_data: CsvDataset,
        eval_data: CsvDataset,
        device: B::Device,
    ) -> Result<Self, DataError> {
        if train_data.num_features() != eval_data.num_features() {
            return Err(DataError::FeatureMismatch {
                train: train_data.num_features(),
                eval: eval_data.num_features(),
            });
        }

        let network_config =
            RegressorConfig::new(train_data.num_features()).with_hidden_dim(config.hidden_dim);
        let network = network_config.init(&device);
        let optimizer = config.sgd().init();

        let train_loader = DataLoader {
            batch_size: config.batch_size,
            shuffle: true,
            drop_last: true,
        };
        let eval_loader = DataLoader {
            batch_size: config.eval_batch_size,
            shuffle: false,
            drop_last: true,
        };
        let warmup_iters = MIN_WARMUP_ITERS.max(train_loader.num_batches(train_data.len()));

        Ok(RegressionModel {
            network,
            optimizer,
            network_config,
            config,
            train_data,
            eval_data,
            train_loader,
            eval_loader,
            warmup_iters,
            device,
        })
    }

    /// Build from `<data_dir>/train.csv` and `<data_dir>/val.csv`.
    pub fn from_app_config(config: &AppConfig, device: B::Device) -> Result<Self, DataError> {
        let has_headers = config.run.csv_has_headers;
        let train_data = CsvDataset::load(&config.run.data_dir.join("train.csv"), has_headers)?;
        let eval_data = CsvDataset::load(&config.run.data_dir.join("val.csv"), has_headers)?;
        tracing::info!(
            train_rows = train_data.len(),
            eval_rows = eval_data.len(),
            features = train_data.num_features(),
            "loaded dataset"
        );
        Self::new(RegressionConfig::from_app(config), train_data, eval_data, device)
    }

    fn iterations(&self, available: usize) -> usize {
        match self.config.max_iters {
            Some(cap) => available.min(cap),
            None => available,
        }
    }

    /// Shuffle order depends only on seed and epoch, so a resumed run sees
    /// the same batches an uninterrupted one would.
    fn epoch_rng(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64))
    }
}

impl<B: AutodiffBackend> TrainableModel for RegressionModel<B> {
    fn name(&self) -> &str {
        "mlp-regressor"
    }

    fn train_one_epoch(&mut self, epoch: usize, learning_rate: f64) -> CollaboratorResult<StepSummary> {
        let mut rng = self.epoch_rng(epoch);
        let batches = self.train_loader.epoch_batches(self.train_data.len(), &mut rng);
        let iterations = self.iterations(batches.len());
        if iterations == 0 {
            return Err(format!(
                "training set has {} rows, fewer than one batch of {}",
                self.train_data.len(),
                self.train_loader.batch_size
            )
            .into());
        }

        let start = Instant::now();
        let mut total_loss = 0.0f64;
        for (i, indices) in batches.iter().take(iterations).enumerate() {
            let lr = if epoch == 0 {
                learning_rate * warmup_multiplier(i, self.warmup_iters)
            } else {
                learning_rate
            };

            let (inputs, targets) = self.train_data.batch::<B>(indices, &self.device);
            let loss = mse_loss(self.network.forward(inputs), targets);
            let loss_val: f32 = loss.clone().into_scalar().elem();
            if !loss_val.is_finite() {
                return Err(format!("loss is {loss_val} at iteration {i}, stopping training").into());
            }

            let grads = GradientsParams::from_grads(loss.backward(), &self.network);
            self.network = self.optimizer.step(lr, self.network.clone(), grads);
            total_loss += f64::from(loss_val);

            if (i + 1) % self.config.log_interval == 0 {
                tracing::info!(
                    "epoch {} iter {}/{} | loss: {:.4} | lr: {:.6}",
                    epoch + 1,
                    i + 1,
                    iterations,
                    loss_val,
                    lr
                );
            }
        }

        Ok(StepSummary {
            loss: (total_loss / iterations as f64) as f32,
            iterations,
            seconds: start.elapsed().as_secs_f64(),
        })
    }

    fn eval_one_epoch(&mut self, epoch: usize) -> CollaboratorResult<StepSummary> {
        let mut rng = self.epoch_rng(epoch);
        let batches = self.eval_loader.epoch_batches(self.eval_data.len(), &mut rng);
        let iterations = self.iterations(batches.len());
        if iterations == 0 {
            return Err(format!(
                "eval set has {} rows, fewer than one batch of {}",
                self.eval_data.len(),
                self.eval_loader.batch_size
            )
            .into());
        }

        let network = self.network.valid();
        let start = Instant::now();
        let mut total_loss = 0.0f64;
        for indices in batches.iter().take(iterations) {
            let (inputs, targets) = self.eval_data.batch::<B::InnerBackend>(indices, &self.device);
            let loss_val: f32 = mse_loss(network.forward(inputs), targets).into_scalar().elem();
            total_loss += f64::from(loss_val);
        }

        let summary = StepSummary {
            loss: (total_loss / iterations as f64) as f32,
            iterations,
            seconds: start.elapsed().as_secs_f64(),
        };
        tracing::info!("epoch {} eval | loss: {:.4}", epoch + 1, summary.loss);
        Ok(summary)
    }

    fn model_state(&self) -> CollaboratorResult<StateBlob> {
        let recorder = StateRecorder::default();
        let bytes = Recorder::<B>::record(&recorder, self.network.clone().into_record(), ())
            .map_err(|e| format!("recording model parameters: {e:?}"))?;
        Ok(StateBlob::new(bytes))
    }

    fn optimizer_state(&self) -> CollaboratorResult<StateBlob> {
        let recorder = StateRecorder::default();
        let bytes = Recorder::<B>::record(&recorder, self.optimizer.to_record(), ())
            .map_err(|e| format!("recording optimizer state: {e:?}"))?;
        Ok(StateBlob::new(bytes))
    }

    fn restore_state(&mut self, model: &StateBlob, optimizer: &StateBlob) -> CollaboratorResult<()> {
        let recorder = StateRecorder::default();

        let network_record: <Regressor<B> as Module<B>>::Record =
            Recorder::<B>::load(&recorder, model.as_bytes().to_vec(), &self.device)
                .map_err(|e| format!("model parameters do not decode: {e:?}"))?;
        let fresh = self.network_config.init::<B>(&self.device);
        let expected_params = fresh.num_params();
        let network = fresh.load_record(network_record);
        if network.num_params() != expected_params {
            return Err(format!(
                "checkpoint has {} parameters, model expects {}",
                network.num_params(),
                expected_params
            )
            .into());
        }

        let optimizer_record: <SgdOptimizer<B> as Optimizer<Regressor<B>, B>>::Record =
            Recorder::<B>::load(&recorder, optimizer.as_bytes().to_vec(), &self.device)
                .map_err(|e| format!("optimizer state does not decode: {e:?}"))?;
        let restored_optimizer: SgdOptimizer<B> = self.config.sgd().init();

        self.network = network;
        self.optimizer = restored_optimizer.load_record(optimizer_record);
        Ok(())
    }
}
