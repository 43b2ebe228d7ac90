use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

/// Two-layer MLP regressor.
///
/// ```text
/// Input:  [batch, input_dim]
/// FC1:    input_dim -> hidden_dim, ReLU
/// FC2:    hidden_dim -> 1
/// ```
#[derive(Module, Debug)]
pub struct Regressor<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct RegressorConfig {
    pub input_dim: usize,
    #[config(default = 32)]
    pub hidden_dim: usize,
}

impl RegressorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Regressor<B> {
        Regressor {
            fc1: LinearConfig::new(self.input_dim, self.hidden_dim).init(device),
            fc2: LinearConfig::new(self.hidden_dim, 1).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> Regressor<B> {
    /// Forward pass: input [batch, input_dim] -> output [batch, 1].
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(input));
        self.fc2.forward(x)
    }
}

/// Mean squared error over the batch.
pub fn mse_loss<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let diff = output - targets;
    (diff.clone() * diff).mean()
}
