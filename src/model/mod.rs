//! Reference collaborator: a small MLP regressor over CSV data, trained with
//! SGD on a burn backend.

pub mod data;
pub mod device;
pub mod network;
pub mod regression;

pub use data::{CsvDataset, DataLoader};
pub use device::{resolve, CpuBackend, DevicePreference, ResolvedDevice};
pub use network::{Regressor, RegressorConfig};
pub use regression::{RegressionConfig, RegressionModel};

#[cfg(feature = "wgpu")]
pub use device::AcceleratorBackend;
