use std::fmt;

use burn::backend::{Autodiff, NdArray};

pub type CpuBackend = Autodiff<NdArray<f32>>;

#[cfg(feature = "wgpu")]
pub type AcceleratorBackend = Autodiff<burn::backend::Wgpu<f32, i32>>;

/// Where the operator would like to train.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// GPU through wgpu when this build supports it, CPU otherwise.
    Accelerator,
    Cpu,
}

/// The backend actually used for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDevice {
    Accelerator,
    Cpu,
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDevice::Accelerator => f.write_str("wgpu"),
            ResolvedDevice::Cpu => f.write_str("cpu (ndarray)"),
        }
    }
}

pub fn accelerator_available() -> bool {
    cfg!(feature = "wgpu")
}

pub fn resolve(preference: DevicePreference) -> ResolvedDevice {
    match preference {
        DevicePreference::Accelerator if accelerator_available() => ResolvedDevice::Accelerator,
        DevicePreference::Accelerator => {
            tracing::warn!("accelerator requested but this build has no wgpu backend; using CPU");
            ResolvedDevice::Cpu
        }
        DevicePreference::Cpu => ResolvedDevice::Cpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_preference_always_cpu() {
        assert_eq!(resolve(DevicePreference::Cpu), ResolvedDevice::Cpu);
    }

    #[test]
    fn test_accelerator_follows_build() {
        let expected = if accelerator_available() {
            ResolvedDevice::Accelerator
        } else {
            ResolvedDevice::Cpu
        };
        assert_eq!(resolve(DevicePreference::Accelerator), expected);
    }
}
