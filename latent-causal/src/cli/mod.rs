pub mod fit_synthetic;

use clap::{Parser, Subcommand, ValueEnum};

pub use fit_synthetic::FitSyntheticArgs;

#[derive(Parser)]
#[command(name = "latent-causal")]
#[command(about = "Latent causal discovery for gridded time series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Simulate a latent VAR, fit the model and report edge recovery
    FitSynthetic(FitSyntheticArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Create a candle `Device` from this enum.
    pub fn to_device(&self, device_no: usize) -> candle_core::Result<candle_core::Device> {
        Ok(match self {
            ComputeDevice::Metal => candle_core::Device::new_metal(device_no)?,
            ComputeDevice::Cuda => candle_core::Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => candle_core::Device::Cpu,
        })
    }
}
