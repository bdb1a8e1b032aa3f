use candle_core::{Device, Result};
use tracing::warn;

/// The first cuda device when a gpu is requested and available, the cpu otherwise.
pub fn select_device(use_gpu: bool) -> Result<Device> {
    if !use_gpu {
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0)?;
    if device.is_cpu() {
        warn!("a gpu was requested but cuda is not available, running on the cpu");
    }
    Ok(device)
}
