//! Engine construction helpers.

use pixelscope_core::{EngineConfig, Result, StatsError};
use pixelscope_render::{SoftwareDevice, StatsEngine, WgpuDevice};
use pollster::FutureExt;

/// Creates an engine on the first available GPU adapter, without a window.
///
/// # Example
/// ```no_run
/// use pixelscope_rs::*;
///
/// let engine = create_headless_engine(EngineConfig::default()).unwrap();
/// assert!(!engine.is_degraded());
/// ```
pub fn create_headless_engine(config: EngineConfig) -> Result<StatsEngine<WgpuDevice>> {
    let device = WgpuDevice::new_headless().block_on().map_err(|e| {
        StatsError::Device(format!("Failed to create headless device: {e}"))
    })?;
    let engine = StatsEngine::new(device, config)?;
    log::info!("pixelscope-rs headless engine initialized");
    Ok(engine)
}

/// Creates an engine on the host-executed device.
pub fn create_software_engine(config: EngineConfig) -> Result<StatsEngine<SoftwareDevice>> {
    StatsEngine::new(SoftwareDevice::new(), config)
}
