//! # fli_daq
//!
//! Command-line control of Finger Lakes Instrumentation cameras and filter wheels.
//!
//! The device logic lives in the workspace crates:
//! - `daq-core`: errors, camera data model, image and header types, driver traits
//! - `daq-driver-fli`: camera and filter wheel sessions, libfli binding, simulator
//!
//! This crate adds layered configuration, tracing setup and backend selection for
//! the `fli-daq` binary.

pub mod config;
pub mod tracing_setup;

use anyhow::Result;
use daq_core::driver::FliBackend;
use std::sync::Arc;

pub use daq_core;
pub use daq_driver_fli;

/// Pick the device backend: the simulator when `mock` is set, libfli otherwise.
pub fn select_backend(mock: bool) -> Result<Arc<dyn FliBackend>> {
    if mock {
        return mock_backend();
    }
    hardware_backend()
}

#[cfg(feature = "mock")]
fn mock_backend() -> Result<Arc<dyn FliBackend>> {
    tracing::info!("Using simulated FLI devices");
    Ok(Arc::new(daq_driver_fli::MockFliBackend::new()))
}

#[cfg(not(feature = "mock"))]
fn mock_backend() -> Result<Arc<dyn FliBackend>> {
    anyhow::bail!("Simulated devices are not available; rebuild with --features mock")
}

#[cfg(feature = "fli_hardware")]
fn hardware_backend() -> Result<Arc<dyn FliBackend>> {
    Ok(Arc::new(daq_driver_fli::LibFliBackend::load()?))
}

#[cfg(not(feature = "fli_hardware"))]
fn hardware_backend() -> Result<Arc<dyn FliBackend>> {
    anyhow::bail!("libfli support is not compiled in; rebuild with --features fli_hardware or pass --mock")
}
