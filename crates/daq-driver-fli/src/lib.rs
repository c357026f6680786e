//! Finger Lakes Instrumentation Camera Driver (Componentized)
//!
//! Component layout:
//! - Acquisition: exposure sequence, completion polling, readout, abort
//! - Assembly: FITS-style header and bias/trim sections
//! - Cooling: setpoint and telemetry
//! - Keep-alive: liveness probe and reconnect
//! - Connection: libfli binding (feature `fli_hardware`)
//! - Mock: simulated devices (feature `mock`)
//!
//! [`FliCamera`] ties the components to one open camera; [`FliFilterWheel`] does the
//! same for a filter wheel.

pub mod components;
pub mod config;

use crate::components::acquisition::ExposureController;
use crate::components::assembly::{assemble, ReadoutContext};
use crate::components::cooling::CoolingManager;
use crate::components::discovery::select_device;
use crate::components::handle::{share, with_handle, SharedHandle};
use crate::components::keep_alive::{KeepAliveMonitor, Reopen};
use daq_core::camera::{
    validate_window, Binning, CameraStatus, CoolingState, ExposureRequest, StatusCell,
    TemperatureSensor, Window,
};
use daq_core::driver::{CameraHandle, DeviceDescriptor, DeviceKind, FliBackend, FliDevice};
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use daq_core::image::ExposureImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use crate::components::filter_wheel::FliFilterWheel;
pub use crate::config::{FliCameraConfig, FliFilterWheelConfig};

#[cfg(feature = "fli_hardware")]
pub use crate::components::connection::LibFliBackend;
#[cfg(feature = "mock")]
pub use crate::components::mock::{
    MockCameraState, MockFilterWheelState, MockFliBackend, MockOp,
};

/// Camera status plus cooling telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Exposure state
    #[serde(rename = "Status")]
    pub status: CameraStatus,
    /// Cooling section
    #[serde(rename = "Cooling")]
    pub cooling: CoolingState,
}

/// An open FLI camera.
///
/// # Drop Order
///
/// `keep_alive` is stopped and awaited by [`close`](Self::close). Dropping an unclosed
/// session drops the monitor, which cancels its task before the next probe.
pub struct FliCamera {
    backend: Arc<dyn FliBackend>,
    device: DeviceDescriptor,
    config: FliCameraConfig,
    camera: SharedHandle<dyn CameraHandle>,
    status: Arc<StatusCell>,
    controller: ExposureController,
    cooling: CoolingManager,
    geometry: parking_lot::Mutex<(Window, Binning)>,
    keep_alive: tokio::sync::Mutex<Option<KeepAliveMonitor>>,
    closed: AtomicBool,
}

impl FliCamera {
    /// Select and open a camera, read its window and binning, and enable cooling at the
    /// configured setpoint.
    pub async fn open(backend: Arc<dyn FliBackend>, config: FliCameraConfig) -> DaqResult<Self> {
        let (device, handle, geometry) = tokio::task::spawn_blocking({
            let backend = Arc::clone(&backend);
            let config = config.clone();
            move || -> DaqResult<_> {
                let device = select_device(
                    backend.as_ref(),
                    DeviceKind::Camera,
                    config.dev_name.as_deref(),
                    config.dev_path.as_deref(),
                )?;
                tracing::info!(
                    "Opening connection to \"{}\" at {}...",
                    device.name,
                    device.path
                );
                let mut handle = backend.camera(&device)?;
                handle.open()?;
                let geometry = handle.get_window_binning()?;
                Ok((device, handle, geometry))
            }
        })
        .await
        .map_err(|e| {
            DaqError::driver("fli", DriverErrorKind::Unknown, format!("open task failed: {e}"))
        })??;

        let camera = share(handle);
        let status = Arc::new(StatusCell::new());
        let controller = ExposureController::new(
            Arc::clone(&camera),
            Arc::clone(&status),
            config.poll_interval(),
        );
        let cooling = CoolingManager::new(Arc::clone(&camera));

        let session = Self {
            backend,
            device,
            camera,
            status,
            controller,
            cooling,
            geometry: parking_lot::Mutex::new(geometry),
            keep_alive: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        };

        session
            .cooling
            .set_cooling(true, session.config.setpoint)
            .await?;
        Ok(session)
    }

    /// Model name of the camera.
    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// The opened device.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Start the keep-alive monitor. A no-op if it is already running.
    pub async fn start(&self) -> DaqResult<()> {
        self.ensure_open()?;
        let mut slot = self.keep_alive.lock().await;
        if slot.is_none() {
            let backend = Arc::clone(&self.backend);
            let device = self.device.clone();
            let reopen: Reopen<dyn CameraHandle> = Arc::new(move || backend.camera(&device));
            *slot = Some(KeepAliveMonitor::spawn(
                Arc::clone(&self.camera),
                reopen,
                self.config.keep_alive_interval(),
            ));
            tracing::debug!(
                "Keep-alive started for {} every {:?}",
                self.device.path,
                self.config.keep_alive_interval()
            );
        }
        Ok(())
    }

    /// Stop the keep-alive monitor.
    pub async fn stop(&self) {
        if let Some(monitor) = self.keep_alive.lock().await.take() {
            monitor.stop().await;
        }
    }

    /// Number of reconnects performed by the keep-alive monitor since `start`.
    pub async fn reconnects(&self) -> u64 {
        self.keep_alive
            .lock()
            .await
            .as_ref()
            .map_or(0, KeepAliveMonitor::reconnects)
    }

    /// Abort any exposure, stop the keep-alive monitor and close the device.
    ///
    /// Idempotent; every later call on the session fails with
    /// [`DaqError::NotConnected`].
    pub async fn close(&self) -> DaqResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.controller.abort().await;
        self.stop().await;
        tracing::info!("Closing connection to {}", self.device.path);
        with_handle(&self.camera, |cam| cam.close()).await
    }

    /// Current exposure status.
    pub fn get_status(&self) -> CameraStatus {
        self.status.get()
    }

    /// Visible sensor area, queried from the camera.
    pub async fn get_full_frame(&self) -> DaqResult<Window> {
        self.ensure_open()?;
        with_handle(&self.camera, |cam| cam.get_full_frame()).await
    }

    /// Window used for the next exposure.
    pub fn get_window(&self) -> Window {
        self.geometry.lock().0
    }

    /// Binning used for the next exposure.
    pub fn get_binning(&self) -> Binning {
        self.geometry.lock().1
    }

    /// Set the window for later exposures.
    pub fn set_window(&self, window: Window) -> DaqResult<()> {
        self.ensure_idle()?;
        let mut geometry = self.geometry.lock();
        validate_window(&window, &geometry.1)?;
        geometry.0 = window;
        Ok(())
    }

    /// Set the binning for later exposures.
    pub fn set_binning(&self, binning: Binning) -> DaqResult<()> {
        self.ensure_idle()?;
        binning.validate()?;
        let mut geometry = self.geometry.lock();
        validate_window(&geometry.0, &binning)?;
        geometry.1 = binning;
        Ok(())
    }

    /// Snapshot the current window and binning into a request.
    pub fn request(&self, exposure_time_ms: u32, open_shutter: bool) -> ExposureRequest {
        let (window, binning) = *self.geometry.lock();
        ExposureRequest::new(exposure_time_ms, open_shutter, window, binning)
    }

    /// Take one exposure and assemble the image.
    pub async fn expose(&self, request: &ExposureRequest) -> DaqResult<ExposureImage> {
        self.expose_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Take one exposure, aborting with [`DaqError::Aborted`] if `cancel` fires before
    /// readout.
    pub async fn expose_with_cancel(
        &self,
        request: &ExposureRequest,
        cancel: &CancellationToken,
    ) -> DaqResult<ExposureImage> {
        self.ensure_open()?;
        let outcome = self.controller.expose(request, cancel).await?;

        let (ccd_temperature, cooler_power, full_frame) = with_handle(&self.camera, |cam| {
            Ok((
                cam.get_temperature(TemperatureSensor::Ccd)?,
                cam.get_cooler_power()?,
                cam.get_full_frame()?,
            ))
        })
        .await?;

        let ctx = ReadoutContext {
            date_obs: outcome.date_obs,
            request: *request,
            ccd_temperature,
            cooler_power,
            setpoint: self.cooling.setpoint(),
            instrument: self.device.name.clone(),
            full_frame,
        };
        let image = assemble(outcome.frame, &ctx);
        tracing::info!("Readout finished.");
        Ok(image)
    }

    /// Abort the running exposure and wait until the camera is idle.
    pub async fn abort(&self) {
        self.controller.abort().await;
    }

    /// Enable cooling at `setpoint`, or disable it.
    pub async fn set_cooling(&self, enabled: bool, setpoint: f64) -> DaqResult<()> {
        self.ensure_open()?;
        self.cooling.set_cooling(enabled, setpoint).await
    }

    /// Live cooling telemetry.
    pub async fn get_cooling_state(&self) -> DaqResult<CoolingState> {
        self.ensure_open()?;
        self.cooling.get_cooling_state().await
    }

    /// Exposure status and cooling telemetry.
    pub async fn status_report(&self) -> DaqResult<StatusReport> {
        let cooling = self.get_cooling_state().await?;
        Ok(StatusReport {
            status: self.get_status(),
            cooling,
        })
    }

    fn ensure_open(&self) -> DaqResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DaqError::NotConnected);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> DaqResult<()> {
        self.ensure_open()?;
        if self.controller.is_busy() || self.status.get() != CameraStatus::Idle {
            return Err(DaqError::ModuleBusyDuringOperation);
        }
        Ok(())
    }
}
