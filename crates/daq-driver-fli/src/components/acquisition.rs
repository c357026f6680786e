//! FLI Exposure Control
//!
//! Drives one exposure through configuration, trigger, completion polling and
//! row-by-row readout.
//!
//! ## Sequence
//!
//! ```text
//! set_binning ─► set_window ─► [Exposing] init_exposure ─► set_exposure_time
//!     ─► start_exposure ─► poll is_exposure_finished ─► [Readout] grab_row × height
//!     ─► [Idle]
//! ```
//!
//! ## Abort
//!
//! Each exposure registers a cancellation token (a child of the caller's token) and a
//! `settled` token. [`ExposureController::abort`] cancels the former and waits for the
//! latter. Cleanup lives in a drop guard owned by the exposing task, so the hardware
//! cancel and the Idle reset run exactly once no matter whether the exposure was
//! aborted, cancelled by the caller, failed, or had its future dropped. When the
//! future is dropped mid-integration the guard hands the exposure lock to the spawned
//! hardware cancel, so the next exposure cannot start before it.
//!
//! Once readout has started the frame is already integrated; cancellation is no
//! longer observed and the exposure completes normally.

use crate::components::assembly::DATE_OBS_FORMAT;
use crate::components::handle::{with_handle, SharedHandle};
use daq_core::camera::{CameraStatus, ExposureRequest, StatusCell};
use daq_core::data::RawFrame;
use daq_core::driver::CameraHandle;
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

/// Default interval between completion polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Result of a successful exposure.
#[derive(Debug, Clone)]
pub struct ExposureOutcome {
    /// Raw pixels
    pub frame: RawFrame,
    /// UTC start of exposure
    pub date_obs: String,
}

struct InFlight {
    cancel: CancellationToken,
    settled: CancellationToken,
}

/// Runs exposures on one camera, one at a time.
pub struct ExposureController {
    camera: SharedHandle<dyn CameraHandle>,
    status: Arc<StatusCell>,
    exposure_lock: Arc<tokio::sync::Mutex<()>>,
    in_flight: parking_lot::Mutex<Option<InFlight>>,
    poll_interval: Duration,
}

impl ExposureController {
    /// Create a controller for a shared camera handle.
    pub fn new(
        camera: SharedHandle<dyn CameraHandle>,
        status: Arc<StatusCell>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            camera,
            status,
            exposure_lock: Arc::new(tokio::sync::Mutex::new(())),
            in_flight: parking_lot::Mutex::new(None),
            poll_interval,
        }
    }

    /// Current camera status.
    pub fn status(&self) -> CameraStatus {
        self.status.get()
    }

    /// Whether an exposure is registered and not yet settled.
    pub fn is_busy(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Expose and read out one frame.
    ///
    /// A second call waits until the running exposure has finished. Returns
    /// [`DaqError::Aborted`] if `cancel` fires or [`abort`](Self::abort) is called
    /// before readout starts.
    pub async fn expose(
        &self,
        request: &ExposureRequest,
        cancel: &CancellationToken,
    ) -> DaqResult<ExposureOutcome> {
        request.validate()?;

        let serial = Arc::clone(&self.exposure_lock).lock_owned().await;
        if cancel.is_cancelled() {
            return Err(DaqError::Aborted);
        }

        let token = cancel.child_token();
        let settled = CancellationToken::new();
        *self.in_flight.lock() = Some(InFlight {
            cancel: token.clone(),
            settled: settled.clone(),
        });
        let mut scope = ExposureScope {
            controller: self,
            settled,
            serial: Some(serial),
            hardware_active: false,
        };

        self.configure(request).await?;

        self.status.set(CameraStatus::Exposing);
        let (open_shutter, ms) = (request.open_shutter, request.exposure_time_ms);
        with_handle(&self.camera, move |cam| {
            cam.init_exposure(open_shutter)?;
            cam.set_exposure_time(ms)
        })
        .await?;

        tracing::info!(
            "Starting exposure with {} shutter for {:.2} seconds...",
            if open_shutter { "open" } else { "closed" },
            request.exposure_time_secs()
        );
        let date_obs = chrono::Utc::now().format(DATE_OBS_FORMAT).to_string();
        with_handle(&self.camera, |cam| cam.start_exposure()).await?;
        scope.hardware_active = true;

        self.wait_for_exposure(&token, &mut scope).await?;

        tracing::info!("Exposure finished, reading out...");
        self.status.set(CameraStatus::Readout);
        let frame = self.read_frame(request).await;
        scope.hardware_active = false;
        let frame = frame?;

        self.status.set(CameraStatus::Idle);
        Ok(ExposureOutcome { frame, date_obs })
    }

    /// Abort the running exposure and wait until it has settled.
    ///
    /// A no-op when no exposure is in flight.
    pub async fn abort(&self) {
        let pending = self
            .in_flight
            .lock()
            .as_ref()
            .map(|f| (f.cancel.clone(), f.settled.clone()));
        if let Some((cancel, settled)) = pending {
            tracing::info!("Aborting exposure...");
            cancel.cancel();
            settled.cancelled().await;
        }
    }

    async fn configure(&self, request: &ExposureRequest) -> DaqResult<()> {
        let (window, binning) = (request.window, request.binning);
        let (width, height) = request.readout_size();
        tracing::info!("Set binning to {}x{}.", binning.x, binning.y);
        tracing::info!(
            "Set window to {}x{} (binned {}x{}) at {},{}.",
            window.width,
            window.height,
            width,
            height,
            window.left,
            window.top
        );
        with_handle(&self.camera, move |cam| {
            cam.set_binning(binning.x, binning.y)?;
            cam.set_window(window.left, window.top, width, height)
        })
        .await
    }

    async fn wait_for_exposure(
        &self,
        token: &CancellationToken,
        scope: &mut ExposureScope<'_>,
    ) -> DaqResult<()> {
        loop {
            if token.is_cancelled() {
                if let Err(e) = with_handle(&self.camera, |cam| cam.cancel_exposure()).await {
                    tracing::warn!("Failed to cancel exposure: {}", e);
                }
                scope.hardware_active = false;
                self.status.set(CameraStatus::Idle);
                tracing::info!("Exposure aborted");
                return Err(DaqError::Aborted);
            }

            if with_handle(&self.camera, |cam| cam.is_exposure_finished()).await? {
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn read_frame(&self, request: &ExposureRequest) -> DaqResult<RawFrame> {
        let (width, height) = request.readout_size();
        with_handle(&self.camera, move |cam| {
            let mut pixels = Vec::with_capacity(width as usize * height as usize);
            for row in 0..height {
                let samples = cam.grab_row(width)?;
                if samples.len() != width as usize {
                    return Err(DaqError::driver(
                        "fli",
                        DriverErrorKind::Hardware,
                        format!(
                            "row {} returned {} samples, expected {}",
                            row,
                            samples.len(),
                            width
                        ),
                    ));
                }
                pixels.extend_from_slice(&samples);
            }
            tracing::debug!("Read {} rows of {} pixels", height, width);
            RawFrame::from_u16(width, height, pixels).ok_or_else(|| {
                DaqError::driver(
                    "fli",
                    DriverErrorKind::Unknown,
                    "frame buffer does not match readout size",
                )
            })
        })
        .await
    }
}

/// Cleanup for one exposure, run on every exit path.
struct ExposureScope<'a> {
    controller: &'a ExposureController,
    settled: CancellationToken,
    serial: Option<OwnedMutexGuard<()>>,
    hardware_active: bool,
}

impl Drop for ExposureScope<'_> {
    fn drop(&mut self) {
        let controller = self.controller;
        controller.in_flight.lock().take();

        if self.hardware_active {
            // exposure future dropped or failed mid-integration
            let camera = Arc::clone(&controller.camera);
            let serial = self.serial.take();
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                        if let Err(e) = with_handle(&camera, |cam| cam.cancel_exposure()).await {
                            tracing::warn!("Failed to cancel exposure: {}", e);
                        }
                        drop(serial);
                    });
                }
                Err(_) => tracing::warn!("No runtime available to cancel exposure"),
            }
        }

        controller.status.set(CameraStatus::Idle);
        self.settled.cancel();
    }
}
