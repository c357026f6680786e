//! FLI filter wheel session.
//!
//! Maps configured filter names onto wheel slots. Slot `i` carries
//! `filter_names[i]`.

use crate::components::discovery::select_device;
use crate::components::handle::{share, with_handle, SharedHandle};
use crate::components::keep_alive::{KeepAliveMonitor, Reopen};
use crate::config::FliFilterWheelConfig;
use daq_core::driver::{DeviceDescriptor, DeviceKind, FilterWheelHandle, FliBackend, FliDevice};
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use daq_core::image::FitsHeader;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An open filter wheel.
pub struct FliFilterWheel {
    device: DeviceDescriptor,
    config: FliFilterWheelConfig,
    backend: Arc<dyn FliBackend>,
    wheel: SharedHandle<dyn FilterWheelHandle>,
    filter_count: u32,
    keep_alive: tokio::sync::Mutex<Option<KeepAliveMonitor>>,
    closed: AtomicBool,
}

impl FliFilterWheel {
    /// Select, open and query the filter wheel described by `config`.
    pub async fn open(
        backend: Arc<dyn FliBackend>,
        config: FliFilterWheelConfig,
    ) -> DaqResult<Self> {
        validate_filter_names(&config.filter_names)?;

        let (device, wheel, filter_count) = tokio::task::spawn_blocking({
            let backend = Arc::clone(&backend);
            let config = config.clone();
            move || -> DaqResult<_> {
                let device = select_device(
                    backend.as_ref(),
                    DeviceKind::FilterWheel,
                    config.dev_name.as_deref(),
                    config.dev_path.as_deref(),
                )?;
                tracing::info!(
                    "Opening connection to \"{}\" at {}...",
                    device.name,
                    device.path
                );
                let mut wheel = backend.filter_wheel(&device)?;
                wheel.open()?;
                let count = wheel.get_filter_count()?;
                Ok((device, wheel, count))
            }
        })
        .await
        .map_err(|e| {
            DaqError::driver("fli", DriverErrorKind::Unknown, format!("open task failed: {e}"))
        })??;

        if config.filter_names.len() as u32 > filter_count {
            tracing::warn!(
                "{} filter names configured but wheel has only {} slots",
                config.filter_names.len(),
                filter_count
            );
        }

        Ok(Self {
            device,
            config,
            backend,
            wheel: share(wheel),
            filter_count,
            keep_alive: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Model name of the wheel.
    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Number of slots reported by the wheel.
    pub fn filter_count(&self) -> u32 {
        self.filter_count
    }

    /// Configured filter names.
    pub fn list_filters(&self) -> &[String] {
        &self.config.filter_names
    }

    /// Move to the slot holding `filter_name`.
    pub async fn set_filter(&self, filter_name: &str) -> DaqResult<()> {
        self.ensure_open()?;
        let position = self
            .config
            .filter_names
            .iter()
            .position(|n| n == filter_name)
            .ok_or_else(|| DaqError::Configuration(format!("unknown filter '{filter_name}'")))?
            as u32;
        if position >= self.filter_count {
            return Err(DaqError::Configuration(format!(
                "filter '{}' is configured for slot {} but the wheel has {} slots",
                filter_name, position, self.filter_count
            )));
        }

        tracing::info!("Changing filter to {}...", filter_name);
        with_handle(&self.wheel, move |w| w.set_filter_pos(position)).await?;
        tracing::info!("Filter changed.");
        Ok(())
    }

    /// Name of the filter currently in the beam.
    pub async fn get_filter(&self) -> DaqResult<String> {
        self.ensure_open()?;
        let position = with_handle(&self.wheel, |w| w.get_filter_pos()).await?;
        self.config
            .filter_names
            .get(position as usize)
            .cloned()
            .ok_or_else(|| {
                DaqError::driver(
                    "fli",
                    DriverErrorKind::Hardware,
                    format!("wheel reports slot {position} which has no filter name"),
                )
            })
    }

    /// Whether the wheel accepts commands.
    pub fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Header cards describing the wheel state.
    pub async fn fits_header(&self) -> DaqResult<FitsHeader> {
        let mut header = FitsHeader::new();
        header.set("FILTER", self.get_filter().await?, "Current filter");
        Ok(header)
    }

    /// Start the keep-alive monitor. A no-op if it is already running.
    pub async fn start(&self) -> DaqResult<()> {
        self.ensure_open()?;
        let mut slot = self.keep_alive.lock().await;
        if slot.is_none() {
            let backend = Arc::clone(&self.backend);
            let device = self.device.clone();
            let reopen: Reopen<dyn FilterWheelHandle> =
                Arc::new(move || backend.filter_wheel(&device));
            *slot = Some(KeepAliveMonitor::spawn(
                Arc::clone(&self.wheel),
                reopen,
                self.config.keep_alive_interval(),
            ));
        }
        Ok(())
    }

    /// Stop the keep-alive monitor.
    pub async fn stop(&self) {
        if let Some(monitor) = self.keep_alive.lock().await.take() {
            monitor.stop().await;
        }
    }

    /// Number of reconnects performed by the keep-alive monitor.
    pub async fn reconnects(&self) -> u64 {
        self.keep_alive
            .lock()
            .await
            .as_ref()
            .map_or(0, KeepAliveMonitor::reconnects)
    }

    /// Stop the keep-alive monitor and close the device. Idempotent.
    pub async fn close(&self) -> DaqResult<()> {
        self.stop().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Closing connection to {}", self.device.path);
        with_handle(&self.wheel, |w| w.close()).await
    }

    fn ensure_open(&self) -> DaqResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DaqError::NotConnected);
        }
        Ok(())
    }
}

/// Filter names must be present and unique.
pub fn validate_filter_names(names: &[String]) -> DaqResult<()> {
    if names.is_empty() {
        return Err(DaqError::Configuration("no filter names configured".into()));
    }
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(DaqError::Configuration(format!(
                "duplicate filter name '{name}'"
            )));
        }
    }
    Ok(())
}
