//! Connection keep-alive.
//!
//! FLI USB devices drop off the bus now and then; an open handle then fails every call
//! until it is closed and opened again. The monitor probes the handle with `get_model`
//! at a fixed interval and, on failure, swaps in a freshly opened handle for the same
//! device. A failed reopen is retried on the next tick.
//!
//! The probe holds the handle lock for one call only; a running readout holds the lock
//! for its whole duration, so a reopen can never interleave with row reads.
//!
//! Dropping the monitor cancels the task; it does not wait for it to exit.

use crate::components::handle::{with_handle, SharedHandle};
use daq_core::driver::FliDevice;
use daq_core::error::DaqResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default probe interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Creates a new, unopened handle for the monitored device.
pub type Reopen<H> = Arc<dyn Fn() -> DaqResult<Box<H>> + Send + Sync>;

/// A running keep-alive task.
pub struct KeepAliveMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    reconnects: Arc<AtomicU64>,
}

impl KeepAliveMonitor {
    /// Start probing `handle` every `interval`.
    pub fn spawn<H>(handle: SharedHandle<H>, reopen: Reopen<H>, interval: Duration) -> Self
    where
        H: ?Sized + FliDevice + 'static,
    {
        let cancel = CancellationToken::new();
        let reconnects = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let reconnects = Arc::clone(&reconnects);
            async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if probe(&handle, &reopen).await {
                        reconnects.fetch_add(1, Ordering::Relaxed);
                    }
                }
                tracing::debug!("Keep-alive stopped");
            }
        });

        Self {
            cancel,
            task: Some(task),
            reconnects,
        }
    }

    /// Number of successful reconnects so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Keep-alive task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One liveness check. Returns `true` if the handle was replaced.
async fn probe<H>(handle: &SharedHandle<H>, reopen: &Reopen<H>) -> bool
where
    H: ?Sized + FliDevice + 'static,
{
    let err = match with_handle(handle, |dev| dev.get_model()).await {
        Ok(model) => {
            tracing::trace!("Keep-alive ok: {}", model);
            return false;
        }
        Err(e) => e,
    };

    let reopen = Arc::clone(reopen);
    let result = with_handle(handle, move |dev| {
        let path = dev.descriptor().path.clone();
        tracing::warn!("Lost connection to {} ({}), reopening it.", path, err);
        if let Err(e) = dev.close() {
            tracing::debug!("Closing stale handle failed: {}", e);
        }
        let mut fresh = reopen()?;
        fresh.open()?;
        *dev = fresh;
        Ok(path)
    })
    .await;

    match result {
        Ok(path) => {
            tracing::info!("Reconnected to {}", path);
            true
        }
        Err(e) => {
            tracing::error!("Could not reopen device: {}", e);
            false
        }
    }
}
