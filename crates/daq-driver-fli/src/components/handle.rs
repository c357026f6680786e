//! Shared driver handles.
//!
//! Every SDK call blocks, so it runs on the blocking pool while the caller holds the
//! handle's mutex. The mutex owns the `Box` itself so the keep-alive monitor can swap
//! in a freshly opened handle.

use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A driver handle shared between the session, its controllers and the keep-alive task.
pub type SharedHandle<H> = Arc<Mutex<Box<H>>>;

/// Wrap a handle for sharing.
pub fn share<H: ?Sized>(handle: Box<H>) -> SharedHandle<H> {
    Arc::new(Mutex::new(handle))
}

/// Run `f` against the handle on the blocking pool, holding the lock for its whole
/// duration.
pub async fn with_handle<H, T, F>(handle: &SharedHandle<H>, f: F) -> DaqResult<T>
where
    H: ?Sized + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut Box<H>) -> DaqResult<T> + Send + 'static,
{
    let mut guard = Arc::clone(handle).lock_owned().await;
    tokio::task::spawn_blocking(move || f(&mut *guard))
        .await
        .map_err(|e| {
            DaqError::driver(
                "fli",
                DriverErrorKind::Unknown,
                format!("blocking driver task failed: {e}"),
            )
        })?
}
