//! Device selection.

use daq_core::driver::{DeviceDescriptor, DeviceKind, FliBackend};
use daq_core::error::{DaqError, DaqResult};

/// Pick the device to open.
///
/// If `dev_name` or `dev_path` is given, the first descriptor matching every given
/// value wins. Otherwise, or if nothing matches, the first enumerated device is used.
pub fn select_device(
    backend: &dyn FliBackend,
    kind: DeviceKind,
    dev_name: Option<&str>,
    dev_path: Option<&str>,
) -> DaqResult<DeviceDescriptor> {
    let devices = backend.list_devices(kind)?;
    tracing::debug!("Found {} FLI {} device(s)", devices.len(), kind);

    if dev_name.is_some() || dev_path.is_some() {
        let matching = devices.iter().find(|d| {
            dev_name.map_or(true, |n| d.name == n) && dev_path.map_or(true, |p| d.path == p)
        });
        match matching {
            Some(d) => return Ok(d.clone()),
            None => tracing::warn!(
                "No FLI {} matches name={:?} path={:?}, using first one found",
                kind,
                dev_name,
                dev_path
            ),
        }
    }

    devices
        .into_iter()
        .next()
        .ok_or_else(|| DaqError::DeviceNotFound(kind.to_string()))
}
