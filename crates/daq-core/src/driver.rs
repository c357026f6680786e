//! Driver handle traits for FLI devices.
//!
//! A driver handle is the thin, synchronous boundary to the vendor SDK. Every call
//! blocks until the SDK returns, so async callers run them under
//! `tokio::task::spawn_blocking` while holding the handle's mutex.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ FliBackend (enumeration + handle construction)       │
//! │   ├── libfli binding   (feature "fli_hardware")      │
//! │   └── simulated devices (feature "mock")             │
//! └──────────────────────────────────────────────────────┘
//!                │ camera() / filter_wheel()
//!                ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ Box<dyn CameraHandle> / Box<dyn FilterWheelHandle>   │
//! │   both extend FliDevice (open, close, get_model)     │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::camera::{Binning, TemperatureSensor, Window};
use crate::error::DaqResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of device to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// CCD camera
    Camera,
    /// Filter wheel
    FilterWheel,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Camera => f.write_str("camera"),
            DeviceKind::FilterWheel => f.write_str("filter wheel"),
        }
    }
}

/// An enumerated device that can be opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Model name reported during enumeration
    pub name: String,
    /// Device file path, e.g. `/dev/fliusb0`
    pub path: String,
    /// Device kind
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    /// Create a new descriptor.
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
        }
    }
}

/// Calls shared by every FLI device.
pub trait FliDevice: Send {
    /// Open the connection. Opening an already open handle is an error.
    fn open(&mut self) -> DaqResult<()>;

    /// Close the connection. Closing a closed handle is a no-op.
    fn close(&mut self) -> DaqResult<()>;

    /// The device this handle talks to.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Model string. Used as the liveness probe.
    fn get_model(&mut self) -> DaqResult<String>;
}

/// Camera-specific SDK calls.
pub trait CameraHandle: FliDevice {
    /// Set horizontal and vertical binning.
    fn set_binning(&mut self, x: u32, y: u32) -> DaqResult<()>;

    /// Set the image area. `width` and `height` are in binned pixels, the origin is
    /// absolute.
    fn set_window(&mut self, left: i32, top: i32, width: u32, height: u32) -> DaqResult<()>;

    /// Prepare the next frame as a light (shutter open) or dark frame.
    fn init_exposure(&mut self, open_shutter: bool) -> DaqResult<()>;

    /// Set the exposure time in milliseconds.
    fn set_exposure_time(&mut self, ms: u32) -> DaqResult<()>;

    /// Start integrating.
    fn start_exposure(&mut self) -> DaqResult<()>;

    /// Whether the exposure has finished and data is ready to be read.
    fn is_exposure_finished(&mut self) -> DaqResult<bool>;

    /// Cancel the running exposure.
    fn cancel_exposure(&mut self) -> DaqResult<()>;

    /// Read the next row of `width` samples.
    fn grab_row(&mut self, width: u32) -> DaqResult<Vec<u16>>;

    /// Read a temperature in degrees Celsius.
    fn get_temperature(&mut self, sensor: TemperatureSensor) -> DaqResult<f64>;

    /// Cooler power in percent.
    fn get_cooler_power(&mut self) -> DaqResult<f64>;

    /// Set the cooling setpoint in degrees Celsius.
    fn set_temperature(&mut self, celsius: f64) -> DaqResult<()>;

    /// Visible area of the sensor, in unbinned pixels.
    fn get_full_frame(&mut self) -> DaqResult<Window>;

    /// Current readout window (unbinned) and binning.
    fn get_window_binning(&mut self) -> DaqResult<(Window, Binning)>;
}

/// Filter-wheel-specific SDK calls.
pub trait FilterWheelHandle: FliDevice {
    /// Number of filter slots.
    fn get_filter_count(&mut self) -> DaqResult<u32>;

    /// Move to a slot.
    fn set_filter_pos(&mut self, position: u32) -> DaqResult<()>;

    /// Current slot.
    fn get_filter_pos(&mut self) -> DaqResult<u32>;
}

/// Enumerates devices and constructs unopened handles for them.
pub trait FliBackend: Send + Sync {
    /// Backend name used in log and error messages.
    fn name(&self) -> &'static str;

    /// All attached devices of a kind.
    fn list_devices(&self, kind: DeviceKind) -> DaqResult<Vec<DeviceDescriptor>>;

    /// A new, unopened camera handle.
    fn camera(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn CameraHandle>>;

    /// A new, unopened filter-wheel handle.
    fn filter_wheel(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn FilterWheelHandle>>;
}
