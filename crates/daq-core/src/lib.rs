//! `daq-core`
//!
//! Core types and traits for FLI camera and filter-wheel control.
//!
//! This crate holds everything the driver crate and the application share: the error
//! type, the camera data model (window, binning, exposure request, status, cooling
//! telemetry), the raw frame and assembled image types, and the driver handle traits
//! that the libfli binding and the simulated devices implement.
//!
//! ## Key Types
//!
//! - [`ExposureRequest`]: Snapshot of everything one exposure needs
//! - [`CameraStatus`]: Idle / Exposing / Readout, held in a lock-free [`StatusCell`]
//! - [`RawFrame`] and [`ExposureImage`]: Readout result and assembled image
//! - [`DaqError`]: Error type shared by every crate in the workspace
//! - [`CameraHandle`], [`FilterWheelHandle`], [`FliBackend`]: Driver boundary

pub mod camera;
pub mod data;
pub mod driver;
pub mod error;
pub mod image;

pub use camera::{
    readout_size, validate_window, Binning, CameraStatus, CoolingState, ExposureRequest,
    StatusCell, TemperatureSensor, Temperatures, Window,
};
pub use data::{FrameStats, RawFrame};
pub use driver::{
    CameraHandle, DeviceDescriptor, DeviceKind, FilterWheelHandle, FliBackend, FliDevice,
};
pub use error::{DaqError, DaqResult, DriverError, DriverErrorKind};
pub use image::{ExposureImage, FitsHeader, HeaderCard, HeaderValue};
