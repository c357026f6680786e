//! Camera data model: geometry, exposure requests, status and cooling telemetry.

use crate::error::{DaqError, DaqResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// A rectangular region on the sensor, in unbinned pixels.
///
/// Used both for the readout window and for the camera's full-frame geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// X offset of the upper-left corner
    pub left: i32,
    /// Y offset of the upper-left corner
    pub top: i32,
    /// Width in unbinned pixels
    pub width: u32,
    /// Height in unbinned pixels
    pub height: u32,
}

impl Window {
    /// Create a new window.
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }
}

/// On-chip binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    /// Horizontal binning factor
    pub x: u32,
    /// Vertical binning factor
    pub y: u32,
}

impl Binning {
    /// Create new binning factors.
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Reject non-positive factors.
    pub fn validate(&self) -> DaqResult<()> {
        if self.x == 0 || self.y == 0 {
            return Err(DaqError::Configuration(format!(
                "binning must be >= 1 on both axes, got {}x{}",
                self.x, self.y
            )));
        }
        Ok(())
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

/// Binned readout dimensions for a window: `floor(width / bin_x) x floor(height / bin_y)`.
///
/// Callers must validate the binning first.
pub fn readout_size(window: &Window, binning: &Binning) -> (u32, u32) {
    (window.width / binning.x, window.height / binning.y)
}

/// Parameters of a single exposure.
///
/// The window and binning are a snapshot of the camera configuration taken when the
/// request was built; changing the camera configuration afterwards does not affect
/// an exposure already using this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRequest {
    /// Exposure time in milliseconds
    pub exposure_time_ms: u32,
    /// Open the shutter (light frame) or keep it closed (dark/bias frame)
    pub open_shutter: bool,
    /// Readout window
    pub window: Window,
    /// Binning factors
    pub binning: Binning,
}

impl ExposureRequest {
    /// Create a new exposure request.
    pub fn new(exposure_time_ms: u32, open_shutter: bool, window: Window, binning: Binning) -> Self {
        Self {
            exposure_time_ms,
            open_shutter,
            window,
            binning,
        }
    }

    /// Exposure time in seconds, as written to the EXPTIME header.
    pub fn exposure_time_secs(&self) -> f64 {
        self.exposure_time_ms as f64 / 1000.0
    }

    /// Binned readout dimensions.
    pub fn readout_size(&self) -> (u32, u32) {
        readout_size(&self.window, &self.binning)
    }

    /// Check binning and window before any hardware is touched.
    pub fn validate(&self) -> DaqResult<()> {
        self.binning.validate()?;
        validate_window(&self.window, &self.binning)
    }
}

/// A window must cover at least one binned pixel on each axis.
pub fn validate_window(window: &Window, binning: &Binning) -> DaqResult<()> {
    if window.width < binning.x || window.height < binning.y {
        return Err(DaqError::Configuration(format!(
            "window {}x{} is smaller than binning {}x{}",
            window.width, window.height, binning.x, binning.y
        )));
    }
    Ok(())
}

/// Current activity of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CameraStatus {
    /// No exposure in progress
    Idle = 0,
    /// Integrating
    Exposing = 1,
    /// Reading rows off the sensor
    Readout = 2,
}

impl CameraStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CameraStatus::Exposing,
            2 => CameraStatus::Readout,
            _ => CameraStatus::Idle,
        }
    }

    /// Upper-case name as reported in status dictionaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Idle => "IDLE",
            CameraStatus::Exposing => "EXPOSING",
            CameraStatus::Readout => "READOUT",
        }
    }
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single authoritative status value for one camera.
///
/// Reads never block; writes are only issued by the exposure controller.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// Create a cell in the `Idle` state.
    pub fn new() -> Self {
        Self(AtomicU8::new(CameraStatus::Idle as u8))
    }

    /// Current status.
    pub fn get(&self) -> CameraStatus {
        CameraStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replace the status, returning the previous value.
    pub fn set(&self, status: CameraStatus) -> CameraStatus {
        CameraStatus::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Temperature sensor on an FLI camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureSensor {
    /// CCD (internal) sensor
    Ccd,
    /// Camera base (external) sensor
    Base,
}

/// Measured temperatures in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    /// CCD temperature
    #[serde(rename = "CCD")]
    pub ccd: f64,
    /// Base temperature
    #[serde(rename = "Base")]
    pub base: f64,
}

/// Live cooling telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoolingState {
    /// Whether a cooling setpoint is active
    #[serde(rename = "Enabled")]
    pub enabled: bool,
    /// Active setpoint in degrees Celsius, `None` when cooling is off
    #[serde(rename = "SetPoint")]
    pub setpoint: Option<f64>,
    /// Cooler power in percent
    #[serde(rename = "Power")]
    pub power: f64,
    /// Measured temperatures
    #[serde(rename = "Temperatures")]
    pub temperatures: Temperatures,
}
