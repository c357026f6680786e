//! Custom error types for FLI device control.
//!
//! This module defines the primary error type, `DaqError`, shared by the camera and
//! filter-wheel drivers. Using the `thiserror` crate, it provides a centralized and
//! consistent way to report the different ways an exposure or a device call can fail.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceNotFound`**: No device of the requested kind was enumerated at open time.
//! - **`Driver`**: Any failure reported by a driver handle call (SDK error code,
//!   lost USB connection, short row read). Carries a [`DriverError`] with a
//!   [`DriverErrorKind`] so callers and the keep-alive monitor can tell a
//!   communication failure from a hardware fault.
//! - **`Aborted`**: The exposure was cancelled mid-flight. Not a failure of the
//!   system, but a distinguishable outcome that is never conflated with success.
//! - **`Configuration`**: Invalid window, binning, exposure or filter values. Always
//!   raised before any hardware call is made.
//! - **`ModuleBusyDuringOperation`**: A configuration setter was called while an
//!   exposure was in flight.
//! - **`NotConnected`**: The session was closed.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Classification of a driver-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Loading the SDK or opening the device failed.
    Initialization,
    /// The device stopped answering (unplugged, stale handle).
    Communication,
    /// The device answered with an error code.
    Hardware,
    /// The device rejected a parameter.
    InvalidParameter,
    /// Anything else, including a panicked blocking task.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A failure reported by a driver handle call.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error (e.g. "fli", "mock_fli").
    pub driver_type: String,
    /// Failure classification.
    pub kind: DriverErrorKind,
    /// Human-readable message, including the SDK error code when there is one.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the driver error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for FLI device control.
///
/// # Error Categories
///
/// 1. **Open-time errors** - `DeviceNotFound`, `Driver` with kind `Initialization`
///    - Reported once, the session is never constructed
///    - Recovery: connect hardware / install libfli and open again
///
/// 2. **Runtime hardware errors** - `Driver`
///    - Fail the current operation (for an exposure: the whole exposure)
///    - Recovery: none required from the caller, the keep-alive monitor reopens
///      lost connections on its next tick
///
/// 3. **Caller errors** - `Configuration`, `ModuleBusyDuringOperation`, `NotConnected`
///    - Rejected before touching hardware
///
/// 4. **Cancellation** - `Aborted`
#[derive(Error, Debug)]
pub enum DaqError {
    /// No device of the requested kind is attached.
    #[error("No FLI {0} found")]
    DeviceNotFound(String),

    /// A driver handle call failed.
    #[error("{0}")]
    Driver(#[from] DriverError),

    /// The exposure was aborted before readout.
    #[error("Exposure aborted")]
    Aborted,

    /// Invalid caller-supplied values.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_binning(x: u32) -> Result<(), DaqError> {
    ///     if x == 0 {
    ///         return Err(DaqError::Configuration("binning must be >= 1".into()));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A setter was called while an exposure was running.
    #[error("Module is busy during operation")]
    ModuleBusyDuringOperation,

    /// The session has been closed.
    #[error("Device is not connected")]
    NotConnected,
}

impl DaqError {
    /// Shorthand for a driver error.
    pub fn driver(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        DaqError::Driver(DriverError::new(driver_type, kind, message))
    }

    /// Whether this error came from a device call.
    pub fn is_device_error(&self) -> bool {
        matches!(self, DaqError::Driver(_))
    }

    /// Whether this error reports a cancelled exposure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, DaqError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display_includes_kind() {
        let err = DaqError::driver("fli", DriverErrorKind::Communication, "FLIGetModel: error -19");
        assert_eq!(
            err.to_string(),
            "Driver 'fli' communication error: FLIGetModel: error -19"
        );
        assert!(err.is_device_error());
        assert!(!err.is_aborted());
    }

    #[test]
    fn aborted_is_distinguishable() {
        assert!(DaqError::Aborted.is_aborted());
        assert!(!DaqError::Aborted.is_device_error());
    }
}
