//! Device configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of an FLI camera session.
///
/// # Example
///
/// ```toml
/// [camera]
/// dev_name = "MicroLine ML16803"
/// setpoint = -25.0
/// keep_alive_secs = 10
/// poll_interval_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FliCameraConfig {
    /// Model name to open; first device if unset
    pub dev_name: Option<String>,
    /// Device path to open; first device if unset
    pub dev_path: Option<String>,
    /// Cooling setpoint applied at open, in degrees Celsius
    pub setpoint: f64,
    /// Keep-alive probe interval in seconds
    pub keep_alive_secs: u64,
    /// Interval between exposure completion polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for FliCameraConfig {
    fn default() -> Self {
        Self {
            dev_name: None,
            dev_path: None,
            setpoint: -20.0,
            keep_alive_secs: 10,
            poll_interval_ms: 200,
        }
    }
}

impl FliCameraConfig {
    /// Keep-alive probe interval.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Exposure poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration of an FLI filter wheel session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FliFilterWheelConfig {
    /// Model name to open; first device if unset
    pub dev_name: Option<String>,
    /// Device path to open; first device if unset
    pub dev_path: Option<String>,
    /// Keep-alive probe interval in seconds
    pub keep_alive_secs: u64,
    /// Filter names by slot
    pub filter_names: Vec<String>,
}

impl Default for FliFilterWheelConfig {
    fn default() -> Self {
        Self {
            dev_name: None,
            dev_path: None,
            keep_alive_secs: 10,
            filter_names: Vec::new(),
        }
    }
}

impl FliFilterWheelConfig {
    /// Keep-alive probe interval.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}
