//! Configuration System using Figment
//!
//! Configuration is loaded from, in increasing priority:
//! 1. Built-in defaults
//! 2. `config/fli.toml` (or the file given on the command line)
//! 3. Environment variables prefixed with `FLI_DAQ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use fli_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Cooling setpoint: {}", settings.camera.setpoint);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{bail, Context, Result};
use daq_driver_fli::components::filter_wheel::validate_filter_names;
use daq_driver_fli::{FliCameraConfig, FliFilterWheelConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/fli.toml";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Camera session settings
    pub camera: FliCameraConfig,
    /// Filter wheel session settings; no wheel is opened when absent
    pub filter_wheel: Option<FliFilterWheelConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            camera: FliCameraConfig::default(),
            filter_wheel: None,
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLI_DAQ_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        if !VALID_LEVELS.contains(&self.log_level.as_str()) {
            bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            );
        }

        if self.camera.keep_alive_secs < 1 {
            bail!("camera.keep_alive_secs must be at least 1");
        }
        if !(10..=5000).contains(&self.camera.poll_interval_ms) {
            bail!(
                "Invalid camera.poll_interval_ms {}. Must be 10-5000",
                self.camera.poll_interval_ms
            );
        }

        if let Some(wheel) = &self.filter_wheel {
            if wheel.keep_alive_secs < 1 {
                bail!("filter_wheel.keep_alive_secs must be at least 1");
            }
            validate_filter_names(&wheel.filter_names).context("Invalid filter_wheel")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.camera.setpoint, -20.0);
        assert_eq!(settings.camera.poll_interval_ms, 200);
        assert!(settings.filter_wheel.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
log_level = "debug"

[camera]
dev_name = "MicroLine ML16803"
setpoint = -30.0

[filter_wheel]
filter_names = ["U", "B", "V"]
"#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.camera.dev_name.as_deref(), Some("MicroLine ML16803"));
        assert_eq!(settings.camera.setpoint, -30.0);
        assert_eq!(settings.camera.keep_alive_secs, 10);

        let wheel = settings.filter_wheel.unwrap();
        assert_eq!(wheel.filter_names, vec!["U", "B", "V"]);
        assert_eq!(wheel.keep_alive_secs, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.log_level = "verbose".into();
        assert!(settings.validate().is_err());
        settings.log_level = "warn".into();

        settings.camera.poll_interval_ms = 5;
        assert!(settings.validate().is_err());
        settings.camera.poll_interval_ms = 200;

        settings.camera.keep_alive_secs = 0;
        assert!(settings.validate().is_err());
        settings.camera.keep_alive_secs = 10;

        settings.filter_wheel = Some(FliFilterWheelConfig {
            filter_names: vec!["R".into(), "R".into()],
            ..FliFilterWheelConfig::default()
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let file = write_config("log_level = \"loud\"\n");
        assert!(Settings::load_from(file.path()).is_err());
    }
}
