//! Cooling control and telemetry.

use crate::components::handle::{with_handle, SharedHandle};
use daq_core::camera::{CoolingState, TemperatureSensor, Temperatures};
use daq_core::driver::CameraHandle;
use daq_core::error::{DaqError, DaqResult};

/// Setpoint forwarded to the cooler when cooling is disabled.
pub const COOLING_OFF_SETPOINT: f64 = 20.0;

/// Accepted setpoint range in degrees Celsius.
pub const SETPOINT_RANGE: (f64, f64) = (-100.0, 50.0);

/// Reject setpoints the cooler cannot be asked for.
pub fn validate_setpoint(setpoint: f64) -> DaqResult<()> {
    let (min, max) = SETPOINT_RANGE;
    if !setpoint.is_finite() || setpoint < min || setpoint > max {
        return Err(DaqError::Configuration(format!(
            "cooling setpoint {} outside {}..{} C",
            setpoint, min, max
        )));
    }
    Ok(())
}

/// Owns the active setpoint of one camera. Measured values are always read from the
/// hardware.
pub struct CoolingManager {
    camera: SharedHandle<dyn CameraHandle>,
    setpoint: parking_lot::Mutex<Option<f64>>,
}

impl CoolingManager {
    /// Create a manager with cooling off.
    pub fn new(camera: SharedHandle<dyn CameraHandle>) -> Self {
        Self {
            camera,
            setpoint: parking_lot::Mutex::new(None),
        }
    }

    /// Active setpoint, `None` when cooling is disabled.
    pub fn setpoint(&self) -> Option<f64> {
        *self.setpoint.lock()
    }

    /// Enable cooling at `setpoint`, or disable it.
    ///
    /// Disabling forwards [`COOLING_OFF_SETPOINT`] to the cooler and clears the active
    /// setpoint. The recorded setpoint only changes once the hardware accepted it.
    pub async fn set_cooling(&self, enabled: bool, setpoint: f64) -> DaqResult<()> {
        let target = if enabled {
            validate_setpoint(setpoint)?;
            tracing::info!("Enabling cooling with a setpoint of {:.2}°C...", setpoint);
            setpoint
        } else {
            tracing::info!(
                "Disabling cooling and setting setpoint to {}°C...",
                COOLING_OFF_SETPOINT
            );
            COOLING_OFF_SETPOINT
        };

        with_handle(&self.camera, move |cam| cam.set_temperature(target)).await?;
        *self.setpoint.lock() = enabled.then_some(setpoint);
        Ok(())
    }

    /// Live cooling telemetry.
    pub async fn get_cooling_state(&self) -> DaqResult<CoolingState> {
        let (power, ccd, base) = with_handle(&self.camera, |cam| {
            Ok((
                cam.get_cooler_power()?,
                cam.get_temperature(TemperatureSensor::Ccd)?,
                cam.get_temperature(TemperatureSensor::Base)?,
            ))
        })
        .await?;

        let setpoint = self.setpoint();
        Ok(CoolingState {
            enabled: setpoint.is_some(),
            setpoint,
            power,
            temperatures: Temperatures { ccd, base },
        })
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::components::handle::share;
    use crate::components::mock::{MockCameraHandle, MockCameraState, MockOp};
    use daq_core::driver::FliDevice;
    use std::sync::Arc;

    fn manager(state: &Arc<MockCameraState>) -> CoolingManager {
        let mut handle = MockCameraHandle::new(Arc::clone(state));
        handle.open().unwrap();
        CoolingManager::new(share(Box::new(handle) as Box<dyn CameraHandle>))
    }

    #[tokio::test]
    async fn disabling_forwards_twenty_degrees() {
        let state = MockCameraState::shared_default();
        let cooling = manager(&state);

        cooling.set_cooling(true, -20.0).await.unwrap();
        assert_eq!(cooling.setpoint(), Some(-20.0));

        cooling.set_cooling(false, -20.0).await.unwrap();
        assert_eq!(state.hardware_setpoint(), 20.0);
        assert_eq!(state.setpoint_history(), vec![-20.0, 20.0]);

        let st = cooling.get_cooling_state().await.unwrap();
        assert!(!st.enabled);
        assert_eq!(st.setpoint, None);
    }

    #[tokio::test]
    async fn state_is_read_live() {
        let state = MockCameraState::shared_default();
        let cooling = manager(&state);
        cooling.set_cooling(true, -10.0).await.unwrap();

        let st = cooling.get_cooling_state().await.unwrap();
        assert!(st.enabled);
        assert_eq!(st.setpoint, Some(-10.0));
        assert_eq!(st.temperatures.ccd, -10.0);
        assert_eq!(st.temperatures.base, 20.0);
        assert!(st.power > 0.0);
    }

    #[tokio::test]
    async fn failed_set_keeps_previous_setpoint() {
        let state = MockCameraState::shared_default();
        let cooling = manager(&state);
        cooling.set_cooling(true, -20.0).await.unwrap();

        state.fail_next(MockOp::SetTemperature, 1);
        let err = cooling.set_cooling(true, -30.0).await.unwrap_err();
        assert!(err.is_device_error());
        assert_eq!(cooling.setpoint(), Some(-20.0));
    }

    #[tokio::test]
    async fn rejects_out_of_range_setpoint() {
        let state = MockCameraState::shared_default();
        let cooling = manager(&state);
        for bad in [f64::NAN, -150.0, 80.0] {
            let err = cooling.set_cooling(true, bad).await.unwrap_err();
            assert!(matches!(err, DaqError::Configuration(_)));
        }
        assert!(state.setpoint_history().is_empty());
    }
}
