//! Shared test utilities for FLI driver integration tests.
//!
//! - `init_tracing`: route driver logs to the test writer
//! - `mock_camera`: open a session on a simulated camera with a fast poll interval
//! - `mock_wheel`: open a filter wheel session on a simulated wheel

#![allow(dead_code)] // Utilities may not all be used in every test file

use daq_driver_fli::{
    FliCamera, FliCameraConfig, FliFilterWheel, FliFilterWheelConfig, MockCameraState,
    MockFilterWheelState, MockFliBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Poll interval used by every test session.
pub const TEST_POLL_MS: u64 = 20;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Camera config with a short poll interval.
pub fn camera_config() -> FliCameraConfig {
    FliCameraConfig {
        poll_interval_ms: TEST_POLL_MS,
        ..FliCameraConfig::default()
    }
}

/// A session on the default simulated camera, plus the simulated device behind it.
pub async fn mock_camera() -> (FliCamera, Arc<MockCameraState>) {
    mock_camera_with(camera_config()).await
}

/// Like [`mock_camera`] with a custom config.
pub async fn mock_camera_with(config: FliCameraConfig) -> (FliCamera, Arc<MockCameraState>) {
    init_tracing();
    let backend = MockFliBackend::new();
    let state = backend.camera_state(0).expect("default backend has a camera");
    let camera = FliCamera::open(Arc::new(backend), config)
        .await
        .expect("open mock camera");
    (camera, state)
}

/// Filter wheel config with UBVRI filters.
pub fn wheel_config() -> FliFilterWheelConfig {
    FliFilterWheelConfig {
        filter_names: ["U", "B", "V", "R", "I"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..FliFilterWheelConfig::default()
    }
}

/// A session on the default simulated filter wheel.
pub async fn mock_wheel(
    config: FliFilterWheelConfig,
) -> (FliFilterWheel, Arc<MockFilterWheelState>) {
    init_tracing();
    let backend = MockFliBackend::new();
    let state = backend
        .filter_wheel_state(0)
        .expect("default backend has a filter wheel");
    let wheel = FliFilterWheel::open(Arc::new(backend), config)
        .await
        .expect("open mock filter wheel");
    (wheel, state)
}

/// Wait until `cond` holds, polling every 5 ms, or fail after `timeout`.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
