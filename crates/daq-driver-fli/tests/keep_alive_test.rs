//! Keep-alive monitor tests (mock mode)
//!
//! - a dropped connection is replaced by a freshly opened handle
//! - failing reopens are retried on every tick until one succeeds
//! - the monitor never touches camera status and stops promptly
//! - probes running during an exposure leave the frame intact
//! - dropping the monitor or an unclosed session ends the task

#![cfg(feature = "mock")]

mod common;

use common::{camera_config, mock_camera_with, mock_wheel, wheel_config};
use daq_core::camera::{Binning, CameraStatus, ExposureRequest, StatusCell, Window};
use daq_core::data::RawFrame;
use daq_core::driver::{CameraHandle, FliDevice};
use daq_core::error::DaqResult;
use daq_driver_fli::components::acquisition::ExposureController;
use daq_driver_fli::components::handle::{share, with_handle, SharedHandle};
use daq_driver_fli::components::keep_alive::{KeepAliveMonitor, Reopen};
use daq_driver_fli::components::mock::MockCameraHandle;
use daq_driver_fli::{FliCameraConfig, FliFilterWheelConfig, MockCameraState, MockOp};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_millis(25);

fn open_handle(state: &Arc<MockCameraState>) -> SharedHandle<dyn CameraHandle> {
    let mut handle = MockCameraHandle::new(Arc::clone(state));
    handle.open().unwrap();
    share(Box::new(handle))
}

fn reopen_for(state: &Arc<MockCameraState>) -> Reopen<dyn CameraHandle> {
    let state = Arc::clone(state);
    Arc::new(move || -> DaqResult<Box<dyn CameraHandle>> {
        Ok(Box::new(MockCameraHandle::new(Arc::clone(&state))))
    })
}

fn assert_open_shutter_pattern(frame: &RawFrame) {
    for y in 0..frame.height {
        for x in 0..frame.width {
            let expected = 100 + ((x + y) % 4096) as u16;
            assert_eq!(frame.get(x, y), Some(expected), "pixel ({x}, {y})");
        }
    }
}

#[tokio::test]
async fn healthy_handle_is_left_alone() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let handle = open_handle(&state);

    let monitor = KeepAliveMonitor::spawn(Arc::clone(&handle), reopen_for(&state), TICK);
    tokio::time::sleep(TICK * 4).await;
    assert!(monitor.is_running());
    assert_eq!(monitor.reconnects(), 0);
    monitor.stop().await;

    assert_eq!(state.opens(), 1);
    assert_eq!(state.closes(), 0);
}

#[tokio::test]
async fn dropped_connection_is_reopened() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let handle = open_handle(&state);
    let monitor = KeepAliveMonitor::spawn(Arc::clone(&handle), reopen_for(&state), TICK);

    state.drop_connection();

    assert!(common::wait_for(Duration::from_secs(2), || monitor.reconnects() == 1).await);
    assert_eq!(
        with_handle(&handle, |cam| cam.get_model()).await.unwrap(),
        "MicroLine ML1001"
    );
    assert_eq!(state.opens(), 2);
    assert_eq!(state.closes(), 1);
    monitor.stop().await;
}

#[tokio::test]
async fn failed_reopens_are_retried_each_tick() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let handle = open_handle(&state);

    state.drop_connection();
    state.fail_next(MockOp::Open, 3);
    let monitor = KeepAliveMonitor::spawn(Arc::clone(&handle), reopen_for(&state), TICK);

    assert!(common::wait_for(Duration::from_secs(2), || monitor.reconnects() == 1).await);
    // one initial open, three failed attempts, then the successful one
    assert_eq!(state.opens(), 2);
    assert!(with_handle(&handle, |cam| cam.get_model()).await.is_ok());

    tokio::time::sleep(TICK * 3).await;
    assert_eq!(monitor.reconnects(), 1);
    monitor.stop().await;
}

#[tokio::test]
async fn stop_is_prompt() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let monitor = KeepAliveMonitor::spawn(
        open_handle(&state),
        reopen_for(&state),
        Duration::from_secs(3600),
    );
    tokio::time::timeout(Duration::from_secs(1), monitor.stop())
        .await
        .expect("keep-alive stops without waiting for its interval");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_recovers_and_keeps_status() {
    let config = FliCameraConfig {
        keep_alive_secs: 1,
        ..camera_config()
    };
    let (camera, state) = mock_camera_with(config).await;
    camera.set_window(Window::new(0, 0, 8, 8)).unwrap();
    camera.start().await.unwrap();
    camera.start().await.unwrap();

    state.drop_connection();
    assert!(camera.get_cooling_state().await.unwrap_err().is_device_error());
    assert_eq!(camera.get_status(), CameraStatus::Idle);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(camera.reconnects().await, 1);
    assert_eq!(camera.get_status(), CameraStatus::Idle);

    let image = camera.expose(&camera.request(0, true)).await.unwrap();
    assert_eq!(image.frame.width, 8);

    camera.stop().await;
    camera.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_wheel_recovers() {
    let config = FliFilterWheelConfig {
        keep_alive_secs: 1,
        ..wheel_config()
    };
    let (wheel, state) = mock_wheel(config).await;
    wheel.start().await.unwrap();

    state.drop_connection();
    assert!(wheel.get_filter().await.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(wheel.reconnects().await, 1);
    wheel.set_filter("V").await.unwrap();
    assert_eq!(wheel.get_filter().await.unwrap(), "V");
    assert_eq!(state.opens(), 2);
    wheel.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn probes_during_exposure_leave_frame_intact() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let handle = open_handle(&state);
    let status = Arc::new(StatusCell::new());
    let controller = ExposureController::new(
        Arc::clone(&handle),
        Arc::clone(&status),
        Duration::from_millis(common::TEST_POLL_MS),
    );
    let monitor = KeepAliveMonitor::spawn(Arc::clone(&handle), reopen_for(&state), TICK);

    let request = ExposureRequest::new(
        TICK.as_millis() as u32 * 12,
        true,
        Window::new(0, 0, 1024, 1024),
        Binning::new(1, 1),
    );
    let outcome = controller
        .expose(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!((outcome.frame.width, outcome.frame.height), (1024, 1024));
    assert_open_shutter_pattern(&outcome.frame);
    assert_eq!(state.overlap_violations(), 0);
    assert_eq!(state.exposures_started(), 1);
    assert_eq!(state.cancels(), 0);
    assert_eq!(monitor.reconnects(), 0);
    assert_eq!(status.get(), CameraStatus::Idle);
    monitor.stop().await;
    assert_eq!(state.opens(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_exposes_across_keep_alive_ticks() {
    let config = FliCameraConfig {
        keep_alive_secs: 1,
        ..camera_config()
    };
    let (camera, state) = mock_camera_with(config).await;
    camera.set_window(Window::new(0, 0, 512, 400)).unwrap();
    camera.set_binning(Binning::new(2, 2)).unwrap();
    camera.start().await.unwrap();

    let image = camera.expose(&camera.request(2200, true)).await.unwrap();

    assert_eq!((image.frame.width, image.frame.height), (256, 200));
    assert_open_shutter_pattern(&image.frame);
    assert_eq!(state.overlap_violations(), 0);
    assert_eq!(camera.reconnects().await, 0);
    assert_eq!(camera.get_status(), CameraStatus::Idle);
    camera.close().await.unwrap();
}

#[tokio::test]
async fn dropped_monitor_stops_probing() {
    common::init_tracing();
    let state = MockCameraState::shared_default();
    let handle = open_handle(&state);
    let monitor = KeepAliveMonitor::spawn(Arc::clone(&handle), reopen_for(&state), TICK);
    drop(monitor);

    state.drop_connection();
    tokio::time::sleep(TICK * 6).await;
    assert_eq!(state.opens(), 1);
    assert_eq!(state.closes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unclosed_session_does_not_reopen_device() {
    let config = FliCameraConfig {
        keep_alive_secs: 1,
        ..camera_config()
    };
    let (camera, state) = mock_camera_with(config).await;
    camera.start().await.unwrap();
    drop(camera);

    state.drop_connection();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(state.opens(), 1);
}
