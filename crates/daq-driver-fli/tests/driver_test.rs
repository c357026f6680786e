//! Integration tests for FliCamera
//!
//! Tests the session interface including:
//! - Open sequence (device selection, geometry read-back, cooling at open)
//! - Exposure and image assembly (mock mode)
//! - Window/binning setters
//! - Status report and close
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p daq-driver-fli --test driver_test
//! ```

#![cfg(feature = "mock")]

mod common;

use common::{camera_config, mock_camera, mock_camera_with};
use daq_core::camera::{Binning, CameraStatus, Window};
use daq_core::error::DaqError;
use daq_core::image::HeaderValue;
use daq_driver_fli::{FliCamera, FliCameraConfig, MockCameraState, MockFliBackend};
use serde_json::json;
use std::sync::Arc;

// =============================================================================
// Mock Mode Driver Tests
// =============================================================================

mod mock_driver {
    use super::*;

    #[tokio::test]
    async fn open_reads_geometry_and_enables_cooling() {
        let (camera, state) = mock_camera().await;

        assert_eq!(camera.name(), "MicroLine ML1001");
        assert_eq!(camera.device().path, "/dev/fliusb0");
        assert_eq!(camera.get_window(), Window::new(0, 0, 1024, 1024));
        assert_eq!(camera.get_binning(), Binning::new(1, 1));
        assert_eq!(camera.get_status(), CameraStatus::Idle);
        assert_eq!(state.setpoint_history(), vec![-20.0]);

        let cooling = camera.get_cooling_state().await.unwrap();
        assert!(cooling.enabled);
        assert_eq!(cooling.setpoint, Some(-20.0));
    }

    #[tokio::test]
    async fn open_selects_configured_device() {
        common::init_tracing();
        let full = Window::new(0, 0, 512, 512);
        let backend = MockFliBackend::empty()
            .with_camera(Arc::new(MockCameraState::new("ML-A", "/dev/fliusb0", full)))
            .with_camera(Arc::new(MockCameraState::new("ML-B", "/dev/fliusb3", full)));
        let config = FliCameraConfig {
            dev_path: Some("/dev/fliusb3".into()),
            ..camera_config()
        };

        let camera = FliCamera::open(Arc::new(backend), config).await.unwrap();
        assert_eq!(camera.name(), "ML-B");
    }

    #[tokio::test]
    async fn open_without_camera_is_device_not_found() {
        common::init_tracing();
        let result = FliCamera::open(Arc::new(MockFliBackend::empty()), camera_config()).await;
        assert!(matches!(result, Err(DaqError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn binned_subframe_exposure() {
        let (camera, _state) = mock_camera().await;
        camera.set_window(Window::new(0, 0, 100, 100)).unwrap();
        camera.set_binning(Binning::new(2, 2)).unwrap();

        let request = camera.request(1000, true);
        let image = camera.expose(&request).await.unwrap();

        assert_eq!((image.frame.width, image.frame.height), (50, 50));
        let h = &image.header;
        assert_eq!(h.get("EXPTIME").and_then(HeaderValue::as_f64), Some(1.0));
        assert_eq!(h.get("DATAMIN").and_then(HeaderValue::as_f64), Some(100.0));
        assert_eq!(h.get("DATAMAX").and_then(HeaderValue::as_f64), Some(198.0));
        assert_eq!(h.get("DATAMEAN").and_then(HeaderValue::as_f64), Some(149.0));
        assert_eq!(h.get("XBINNING"), Some(&HeaderValue::Int(2)));
        assert_eq!(h.get("DET-BIN2"), Some(&HeaderValue::Int(2)));
        assert_eq!(h.get("INSTRUME").and_then(HeaderValue::as_str), Some("MicroLine ML1001"));
        assert_eq!(h.get("DET-TSET").and_then(HeaderValue::as_f64), Some(-20.0));
        assert_eq!(h.get("TRIMSEC").and_then(HeaderValue::as_str), Some("[1:50,1:50]"));
        assert!(!h.contains("BIASSEC"));
        assert_eq!(camera.get_status(), CameraStatus::Idle);
    }

    #[tokio::test]
    async fn header_keys_in_order() {
        let (camera, _state) = mock_camera().await;
        camera.set_window(Window::new(0, 0, 16, 8)).unwrap();

        let image = camera.expose(&camera.request(0, false)).await.unwrap();
        let keys: Vec<&str> = image.header.keys().collect();
        assert_eq!(
            &keys[..9],
            &[
                "DATE-OBS", "EXPTIME", "DET-TEMP", "DET-COOL", "DET-TSET", "INSTRUME", "XBINNING",
                "DET-BIN1", "YBINNING",
            ]
        );
        // dark frame: flat bias level
        let stats = image.frame.stats().unwrap();
        assert_eq!((stats.min, stats.max), (100, 100));
    }

    #[tokio::test]
    async fn cooling_off_omits_setpoint_card() {
        let (camera, state) = mock_camera().await;
        camera.set_window(Window::new(0, 0, 8, 8)).unwrap();

        camera.set_cooling(false, -20.0).await.unwrap();
        assert_eq!(state.hardware_setpoint(), 20.0);
        assert!(!camera.get_cooling_state().await.unwrap().enabled);

        let image = camera.expose(&camera.request(0, true)).await.unwrap();
        assert!(!image.header.contains("DET-TSET"));
    }

    #[tokio::test]
    async fn invalid_geometry_is_rejected() {
        let (camera, _state) = mock_camera().await;

        camera.set_window(Window::new(0, 0, 3, 3)).unwrap();
        let err = camera.set_binning(Binning::new(4, 4)).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(camera.set_binning(Binning::new(0, 1)).is_err());
        assert_eq!(camera.get_binning(), Binning::new(1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn setters_rejected_while_exposing() {
        let (camera, _state) = mock_camera().await;
        let camera = Arc::new(camera);
        camera.set_window(Window::new(0, 0, 8, 8)).unwrap();

        let task = tokio::spawn({
            let camera = Arc::clone(&camera);
            async move { camera.expose(&camera.request(300, true)).await }
        });
        assert!(common::wait_for(std::time::Duration::from_secs(2), || {
            camera.get_status() == CameraStatus::Exposing
        })
        .await);

        let err = camera.set_window(Window::new(0, 0, 4, 4)).unwrap_err();
        assert!(matches!(err, DaqError::ModuleBusyDuringOperation));
        let err = camera.set_binning(Binning::new(2, 2)).unwrap_err();
        assert!(matches!(err, DaqError::ModuleBusyDuringOperation));

        task.await.unwrap().unwrap();
        camera.set_window(Window::new(0, 0, 4, 4)).unwrap();
    }

    #[tokio::test]
    async fn status_report_serializes() {
        let (camera, _state) = mock_camera().await;
        let report = camera.status_report().await.unwrap();
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["Status"], json!("IDLE"));
        assert_eq!(value["Cooling"]["Enabled"], json!(true));
        assert_eq!(value["Cooling"]["SetPoint"], json!(-20.0));
        assert_eq!(value["Cooling"]["Temperatures"]["Base"], json!(20.0));
        assert!(value["Cooling"]["Temperatures"]["CCD"].is_number());
        assert!(value["Cooling"]["Power"].is_number());
    }

    #[tokio::test]
    async fn exposure_failure_resets_status() {
        let (camera, state) = mock_camera().await;
        camera.set_window(Window::new(0, 0, 8, 8)).unwrap();
        state.fail_next(daq_driver_fli::MockOp::GrabRow, 1);

        let err = camera.expose(&camera.request(0, true)).await.unwrap_err();
        assert!(err.is_device_error());
        assert_eq!(camera.get_status(), CameraStatus::Idle);

        // the handle is still usable
        camera.expose(&camera.request(0, true)).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let config = FliCameraConfig {
            keep_alive_secs: 1,
            ..camera_config()
        };
        let (camera, state) = mock_camera_with(config).await;
        camera.start().await.unwrap();

        camera.close().await.unwrap();
        camera.close().await.unwrap();
        assert_eq!(state.closes(), 1);

        assert!(matches!(
            camera.expose(&camera.request(0, true)).await,
            Err(DaqError::NotConnected)
        ));
        assert!(matches!(
            camera.get_cooling_state().await,
            Err(DaqError::NotConnected)
        ));
        assert!(matches!(camera.start().await, Err(DaqError::NotConnected)));
        assert!(matches!(
            camera.set_window(Window::new(0, 0, 8, 8)),
            Err(DaqError::NotConnected)
        ));
    }
}
