//! Simulated FLI devices.
//!
//! A [`MockCameraState`] is the simulated device; any number of
//! [`MockCameraHandle`]s may point at it, just as several libfli handles may be opened
//! on the same USB device. Dropping the connection bumps the device generation so every
//! handle opened before becomes stale and fails with a communication error until a new
//! handle is opened.
//!
//! The state records every call that matters to the tests and supports one-shot fault
//! injection per operation.

use daq_core::camera::{Binning, TemperatureSensor, Window};
use daq_core::driver::{
    CameraHandle, DeviceDescriptor, DeviceKind, FilterWheelHandle, FliBackend, FliDevice,
};
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DRIVER: &str = "mock_fli";

/// Ambient temperature of the simulated camera body.
const AMBIENT_C: f64 = 20.0;

/// Largest temperature difference the simulated cooler can hold.
const MAX_DELTA_C: f64 = 45.0;

/// Operations that accept injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `open`
    Open,
    /// `get_model`
    GetModel,
    /// `set_binning` / `set_window`
    Configure,
    /// `start_exposure`
    StartExposure,
    /// `is_exposure_finished`
    IsExposureFinished,
    /// `grab_row`
    GrabRow,
    /// `set_temperature`
    SetTemperature,
    /// `get_temperature` / `get_cooler_power`
    ReadTemperature,
    /// `set_filter_pos`
    SetFilterPos,
}

fn err(kind: DriverErrorKind, msg: impl Into<String>) -> DaqError {
    DaqError::driver(DRIVER, kind, msg)
}

/// Connection bookkeeping shared by the simulated devices.
#[derive(Debug, Default)]
struct Link {
    generation: u64,
    opens: u32,
    closes: u32,
    faults: HashMap<MockOp, u32>,
}

impl Link {
    fn check(&self, session: Option<u64>) -> DaqResult<()> {
        match session {
            None => Err(err(DriverErrorKind::Communication, "device is not open")),
            Some(g) if g != self.generation => Err(err(
                DriverErrorKind::Communication,
                "lost connection to device",
            )),
            Some(_) => Ok(()),
        }
    }

    fn take_fault(&mut self, op: MockOp) -> bool {
        match self.faults.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn fault(&mut self, op: MockOp) -> DaqResult<()> {
        if self.take_fault(op) {
            return Err(err(
                DriverErrorKind::Hardware,
                format!("injected {:?} failure", op),
            ));
        }
        Ok(())
    }

    fn open(&mut self, session: &mut Option<u64>) -> DaqResult<()> {
        if session.is_some() {
            return Err(err(DriverErrorKind::InvalidParameter, "handle already open"));
        }
        if self.take_fault(MockOp::Open) {
            return Err(err(DriverErrorKind::Initialization, "injected open failure"));
        }
        self.opens += 1;
        *session = Some(self.generation);
        Ok(())
    }
}

#[derive(Debug)]
struct Exposure {
    started: Instant,
    duration: Duration,
    open_shutter: bool,
    rows_read: u32,
}

#[derive(Debug)]
struct CameraInner {
    link: Link,
    model: String,
    full_frame: Window,
    window: Window,
    binning: Binning,
    // image area as last pushed through set_window: origin plus binned size
    area: (i32, i32, u32, u32),
    open_shutter: bool,
    exposure_time_ms: u32,
    exposure: Option<Exposure>,
    setpoint: f64,
    short_rows: bool,

    binning_calls: Vec<(u32, u32)>,
    window_calls: Vec<(i32, i32, u32, u32)>,
    setpoint_history: Vec<f64>,
    exposures_started: u32,
    cancels: u32,
    rows_read: u64,
    overlap_violations: u32,
}

/// A simulated camera.
#[derive(Debug)]
pub struct MockCameraState {
    descriptor: DeviceDescriptor,
    inner: Mutex<CameraInner>,
}

impl MockCameraState {
    /// A camera with the given model name, device path and visible area.
    pub fn new(name: &str, path: &str, full_frame: Window) -> Self {
        Self {
            descriptor: DeviceDescriptor::new(name, path, DeviceKind::Camera),
            inner: Mutex::new(CameraInner {
                link: Link::default(),
                model: name.to_string(),
                full_frame,
                window: full_frame,
                binning: Binning::default(),
                area: (full_frame.left, full_frame.top, full_frame.width, full_frame.height),
                open_shutter: true,
                exposure_time_ms: 0,
                exposure: None,
                setpoint: AMBIENT_C,
                short_rows: false,
                binning_calls: Vec::new(),
                window_calls: Vec::new(),
                setpoint_history: Vec::new(),
                exposures_started: 0,
                cancels: 0,
                rows_read: 0,
                overlap_violations: 0,
            }),
        }
    }

    /// A 1024x1024 camera at `/dev/fliusb0`, wrapped for sharing.
    pub fn shared_default() -> Arc<Self> {
        Arc::new(Self::new(
            "MicroLine ML1001",
            "/dev/fliusb0",
            Window::new(0, 0, 1024, 1024),
        ))
    }

    /// Device descriptor.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Simulate an unplug/replug: every open handle becomes stale.
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock();
        inner.link.generation += 1;
        inner.exposure = None;
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_next(&self, op: MockOp, count: u32) {
        self.inner.lock().link.faults.insert(op, count);
    }

    /// Make `grab_row` return one sample fewer than requested.
    pub fn set_short_rows(&self, short: bool) {
        self.inner.lock().short_rows = short;
    }

    /// Every `set_binning` call.
    pub fn binning_calls(&self) -> Vec<(u32, u32)> {
        self.inner.lock().binning_calls.clone()
    }

    /// Every `set_window` call as `(left, top, binned width, binned height)`.
    pub fn window_calls(&self) -> Vec<(i32, i32, u32, u32)> {
        self.inner.lock().window_calls.clone()
    }

    /// Every setpoint forwarded by `set_temperature`.
    pub fn setpoint_history(&self) -> Vec<f64> {
        self.inner.lock().setpoint_history.clone()
    }

    /// Setpoint currently programmed into the cooler.
    pub fn hardware_setpoint(&self) -> f64 {
        self.inner.lock().setpoint
    }

    /// Number of `start_exposure` calls.
    pub fn exposures_started(&self) -> u32 {
        self.inner.lock().exposures_started
    }

    /// Number of `cancel_exposure` calls.
    pub fn cancels(&self) -> u32 {
        self.inner.lock().cancels
    }

    /// Total rows read.
    pub fn rows_read(&self) -> u64 {
        self.inner.lock().rows_read
    }

    /// Number of `start_exposure` calls made while another exposure was still active.
    pub fn overlap_violations(&self) -> u32 {
        self.inner.lock().overlap_violations
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u32 {
        self.inner.lock().link.opens
    }

    /// Number of closes.
    pub fn closes(&self) -> u32 {
        self.inner.lock().link.closes
    }

    /// Whether an exposure is integrating or waiting to be read out.
    pub fn exposure_active(&self) -> bool {
        self.inner.lock().exposure.is_some()
    }

    fn ccd_temperature(inner: &CameraInner) -> f64 {
        inner.setpoint.max(AMBIENT_C - MAX_DELTA_C).min(AMBIENT_C)
    }

    fn pixel(open_shutter: bool, x: u32, y: u32) -> u16 {
        if open_shutter {
            100 + ((x + y) % 4096) as u16
        } else {
            100
        }
    }
}

/// A handle to a [`MockCameraState`].
pub struct MockCameraHandle {
    device: Arc<MockCameraState>,
    session: Option<u64>,
}

impl MockCameraHandle {
    /// A new, unopened handle.
    pub fn new(device: Arc<MockCameraState>) -> Self {
        Self {
            device,
            session: None,
        }
    }

    fn with<T>(&self, op: Option<MockOp>, f: impl FnOnce(&mut CameraInner) -> DaqResult<T>) -> DaqResult<T> {
        let mut inner = self.device.inner.lock();
        inner.link.check(self.session)?;
        if let Some(op) = op {
            inner.link.fault(op)?;
        }
        f(&mut *inner)
    }
}

impl FliDevice for MockCameraHandle {
    fn open(&mut self) -> DaqResult<()> {
        let mut inner = self.device.inner.lock();
        inner.link.open(&mut self.session)
    }

    fn close(&mut self) -> DaqResult<()> {
        if self.session.take().is_some() {
            self.device.inner.lock().link.closes += 1;
        }
        Ok(())
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.device.descriptor
    }

    fn get_model(&mut self) -> DaqResult<String> {
        self.with(Some(MockOp::GetModel), |inner| Ok(inner.model.clone()))
    }
}

impl CameraHandle for MockCameraHandle {
    fn set_binning(&mut self, x: u32, y: u32) -> DaqResult<()> {
        self.with(Some(MockOp::Configure), |inner| {
            if x == 0 || y == 0 {
                return Err(err(DriverErrorKind::InvalidParameter, "binning must be >= 1"));
            }
            inner.binning = Binning::new(x, y);
            inner.binning_calls.push((x, y));
            Ok(())
        })
    }

    fn set_window(&mut self, left: i32, top: i32, width: u32, height: u32) -> DaqResult<()> {
        self.with(Some(MockOp::Configure), |inner| {
            inner.area = (left, top, width, height);
            inner.window = Window::new(
                left,
                top,
                width * inner.binning.x,
                height * inner.binning.y,
            );
            inner.window_calls.push((left, top, width, height));
            Ok(())
        })
    }

    fn init_exposure(&mut self, open_shutter: bool) -> DaqResult<()> {
        self.with(None, |inner| {
            inner.open_shutter = open_shutter;
            Ok(())
        })
    }

    fn set_exposure_time(&mut self, ms: u32) -> DaqResult<()> {
        self.with(None, |inner| {
            inner.exposure_time_ms = ms;
            Ok(())
        })
    }

    fn start_exposure(&mut self) -> DaqResult<()> {
        self.with(Some(MockOp::StartExposure), |inner| {
            if inner.exposure.is_some() {
                inner.overlap_violations += 1;
            }
            inner.exposures_started += 1;
            inner.exposure = Some(Exposure {
                started: Instant::now(),
                duration: Duration::from_millis(inner.exposure_time_ms as u64),
                open_shutter: inner.open_shutter,
                rows_read: 0,
            });
            Ok(())
        })
    }

    fn is_exposure_finished(&mut self) -> DaqResult<bool> {
        self.with(Some(MockOp::IsExposureFinished), |inner| match &inner.exposure {
            Some(exp) => Ok(exp.started.elapsed() >= exp.duration),
            None => Err(err(DriverErrorKind::Hardware, "no exposure in progress")),
        })
    }

    fn cancel_exposure(&mut self) -> DaqResult<()> {
        self.with(None, |inner| {
            inner.exposure = None;
            inner.cancels += 1;
            Ok(())
        })
    }

    fn grab_row(&mut self, width: u32) -> DaqResult<Vec<u16>> {
        self.with(Some(MockOp::GrabRow), |inner| {
            let (_, _, area_width, area_height) = inner.area;
            if width != area_width {
                return Err(err(
                    DriverErrorKind::InvalidParameter,
                    format!("row width {} does not match image area width {}", width, area_width),
                ));
            }
            let short = inner.short_rows;
            let exp = match inner.exposure.as_mut() {
                Some(exp) if exp.started.elapsed() >= exp.duration => exp,
                Some(_) => return Err(err(DriverErrorKind::Hardware, "exposure not finished")),
                None => return Err(err(DriverErrorKind::Hardware, "no image data available")),
            };
            let y = exp.rows_read;
            let open_shutter = exp.open_shutter;
            let len = if short { width.saturating_sub(1) } else { width };
            let row = (0..len)
                .map(|x| MockCameraState::pixel(open_shutter, x, y))
                .collect();

            exp.rows_read += 1;
            if exp.rows_read >= area_height {
                inner.exposure = None;
            }
            inner.rows_read += 1;
            Ok(row)
        })
    }

    fn get_temperature(&mut self, sensor: TemperatureSensor) -> DaqResult<f64> {
        self.with(Some(MockOp::ReadTemperature), |inner| {
            Ok(match sensor {
                TemperatureSensor::Ccd => MockCameraState::ccd_temperature(inner),
                TemperatureSensor::Base => AMBIENT_C,
            })
        })
    }

    fn get_cooler_power(&mut self) -> DaqResult<f64> {
        self.with(Some(MockOp::ReadTemperature), |inner| {
            let delta = AMBIENT_C - MockCameraState::ccd_temperature(inner);
            Ok((delta / MAX_DELTA_C * 100.0).clamp(0.0, 100.0))
        })
    }

    fn set_temperature(&mut self, celsius: f64) -> DaqResult<()> {
        self.with(Some(MockOp::SetTemperature), |inner| {
            inner.setpoint = celsius;
            inner.setpoint_history.push(celsius);
            Ok(())
        })
    }

    fn get_full_frame(&mut self) -> DaqResult<Window> {
        self.with(None, |inner| Ok(inner.full_frame))
    }

    fn get_window_binning(&mut self) -> DaqResult<(Window, Binning)> {
        self.with(None, |inner| Ok((inner.window, inner.binning)))
    }
}

#[derive(Debug)]
struct WheelInner {
    link: Link,
    model: String,
    filter_count: u32,
    position: u32,
    moves: Vec<u32>,
}

/// A simulated filter wheel.
#[derive(Debug)]
pub struct MockFilterWheelState {
    descriptor: DeviceDescriptor,
    inner: Mutex<WheelInner>,
}

impl MockFilterWheelState {
    /// A wheel with `filter_count` slots, starting at slot 0.
    pub fn new(name: &str, path: &str, filter_count: u32) -> Self {
        Self {
            descriptor: DeviceDescriptor::new(name, path, DeviceKind::FilterWheel),
            inner: Mutex::new(WheelInner {
                link: Link::default(),
                model: name.to_string(),
                filter_count,
                position: 0,
                moves: Vec::new(),
            }),
        }
    }

    /// A five-slot wheel at `/dev/fliusb1`, wrapped for sharing.
    pub fn shared_default() -> Arc<Self> {
        Arc::new(Self::new("CenterLine CFW-1-5", "/dev/fliusb1", 5))
    }

    /// Device descriptor.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Simulate an unplug/replug.
    pub fn drop_connection(&self) {
        self.inner.lock().link.generation += 1;
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_next(&self, op: MockOp, count: u32) {
        self.inner.lock().link.faults.insert(op, count);
    }

    /// Move the wheel without going through a handle (e.g. manual rotation).
    pub fn force_position(&self, position: u32) {
        self.inner.lock().position = position;
    }

    /// Every position requested through `set_filter_pos`.
    pub fn moves(&self) -> Vec<u32> {
        self.inner.lock().moves.clone()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u32 {
        self.inner.lock().link.opens
    }
}

/// A handle to a [`MockFilterWheelState`].
pub struct MockFilterWheelHandle {
    device: Arc<MockFilterWheelState>,
    session: Option<u64>,
}

impl MockFilterWheelHandle {
    /// A new, unopened handle.
    pub fn new(device: Arc<MockFilterWheelState>) -> Self {
        Self {
            device,
            session: None,
        }
    }

    fn with<T>(&self, op: Option<MockOp>, f: impl FnOnce(&mut WheelInner) -> DaqResult<T>) -> DaqResult<T> {
        let mut inner = self.device.inner.lock();
        inner.link.check(self.session)?;
        if let Some(op) = op {
            inner.link.fault(op)?;
        }
        f(&mut *inner)
    }
}

impl FliDevice for MockFilterWheelHandle {
    fn open(&mut self) -> DaqResult<()> {
        let mut inner = self.device.inner.lock();
        inner.link.open(&mut self.session)
    }

    fn close(&mut self) -> DaqResult<()> {
        if self.session.take().is_some() {
            self.device.inner.lock().link.closes += 1;
        }
        Ok(())
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.device.descriptor
    }

    fn get_model(&mut self) -> DaqResult<String> {
        self.with(Some(MockOp::GetModel), |inner| Ok(inner.model.clone()))
    }
}

impl FilterWheelHandle for MockFilterWheelHandle {
    fn get_filter_count(&mut self) -> DaqResult<u32> {
        self.with(None, |inner| Ok(inner.filter_count))
    }

    fn set_filter_pos(&mut self, position: u32) -> DaqResult<()> {
        self.with(Some(MockOp::SetFilterPos), |inner| {
            if position >= inner.filter_count {
                return Err(err(
                    DriverErrorKind::InvalidParameter,
                    format!("filter position {} out of range", position),
                ));
            }
            inner.position = position;
            inner.moves.push(position);
            Ok(())
        })
    }

    fn get_filter_pos(&mut self) -> DaqResult<u32> {
        self.with(None, |inner| Ok(inner.position))
    }
}

/// Backend serving simulated devices.
#[derive(Debug, Default)]
pub struct MockFliBackend {
    cameras: Vec<Arc<MockCameraState>>,
    filter_wheels: Vec<Arc<MockFilterWheelState>>,
}

impl MockFliBackend {
    /// One default camera and one default filter wheel.
    pub fn new() -> Self {
        Self::empty()
            .with_camera(MockCameraState::shared_default())
            .with_filter_wheel(MockFilterWheelState::shared_default())
    }

    /// No devices attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach a camera.
    pub fn with_camera(mut self, camera: Arc<MockCameraState>) -> Self {
        self.cameras.push(camera);
        self
    }

    /// Attach a filter wheel.
    pub fn with_filter_wheel(mut self, wheel: Arc<MockFilterWheelState>) -> Self {
        self.filter_wheels.push(wheel);
        self
    }

    /// Attached camera by index.
    pub fn camera_state(&self, index: usize) -> Option<Arc<MockCameraState>> {
        self.cameras.get(index).cloned()
    }

    /// Attached filter wheel by index.
    pub fn filter_wheel_state(&self, index: usize) -> Option<Arc<MockFilterWheelState>> {
        self.filter_wheels.get(index).cloned()
    }
}

impl FliBackend for MockFliBackend {
    fn name(&self) -> &'static str {
        DRIVER
    }

    fn list_devices(&self, kind: DeviceKind) -> DaqResult<Vec<DeviceDescriptor>> {
        Ok(match kind {
            DeviceKind::Camera => self.cameras.iter().map(|c| c.descriptor.clone()).collect(),
            DeviceKind::FilterWheel => self
                .filter_wheels
                .iter()
                .map(|w| w.descriptor.clone())
                .collect(),
        })
    }

    fn camera(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn CameraHandle>> {
        self.cameras
            .iter()
            .find(|c| c.descriptor.path == device.path)
            .map(|c| Box::new(MockCameraHandle::new(Arc::clone(c))) as Box<dyn CameraHandle>)
            .ok_or_else(|| DaqError::DeviceNotFound(format!("camera at {}", device.path)))
    }

    fn filter_wheel(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn FilterWheelHandle>> {
        self.filter_wheels
            .iter()
            .find(|w| w.descriptor.path == device.path)
            .map(|w| {
                Box::new(MockFilterWheelHandle::new(Arc::clone(w))) as Box<dyn FilterWheelHandle>
            })
            .ok_or_else(|| DaqError::DeviceNotFound(format!("filter wheel at {}", device.path)))
    }
}
