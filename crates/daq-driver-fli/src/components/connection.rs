//! libfli Connection Management
//!
//! Loads libfli at runtime and exposes FLI cameras and filter wheels through the
//! driver handle traits.
//!
//! ## Global SDK state
//!
//! libfli keeps process-wide state (the device list, the USB backend). The library is
//! loaded once and every call is serialized through [`SDK_LOCK`]. Handles are plain
//! `flidev_t` values and carry no state of their own besides the descriptor.

use daq_core::camera::{Binning, TemperatureSensor, Window};
use daq_core::driver::{
    CameraHandle, DeviceDescriptor, DeviceKind, FilterWheelHandle, FliBackend, FliDevice,
};
use daq_core::error::{DaqError, DaqResult, DriverErrorKind};
use std::ffi::{c_char, c_double, c_long, CStr, CString};
use std::sync::OnceLock;

const DRIVER: &str = "fli";

type FliDev = c_long;

const FLI_INVALID_DEVICE: FliDev = -1;

const FLIDOMAIN_USB: c_long = 0x02;
const FLIDEVICE_CAMERA: c_long = 0x100;
const FLIDEVICE_FILTERWHEEL: c_long = 0x200;

const FLI_FRAME_TYPE_NORMAL: c_long = 0;
const FLI_FRAME_TYPE_DARK: c_long = 1;

const FLI_TEMPERATURE_INTERNAL: c_long = 0x0000;
const FLI_TEMPERATURE_EXTERNAL: c_long = 0x0001;

const FLI_CAMERA_STATUS_UNKNOWN: c_long = 0xffff_ffff_u32 as c_long;
const FLI_CAMERA_DATA_READY: c_long = 0x8000_0000_u32 as c_long;

type FLIOpen = unsafe extern "C" fn(dev: *mut FliDev, name: *const c_char, domain: c_long) -> c_long;
type FLIClose = unsafe extern "C" fn(dev: FliDev) -> c_long;
type FLIGetModel = unsafe extern "C" fn(dev: FliDev, model: *mut c_char, len: usize) -> c_long;
type FLIGetVisibleArea = unsafe extern "C" fn(
    dev: FliDev,
    ul_x: *mut c_long,
    ul_y: *mut c_long,
    lr_x: *mut c_long,
    lr_y: *mut c_long,
) -> c_long;
type FLIGetReadoutDimensions = unsafe extern "C" fn(
    dev: FliDev,
    width: *mut c_long,
    hoffset: *mut c_long,
    hbin: *mut c_long,
    height: *mut c_long,
    voffset: *mut c_long,
    vbin: *mut c_long,
) -> c_long;
type FLISetImageArea =
    unsafe extern "C" fn(dev: FliDev, ul_x: c_long, ul_y: c_long, lr_x: c_long, lr_y: c_long) -> c_long;
type FLISetBin = unsafe extern "C" fn(dev: FliDev, bin: c_long) -> c_long;
type FLISetFrameType = unsafe extern "C" fn(dev: FliDev, frametype: c_long) -> c_long;
type FLISetExposureTime = unsafe extern "C" fn(dev: FliDev, exptime: c_long) -> c_long;
type FLIExposeFrame = unsafe extern "C" fn(dev: FliDev) -> c_long;
type FLICancelExposure = unsafe extern "C" fn(dev: FliDev) -> c_long;
type FLIGetExposureStatus = unsafe extern "C" fn(dev: FliDev, timeleft: *mut c_long) -> c_long;
type FLIGetDeviceStatus = unsafe extern "C" fn(dev: FliDev, status: *mut c_long) -> c_long;
type FLIGrabRow = unsafe extern "C" fn(dev: FliDev, buff: *mut u16, width: usize) -> c_long;
type FLIReadTemperature =
    unsafe extern "C" fn(dev: FliDev, channel: c_long, temperature: *mut c_double) -> c_long;
type FLIGetCoolerPower = unsafe extern "C" fn(dev: FliDev, power: *mut c_double) -> c_long;
type FLISetTemperature = unsafe extern "C" fn(dev: FliDev, temperature: c_double) -> c_long;
type FLICreateList = unsafe extern "C" fn(domain: c_long) -> c_long;
type FLIDeleteList = unsafe extern "C" fn() -> c_long;
type FLIListEntry = unsafe extern "C" fn(
    domain: *mut c_long,
    filename: *mut c_char,
    fnlen: usize,
    name: *mut c_char,
    namelen: usize,
) -> c_long;
type FLISetFilterPos = unsafe extern "C" fn(dev: FliDev, filter: c_long) -> c_long;
type FLIGetFilterPos = unsafe extern "C" fn(dev: FliDev, filter: *mut c_long) -> c_long;
type FLIGetFilterCount = unsafe extern "C" fn(dev: FliDev, count: *mut c_long) -> c_long;

/// Dynamically loaded libfli entry points.
struct FliSdk {
    _library: libloading::Library,
    open: FLIOpen,
    close: FLIClose,
    get_model: FLIGetModel,
    get_visible_area: FLIGetVisibleArea,
    get_readout_dimensions: FLIGetReadoutDimensions,
    set_image_area: FLISetImageArea,
    set_hbin: FLISetBin,
    set_vbin: FLISetBin,
    set_frame_type: FLISetFrameType,
    set_exposure_time: FLISetExposureTime,
    expose_frame: FLIExposeFrame,
    cancel_exposure: FLICancelExposure,
    get_exposure_status: FLIGetExposureStatus,
    get_device_status: FLIGetDeviceStatus,
    grab_row: FLIGrabRow,
    read_temperature: FLIReadTemperature,
    get_cooler_power: FLIGetCoolerPower,
    set_temperature: FLISetTemperature,
    create_list: FLICreateList,
    delete_list: FLIDeleteList,
    list_first: FLIListEntry,
    list_next: FLIListEntry,
    set_filter_pos: FLISetFilterPos,
    get_filter_pos: FLIGetFilterPos,
    get_filter_count: FLIGetFilterCount,
}

fn library_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "libfli.dll"
    } else if cfg!(target_os = "macos") {
        "libfli.dylib"
    } else {
        "libfli.so"
    }
}

fn symbol<T: Copy>(library: &libloading::Library, name: &str) -> Result<T, String> {
    let mut cname = name.as_bytes().to_vec();
    cname.push(0);
    // SAFETY: T is one of the function pointer types above, matching the libfli.h
    // prototype of `name`.
    unsafe { library.get::<T>(&cname) }
        .map(|s| *s)
        .map_err(|e| format!("Failed to load {}: {}", name, e))
}

impl FliSdk {
    fn load() -> Result<Self, String> {
        let name = library_name();
        tracing::info!("Loading {}", name);
        // SAFETY: loading libfli runs no initialisation code with preconditions.
        let library = unsafe { libloading::Library::new(name) }
            .map_err(|e| format!("Failed to load FLI SDK ({}): {}", name, e))?;
        let lib = &library;
        Ok(Self {
            open: symbol(lib, "FLIOpen")?,
            close: symbol(lib, "FLIClose")?,
            get_model: symbol(lib, "FLIGetModel")?,
            get_visible_area: symbol(lib, "FLIGetVisibleArea")?,
            get_readout_dimensions: symbol(lib, "FLIGetReadoutDimensions")?,
            set_image_area: symbol(lib, "FLISetImageArea")?,
            set_hbin: symbol(lib, "FLISetHBin")?,
            set_vbin: symbol(lib, "FLISetVBin")?,
            set_frame_type: symbol(lib, "FLISetFrameType")?,
            set_exposure_time: symbol(lib, "FLISetExposureTime")?,
            expose_frame: symbol(lib, "FLIExposeFrame")?,
            cancel_exposure: symbol(lib, "FLICancelExposure")?,
            get_exposure_status: symbol(lib, "FLIGetExposureStatus")?,
            get_device_status: symbol(lib, "FLIGetDeviceStatus")?,
            grab_row: symbol(lib, "FLIGrabRow")?,
            read_temperature: symbol(lib, "FLIReadTemperature")?,
            get_cooler_power: symbol(lib, "FLIGetCoolerPower")?,
            set_temperature: symbol(lib, "FLISetTemperature")?,
            create_list: symbol(lib, "FLICreateList")?,
            delete_list: symbol(lib, "FLIDeleteList")?,
            list_first: symbol(lib, "FLIListFirst")?,
            list_next: symbol(lib, "FLIListNext")?,
            set_filter_pos: symbol(lib, "FLISetFilterPos")?,
            get_filter_pos: symbol(lib, "FLIGetFilterPos")?,
            get_filter_count: symbol(lib, "FLIGetFilterCount")?,
            _library: library,
        })
    }
}

static SDK: OnceLock<Result<FliSdk, String>> = OnceLock::new();

/// Serializes every libfli call.
static SDK_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

fn sdk() -> DaqResult<&'static FliSdk> {
    SDK.get_or_init(FliSdk::load)
        .as_ref()
        .map_err(|e| DaqError::driver(DRIVER, DriverErrorKind::Initialization, e.clone()))
}

/// Map a libfli return code (0 or `-errno`) to a result.
fn check(result: c_long, context: &str) -> DaqResult<()> {
    if result == 0 {
        return Ok(());
    }
    let kind = match -result {
        // ENODEV, EIO, ENXIO, EPIPE, ETIMEDOUT
        19 | 5 | 6 | 32 | 110 => DriverErrorKind::Communication,
        // EINVAL
        22 => DriverErrorKind::InvalidParameter,
        _ => DriverErrorKind::Hardware,
    };
    Err(DaqError::driver(
        DRIVER,
        kind,
        format!("{}: error code {}", context, result),
    ))
}

fn domain_for(kind: DeviceKind) -> c_long {
    FLIDOMAIN_USB
        | match kind {
            DeviceKind::Camera => FLIDEVICE_CAMERA,
            DeviceKind::FilterWheel => FLIDEVICE_FILTERWHEEL,
        }
}

fn c_buf_to_string(buf: &[c_char]) -> String {
    // SAFETY: buffers are zero-initialised and libfli writes NUL-terminated strings
    // shorter than the buffer length it was given.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Backend enumerating and opening devices through libfli.
pub struct LibFliBackend {
    sdk: &'static FliSdk,
}

impl LibFliBackend {
    /// Load libfli. Fails with an `Initialization` driver error if it is not installed.
    pub fn load() -> DaqResult<Self> {
        Ok(Self { sdk: sdk()? })
    }
}

impl FliBackend for LibFliBackend {
    fn name(&self) -> &'static str {
        DRIVER
    }

    fn list_devices(&self, kind: DeviceKind) -> DaqResult<Vec<DeviceDescriptor>> {
        let sdk = self.sdk;
        let _lock = SDK_LOCK.lock();
        let domain = domain_for(kind);

        // SAFETY: plain call, serialized by SDK_LOCK.
        check(unsafe { (sdk.create_list)(domain) }, "FLICreateList")?;

        let mut devices = Vec::new();
        let mut dev_domain: c_long = 0;
        let mut filename = [0 as c_char; 256];
        let mut name = [0 as c_char; 256];

        // SAFETY: out pointers reference live stack buffers of the given lengths.
        let mut result = unsafe {
            (sdk.list_first)(
                &mut dev_domain,
                filename.as_mut_ptr(),
                filename.len(),
                name.as_mut_ptr(),
                name.len(),
            )
        };
        while result == 0 {
            let path = c_buf_to_string(&filename);
            let model = c_buf_to_string(&name);
            tracing::debug!("Found FLI {} \"{}\" at {}", kind, model, path);
            devices.push(DeviceDescriptor::new(model, path, kind));

            filename.fill(0);
            name.fill(0);
            // SAFETY: as above.
            result = unsafe {
                (sdk.list_next)(
                    &mut dev_domain,
                    filename.as_mut_ptr(),
                    filename.len(),
                    name.as_mut_ptr(),
                    name.len(),
                )
            };
        }

        // SAFETY: the list was created above.
        unsafe { (sdk.delete_list)() };
        Ok(devices)
    }

    fn camera(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn CameraHandle>> {
        Ok(Box::new(LibFliDevice::new(self.sdk, device.clone())?))
    }

    fn filter_wheel(&self, device: &DeviceDescriptor) -> DaqResult<Box<dyn FilterWheelHandle>> {
        Ok(Box::new(LibFliDevice::new(self.sdk, device.clone())?))
    }
}

/// One libfli device handle.
pub struct LibFliDevice {
    sdk: &'static FliSdk,
    descriptor: DeviceDescriptor,
    path: CString,
    dev: FliDev,
}

impl LibFliDevice {
    fn new(sdk: &'static FliSdk, descriptor: DeviceDescriptor) -> DaqResult<Self> {
        let path = CString::new(descriptor.path.clone()).map_err(|_| {
            DaqError::driver(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("device path {:?} contains a NUL byte", descriptor.path),
            )
        })?;
        Ok(Self {
            sdk,
            descriptor,
            path,
            dev: FLI_INVALID_DEVICE,
        })
    }

    /// Run one SDK call against the open device.
    fn call<T>(&self, f: impl FnOnce(&FliSdk, FliDev) -> DaqResult<T>) -> DaqResult<T> {
        if self.dev == FLI_INVALID_DEVICE {
            return Err(DaqError::driver(
                DRIVER,
                DriverErrorKind::Communication,
                format!("{} is not open", self.descriptor.path),
            ));
        }
        let _lock = SDK_LOCK.lock();
        f(self.sdk, self.dev)
    }
}

impl Drop for LibFliDevice {
    fn drop(&mut self) {
        if let Err(e) = FliDevice::close(self) {
            tracing::warn!("Failed to close {}: {}", self.descriptor.path, e);
        }
    }
}

impl FliDevice for LibFliDevice {
    fn open(&mut self) -> DaqResult<()> {
        if self.dev != FLI_INVALID_DEVICE {
            return Err(DaqError::driver(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("{} is already open", self.descriptor.path),
            ));
        }
        let domain = domain_for(self.descriptor.kind);
        let mut dev: FliDev = FLI_INVALID_DEVICE;
        let _lock = SDK_LOCK.lock();
        // SAFETY: `dev` is a valid out pointer and `path` is NUL-terminated.
        let result = unsafe { (self.sdk.open)(&mut dev, self.path.as_ptr(), domain) };
        check(result, "FLIOpen").map_err(|e| match e {
            DaqError::Driver(mut d) => {
                d.kind = DriverErrorKind::Initialization;
                DaqError::Driver(d)
            }
            other => other,
        })?;
        self.dev = dev;
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        if self.dev == FLI_INVALID_DEVICE {
            return Ok(());
        }
        let dev = std::mem::replace(&mut self.dev, FLI_INVALID_DEVICE);
        let _lock = SDK_LOCK.lock();
        // SAFETY: `dev` was returned by FLIOpen and is closed exactly once.
        check(unsafe { (self.sdk.close)(dev) }, "FLIClose")
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn get_model(&mut self) -> DaqResult<String> {
        self.call(|sdk, dev| {
            let mut buf = [0 as c_char; 256];
            // SAFETY: buffer is valid for its length.
            check(
                unsafe { (sdk.get_model)(dev, buf.as_mut_ptr(), buf.len()) },
                "FLIGetModel",
            )?;
            Ok(c_buf_to_string(&buf))
        })
    }
}

impl CameraHandle for LibFliDevice {
    fn set_binning(&mut self, x: u32, y: u32) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain value calls on an open device.
            check(unsafe { (sdk.set_hbin)(dev, x as c_long) }, "FLISetHBin")?;
            check(unsafe { (sdk.set_vbin)(dev, y as c_long) }, "FLISetVBin")
        })
    }

    fn set_window(&mut self, left: i32, top: i32, width: u32, height: u32) -> DaqResult<()> {
        // lower-right is bin-scaled, upper-left is absolute
        let (ul_x, ul_y) = (left as c_long, top as c_long);
        let (lr_x, lr_y) = (ul_x + width as c_long, ul_y + height as c_long);
        self.call(|sdk, dev| {
            // SAFETY: plain value call on an open device.
            check(
                unsafe { (sdk.set_image_area)(dev, ul_x, ul_y, lr_x, lr_y) },
                "FLISetImageArea",
            )
        })
    }

    fn init_exposure(&mut self, open_shutter: bool) -> DaqResult<()> {
        let frame_type = if open_shutter {
            FLI_FRAME_TYPE_NORMAL
        } else {
            FLI_FRAME_TYPE_DARK
        };
        self.call(|sdk, dev| {
            // SAFETY: plain value call on an open device.
            check(
                unsafe { (sdk.set_frame_type)(dev, frame_type) },
                "FLISetFrameType",
            )
        })
    }

    fn set_exposure_time(&mut self, ms: u32) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain value call on an open device.
            check(
                unsafe { (sdk.set_exposure_time)(dev, ms as c_long) },
                "FLISetExposureTime",
            )
        })
    }

    fn start_exposure(&mut self) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain call on an open device.
            check(unsafe { (sdk.expose_frame)(dev) }, "FLIExposeFrame")
        })
    }

    fn is_exposure_finished(&mut self) -> DaqResult<bool> {
        self.call(|sdk, dev| {
            let mut timeleft: c_long = 0;
            let mut status: c_long = 0;
            // SAFETY: out pointers reference live locals.
            check(
                unsafe { (sdk.get_exposure_status)(dev, &mut timeleft) },
                "FLIGetExposureStatus",
            )?;
            if timeleft > 0 {
                return Ok(false);
            }
            // SAFETY: as above.
            check(
                unsafe { (sdk.get_device_status)(dev, &mut status) },
                "FLIGetDeviceStatus",
            )?;
            Ok(status == FLI_CAMERA_STATUS_UNKNOWN || status & FLI_CAMERA_DATA_READY != 0)
        })
    }

    fn cancel_exposure(&mut self) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain call on an open device.
            check(unsafe { (sdk.cancel_exposure)(dev) }, "FLICancelExposure")
        })
    }

    fn grab_row(&mut self, width: u32) -> DaqResult<Vec<u16>> {
        self.call(|sdk, dev| {
            let mut row = vec![0u16; width as usize];
            // SAFETY: `row` holds exactly `width` u16 samples.
            check(
                unsafe { (sdk.grab_row)(dev, row.as_mut_ptr(), row.len()) },
                "FLIGrabRow",
            )?;
            Ok(row)
        })
    }

    fn get_temperature(&mut self, sensor: TemperatureSensor) -> DaqResult<f64> {
        let channel = match sensor {
            TemperatureSensor::Ccd => FLI_TEMPERATURE_INTERNAL,
            TemperatureSensor::Base => FLI_TEMPERATURE_EXTERNAL,
        };
        self.call(|sdk, dev| {
            let mut temp: c_double = 0.0;
            // SAFETY: out pointer references a live local.
            check(
                unsafe { (sdk.read_temperature)(dev, channel, &mut temp) },
                "FLIReadTemperature",
            )?;
            Ok(temp)
        })
    }

    fn get_cooler_power(&mut self) -> DaqResult<f64> {
        self.call(|sdk, dev| {
            let mut power: c_double = 0.0;
            // SAFETY: out pointer references a live local.
            check(
                unsafe { (sdk.get_cooler_power)(dev, &mut power) },
                "FLIGetCoolerPower",
            )?;
            Ok(power)
        })
    }

    fn set_temperature(&mut self, celsius: f64) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain value call on an open device.
            check(
                unsafe { (sdk.set_temperature)(dev, celsius) },
                "FLISetTemperature",
            )
        })
    }

    fn get_full_frame(&mut self) -> DaqResult<Window> {
        self.call(|sdk, dev| {
            let (mut ul_x, mut ul_y, mut lr_x, mut lr_y): (c_long, c_long, c_long, c_long) =
                (0, 0, 0, 0);
            // SAFETY: out pointers reference live locals.
            check(
                unsafe { (sdk.get_visible_area)(dev, &mut ul_x, &mut ul_y, &mut lr_x, &mut lr_y) },
                "FLIGetVisibleArea",
            )?;
            Ok(Window::new(
                ul_x as i32,
                ul_y as i32,
                (lr_x - ul_x).max(0) as u32,
                (lr_y - ul_y).max(0) as u32,
            ))
        })
    }

    fn get_window_binning(&mut self) -> DaqResult<(Window, Binning)> {
        self.call(|sdk, dev| {
            let (mut width, mut hoffset, mut hbin): (c_long, c_long, c_long) = (0, 0, 0);
            let (mut height, mut voffset, mut vbin): (c_long, c_long, c_long) = (0, 0, 0);
            // SAFETY: out pointers reference live locals.
            check(
                unsafe {
                    (sdk.get_readout_dimensions)(
                        dev,
                        &mut width,
                        &mut hoffset,
                        &mut hbin,
                        &mut height,
                        &mut voffset,
                        &mut vbin,
                    )
                },
                "FLIGetReadoutDimensions",
            )?;
            let binning = Binning::new(hbin.max(1) as u32, vbin.max(1) as u32);
            let window = Window::new(
                hoffset as i32,
                voffset as i32,
                width.max(0) as u32 * binning.x,
                height.max(0) as u32 * binning.y,
            );
            Ok((window, binning))
        })
    }
}

impl FilterWheelHandle for LibFliDevice {
    fn get_filter_count(&mut self) -> DaqResult<u32> {
        self.call(|sdk, dev| {
            let mut count: c_long = 0;
            // SAFETY: out pointer references a live local.
            check(
                unsafe { (sdk.get_filter_count)(dev, &mut count) },
                "FLIGetFilterCount",
            )?;
            Ok(count.max(0) as u32)
        })
    }

    fn set_filter_pos(&mut self, position: u32) -> DaqResult<()> {
        self.call(|sdk, dev| {
            // SAFETY: plain value call on an open device.
            check(
                unsafe { (sdk.set_filter_pos)(dev, position as c_long) },
                "FLISetFilterPos",
            )
        })
    }

    fn get_filter_pos(&mut self) -> DaqResult<u32> {
        self.call(|sdk, dev| {
            let mut pos: c_long = 0;
            // SAFETY: out pointer references a live local.
            check(
                unsafe { (sdk.get_filter_pos)(dev, &mut pos) },
                "FLIGetFilterPos",
            )?;
            u32::try_from(pos).map_err(|_| {
                DaqError::driver(
                    DRIVER,
                    DriverErrorKind::Hardware,
                    format!("FLIGetFilterPos returned {}", pos),
                )
            })
        })
    }
}
