//! Runtime binding of the vendor libqhyccd shared library.
//!
//! The library is opened with `libloading` so the driver builds without the vendor SDK
//! installed; a missing library only surfaces as an error at connect time.

use super::{CameraSdk, CameraSession, Control, ControlRange, SdkResult};
use crate::error::SdkError;
use crate::frame::{FrameInfo, ShutterState};
use libc::{c_char, c_double, c_int, c_uchar, c_uint, c_void};
use std::ffi::{CStr, CString};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info, warn};

const QHYCCD_SUCCESS: c_int = 0;

/// Size of the id buffer `GetQHYCCDId` writes into
const QHYCCD_ID_LEN: usize = 0x20;

/// `GetQHYCCDParam` reports failures in-band with this value
const QHYCCD_PARAM_ERROR: f64 = u32::MAX as f64;

// CONTROL_ID values from qhyccd.h
const CONTROL_GAIN: c_int = 6;
const CONTROL_OFFSET: c_int = 7;
const CONTROL_EXPOSURE: c_int = 8;
const CONTROL_SPEED: c_int = 9;
const CONTROL_CURTEMP: c_int = 14;
const CONTROL_CURPWM: c_int = 15;

// Mechanical shutter states
const SHUTTER_OPEN: c_uchar = 0;
const SHUTTER_CLOSED: c_uchar = 1;
const SHUTTER_FREE: c_uchar = 2;

type Handle = *mut c_void;

fn control_id(control: Control) -> c_int {
    match control {
        Control::Gain => CONTROL_GAIN,
        Control::Offset => CONTROL_OFFSET,
        Control::Exposure => CONTROL_EXPOSURE,
        Control::Speed => CONTROL_SPEED,
        Control::CurrentTemperature => CONTROL_CURTEMP,
        Control::CurrentPwm => CONTROL_CURPWM,
    }
}

fn check(code: c_int, operation: &'static str) -> SdkResult<()> {
    if code == QHYCCD_SUCCESS {
        Ok(())
    } else {
        Err(SdkError::Call { operation, code })
    }
}

/// Function table resolved from libqhyccd
struct QhyLibrary {
    _lib: libloading::Library,

    init_resource: unsafe extern "C" fn() -> c_int,
    release_resource: unsafe extern "C" fn() -> c_int,
    scan: unsafe extern "C" fn() -> c_int,
    get_id: unsafe extern "C" fn(c_int, *mut c_char) -> c_int,
    open: unsafe extern "C" fn(*mut c_char) -> Handle,
    init: unsafe extern "C" fn(Handle) -> c_int,
    close: unsafe extern "C" fn(Handle) -> c_int,
    set_param: unsafe extern "C" fn(Handle, c_int, c_double) -> c_int,
    get_param: unsafe extern "C" fn(Handle, c_int) -> c_double,
    get_param_min_max_step:
        unsafe extern "C" fn(Handle, c_int, *mut c_double, *mut c_double, *mut c_double) -> c_int,
    set_bin_mode: unsafe extern "C" fn(Handle, c_int, c_int) -> c_int,
    set_resolution: unsafe extern "C" fn(Handle, c_int, c_int) -> c_int,
    mem_length: unsafe extern "C" fn(Handle) -> c_int,
    set_shutter: unsafe extern "C" fn(Handle, c_uchar) -> c_int,
    exp_single_frame: unsafe extern "C" fn(Handle) -> c_int,
    stop_exp_single: unsafe extern "C" fn(Handle) -> c_int,
    get_single_frame: unsafe extern "C" fn(
        Handle,
        *mut c_uint,
        *mut c_uint,
        *mut c_uint,
        *mut c_uint,
        *mut c_uchar,
    ) -> c_int,
    control_temp: unsafe extern "C" fn(Handle, c_double) -> c_int,
}

macro_rules! symbol {
    ($lib:expr, $name:literal) => {
        *$lib
            .get(concat!($name, "\0").as_bytes())
            .map_err(|e| SdkError::Symbol {
                symbol: $name.to_string(),
                details: e.to_string(),
            })?
    };
}

impl QhyLibrary {
    fn candidate_paths() -> Vec<&'static str> {
        if cfg!(target_os = "windows") {
            vec!["qhyccd.dll"]
        } else if cfg!(target_os = "macos") {
            vec!["libqhyccd.dylib", "/usr/local/lib/libqhyccd.dylib"]
        } else {
            vec![
                "libqhyccd.so",
                "libqhyccd.so.20",
                "/usr/lib/libqhyccd.so",
                "/usr/local/lib/libqhyccd.so",
            ]
        }
    }

    fn load(path: Option<&str>) -> SdkResult<Self> {
        let paths: Vec<&str> = match path {
            Some(path) => vec![path],
            None => Self::candidate_paths(),
        };

        let mut last_error = String::from("no candidate paths");
        for path in paths {
            // SAFETY: loading libqhyccd runs its initializers, which have no preconditions.
            match unsafe { libloading::Library::new(path) } {
                Ok(lib) => {
                    info!("Loaded QHY SDK from: {}", path);
                    // SAFETY: the signatures below match qhyccd.h.
                    return unsafe { Self::resolve(lib) };
                }
                Err(e) => {
                    debug!("Could not load {}: {}", path, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(SdkError::LibraryLoad {
            path: path.unwrap_or("libqhyccd").to_string(),
            details: last_error,
        })
    }

    unsafe fn resolve(lib: libloading::Library) -> SdkResult<Self> {
        Ok(Self {
            init_resource: symbol!(lib, "InitQHYCCDResource"),
            release_resource: symbol!(lib, "ReleaseQHYCCDResource"),
            scan: symbol!(lib, "ScanQHYCCD"),
            get_id: symbol!(lib, "GetQHYCCDId"),
            open: symbol!(lib, "OpenQHYCCD"),
            init: symbol!(lib, "InitQHYCCD"),
            close: symbol!(lib, "CloseQHYCCD"),
            set_param: symbol!(lib, "SetQHYCCDParam"),
            get_param: symbol!(lib, "GetQHYCCDParam"),
            get_param_min_max_step: symbol!(lib, "GetQHYCCDParamMinMaxStep"),
            set_bin_mode: symbol!(lib, "SetQHYCCDBinMode"),
            set_resolution: symbol!(lib, "SetQHYCCDResolution"),
            mem_length: symbol!(lib, "GetQHYCCDMemLength"),
            set_shutter: symbol!(lib, "SetQHYCCDShutter"),
            exp_single_frame: symbol!(lib, "ExpQHYCCDSingleFrame"),
            stop_exp_single: symbol!(lib, "StopQHYCCDExpSingle"),
            get_single_frame: symbol!(lib, "GetQHYCCDSingleFrame"),
            control_temp: symbol!(lib, "ControlQHYCCDTemp"),
            _lib: lib,
        })
    }
}

/// libqhyccd entry point; the shared library is loaded on first use
pub struct QhySdk {
    library_path: Option<String>,
    library: Option<Arc<QhyLibrary>>,
}

impl QhySdk {
    pub fn new(library_path: Option<String>) -> Self {
        Self {
            library_path,
            library: None,
        }
    }

    fn library(&mut self) -> SdkResult<Arc<QhyLibrary>> {
        if let Some(library) = &self.library {
            return Ok(Arc::clone(library));
        }

        let library = Arc::new(QhyLibrary::load(self.library_path.as_deref())?);
        self.library = Some(Arc::clone(&library));
        Ok(library)
    }
}

impl CameraSdk for QhySdk {
    type Session = QhyCamera;

    fn init_resource(&mut self) -> SdkResult<()> {
        let lib = self.library()?;
        check(unsafe { (lib.init_resource)() }, "InitQHYCCDResource")
    }

    fn release_resource(&mut self) -> SdkResult<()> {
        let lib = self.library()?;
        check(unsafe { (lib.release_resource)() }, "ReleaseQHYCCDResource")
    }

    fn scan(&mut self) -> SdkResult<usize> {
        let lib = self.library()?;
        let count = unsafe { (lib.scan)() };
        if count < 0 {
            return Err(SdkError::Call {
                operation: "ScanQHYCCD",
                code: count,
            });
        }
        Ok(count as usize)
    }

    fn device_id(&mut self, index: usize) -> SdkResult<String> {
        let lib = self.library()?;
        let mut id = [0 as c_char; QHYCCD_ID_LEN];
        check(
            unsafe { (lib.get_id)(index as c_int, id.as_mut_ptr()) },
            "GetQHYCCDId",
        )?;
        // The SDK does not promise termination within the buffer
        id[QHYCCD_ID_LEN - 1] = 0;
        let id = unsafe { CStr::from_ptr(id.as_ptr()) };
        Ok(id.to_string_lossy().into_owned())
    }

    fn open(&mut self, id: &str) -> SdkResult<QhyCamera> {
        let lib = self.library()?;
        let c_id = CString::new(id).map_err(|e| SdkError::InvalidId {
            details: e.to_string(),
        })?;
        let raw = c_id.into_raw();
        let handle = unsafe { (lib.open)(raw) };
        // Reclaim ownership so the string is freed
        drop(unsafe { CString::from_raw(raw) });

        let handle = NonNull::new(handle).ok_or(SdkError::Call {
            operation: "OpenQHYCCD",
            code: -1,
        })?;

        Ok(QhyCamera {
            lib,
            handle,
            open: true,
        })
    }
}

/// One opened QHY camera
pub struct QhyCamera {
    lib: Arc<QhyLibrary>,
    handle: NonNull<c_void>,
    open: bool,
}

impl QhyCamera {
    fn handle(&self) -> Handle {
        self.handle.as_ptr()
    }
}

impl CameraSession for QhyCamera {
    fn init(&mut self) -> SdkResult<()> {
        check(unsafe { (self.lib.init)(self.handle()) }, "InitQHYCCD")
    }

    fn close(&mut self) -> SdkResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        check(unsafe { (self.lib.close)(self.handle()) }, "CloseQHYCCD")
    }

    fn param_range(&mut self, control: Control) -> SdkResult<ControlRange> {
        let (mut min, mut max, mut step) = (0.0, 0.0, 0.0);
        check(
            unsafe {
                (self.lib.get_param_min_max_step)(
                    self.handle(),
                    control_id(control),
                    &mut min,
                    &mut max,
                    &mut step,
                )
            },
            "GetQHYCCDParamMinMaxStep",
        )?;
        Ok(ControlRange { min, max, step })
    }

    fn set_param(&mut self, control: Control, value: f64) -> SdkResult<()> {
        check(
            unsafe { (self.lib.set_param)(self.handle(), control_id(control), value) },
            "SetQHYCCDParam",
        )
    }

    fn get_param(&mut self, control: Control) -> SdkResult<f64> {
        let value = unsafe { (self.lib.get_param)(self.handle(), control_id(control)) };
        if value == QHYCCD_PARAM_ERROR {
            return Err(SdkError::Call {
                operation: "GetQHYCCDParam",
                code: -1,
            });
        }
        Ok(value)
    }

    fn set_bin_mode(&mut self, hor: u32, ver: u32) -> SdkResult<()> {
        check(
            unsafe { (self.lib.set_bin_mode)(self.handle(), hor as c_int, ver as c_int) },
            "SetQHYCCDBinMode",
        )
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> SdkResult<()> {
        check(
            unsafe { (self.lib.set_resolution)(self.handle(), width as c_int, height as c_int) },
            "SetQHYCCDResolution",
        )
    }

    fn mem_length(&mut self) -> SdkResult<usize> {
        let length = unsafe { (self.lib.mem_length)(self.handle()) };
        if length <= 0 {
            return Err(SdkError::Call {
                operation: "GetQHYCCDMemLength",
                code: length,
            });
        }
        Ok(length as usize)
    }

    fn set_shutter(&mut self, state: ShutterState) -> SdkResult<()> {
        let status = match state {
            ShutterState::Open => SHUTTER_OPEN,
            ShutterState::Closed => SHUTTER_CLOSED,
            ShutterState::Free => SHUTTER_FREE,
        };
        check(
            unsafe { (self.lib.set_shutter)(self.handle(), status) },
            "SetQHYCCDShutter",
        )
    }

    fn start_single_exposure(&mut self) -> SdkResult<()> {
        check(
            unsafe { (self.lib.exp_single_frame)(self.handle()) },
            "ExpQHYCCDSingleFrame",
        )
    }

    fn stop_single_exposure(&mut self) -> SdkResult<()> {
        check(
            unsafe { (self.lib.stop_exp_single)(self.handle()) },
            "StopQHYCCDExpSingle",
        )
    }

    fn read_single_frame(&mut self, buffer: &mut [u8]) -> SdkResult<FrameInfo> {
        let (mut width, mut height, mut bpp, mut channels): (c_uint, c_uint, c_uint, c_uint) =
            (0, 0, 0, 0);
        // The buffer was sized from GetQHYCCDMemLength, which bounds what the SDK writes.
        let code = unsafe {
            (self.lib.get_single_frame)(
                self.handle(),
                &mut width,
                &mut height,
                &mut bpp,
                &mut channels,
                buffer.as_mut_ptr(),
            )
        };
        // Any non-negative status is a completed readout
        if code < 0 {
            return Err(SdkError::Call {
                operation: "GetQHYCCDSingleFrame",
                code,
            });
        }
        Ok(FrameInfo {
            width,
            height,
            bits_per_pixel: bpp,
            channels,
        })
    }

    fn control_temperature(&mut self, target: f64) -> SdkResult<()> {
        check(
            unsafe { (self.lib.control_temp)(self.handle(), target) },
            "ControlQHYCCDTemp",
        )
    }
}

impl Drop for QhyCamera {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.close() {
                warn!("Closing camera on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids_match_vendor_header() {
        assert_eq!(control_id(Control::Gain), 6);
        assert_eq!(control_id(Control::Offset), 7);
        assert_eq!(control_id(Control::Exposure), 8);
        assert_eq!(control_id(Control::Speed), 9);
        assert_eq!(control_id(Control::CurrentTemperature), 14);
        assert_eq!(control_id(Control::CurrentPwm), 15);
    }

    #[test]
    fn test_status_check() {
        assert!(check(QHYCCD_SUCCESS, "Test").is_ok());
        assert_eq!(
            check(-1, "Test"),
            Err(SdkError::Call {
                operation: "Test",
                code: -1
            })
        );
    }

    #[test]
    fn test_missing_library_reports_load_error() {
        let mut sdk = QhySdk::new(Some("/nonexistent/libqhyccd.so".to_string()));

        match sdk.init_resource() {
            Err(SdkError::LibraryLoad { path, .. }) => {
                assert_eq!(path, "/nonexistent/libqhyccd.so");
            }
            other => panic!("Expected library load error, got {:?}", other),
        }
    }
}
