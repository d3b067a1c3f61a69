//! Camera SDK seam.
//!
//! `CameraSdk` covers the library-wide calls (resource claim, enumeration, open) and yields a
//! `CameraSession` for one opened device. The controller only talks to these traits, so the
//! vendor binding and the simulated camera are interchangeable.

pub mod qhy;
pub mod simulated;

use crate::error::SdkError;
use crate::frame::{FrameInfo, ShutterState};

pub use qhy::QhySdk;
pub use simulated::{SimulatedCamera, SimulatedSdk};

/// Numeric camera controls used by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Gain,
    Offset,
    /// Exposure time in microseconds
    Exposure,
    /// Readout speed mode (0 = low, 1 = high)
    Speed,
    /// Current sensor temperature, read-only
    CurrentTemperature,
    /// Current cooler PWM duty, read-only
    CurrentPwm,
}

impl Control {
    pub fn name(&self) -> &'static str {
        match self {
            Control::Gain => "gain",
            Control::Offset => "offset",
            Control::Exposure => "exposure",
            Control::Speed => "speed",
            Control::CurrentTemperature => "current temperature",
            Control::CurrentPwm => "current pwm",
        }
    }
}

/// Min/max/step advertised by the camera for a control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Library-wide entry points of a camera SDK
pub trait CameraSdk {
    type Session: CameraSession;

    /// Claim the library-wide resources; must precede any other call
    fn init_resource(&mut self) -> SdkResult<()>;

    /// Release the library-wide resources
    fn release_resource(&mut self) -> SdkResult<()>;

    /// Enumerate attached devices, returning how many were found
    fn scan(&mut self) -> SdkResult<usize>;

    /// Identifier string of the device at `index`
    fn device_id(&mut self, index: usize) -> SdkResult<String>;

    /// Open the device with the given identifier. The session is not yet initialized.
    fn open(&mut self, id: &str) -> SdkResult<Self::Session>;
}

/// Calls against one opened camera
pub trait CameraSession {
    fn init(&mut self) -> SdkResult<()>;

    fn close(&mut self) -> SdkResult<()>;

    fn param_range(&mut self, control: Control) -> SdkResult<ControlRange>;

    fn set_param(&mut self, control: Control, value: f64) -> SdkResult<()>;

    fn get_param(&mut self, control: Control) -> SdkResult<f64>;

    fn set_bin_mode(&mut self, hor: u32, ver: u32) -> SdkResult<()>;

    fn set_resolution(&mut self, width: u32, height: u32) -> SdkResult<()>;

    /// Buffer size the camera needs for a full readout
    fn mem_length(&mut self) -> SdkResult<usize>;

    fn set_shutter(&mut self, state: ShutterState) -> SdkResult<()>;

    fn start_single_exposure(&mut self) -> SdkResult<()>;

    fn stop_single_exposure(&mut self) -> SdkResult<()>;

    /// Blocking read of the exposed frame into `buffer`
    fn read_single_frame(&mut self, buffer: &mut [u8]) -> SdkResult<FrameInfo>;

    /// One step of the camera's cooler regulation toward `target`
    fn control_temperature(&mut self, target: f64) -> SdkResult<()>;
}
