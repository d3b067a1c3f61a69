//! In-memory camera standing in for libqhyccd.
//!
//! Used by the `--simulate` mode of the driver and by the tests. Clones of a
//! `SimulatedSdk` share one camera state, so a test can keep a handle, inject failures and
//! inspect what the controller did.

use super::{CameraSdk, CameraSession, Control, ControlRange, SdkResult};
use crate::error::SdkError;
use crate::frame::{FrameInfo, ShutterState};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

const SIM_ERROR: i32 = -1;

/// Failure switches for the simulated camera
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub init_resource: bool,
    pub scan: bool,
    pub device_id: HashSet<usize>,
    pub open: HashSet<String>,
    pub init: HashSet<String>,
    pub param_range: HashSet<Control>,
    pub set_param: HashSet<Control>,
    pub get_param: HashSet<Control>,
    pub bin_mode: bool,
    pub mem_length: bool,
    pub shutter: bool,
    pub exposure_start: bool,
    pub exposure_stop: bool,
    pub readout: bool,
    pub temperature_control: bool,
    pub close: bool,
    pub release_resource: bool,
}

/// Observable state of the simulated camera
#[derive(Debug, Clone)]
pub struct SimState {
    pub devices: Vec<String>,
    pub failures: Failures,
    pub resource_claimed: bool,
    pub open_sessions: usize,
    pub params: HashMap<Control, f64>,
    pub bin: (u32, u32),
    pub resolution: (u32, u32),
    pub bits_per_pixel: u32,
    pub mem_length: usize,
    pub shutter: Option<ShutterState>,
    pub shutter_history: Vec<ShutterState>,
    pub exposing: bool,
    pub exposure_starts: usize,
    pub exposure_stops: usize,
    pub readouts: usize,
    pub temperature_commands: Vec<f64>,
    pub temperature: f64,
    pub cooling_step: f64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            devices: vec!["QHY9-0c8d2a4e5f61".to_string()],
            failures: Failures::default(),
            resource_claimed: false,
            open_sessions: 0,
            params: HashMap::new(),
            bin: (1, 1),
            resolution: (3584, 2574),
            bits_per_pixel: 16,
            mem_length: 3584 * 2574 * 2,
            shutter: None,
            shutter_history: Vec::new(),
            exposing: false,
            exposure_starts: 0,
            exposure_stops: 0,
            readouts: 0,
            temperature_commands: Vec::new(),
            temperature: 20.0,
            cooling_step: 2.0,
        }
    }
}

fn fail(operation: &'static str) -> SdkError {
    SdkError::Call {
        operation,
        code: SIM_ERROR,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedSdk {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated SDK enumerating the given device ids
    pub fn with_devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sdk = Self::default();
        sdk.state.lock().devices = devices.into_iter().map(Into::into).collect();
        sdk
    }

    /// Snapshot of the camera state
    pub fn state(&self) -> SimState {
        self.state.lock().clone()
    }

    /// Mutate the camera state, e.g. to inject failures
    pub fn update<F: FnOnce(&mut SimState)>(&self, f: F) {
        f(&mut self.state.lock());
    }
}

impl CameraSdk for SimulatedSdk {
    type Session = SimulatedCamera;

    fn init_resource(&mut self) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.init_resource {
            return Err(fail("InitResource"));
        }
        state.resource_claimed = true;
        Ok(())
    }

    fn release_resource(&mut self) -> SdkResult<()> {
        let mut state = self.state.lock();
        state.resource_claimed = false;
        if state.failures.release_resource {
            return Err(fail("ReleaseResource"));
        }
        Ok(())
    }

    fn scan(&mut self) -> SdkResult<usize> {
        let state = self.state.lock();
        if state.failures.scan {
            return Err(fail("Scan"));
        }
        Ok(state.devices.len())
    }

    fn device_id(&mut self, index: usize) -> SdkResult<String> {
        let state = self.state.lock();
        if state.failures.device_id.contains(&index) {
            return Err(fail("GetId"));
        }
        state.devices.get(index).cloned().ok_or(fail("GetId"))
    }

    fn open(&mut self, id: &str) -> SdkResult<SimulatedCamera> {
        let mut state = self.state.lock();
        if state.failures.open.contains(id) || !state.devices.iter().any(|d| d == id) {
            return Err(fail("Open"));
        }
        state.open_sessions += 1;
        debug!("Simulated camera '{}' opened", id);
        Ok(SimulatedCamera {
            state: Arc::clone(&self.state),
            id: id.to_string(),
            open: true,
        })
    }
}

/// Session on the simulated camera
#[derive(Debug)]
pub struct SimulatedCamera {
    state: Arc<Mutex<SimState>>,
    id: String,
    open: bool,
}

impl CameraSession for SimulatedCamera {
    fn init(&mut self) -> SdkResult<()> {
        if self.state.lock().failures.init.contains(&self.id) {
            return Err(fail("Init"));
        }
        Ok(())
    }

    fn close(&mut self) -> SdkResult<()> {
        let mut state = self.state.lock();
        if self.open {
            self.open = false;
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        if state.failures.close {
            return Err(fail("Close"));
        }
        Ok(())
    }

    fn param_range(&mut self, control: Control) -> SdkResult<ControlRange> {
        if self.state.lock().failures.param_range.contains(&control) {
            return Err(fail("GetParamMinMaxStep"));
        }
        let (min, max) = match control {
            Control::Gain => (0.0, 100.0),
            Control::Offset => (0.0, 255.0),
            Control::Exposure => (1.0, 3_600_000_000.0),
            Control::Speed => (0.0, 1.0),
            Control::CurrentTemperature => (-50.0, 50.0),
            Control::CurrentPwm => (0.0, 255.0),
        };
        Ok(ControlRange {
            min,
            max,
            step: 1.0,
        })
    }

    fn set_param(&mut self, control: Control, value: f64) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.set_param.contains(&control) {
            return Err(fail("SetParam"));
        }
        trace!("Simulated {} set to {}", control.name(), value);
        state.params.insert(control, value);
        Ok(())
    }

    fn get_param(&mut self, control: Control) -> SdkResult<f64> {
        let state = self.state.lock();
        if state.failures.get_param.contains(&control) {
            return Err(fail("GetParam"));
        }
        let value = match control {
            Control::CurrentTemperature => state.temperature,
            Control::CurrentPwm => {
                let target = state.temperature_commands.last().copied();
                target
                    .map(|t| ((state.temperature - t).abs() * 32.0).min(255.0))
                    .unwrap_or(0.0)
            }
            other => state.params.get(&other).copied().unwrap_or(0.0),
        };
        Ok(value)
    }

    fn set_bin_mode(&mut self, hor: u32, ver: u32) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.bin_mode {
            return Err(fail("SetBinMode"));
        }
        state.bin = (hor, ver);
        Ok(())
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> SdkResult<()> {
        self.state.lock().resolution = (width, height);
        Ok(())
    }

    fn mem_length(&mut self) -> SdkResult<usize> {
        let state = self.state.lock();
        if state.failures.mem_length {
            return Err(fail("GetMemLength"));
        }
        Ok(state.mem_length)
    }

    fn set_shutter(&mut self, shutter: ShutterState) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.shutter {
            return Err(fail("SetShutter"));
        }
        state.shutter = Some(shutter);
        state.shutter_history.push(shutter);
        Ok(())
    }

    fn start_single_exposure(&mut self) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.exposure_start {
            return Err(fail("ExpSingleFrame"));
        }
        state.exposing = true;
        state.exposure_starts += 1;
        Ok(())
    }

    fn stop_single_exposure(&mut self) -> SdkResult<()> {
        let mut state = self.state.lock();
        if state.failures.exposure_stop {
            return Err(fail("StopExpSingle"));
        }
        state.exposing = false;
        state.exposure_stops += 1;
        Ok(())
    }

    fn read_single_frame(&mut self, buffer: &mut [u8]) -> SdkResult<FrameInfo> {
        let mut state = self.state.lock();
        state.readouts += 1;
        let was_exposing = std::mem::replace(&mut state.exposing, false);
        if state.failures.readout || !was_exposing {
            return Err(fail("GetSingleFrame"));
        }

        let info = FrameInfo {
            width: state.resolution.0 / state.bin.0.max(1),
            height: state.resolution.1 / state.bin.1.max(1),
            bits_per_pixel: state.bits_per_pixel,
            channels: 1,
        };
        let len = info.byte_len();
        if len > buffer.len() {
            return Err(SdkError::Call {
                operation: "GetSingleFrame",
                code: -2,
            });
        }

        // Horizontal ramp, little-endian 16-bit samples
        let width = info.width.max(1) as usize;
        for (i, pixel) in buffer[..len].chunks_exact_mut(2).enumerate() {
            let value = ((i % width) as u16).wrapping_mul(16);
            pixel.copy_from_slice(&value.to_le_bytes());
        }

        Ok(info)
    }

    fn control_temperature(&mut self, target: f64) -> SdkResult<()> {
        let mut state = self.state.lock();
        state.temperature_commands.push(target);
        if state.failures.temperature_control {
            return Err(fail("ControlTemp"));
        }
        let delta = target - state.temperature;
        let step = delta.clamp(-state.cooling_step, state.cooling_step);
        state.temperature += step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_device_fails() {
        let mut sdk = SimulatedSdk::with_devices(["QHY8L-1"]);

        assert!(sdk.open("QHY9-1").is_err());
        assert!(sdk.open("QHY8L-1").is_ok());
        assert_eq!(sdk.state().open_sessions, 1);
    }

    #[test]
    fn test_thermal_model_steps_toward_target() {
        let mut sdk = SimulatedSdk::new();
        let mut camera = sdk.open("QHY9-0c8d2a4e5f61").unwrap();

        camera.control_temperature(15.0).unwrap();
        assert_eq!(camera.get_param(Control::CurrentTemperature).unwrap(), 18.0);

        camera.control_temperature(17.5).unwrap();
        assert_eq!(camera.get_param(Control::CurrentTemperature).unwrap(), 17.5);
    }

    #[test]
    fn test_readout_requires_started_exposure() {
        let mut sdk = SimulatedSdk::new();
        sdk.update(|s| {
            s.resolution = (8, 4);
            s.mem_length = 64;
        });
        let mut camera = sdk.open("QHY9-0c8d2a4e5f61").unwrap();
        let mut buffer = vec![0u8; 64];

        assert!(camera.read_single_frame(&mut buffer).is_err());

        camera.start_single_exposure().unwrap();
        let info = camera.read_single_frame(&mut buffer).unwrap();
        assert_eq!((info.width, info.height, info.bits_per_pixel), (8, 4, 16));
        assert_eq!(&buffer[2..4], &16u16.to_le_bytes());
        assert_eq!(sdk.state().readouts, 2);
    }
}
