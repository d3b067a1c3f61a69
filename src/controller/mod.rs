//! Exposure and cooling controller for the QHY9.
//!
//! One controller instance owns the camera session, the frame buffer and the exposure and
//! cooling state. Every operation runs on the caller's thread; the host is expected to call
//! [`Qhy9Controller::tick`] whenever the timer armed through [`HostSurface::set_timer`]
//! fires.

mod binning;
mod cooling;
mod exposure;
pub mod properties;
mod tick;

#[cfg(test)]
mod tests;

pub use cooling::classify_temperature;
pub use exposure::ActiveExposure;
pub use properties::{Dispatch, PropertyRequest, SwitchState};

use crate::config::DriverConfig;
use crate::error::CameraError;
use crate::frame::{FrameBuffer, FrameGeometry, FrameType};
use crate::host::{Capabilities, HostSurface, PropertyState, TemperatureReading, TimerId};
use crate::sdk::{CameraSdk, CameraSession, Control};
use crate::settings::DriverSettings;
use serde::Serialize;
use tracing::{debug, info, warn};

pub struct Qhy9Controller<S: CameraSdk, H: HostSurface> {
    config: DriverConfig,
    sdk: S,
    host: H,
    session: Option<S::Session>,
    resource_claimed: bool,
    exposure: Option<ActiveExposure>,
    frame_type: FrameType,
    target_temperature: Option<f64>,
    buffer: FrameBuffer,
    geometry: FrameGeometry,
    settings: DriverSettings,
    timer_id: Option<TimerId>,
}

/// Point-in-time view of the controller, printed by the `status` command
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub connected: bool,
    pub exposing: bool,
    pub frame_type: FrameType,
    pub target_temperature: Option<f64>,
    pub geometry: FrameGeometry,
    pub settings: DriverSettings,
    pub buffer_bytes: usize,
}

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Create a controller and declare its capabilities to the host
    pub fn new(config: DriverConfig, sdk: S, mut host: H, settings: DriverSettings) -> Self {
        host.declare_capabilities(Capabilities::QHY9);

        let geometry = native_geometry(&config, 1);

        Self {
            config,
            sdk,
            host,
            session: None,
            resource_claimed: false,
            exposure: None,
            frame_type: FrameType::default(),
            target_temperature: None,
            buffer: FrameBuffer::default(),
            geometry,
            settings,
            timer_id: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_exposing(&self) -> bool {
        self.exposure.is_some()
    }

    pub fn exposure(&self) -> Option<&ActiveExposure> {
        self.exposure.as_ref()
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.target_temperature
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn settings(&self) -> DriverSettings {
        self.settings
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn timer_id(&self) -> Option<TimerId> {
        self.timer_id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            connected: self.is_connected(),
            exposing: self.is_exposing(),
            frame_type: self.frame_type,
            target_temperature: self.target_temperature,
            geometry: self.geometry,
            settings: self.settings,
            buffer_bytes: self.buffer.len(),
        }
    }

    /// Frame semantic used by the next exposure
    pub fn set_frame_type(&mut self, frame_type: FrameType) {
        debug!("Frame type set to {}", frame_type.as_str());
        self.frame_type = frame_type;
    }

    /// Locate, open and configure the first camera whose id matches the configured prefix
    pub fn connect(&mut self) -> Result<(), CameraError> {
        if self.session.is_some() {
            warn!("Camera already connected");
            return Ok(());
        }

        info!(
            "Connecting to camera matching '{}'",
            self.config.device.id_prefix
        );

        self.sdk
            .init_resource()
            .map_err(|e| CameraError::InitializationFailed {
                details: format!("SDK resource init failed: {}", e),
            })?;
        self.resource_claimed = true;

        match self.open_matching_camera() {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.release_resource();
                return Err(e);
            }
        }

        self.configure_session();
        self.timer_id = Some(self.host.set_timer(self.config.timing.first_tick()));

        Ok(())
    }

    /// Release the session and the SDK resource claim. Vendor errors are swallowed.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!("Ignoring camera close failure: {}", e);
            }
            info!("Camera disconnected");
        }

        if let Some(exposure) = self.exposure.take() {
            warn!("Exposure {} abandoned by disconnect", exposure.id);
        }

        self.release_resource();
        self.timer_id = None;
    }

    fn release_resource(&mut self) {
        if !self.resource_claimed {
            return;
        }
        self.resource_claimed = false;
        if let Err(e) = self.sdk.release_resource() {
            debug!("Ignoring SDK resource release failure: {}", e);
        }
    }

    fn open_matching_camera(&mut self) -> Result<S::Session, CameraError> {
        let prefix = self.config.device.id_prefix.clone();

        let count = self.sdk.scan().map_err(|e| {
            warn!("Device scan failed: {}", e);
            CameraError::DeviceNotFound {
                prefix: prefix.clone(),
            }
        })?;

        let mut last_failure = None;
        for index in 0..count {
            let id = match self.sdk.device_id(index) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Could not get camera id for index {}: {}", index, e);
                    continue;
                }
            };
            info!("Found camera with id '{}'", id);

            if !id.starts_with(&prefix) {
                continue;
            }

            let mut session = match self.sdk.open(&id) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Could not open camera '{}': {}", id, e);
                    last_failure = Some(format!("open '{}': {}", id, e));
                    continue;
                }
            };

            if let Err(e) = session.init() {
                warn!("Could not initialize camera '{}': {}", id, e);
                if let Err(e) = session.close() {
                    debug!("Close after failed init of '{}' failed: {}", id, e);
                }
                last_failure = Some(format!("init '{}': {}", id, e));
                continue;
            }

            info!("Opened camera '{}'", id);
            return Ok(session);
        }

        Err(match last_failure {
            Some(details) => CameraError::InitializationFailed { details },
            None => CameraError::DeviceNotFound { prefix },
        })
    }

    /// Fixed 1x1 native readout, buffer sizing and the user settings
    fn configure_session(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let sensor = &self.config.sensor;

        if let Err(e) = session.set_bin_mode(1, 1) {
            warn!("Could not set 1x1 binning: {}", e);
        }
        if let Err(e) = session.set_resolution(sensor.width, sensor.height) {
            warn!("Could not set resolution: {}", e);
        }
        self.geometry = native_geometry(&self.config, 1);

        let required = self.geometry.required_bytes();
        let size = match session.mem_length() {
            Ok(length) => length.max(required),
            Err(e) => {
                warn!("Could not get required buffer size ({}), using {}", e, required);
                required
            }
        };
        info!("Setting frame buffer size to {} bytes", size);
        self.buffer = FrameBuffer::with_capacity(size);

        apply_control(session, Control::Gain, self.settings.gain as f64);
        apply_control(session, Control::Offset, self.settings.offset as f64);
        let speed = self.settings.readout_speed.control_value();
        if let Err(e) = session.set_param(Control::Speed, speed) {
            warn!("Could not set readout speed: {}", e);
        }

        match session.get_param(Control::CurrentTemperature) {
            Ok(celsius) => {
                info!(
                    "Current temp: {:.1}   Target temp: {:?}",
                    celsius, self.target_temperature
                );
                self.host.publish_temperature(TemperatureReading {
                    celsius,
                    cooler_duty: None,
                    target: self.target_temperature,
                    state: PropertyState::Busy,
                });
            }
            Err(e) => warn!("Could not read sensor temperature: {}", e),
        }

        self.host.publish_geometry(self.geometry);
        self.host
            .publish_ccd_settings(self.settings.gain, self.settings.offset, PropertyState::Ok);
        self.host
            .publish_readout_speed(self.settings.readout_speed, PropertyState::Ok);
    }
}

/// Query the range of a control and set it; failures leave the vendor default in place
fn apply_control<C: CameraSession>(session: &mut C, control: Control, value: f64) {
    match session.param_range(control) {
        Ok(range) => {
            info!(
                "{} settings ({:.1}, {:.1}, +{:.1}), setting to {:.1}",
                control.name(),
                range.min,
                range.max,
                range.step,
                value
            );
            if let Err(e) = session.set_param(control, value) {
                warn!("Could not set {} to {:.1}: {}", control.name(), value, e);
            }
        }
        Err(e) => warn!("Could not get min/max/step for {}: {}", control.name(), e),
    }
}

fn native_geometry(config: &DriverConfig, bin: u32) -> FrameGeometry {
    FrameGeometry::binned(
        config.sensor.width,
        config.sensor.height,
        config.sensor.bits_per_pixel,
        config.sensor.pixel_size_um,
        bin,
    )
}
