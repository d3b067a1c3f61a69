//! Property change requests and their dispatch onto the controller.
//!
//! The host forwards every switch, number, text and BLOB update it receives. The controller
//! claims the ones addressed to its device that it owns: its own gain/offset and readout
//! speed vectors and the standard CCD properties that drive connect, exposure, abort,
//! binning, temperature and frame type.

use super::Qhy9Controller;
use crate::error::CameraError;
use crate::frame::FrameType;
use crate::host::{HostSurface, PropertyState};
use crate::sdk::{CameraSdk, CameraSession, Control};
use crate::settings::{DriverSettings, ReadoutSpeed};
use tracing::{debug, info, warn};

/// Property and member names
pub mod names {
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
    pub const CCD_EXPOSURE_VALUE: &str = "CCD_EXPOSURE_VALUE";

    pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
    pub const ABORT: &str = "ABORT";

    pub const CCD_BINNING: &str = "CCD_BINNING";
    pub const HOR_BIN: &str = "HOR_BIN";
    pub const VER_BIN: &str = "VER_BIN";

    pub const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";
    pub const CCD_TEMPERATURE_VALUE: &str = "CCD_TEMPERATURE_VALUE";

    pub const CCD_FRAME_TYPE: &str = "CCD_FRAME_TYPE";
    pub const FRAME_LIGHT: &str = "FRAME_LIGHT";
    pub const FRAME_BIAS: &str = "FRAME_BIAS";
    pub const FRAME_DARK: &str = "FRAME_DARK";
    pub const FRAME_FLAT: &str = "FRAME_FLAT";

    pub const CCD_SETTINGS: &str = "QHY9_CCD_SETTINGS";
    pub const GAIN: &str = "GAIN";
    pub const OFFSET: &str = "OFFSET";

    pub const READOUT_SPEED: &str = "QHY9_READOUT_SPEED";
    pub const SPEED_LOW: &str = "SPEED_LOW";
    pub const SPEED_HIGH: &str = "SPEED_HIGH";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobElement {
    pub name: String,
    pub format: String,
    pub data: Vec<u8>,
}

/// A client's request to change one property vector
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyRequest {
    Switch {
        device: String,
        name: String,
        states: Vec<(String, SwitchState)>,
    },
    Number {
        device: String,
        name: String,
        values: Vec<(String, f64)>,
    },
    Text {
        device: String,
        name: String,
        texts: Vec<(String, String)>,
    },
    Blob {
        device: String,
        name: String,
        blobs: Vec<BlobElement>,
    },
}

impl PropertyRequest {
    pub fn switch(device: &str, name: &str, states: Vec<(String, SwitchState)>) -> Self {
        PropertyRequest::Switch {
            device: device.to_string(),
            name: name.to_string(),
            states,
        }
    }

    pub fn number(device: &str, name: &str, values: Vec<(String, f64)>) -> Self {
        PropertyRequest::Number {
            device: device.to_string(),
            name: name.to_string(),
            values,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            PropertyRequest::Switch { device, .. }
            | PropertyRequest::Number { device, .. }
            | PropertyRequest::Text { device, .. }
            | PropertyRequest::Blob { device, .. } => device,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PropertyRequest::Switch { name, .. }
            | PropertyRequest::Number { name, .. }
            | PropertyRequest::Text { name, .. }
            | PropertyRequest::Blob { name, .. } => name,
        }
    }
}

/// Whether the controller took ownership of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Claimed,
    Ignored,
}

fn is_on(states: &[(String, SwitchState)], member: &str) -> bool {
    states
        .iter()
        .any(|(name, state)| name == member && *state == SwitchState::On)
}

fn member(values: &[(String, f64)], member: &str) -> Option<f64> {
    values
        .iter()
        .find(|(name, _)| name == member)
        .map(|(_, value)| *value)
}

fn bin_factor(value: f64) -> Result<i32, CameraError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(CameraError::InvalidParameter {
            details: format!("binning factor must be an integer, got {}", value),
        });
    }
    Ok(value.clamp(i32::MIN as f64, i32::MAX as f64) as i32)
}

fn checked_setting(parameter: &str, value: f64, range: (u32, u32)) -> Result<u32, CameraError> {
    let (min, max) = (range.0 as f64, range.1 as f64);
    if !(min..=max).contains(&value) {
        return Err(CameraError::OutOfRange {
            parameter: parameter.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(value.round() as u32)
}

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Route a property change request to the matching controller operation
    pub fn handle_request(&mut self, request: &PropertyRequest) -> Result<Dispatch, CameraError> {
        if request.device() != self.config.device.name {
            return Ok(Dispatch::Ignored);
        }

        match request {
            PropertyRequest::Switch { name, states, .. } => self.handle_switch(name, states),
            PropertyRequest::Number { name, values, .. } => self.handle_number(name, values),
            PropertyRequest::Text { name, .. } | PropertyRequest::Blob { name, .. } => {
                debug!("Not claiming {} update", name);
                Ok(Dispatch::Ignored)
            }
        }
    }

    fn handle_switch(
        &mut self,
        name: &str,
        states: &[(String, SwitchState)],
    ) -> Result<Dispatch, CameraError> {
        match name {
            names::CONNECTION => {
                if is_on(states, names::CONNECT) {
                    self.connect()?;
                } else if is_on(states, names::DISCONNECT) {
                    self.disconnect();
                }
            }
            names::CCD_ABORT_EXPOSURE => {
                if is_on(states, names::ABORT) {
                    self.abort_exposure()?;
                }
            }
            names::CCD_FRAME_TYPE => {
                let selected = [
                    (names::FRAME_LIGHT, FrameType::Light),
                    (names::FRAME_BIAS, FrameType::Bias),
                    (names::FRAME_DARK, FrameType::Dark),
                    (names::FRAME_FLAT, FrameType::Flat),
                ]
                .into_iter()
                .find(|(member, _)| is_on(states, member))
                .map(|(_, frame_type)| frame_type);

                match selected {
                    Some(frame_type) => self.set_frame_type(frame_type),
                    None => {
                        return Err(CameraError::InvalidParameter {
                            details: "no frame type selected".to_string(),
                        })
                    }
                }
            }
            names::READOUT_SPEED => {
                let speed = if is_on(states, names::SPEED_HIGH) {
                    ReadoutSpeed::High
                } else if is_on(states, names::SPEED_LOW) {
                    ReadoutSpeed::Low
                } else {
                    return Err(CameraError::InvalidParameter {
                        details: "no readout speed selected".to_string(),
                    });
                };
                self.set_readout_speed(speed);
            }
            _ => return Ok(Dispatch::Ignored),
        }

        Ok(Dispatch::Claimed)
    }

    fn handle_number(
        &mut self,
        name: &str,
        values: &[(String, f64)],
    ) -> Result<Dispatch, CameraError> {
        match name {
            names::CCD_EXPOSURE => {
                let duration = member(values, names::CCD_EXPOSURE_VALUE).ok_or_else(|| {
                    CameraError::InvalidParameter {
                        details: format!("missing {}", names::CCD_EXPOSURE_VALUE),
                    }
                })?;
                self.start_exposure(duration)?;
            }
            names::CCD_BINNING => {
                let current = self.geometry.bin as f64;
                let hor = bin_factor(member(values, names::HOR_BIN).unwrap_or(current))?;
                let ver = bin_factor(member(values, names::VER_BIN).unwrap_or(current))?;
                self.update_ccd_bin(hor, ver)?;
            }
            names::CCD_TEMPERATURE => {
                let target = member(values, names::CCD_TEMPERATURE_VALUE).ok_or_else(|| {
                    CameraError::InvalidParameter {
                        details: format!("missing {}", names::CCD_TEMPERATURE_VALUE),
                    }
                })?;
                self.set_temperature(target)?;
            }
            names::CCD_SETTINGS => {
                let gain = member(values, names::GAIN)
                    .map(|v| checked_setting("gain", v, DriverSettings::GAIN_RANGE))
                    .transpose()?;
                let offset = member(values, names::OFFSET)
                    .map(|v| checked_setting("offset", v, DriverSettings::OFFSET_RANGE))
                    .transpose()?;
                self.set_ccd_settings(gain, offset)?;
            }
            _ => return Ok(Dispatch::Ignored),
        }

        Ok(Dispatch::Claimed)
    }

    /// Apply gain and/or offset. Without a session the values are kept for the next connect.
    ///
    /// Either both values take effect or neither does: when the camera rejects one, any
    /// value already written is put back and the stored settings stay unchanged.
    pub fn set_ccd_settings(
        &mut self,
        gain: Option<u32>,
        offset: Option<u32>,
    ) -> Result<(), CameraError> {
        let previous = self.settings;
        let updates = [
            (Control::Gain, gain, previous.gain),
            (Control::Offset, offset, previous.offset),
        ];

        if let Some(session) = self.session.as_mut() {
            let mut written = Vec::new();
            for (control, value, old) in updates {
                let Some(value) = value else {
                    continue;
                };
                if let Err(e) = session.set_param(control, value as f64) {
                    for (control, old) in written {
                        if let Err(e) = session.set_param(control, old as f64) {
                            debug!("Could not restore {}: {}", control.name(), e);
                        }
                    }
                    self.host
                        .publish_ccd_settings(previous.gain, previous.offset, PropertyState::Alert);
                    return Err(CameraError::ParameterRejected {
                        parameter: control.name().to_string(),
                        value: value as f64,
                        code: e.code(),
                    });
                }
                written.push((control, old));
            }
        }

        if let Some(gain) = gain {
            self.settings.gain = gain;
        }
        if let Some(offset) = offset {
            self.settings.offset = offset;
        }

        info!(
            "CCD settings: gain {} offset {}",
            self.settings.gain, self.settings.offset
        );
        self.host
            .publish_ccd_settings(self.settings.gain, self.settings.offset, PropertyState::Ok);
        Ok(())
    }

    /// Switch the readout speed and persist the choice
    pub fn set_readout_speed(&mut self, speed: ReadoutSpeed) {
        self.settings.readout_speed = speed;

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.set_param(Control::Speed, speed.control_value()) {
                warn!("Could not set readout speed {}: {}", speed.as_str(), e);
            }
        }

        info!("Readout speed set to {}", speed.as_str());
        self.host.publish_readout_speed(speed, PropertyState::Ok);

        if let Err(e) = self.host.save_config(&self.settings) {
            warn!("Could not save driver settings: {}", e);
        }
    }
}
