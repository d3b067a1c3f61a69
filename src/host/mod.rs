//! Host callback surface.
//!
//! Everything the controller tells the outside world goes through `HostSurface`: capability
//! negotiation, timer arming, property publishing, frame completion and config storage.

mod command;
mod event_host;

pub use command::{parse_command, HostCommand};
pub use event_host::EventHost;

use crate::error::Result;
use crate::frame::{CapturedFrame, FrameGeometry};
use crate::settings::{DriverSettings, ReadoutSpeed};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Features the driver declares to the host at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_cooler: bool,
    pub has_shutter: bool,
    pub can_bin: bool,
    pub can_abort: bool,
    pub can_subframe: bool,
    pub has_guide_head: bool,
    pub has_st4_port: bool,
}

impl Capabilities {
    pub const QHY9: Capabilities = Capabilities {
        has_cooler: true,
        has_shutter: true,
        can_bin: true,
        can_abort: true,
        can_subframe: false,
        has_guide_head: false,
        has_st4_port: false,
    };
}

/// Opaque identifier of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

/// Property state shown next to a published value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

/// How close the sensor is to the requested temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolingStatus {
    OnTarget,
    Converging,
    Alert,
}

impl CoolingStatus {
    pub fn property_state(&self) -> PropertyState {
        match self {
            CoolingStatus::OnTarget => PropertyState::Ok,
            CoolingStatus::Converging => PropertyState::Busy,
            CoolingStatus::Alert => PropertyState::Alert,
        }
    }
}

/// Sensor temperature as published each tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub celsius: f64,
    pub cooler_duty: Option<f64>,
    pub target: Option<f64>,
    pub state: PropertyState,
}

pub trait HostSurface {
    fn declare_capabilities(&mut self, capabilities: Capabilities);

    /// Arm a one-shot timer; the host calls back into the controller's tick once it fires
    fn set_timer(&mut self, delay: Duration) -> TimerId;

    fn publish_temperature(&mut self, reading: TemperatureReading);

    fn publish_exposure_left(&mut self, seconds: f64);

    fn publish_geometry(&mut self, geometry: FrameGeometry);

    fn publish_ccd_settings(&mut self, gain: u32, offset: u32, state: PropertyState);

    fn publish_readout_speed(&mut self, speed: ReadoutSpeed, state: PropertyState);

    fn exposure_complete(&mut self, frame: CapturedFrame);

    /// Persist the driver settings to host-managed configuration storage
    fn save_config(&mut self, settings: &DriverSettings) -> Result<()>;
}
