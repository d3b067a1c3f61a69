use super::{Capabilities, HostSurface, PropertyState, TemperatureReading, TimerId};
use crate::error::Result;
use crate::events::{DriverEvent, EventBus};
use crate::frame::{CapturedFrame, FrameGeometry};
use crate::settings::{DriverSettings, ReadoutSpeed, SettingsStore};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Last values published through the host surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishedState {
    pub capabilities: Option<Capabilities>,
    pub temperature: Option<TemperatureReading>,
    pub exposure_left: Option<f64>,
    pub geometry: Option<FrameGeometry>,
    pub gain: Option<u32>,
    pub offset: Option<u32>,
    pub readout_speed: Option<ReadoutSpeed>,
    pub frames_completed: u64,
}

/// Host surface of the standalone runtime: publishes everything on the event bus
pub struct EventHost {
    event_bus: EventBus,
    settings_store: SettingsStore,
    next_timer_id: u64,
    armed: Option<(TimerId, Duration)>,
    published: PublishedState,
}

impl EventHost {
    pub fn new(event_bus: EventBus, settings_store: SettingsStore) -> Self {
        Self {
            event_bus,
            settings_store,
            next_timer_id: 0,
            armed: None,
            published: PublishedState::default(),
        }
    }

    /// Take the timer armed since the last call, if any
    pub fn take_timer(&mut self) -> Option<(TimerId, Duration)> {
        self.armed.take()
    }

    pub fn published(&self) -> &PublishedState {
        &self.published
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn emit(&self, event: DriverEvent) {
        // Nobody listening is normal for a headless run
        if let Err(e) = self.event_bus.publish(event) {
            trace!("Event not delivered: {}", e);
        }
    }
}

impl HostSurface for EventHost {
    fn declare_capabilities(&mut self, capabilities: Capabilities) {
        self.published.capabilities = Some(capabilities);
        self.emit(DriverEvent::CapabilitiesDeclared(capabilities));
    }

    fn set_timer(&mut self, delay: Duration) -> TimerId {
        self.next_timer_id += 1;
        let id = TimerId(self.next_timer_id);
        if let Some((replaced, _)) = self.armed.replace((id, delay)) {
            debug!("Timer {:?} replaced by {:?}", replaced, id);
        }
        id
    }

    fn publish_temperature(&mut self, reading: TemperatureReading) {
        self.published.temperature = Some(reading);
        self.emit(DriverEvent::TemperatureUpdated(reading));
    }

    fn publish_exposure_left(&mut self, seconds: f64) {
        self.published.exposure_left = Some(seconds);
        self.emit(DriverEvent::ExposureProgress {
            seconds_left: seconds,
        });
    }

    fn publish_geometry(&mut self, geometry: FrameGeometry) {
        self.published.geometry = Some(geometry);
        self.emit(DriverEvent::GeometryChanged(geometry));
    }

    fn publish_ccd_settings(&mut self, gain: u32, offset: u32, state: PropertyState) {
        self.published.gain = Some(gain);
        self.published.offset = Some(offset);
        self.emit(DriverEvent::CcdSettingsChanged {
            gain,
            offset,
            state,
        });
    }

    fn publish_readout_speed(&mut self, speed: ReadoutSpeed, state: PropertyState) {
        self.published.readout_speed = Some(speed);
        self.emit(DriverEvent::ReadoutSpeedChanged { speed, state });
    }

    fn exposure_complete(&mut self, frame: CapturedFrame) {
        self.published.exposure_left = None;
        self.published.frames_completed += 1;
        self.emit(DriverEvent::ExposureComplete(frame));
    }

    fn save_config(&mut self, settings: &DriverSettings) -> Result<()> {
        self.settings_store.save(settings)
    }
}
