use crate::error::EventBusError;
use crate::frame::{CapturedFrame, FrameGeometry};
use crate::host::{Capabilities, PropertyState, TemperatureReading};
use crate::settings::ReadoutSpeed;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notifications the driver publishes to the host side
#[derive(Debug, Clone)]
pub enum DriverEvent {
    CapabilitiesDeclared(Capabilities),
    TemperatureUpdated(TemperatureReading),
    ExposureProgress { seconds_left: f64 },
    GeometryChanged(FrameGeometry),
    CcdSettingsChanged {
        gain: u32,
        offset: u32,
        state: PropertyState,
    },
    ReadoutSpeedChanged {
        speed: ReadoutSpeed,
        state: PropertyState,
    },
    ExposureComplete(CapturedFrame),
    ShutdownRequested { reason: String },
}

impl DriverEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            DriverEvent::CapabilitiesDeclared(caps) => format!("Capabilities declared: {:?}", caps),
            DriverEvent::TemperatureUpdated(reading) => match reading.target {
                Some(target) => format!(
                    "Temperature {:.1}C (target {:.1}C, {:?})",
                    reading.celsius, target, reading.state
                ),
                None => format!("Temperature {:.1}C", reading.celsius),
            },
            DriverEvent::ExposureProgress { seconds_left } => {
                format!("Exposure {:.1}s left", seconds_left)
            }
            DriverEvent::GeometryChanged(geometry) => format!(
                "Frame geometry {}x{} (bin {}, pixel {:.1}um)",
                geometry.width, geometry.height, geometry.bin, geometry.pixel_size_x
            ),
            DriverEvent::CcdSettingsChanged { gain, offset, .. } => {
                format!("Gain {}% offset {}", gain, offset)
            }
            DriverEvent::ReadoutSpeedChanged { speed, .. } => {
                format!("Readout speed is now {}", speed.as_str())
            }
            DriverEvent::ExposureComplete(frame) => format!(
                "Exposure {} complete ({}x{}, {} bytes)",
                frame.exposure_id,
                frame.info.width,
                frame.info.height,
                frame.data.len()
            ),
            DriverEvent::ShutdownRequested { reason } => format!("Shutdown requested: {}", reason),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            DriverEvent::CapabilitiesDeclared(_) => "capabilities_declared",
            DriverEvent::TemperatureUpdated(_) => "temperature_updated",
            DriverEvent::ExposureProgress { .. } => "exposure_progress",
            DriverEvent::GeometryChanged(_) => "geometry_changed",
            DriverEvent::CcdSettingsChanged { .. } => "ccd_settings_changed",
            DriverEvent::ReadoutSpeedChanged { .. } => "readout_speed_changed",
            DriverEvent::ExposureComplete(_) => "exposure_complete",
            DriverEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for host-side consumers using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DriverEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DriverEvent) -> Result<usize, EventBusError> {
        match &event {
            DriverEvent::ExposureComplete(_) | DriverEvent::ShutdownRequested { .. } => {
                info!("{}", event.description());
            }
            DriverEvent::TemperatureUpdated(reading) if reading.state == PropertyState::Alert => {
                warn!("{}", event.description());
            }
            _ => debug!("{}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &DriverEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<DriverEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<DriverEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<DriverEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(DriverEvent::ExposureProgress { seconds_left: 3.0 })
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            DriverEvent::ExposureProgress { seconds_left } => assert_eq!(seconds_left, 3.0),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);

        assert!(event_bus
            .publish(DriverEvent::ShutdownRequested {
                reason: "test".to_string()
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "test",
        );

        event_bus
            .publish(DriverEvent::ExposureProgress { seconds_left: 1.0 })
            .unwrap();
        event_bus
            .publish(DriverEvent::ShutdownRequested {
                reason: "done".to_string(),
            })
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "shutdown_requested");
    }
}
