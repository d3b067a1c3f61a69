pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod frame;
pub mod host;
pub mod runtime;
pub mod sdk;
pub mod settings;
pub mod storage;

pub use config::DriverConfig;
pub use controller::{
    classify_temperature, ActiveExposure, Dispatch, DriverStatus, PropertyRequest, Qhy9Controller,
    SwitchState,
};
pub use error::{CameraError, DriverError, EventBusError, Result, SdkError};
pub use events::{DriverEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{
    CapturedFrame, FrameBuffer, FrameGeometry, FrameInfo, FrameMetadata, FrameType, ShutterState,
};
pub use host::{
    Capabilities, CoolingStatus, EventHost, HostCommand, HostSurface, PropertyState,
    TemperatureReading, TimerId,
};
pub use runtime::{DriverRuntime, ShutdownReason};
pub use sdk::{CameraSdk, CameraSession, Control, ControlRange, QhySdk, SimulatedSdk};
pub use settings::{DriverSettings, ReadoutSpeed, SettingsStore};
pub use storage::{FrameStore, StoredFrame};
