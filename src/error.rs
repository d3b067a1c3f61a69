use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures of controller operations, as surfaced to the host
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("No camera matching '{prefix}' found")]
    DeviceNotFound { prefix: String },

    #[error("Camera initialization failed: {details}")]
    InitializationFailed { details: String },

    #[error("Camera rejected {parameter} = {value} (status {code})")]
    ParameterRejected {
        parameter: String,
        value: f64,
        code: i32,
    },

    #[error("Exposure start failed (status {code})")]
    ExposureStartFailed { code: i32 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("{parameter} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        parameter: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Abort exposure failed (status {code})")]
    AbortFailed { code: i32 },

    #[error("Camera is not connected")]
    NotConnected,

    #[error("An exposure is already in progress")]
    ExposureInProgress,
}

/// Failures reported by a camera SDK binding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SdkError {
    #[error("Failed to load camera library from {path}: {details}")]
    LibraryLoad { path: String, details: String },

    #[error("Missing symbol {symbol}: {details}")]
    Symbol { symbol: String, details: String },

    #[error("{operation} failed with status {code}")]
    Call { operation: &'static str, code: i32 },

    #[error("Invalid device id: {details}")]
    InvalidId { details: String },
}

impl SdkError {
    /// Vendor status code carried by the error, or -1 for non-call failures
    pub fn code(&self) -> i32 {
        match self {
            SdkError::Call { code, .. } => *code,
            _ => -1,
        }
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl DriverError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
