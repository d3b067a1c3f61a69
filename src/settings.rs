use crate::config::SensorConfig;
use crate::error::{CameraError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sensor readout speed mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadoutSpeed {
    #[default]
    Low,
    High,
}

impl ReadoutSpeed {
    /// Value of the vendor speed control for this mode
    pub fn control_value(&self) -> f64 {
        match self {
            ReadoutSpeed::Low => 0.0,
            ReadoutSpeed::High => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadoutSpeed::Low => "LOW",
            ReadoutSpeed::High => "HIGH",
        }
    }
}

/// User-facing camera settings kept across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    pub gain: u32,
    pub offset: u32,
    #[serde(default)]
    pub readout_speed: ReadoutSpeed,
}

impl DriverSettings {
    pub const GAIN_RANGE: (u32, u32) = (1, 100);
    pub const OFFSET_RANGE: (u32, u32) = (1, 255);

    pub fn from_sensor(sensor: &SensorConfig) -> Self {
        Self {
            gain: sensor.gain,
            offset: sensor.offset,
            readout_speed: ReadoutSpeed::Low,
        }
    }

    /// Check gain and offset against the ranges the camera accepts
    pub fn validate(&self) -> std::result::Result<(), CameraError> {
        for (parameter, value, (min, max)) in [
            ("gain", self.gain, Self::GAIN_RANGE),
            ("offset", self.offset, Self::OFFSET_RANGE),
        ] {
            if !(min..=max).contains(&value) {
                return Err(CameraError::OutOfRange {
                    parameter: parameter.to_string(),
                    value: value as f64,
                    min: min as f64,
                    max: max as f64,
                });
            }
        }
        Ok(())
    }
}

/// TOML file backing the driver settings
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load saved settings, falling back to `defaults` when nothing usable is stored
    pub fn load_or(&self, defaults: DriverSettings) -> DriverSettings {
        match self.load() {
            Ok(Some(settings)) => {
                info!("Loaded driver settings from {}", self.path.display());
                settings
            }
            Ok(None) => {
                debug!("No saved settings at {}", self.path.display());
                defaults
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable settings file {}: {}",
                    self.path.display(),
                    e
                );
                defaults
            }
        }
    }

    pub fn load(&self) -> Result<Option<DriverSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let settings: DriverSettings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn save(&self, settings: &DriverSettings) -> Result<()> {
        let contents = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, contents)?;
        debug!("Saved driver settings to {}", self.path.display());
        Ok(())
    }
}
