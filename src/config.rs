use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DriverConfig {
    pub device: DeviceConfig,
    pub sensor: SensorConfig,
    pub timing: TimingConfig,
    pub cooling: CoolingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Device name requests must be addressed to
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Camera id prefix matched against the enumerated vendor ids
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Explicit path to libqhyccd; the system search path is used when unset
    #[serde(default)]
    pub sdk_library: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorConfig {
    /// Native sensor width in pixels
    #[serde(default = "default_sensor_width")]
    pub width: u32,

    /// Native sensor height in pixels
    #[serde(default = "default_sensor_height")]
    pub height: u32,

    /// Native pixel pitch in microns
    #[serde(default = "default_pixel_size")]
    pub pixel_size_um: f64,

    /// Readout bit depth
    #[serde(default = "default_bits_per_pixel")]
    pub bits_per_pixel: u32,

    /// Gain applied on connect (percent)
    #[serde(default = "default_gain")]
    pub gain: u32,

    /// Offset applied on connect
    #[serde(default = "default_offset")]
    pub offset: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    /// Delay before the first tick after connect
    #[serde(default = "default_first_tick_ms")]
    pub first_tick_ms: u64,

    /// Delay between regular ticks
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Readout starts once the remaining exposure time drops to this margin
    #[serde(default = "default_readout_margin_ms")]
    pub readout_margin_ms: u64,

    /// Readouts slower than this are reported as warnings
    #[serde(default = "default_readout_warn_ms")]
    pub readout_warn_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CoolingConfig {
    /// Lowest accepted target temperature (Celsius)
    #[serde(default = "default_min_target")]
    pub min_target_celsius: f64,

    /// Deviation below which the sensor is reported on target
    #[serde(default = "default_on_target_band")]
    pub on_target_band: f64,

    /// Deviation below which the sensor is reported converging
    #[serde(default = "default_converging_band")]
    pub converging_band: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory completed frames are written to
    #[serde(default = "default_frame_dir")]
    pub frame_dir: String,

    /// Write completed frames to disk
    #[serde(default = "default_save_frames")]
    pub save_frames: bool,

    /// TOML file holding the persisted driver settings
    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl TimingConfig {
    pub fn first_tick(&self) -> Duration {
        Duration::from_millis(self.first_tick_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn readout_margin(&self) -> Duration {
        Duration::from_millis(self.readout_margin_ms)
    }

    pub fn readout_warn(&self) -> Duration {
        Duration::from_millis(self.readout_warn_ms)
    }
}

impl DriverConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("device.name", default_device_name())?
            .set_default("device.id_prefix", default_id_prefix())?
            .set_default("sensor.width", default_sensor_width())?
            .set_default("sensor.height", default_sensor_height())?
            .set_default("sensor.pixel_size_um", default_pixel_size())?
            .set_default("sensor.bits_per_pixel", default_bits_per_pixel())?
            .set_default("sensor.gain", default_gain())?
            .set_default("sensor.offset", default_offset())?
            .set_default("timing.first_tick_ms", default_first_tick_ms())?
            .set_default("timing.tick_ms", default_tick_ms())?
            .set_default("timing.readout_margin_ms", default_readout_margin_ms())?
            .set_default("timing.readout_warn_ms", default_readout_warn_ms())?
            .set_default("cooling.min_target_celsius", default_min_target())?
            .set_default("cooling.on_target_band", default_on_target_band())?
            .set_default("cooling.converging_band", default_converging_band())?
            .set_default("storage.frame_dir", default_frame_dir())?
            .set_default("storage.save_frames", default_save_frames())?
            .set_default("storage.settings_file", default_settings_file())?
            .set_default(
                "storage.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // QHY9_TIMING__TICK_MS etc.; a double separator keeps snake_case keys intact
            .add_source(
                Environment::with_prefix("QHY9")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: DriverConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.id_prefix.is_empty() {
            return Err(ConfigError::Message(
                "Device id prefix must not be empty".to_string(),
            ));
        }

        if self.sensor.width == 0 || self.sensor.height == 0 {
            return Err(ConfigError::Message(
                "Sensor resolution must be greater than 0".to_string(),
            ));
        }

        if !(self.sensor.pixel_size_um > 0.0) {
            return Err(ConfigError::Message(
                "Sensor pixel size must be greater than 0".to_string(),
            ));
        }

        if self.sensor.bits_per_pixel == 0 || self.sensor.bits_per_pixel % 8 != 0 {
            return Err(ConfigError::Message(
                "Sensor bit depth must be a positive multiple of 8".to_string(),
            ));
        }

        if !(1..=100).contains(&self.sensor.gain) {
            return Err(ConfigError::Message(
                "Sensor gain must be within 1-100".to_string(),
            ));
        }

        if !(1..=255).contains(&self.sensor.offset) {
            return Err(ConfigError::Message(
                "Sensor offset must be within 1-255".to_string(),
            ));
        }

        if self.timing.tick_ms == 0 || self.timing.first_tick_ms == 0 {
            return Err(ConfigError::Message(
                "Tick intervals must be greater than 0".to_string(),
            ));
        }

        if self.cooling.on_target_band <= 0.0
            || self.cooling.converging_band <= self.cooling.on_target_band
        {
            return Err(ConfigError::Message(
                "Cooling bands must satisfy 0 < on_target_band < converging_band".to_string(),
            ));
        }

        if self.storage.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                name: default_device_name(),
                id_prefix: default_id_prefix(),
                sdk_library: None,
            },
            sensor: SensorConfig {
                width: default_sensor_width(),
                height: default_sensor_height(),
                pixel_size_um: default_pixel_size(),
                bits_per_pixel: default_bits_per_pixel(),
                gain: default_gain(),
                offset: default_offset(),
            },
            timing: TimingConfig {
                first_tick_ms: default_first_tick_ms(),
                tick_ms: default_tick_ms(),
                readout_margin_ms: default_readout_margin_ms(),
                readout_warn_ms: default_readout_warn_ms(),
            },
            cooling: CoolingConfig {
                min_target_celsius: default_min_target(),
                on_target_band: default_on_target_band(),
                converging_band: default_converging_band(),
            },
            storage: StorageConfig {
                frame_dir: default_frame_dir(),
                save_frames: default_save_frames(),
                settings_file: default_settings_file(),
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_device_name() -> String {
    "QHY9".to_string()
}
fn default_id_prefix() -> String {
    "QHY9".to_string()
}

fn default_sensor_width() -> u32 {
    3584
}
fn default_sensor_height() -> u32 {
    2574
}
fn default_pixel_size() -> f64 {
    5.4
}
fn default_bits_per_pixel() -> u32 {
    16
}
fn default_gain() -> u32 {
    14
}
fn default_offset() -> u32 {
    107
}

fn default_first_tick_ms() -> u64 {
    500
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_readout_margin_ms() -> u64 {
    1000
}
fn default_readout_warn_ms() -> u64 {
    30_000
}

fn default_min_target() -> f64 {
    -40.0
}
fn default_on_target_band() -> f64 {
    1.0
}
fn default_converging_band() -> f64 {
    4.0
}

fn default_frame_dir() -> String {
    "./frames".to_string()
}
fn default_save_frames() -> bool {
    true
}
fn default_settings_file() -> String {
    "qhy9_settings.toml".to_string()
}
fn default_event_bus_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.sensor.width, 3584);
        assert_eq!(config.sensor.height, 2574);
        assert_eq!(config.timing.first_tick(), Duration::from_millis(500));
        assert_eq!(config.timing.tick(), Duration::from_millis(1000));
        assert_eq!(config.timing.readout_margin(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[timing]\ntick_ms = 250\n\n[cooling]\nmin_target_celsius = -30.0\n"
        )
        .unwrap();

        let config = DriverConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.timing.tick_ms, 250);
        assert_eq!(config.timing.first_tick_ms, 500);
        assert_eq!(config.cooling.min_target_celsius, -30.0);
        assert_eq!(config.device.id_prefix, "QHY9");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DriverConfig::default();

        config.sensor.gain = 0;
        assert!(config.validate().is_err());
        config.sensor.gain = 14;

        config.cooling.converging_band = 0.5;
        assert!(config.validate().is_err());
        config.cooling.converging_band = 4.0;

        config.sensor.bits_per_pixel = 12;
        assert!(config.validate().is_err());
        config.sensor.bits_per_pixel = 16;

        assert!(config.validate().is_ok());
    }
}
