use super::Qhy9Controller;
use crate::config::CoolingConfig;
use crate::error::CameraError;
use crate::host::{CoolingStatus, HostSurface, PropertyState, TemperatureReading};
use crate::sdk::{CameraSdk, CameraSession, Control};
use tracing::{debug, info, warn};

/// Classify a sensor reading against the regulation target
pub fn classify_temperature(reading: f64, target: f64, bands: &CoolingConfig) -> CoolingStatus {
    let deviation = (reading - target).abs();
    if deviation < bands.on_target_band {
        CoolingStatus::OnTarget
    } else if deviation < bands.converging_band {
        CoolingStatus::Converging
    } else {
        CoolingStatus::Alert
    }
}

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Set the regulation target in Celsius. NaN clears the target and stops regulation.
    ///
    /// Only the stored target changes here; the cooler is driven toward it on each tick.
    pub fn set_temperature(&mut self, target: f64) -> Result<(), CameraError> {
        if target.is_nan() {
            if self.target_temperature.take().is_some() {
                info!("Temperature regulation disabled");
            }
            return Ok(());
        }

        let min = self.config.cooling.min_target_celsius;
        if target < min || target.is_infinite() {
            return Err(CameraError::OutOfRange {
                parameter: "temperature".to_string(),
                value: target,
                min,
                max: f64::INFINITY,
            });
        }

        info!("Temperature target set to {:.1}C", target);
        self.target_temperature = Some(target);
        Ok(())
    }

    pub(super) fn regulate_temperature(&mut self) {
        let (Some(target), Some(session)) = (self.target_temperature, self.session.as_mut()) else {
            return;
        };

        if let Err(e) = session.control_temperature(target) {
            warn!("Temperature control toward {:.1}C failed: {}", target, e);
        }
    }

    pub(super) fn report_temperature(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let celsius = match session.get_param(Control::CurrentTemperature) {
            Ok(celsius) => celsius,
            Err(e) => {
                warn!("Could not read sensor temperature: {}", e);
                return;
            }
        };

        let cooler_duty = match session.get_param(Control::CurrentPwm) {
            Ok(duty) => Some(duty),
            Err(e) => {
                debug!("Could not read cooler duty: {}", e);
                None
            }
        };

        let state = match self.target_temperature {
            Some(target) => {
                classify_temperature(celsius, target, &self.config.cooling).property_state()
            }
            None => PropertyState::Idle,
        };

        debug!(
            "Current temp: {:.1}   Target temp: {:?}   PWM: {:?}",
            celsius, self.target_temperature, cooler_duty
        );

        self.host.publish_temperature(TemperatureReading {
            celsius,
            cooler_duty,
            target: self.target_temperature,
            state,
        });
    }
}
