use super::Qhy9Controller;
use crate::error::CameraError;
use crate::frame::{CapturedFrame, FrameType, ShutterState};
use crate::host::HostSurface;
use crate::sdk::{CameraSdk, CameraSession, Control};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An exposure started on the camera and not yet read out
#[derive(Debug, Clone, Serialize)]
pub struct ActiveExposure {
    pub id: Uuid,
    #[serde(skip)]
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub frame_type: FrameType,
}

impl ActiveExposure {
    fn new(duration: Duration, frame_type: FrameType) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            started_at: Utc::now(),
            duration,
            frame_type,
        }
    }

    /// Time left until the requested duration has elapsed, clamped at zero
    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration
            .saturating_sub(now.saturating_duration_since(self.started))
    }
}

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Begin a single exposure of `duration_secs` seconds using the current frame type
    pub fn start_exposure(&mut self, duration_secs: f64) -> Result<(), CameraError> {
        let session = self.session.as_mut().ok_or(CameraError::NotConnected)?;

        if self.exposure.is_some() {
            return Err(CameraError::ExposureInProgress);
        }
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(CameraError::InvalidParameter {
                details: format!("exposure duration must be positive, got {}", duration_secs),
            });
        }

        let frame_type = self.frame_type;
        let shutter = if frame_type.needs_closed_shutter() {
            ShutterState::Closed
        } else {
            ShutterState::Open
        };

        info!(
            "Starting {:.3}s {} exposure",
            duration_secs,
            frame_type.as_str()
        );

        if let Err(e) = session.set_shutter(shutter) {
            warn!("Could not set shutter {:?}: {}", shutter, e);
        }

        let micros = (duration_secs * 1_000_000.0).round();
        let started = session
            .set_param(Control::Exposure, micros)
            .map_err(|e| CameraError::ParameterRejected {
                parameter: "exposure".to_string(),
                value: micros,
                code: e.code(),
            })
            .and_then(|_| {
                session
                    .start_single_exposure()
                    .map_err(|e| CameraError::ExposureStartFailed { code: e.code() })
            });

        if let Err(e) = started {
            error!("Exposure not started: {}", e);
            if let Err(e) = session.set_shutter(ShutterState::Free) {
                debug!("Could not release shutter: {}", e);
            }
            return Err(e);
        }

        let exposure = ActiveExposure::new(Duration::from_secs_f64(duration_secs), frame_type);
        debug!("Exposure {} started", exposure.id);
        self.exposure = Some(exposure);

        Ok(())
    }

    /// Stop the exposure in progress. On success the exposing state is cleared.
    pub fn abort_exposure(&mut self) -> Result<(), CameraError> {
        let session = self.session.as_mut().ok_or(CameraError::NotConnected)?;

        session
            .stop_single_exposure()
            .map_err(|e| CameraError::AbortFailed { code: e.code() })?;

        match self.exposure.take() {
            Some(exposure) => {
                info!("Exposure {} aborted", exposure.id);
                if let Err(e) = session.set_shutter(ShutterState::Free) {
                    warn!("Could not release shutter: {}", e);
                }
            }
            None => debug!("Abort requested with no exposure in progress"),
        }

        Ok(())
    }

    /// Publish the time left and read the frame out once it is within the readout margin
    pub(super) fn poll_exposure(&mut self, now: Instant) {
        let remaining = match &self.exposure {
            Some(exposure) => exposure.remaining(now),
            None => return,
        };

        debug!("Exposure {} ms left", remaining.as_millis());
        self.host.publish_exposure_left(remaining.as_secs_f64());

        if remaining > self.config.timing.readout_margin() {
            return;
        }

        let Some(exposure) = self.exposure.take() else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let readout_started = std::time::Instant::now();
        let result = session.read_single_frame(self.buffer.as_mut_slice());
        let took = readout_started.elapsed();

        if took > self.config.timing.readout_warn() {
            warn!("Frame readout took {} ms", took.as_millis());
        } else {
            debug!("Frame readout took {} ms", took.as_millis());
        }

        match result {
            Ok(info) => {
                info!(
                    "Done exposing {}: {}x{} at {} bpp",
                    exposure.id, info.width, info.height, info.bits_per_pixel
                );
                let frame = CapturedFrame {
                    exposure_id: exposure.id,
                    started_at: exposure.started_at,
                    duration_secs: exposure.duration.as_secs_f64(),
                    frame_type: exposure.frame_type,
                    bin: self.geometry.bin,
                    info,
                    data: Arc::new(self.buffer.snapshot(&info)),
                };
                self.host.exposure_complete(frame);
            }
            Err(e) => error!("Readout of exposure {} failed: {}", exposure.id, e),
        }

        if let Err(e) = session.set_shutter(ShutterState::Free) {
            warn!("Could not release shutter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_remaining_clamps_at_zero() {
        let exposure = ActiveExposure::new(Duration::from_secs(2), FrameType::Light);

        assert_eq!(exposure.remaining(Instant::now()), Duration::from_secs(2));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(exposure.remaining(Instant::now()), Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(exposure.remaining(Instant::now()), Duration::ZERO);
    }
}
