use super::{native_geometry, Qhy9Controller};
use crate::error::CameraError;
use crate::host::HostSurface;
use crate::sdk::{CameraSdk, CameraSession};
use tracing::{debug, info};

/// Largest square binning factor the QHY9 supports
pub const MAX_BIN: i32 = 4;

impl<S: CameraSdk, H: HostSurface> Qhy9Controller<S, H> {
    /// Apply a square binning mode and recompute the frame geometry.
    ///
    /// The frame buffer grows when the new mode needs more memory and is never shrunk.
    pub fn update_ccd_bin(&mut self, hor: i32, ver: i32) -> Result<(), CameraError> {
        if hor != ver || !(1..=MAX_BIN).contains(&hor) {
            return Err(CameraError::InvalidParameter {
                details: format!(
                    "binning must be square and between 1 and {}, got {}x{}",
                    MAX_BIN, hor, ver
                ),
            });
        }

        let session = self.session.as_mut().ok_or(CameraError::NotConnected)?;
        let bin = hor as u32;

        session
            .set_bin_mode(bin, bin)
            .map_err(|e| CameraError::ParameterRejected {
                parameter: "binning".to_string(),
                value: hor as f64,
                code: e.code(),
            })?;

        let geometry = native_geometry(&self.config, bin);
        let required = match session.mem_length() {
            Ok(length) => length.max(geometry.required_bytes()),
            Err(e) => {
                debug!("Could not get buffer size for bin {}: {}", bin, e);
                geometry.required_bytes()
            }
        };
        if self.buffer.ensure_size(required) {
            info!("Frame buffer grown to {} bytes", required);
        }

        info!(
            "Binning {}x{}: frame {}x{}, pixel {:.1}um",
            bin, bin, geometry.width, geometry.height, geometry.pixel_size_x
        );
        self.geometry = geometry;
        self.host.publish_geometry(geometry);

        Ok(())
    }
}
