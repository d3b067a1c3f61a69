use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Frame semantic requested by the client for the next exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameType {
    #[default]
    Light,
    Bias,
    Dark,
    Flat,
}

impl FrameType {
    /// Dark and bias frames measure sensor-only signal and need the shutter closed
    pub fn needs_closed_shutter(&self) -> bool {
        matches!(self, FrameType::Dark | FrameType::Bias)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Light => "light",
            FrameType::Bias => "bias",
            FrameType::Dark => "dark",
            FrameType::Flat => "flat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "light" => Some(FrameType::Light),
            "bias" => Some(FrameType::Bias),
            "dark" => Some(FrameType::Dark),
            "flat" => Some(FrameType::Flat),
            _ => None,
        }
    }
}

/// Mechanical shutter states understood by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterState {
    Open,
    Closed,
    /// Released to the camera's own control between exposures
    Free,
}

/// Frame dimensions as reported by a readout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub channels: u32,
}

impl FrameInfo {
    /// Number of bytes the readout occupies in the frame buffer
    pub fn byte_len(&self) -> usize {
        self.width as usize
            * self.height as usize
            * (self.bits_per_pixel as usize).div_ceil(8)
            * self.channels.max(1) as usize
    }
}

/// Effective frame geometry for the current binning mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub bin: u32,
}

impl FrameGeometry {
    /// Geometry of the native sensor binned by `bin` in both axes
    pub fn binned(
        native_width: u32,
        native_height: u32,
        bits_per_pixel: u32,
        pixel_size: f64,
        bin: u32,
    ) -> Self {
        Self {
            width: native_width / bin,
            height: native_height / bin,
            bits_per_pixel,
            pixel_size_x: pixel_size * bin as f64,
            pixel_size_y: pixel_size * bin as f64,
            bin,
        }
    }

    /// Minimum buffer size for a single-channel readout at this geometry
    pub fn required_bytes(&self) -> usize {
        self.width as usize * self.height as usize * (self.bits_per_pixel as usize).div_ceil(8)
    }
}

/// Pre-sized readout buffer filled in place by the camera
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow the buffer to at least `size` bytes; never shrinks
    pub fn ensure_size(&mut self, size: usize) -> bool {
        if size > self.data.len() {
            self.data.resize(size, 0);
            true
        } else {
            false
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy out the bytes of a readout described by `info`
    pub fn snapshot(&self, info: &FrameInfo) -> Vec<u8> {
        let len = info.byte_len().min(self.data.len());
        self.data[..len].to_vec()
    }
}

/// A completed exposure handed to the host
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFrame {
    pub exposure_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub frame_type: FrameType,
    pub bin: u32,
    pub info: FrameInfo,
    #[serde(skip)]
    pub data: Arc<Vec<u8>>,
}

impl CapturedFrame {
    /// Metadata-only view used for sidecar files and logs
    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            exposure_id: self.exposure_id,
            started_at: self.started_at,
            duration_secs: self.duration_secs,
            frame_type: self.frame_type,
            bin: self.bin,
            info: self.info,
            byte_len: self.data.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameMetadata {
    pub exposure_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub frame_type: FrameType,
    pub bin: u32,
    pub info: FrameInfo,
    pub byte_len: usize,
}
