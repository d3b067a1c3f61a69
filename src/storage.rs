use crate::{
    config::StorageConfig,
    error::{DriverError, EventBusError, Result},
    events::{DriverEvent, EventBus, EventFilter},
    frame::CapturedFrame,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Paths written for one completed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    pub data_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Writes completed frames to disk as raw pixel data plus a JSON metadata sidecar
#[derive(Debug, Clone)]
pub struct FrameStore {
    frame_dir: PathBuf,
}

impl FrameStore {
    pub fn new<P: AsRef<Path>>(frame_dir: P) -> Self {
        Self {
            frame_dir: frame_dir.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.frame_dir)
    }

    /// Create the frame directory and start saving every completed exposure from the bus
    pub async fn start(&self, event_bus: &EventBus) -> Result<JoinHandle<()>> {
        info!("Starting frame store in {}", self.frame_dir.display());

        if !self.frame_dir.exists() {
            fs::create_dir_all(&self.frame_dir).await.map_err(|e| {
                DriverError::component(
                    "frame_store".to_string(),
                    format!("Failed to create frame directory: {}", e),
                )
            })?;
            info!("Created frame directory: {}", self.frame_dir.display());
        }

        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["exposure_complete"]),
            "frame_store",
        );
        let store = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(DriverEvent::ExposureComplete(frame)) => {
                        if let Err(e) = store.save(&frame).await {
                            error!("Failed to store frame {}: {}", frame.exposure_id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(EventBusError::Lagged { skipped }) => {
                        warn!("Frame store missed {} events", skipped);
                    }
                    Err(_) => break,
                }
            }
            debug!("Frame store stopped");
        }))
    }

    /// Write one frame and its sidecar
    pub async fn save(&self, frame: &CapturedFrame) -> Result<StoredFrame> {
        let stem = Self::file_stem(frame.started_at, &frame.exposure_id.to_string());
        let data_path = self.frame_dir.join(format!("{}.raw", stem));
        let metadata_path = self.frame_dir.join(format!("{}.json", stem));

        fs::create_dir_all(&self.frame_dir).await?;
        fs::write(&data_path, frame.data.as_slice()).await?;

        let metadata_json = serde_json::to_string_pretty(&frame.metadata())?;
        fs::write(&metadata_path, metadata_json).await?;

        info!(
            "Stored {} frame {} ({} bytes) to {}",
            frame.frame_type.as_str(),
            frame.exposure_id,
            frame.data.len(),
            data_path.display()
        );

        Ok(StoredFrame {
            data_path,
            metadata_path,
        })
    }

    /// `YYYYMMDD_HHMMSS_mmm_<id>`
    pub fn file_stem(started_at: DateTime<Utc>, exposure_id: &str) -> String {
        format!("{}_{}", started_at.format("%Y%m%d_%H%M%S_%3f"), exposure_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameInfo, FrameMetadata, FrameType};
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    fn frame() -> CapturedFrame {
        CapturedFrame {
            exposure_id: Uuid::new_v4(),
            started_at: Utc.with_ymd_and_hms(2024, 3, 9, 22, 15, 4).unwrap(),
            duration_secs: 120.0,
            frame_type: FrameType::Dark,
            bin: 2,
            info: FrameInfo {
                width: 4,
                height: 2,
                bits_per_pixel: 16,
                channels: 1,
            },
            data: Arc::new((0u8..16).collect()),
        }
    }

    #[test]
    fn test_file_stem_format() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 22, 15, 4).unwrap();

        assert_eq!(
            FrameStore::file_stem(started, "abc"),
            "20240309_221504_000_abc"
        );
    }

    #[tokio::test]
    async fn test_save_writes_data_and_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let store = FrameStore::new(temp_dir.path().join("frames"));
        let frame = frame();

        let stored = store.save(&frame).await.unwrap();

        let data = fs::read(&stored.data_path).await.unwrap();
        assert_eq!(data, (0u8..16).collect::<Vec<_>>());

        let json = fs::read_to_string(&stored.metadata_path).await.unwrap();
        let metadata: FrameMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, frame.metadata());
        assert_eq!(metadata.byte_len, 16);
    }

    #[tokio::test]
    async fn test_start_stores_completed_exposures() {
        let temp_dir = TempDir::new().unwrap();
        let frame_dir = temp_dir.path().join("frames");
        let store = FrameStore::new(&frame_dir);
        let event_bus = EventBus::new(8);

        let _task = store.start(&event_bus).await.unwrap();
        let frame = frame();
        event_bus
            .publish(DriverEvent::ExposureComplete(frame.clone()))
            .unwrap();

        let expected = frame_dir.join(format!(
            "{}.json",
            FrameStore::file_stem(frame.started_at, &frame.exposure_id.to_string())
        ));
        timeout(Duration::from_secs(5), async {
            while !expected.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
