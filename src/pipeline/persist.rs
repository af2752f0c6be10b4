//! Periodic snapshot persistence

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use tracing::{info, warn};

use super::bundle::ResultBundle;
use crate::capture::Frame;
use crate::error::{LookoutError, Result};
use crate::PersistenceConfig;

/// Encodes a frame and writes it to disk
pub trait SnapshotWriter: Send {
    fn encode_and_write(&self, frame: &Frame, path: &Path) -> Result<()>;
}

/// JPEG writer backed by the `image` encoder
#[derive(Debug, Clone)]
pub struct JpegSnapshotWriter {
    quality: u8,
}

impl JpegSnapshotWriter {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl SnapshotWriter for JpegSnapshotWriter {
    fn encode_and_write(&self, frame: &Frame, path: &Path) -> Result<()> {
        let image = frame.to_rgb_image()?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(&image)
            .map_err(|source| LookoutError::Persist {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Filenames for one snapshot pair
pub fn snapshot_paths(originals: &Path, detections: &Path, unix_secs: u64) -> (PathBuf, PathBuf) {
    (
        originals.join(format!("capture_org_{unix_secs}.jpg")),
        detections.join(format!("capture_det_{unix_secs}.jpg")),
    )
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Result of one persistence attempt
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub written: u32,
    pub failed: u32,
}

/// Writes bundle snapshots into the originals/detections directories
pub struct SnapshotStore {
    writer: Box<dyn SnapshotWriter>,
    originals_dir: PathBuf,
    detections_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(writer: Box<dyn SnapshotWriter>, config: &PersistenceConfig) -> Self {
        Self {
            writer,
            originals_dir: config.originals_dir.clone(),
            detections_dir: config.detections_dir.clone(),
        }
    }

    /// Create both target directories
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.originals_dir)?;
        fs::create_dir_all(&self.detections_dir)?;
        info!("Original save path: {}", self.originals_dir.display());
        info!("Detected save path: {}", self.detections_dir.display());
        Ok(())
    }

    /// Attempt both writes; failures are logged and never retried
    pub fn save(&self, bundle: &ResultBundle, unix_secs: u64) -> SaveReport {
        let (original, detected) =
            snapshot_paths(&self.originals_dir, &self.detections_dir, unix_secs);
        let mut report = SaveReport::default();

        for (frame, path) in [(&bundle.raw_processed, original), (&bundle.annotated, detected)] {
            match self.writer.encode_and_write(frame, &path) {
                Ok(()) => {
                    info!("Image saved: {}", path.display());
                    report.written += 1;
                }
                Err(e) => {
                    metrics::counter!("persist_failures_total").increment(1);
                    warn!("File save error: {} (Path: {})", e, path.display());
                    report.failed += 1;
                }
            }
        }
        report
    }
}
