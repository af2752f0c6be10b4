pub mod capture;
pub mod detect;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod signal;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use capture::frame::PixelFormat;
use detect::motion::MotionConfig;
use pipeline::{ArchivePolicy, CropRect, Rotation};

pub use capture::Frame;
pub use error::{LookoutError, Result};

/// Environment variables override file values, e.g. `LOOKOUT_DISPLAY__ENABLED=true`
pub const ENV_PREFIX: &str = "LOOKOUT";

/// System configuration, loaded once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub preprocess: PreprocessConfig,
    pub annotation: AnnotationConfig,
    pub persistence: PersistenceConfig,
    pub display: DisplayConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub confidence_threshold: f32,
    /// Target period of one inference pass
    pub interval_ms: u64,
    pub motion: MotionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub rotation: Rotation,
    pub crop: Option<CropRect>,
    pub archive: ArchivePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// RGB
    pub color: [u8; 3],
    pub thickness: u32,
    pub draw_labels: bool,
    pub label_scale: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub originals_dir: PathBuf,
    pub detections_dir: PathBuf,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub window_title: String,
    /// Largest share of the screen a rendered frame may cover
    pub max_screen_fraction: f64,
    pub quit_key: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sleep while a slot is still empty
    pub poll_ms: u64,
    /// Sleep after a failed capture
    pub capture_backoff_ms: u64,
    /// Sleep per headless control-loop iteration
    pub headless_idle_ms: u64,
    pub inference_join_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 10,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            interval_ms: 200,
            motion: MotionConfig::default(),
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            color: [0, 0, 255],
            thickness: 2,
            draw_labels: true,
            label_scale: 2,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            originals_dir: PathBuf::from("captures/origin"),
            detections_dir: PathBuf::from("captures/detected"),
            jpeg_quality: 90,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_title: "Lookout Live Feed".into(),
            max_screen_fraction: 0.9,
            quit_key: 'q',
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            capture_backoff_ms: 100,
            headless_idle_ms: 100,
            inference_join_timeout_ms: 3_000,
        }
    }
}

impl InferenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl PersistenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl TimingConfig {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }

    pub fn headless_idle(&self) -> Duration {
        Duration::from_millis(self.headless_idle_ms)
    }

    pub fn inference_join_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_join_timeout_ms)
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then `LOOKOUT_*`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(LookoutError::Config(msg.to_string()));

        if self.capture.width == 0 || self.capture.height == 0 {
            return fail("capture resolution must be non-zero");
        }
        if self.capture.fps == 0 {
            return fail("capture fps must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.inference.confidence_threshold) {
            return fail("confidence threshold must be within [0, 1]");
        }
        if self.inference.interval_ms == 0 {
            return fail("inference interval must be non-zero");
        }
        if !(self.display.max_screen_fraction > 0.0 && self.display.max_screen_fraction <= 1.0) {
            return fail("display max_screen_fraction must be within (0, 1]");
        }
        if self.persistence.enabled && self.persistence.interval_ms == 0 {
            return fail("persistence interval must be non-zero");
        }
        Ok(())
    }
}
