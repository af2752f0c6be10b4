use std::path::PathBuf;

use thiserror::Error;

use crate::capture::PixelFormat;

pub type Result<T, E = LookoutError> = std::result::Result<T, E>;

/// Errors raised by the pipeline and its collaborators
#[derive(Debug, Error)]
pub enum LookoutError {
    #[error("failed to open camera {device}: {reason}")]
    CameraOpen { device: String, reason: String },

    #[error("camera error: {0}")]
    Camera(String),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("failed to write snapshot {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("display error: {0}")]
    Display(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LookoutError {
    fn from(err: config::ConfigError) -> Self {
        LookoutError::Config(err.to_string())
    }
}

impl LookoutError {
    /// Process exit status for a failure that aborts startup
    pub fn exit_code(&self) -> u8 {
        match self {
            LookoutError::CameraOpen { .. } => 2,
            _ => 1,
        }
    }
}
