use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{LookoutError, Result};

/// Frame data with zero-copy semantics
///
/// Once built a frame is a value: the payload is immutable and clones share it.
/// Anything that wants to draw on a frame copies the pixels out first
/// (see [`Frame::to_rgb_image`]), so one reader can never affect another.
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row for packed formats, zero for compressed ones
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Expected payload size for an uncompressed frame
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Yuyv4 => Some(pixels * 2),
            PixelFormat::Nv12 => Some(pixels + pixels / 2),
            PixelFormat::Mjpeg => None,
        }
    }

    pub fn stride(self, width: u32) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => width * 3,
            PixelFormat::Yuyv4 => width * 2,
            PixelFormat::Nv12 => width,
            PixelFormat::Mjpeg => 0,
        }
    }
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata) -> Self {
        Self {
            data: data.into(),
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    /// Wrap an RGB image produced inside the pipeline
    pub fn from_rgb(image: RgbImage, sequence: u64, timestamp: Instant) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: Bytes::from(image.into_raw()),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: PixelFormat::Rgb24.stride(width),
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            }),
            timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Copy an RGB24 frame into a mutable image buffer
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        if self.meta.format != PixelFormat::Rgb24 {
            return Err(LookoutError::UnsupportedFormat(self.meta.format));
        }
        RgbImage::from_raw(self.meta.width, self.meta.height, self.data.to_vec()).ok_or_else(
            || {
                LookoutError::Decode(format!(
                    "RGB payload of {} bytes does not fit {}x{}",
                    self.data.len(),
                    self.meta.width,
                    self.meta.height
                ))
            },
        )
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
