pub mod motion;

use crate::capture::Frame;
use crate::error::Result;

pub use motion::MotionDetector;

/// Axis-aligned box in pixel coordinates of the frame it was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One recognized object instance
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// In `[0, 1]`
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Text drawn next to the box
    pub fn caption(&self) -> String {
        format!("{} ({:.2})", self.label, self.confidence)
    }
}

/// Object-detection engine invoked by the inference worker
///
/// Implementations receive the preprocessed RGB24 frame and return every
/// detection at or above `confidence_threshold`. Errors are not fatal: the
/// worker treats them as an empty result for that pass.
pub trait Detector: Send {
    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
