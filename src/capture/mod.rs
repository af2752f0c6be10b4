pub mod decoder;
pub mod driver;
pub mod frame;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use driver::{CameraDriver, CameraSession};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use source::{FrameSource, SourceStatus};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
