use super::frame::Frame;
use crate::error::Result;
use crate::CaptureConfig;

/// Camera backend able to open a capture session
pub trait CameraDriver: Send {
    type Session: CameraSession;

    /// Open and configure the device; failure here aborts startup
    fn open(&mut self, config: &CaptureConfig) -> Result<Self::Session>;
}

/// An open hardware handle
///
/// Owned by exactly one thread at a time: the frame source while starting and
/// releasing, the capture thread while running.
pub trait CameraSession: Send + 'static {
    fn start(&mut self) -> Result<()>;

    /// Blocks until the next frame is available
    fn capture_frame(&mut self) -> Result<Frame>;

    fn stop(&mut self) -> Result<()>;

    /// Release the device
    fn close(self) -> Result<()>;
}
