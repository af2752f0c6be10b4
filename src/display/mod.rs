#[cfg(feature = "sdl-display")]
pub mod display;

use std::time::Instant;

use image::imageops::{self, FilterType};
use tracing::{info, warn};

use crate::capture::Frame;
use crate::error::{LookoutError, Result};
use crate::DisplayConfig;

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;

/// Input observed on the display surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    /// Window closed by the user or window manager
    Close,
}

/// Window the orchestrator renders annotated frames into
///
/// Only ever used from the control thread.
pub trait DisplaySurface {
    fn show(&mut self, frame: &Frame, title: &str) -> Result<()>;

    /// Next pending key event, without blocking
    fn poll_key(&mut self) -> Option<KeyEvent>;

    fn detect_display_size(&mut self) -> Result<(u32, u32)>;

    /// Tear down windows; called once during shutdown
    fn close(&mut self) {}
}

/// Uniform scale that fits `frame` inside `max`
pub fn fit_scale(frame: (u32, u32), max: (u32, u32)) -> f64 {
    if frame.0 == 0 || frame.1 == 0 {
        return 1.0;
    }
    (max.0 as f64 / frame.0 as f64).min(max.1 as f64 / frame.1 as f64)
}

/// Largest aspect-preserving size of `frame` within `max_fraction` of `screen`
pub fn scaled_size(frame: (u32, u32), screen: (u32, u32), max_fraction: f64) -> (u32, u32) {
    let max = (
        (screen.0 as f64 * max_fraction).floor().max(1.0) as u32,
        (screen.1 as f64 * max_fraction).floor().max(1.0) as u32,
    );
    let scale = fit_scale(frame, max);
    (
        ((frame.0 as f64 * scale).round() as u32).clamp(1, max.0),
        ((frame.1 as f64 * scale).round() as u32).clamp(1, max.1),
    )
}

/// Renders annotated frames sized to the screen and watches for the quit key
pub struct Preview {
    surface: Box<dyn DisplaySurface>,
    config: DisplayConfig,
    screen: Option<(u32, u32)>,
    closed: bool,
}

impl Preview {
    pub fn new(surface: Box<dyn DisplaySurface>, config: DisplayConfig) -> Self {
        Self {
            surface,
            config,
            screen: None,
            closed: false,
        }
    }

    fn screen_size(&mut self, fallback: (u32, u32)) -> (u32, u32) {
        if let Some(size) = self.screen {
            return size;
        }
        let size = match self.surface.detect_display_size() {
            Ok(size) if size.0 > 0 && size.1 > 0 => {
                info!("Detected screen size {}x{}", size.0, size.1);
                size
            }
            Ok(_) | Err(_) => {
                warn!("Screen size unavailable, rendering at frame size");
                // Dividing by the fraction keeps the frame at 1:1
                (
                    (fallback.0 as f64 / self.config.max_screen_fraction).ceil() as u32,
                    (fallback.1 as f64 / self.config.max_screen_fraction).ceil() as u32,
                )
            }
        };
        self.screen = Some(size);
        size
    }

    /// Show one frame. Returns true when the user asked to quit.
    pub fn render(&mut self, frame: &Frame) -> Result<bool> {
        if self.closed {
            return Err(LookoutError::InvalidState("display already released"));
        }
        let started = Instant::now();
        let dims = (frame.width(), frame.height());
        let screen = self.screen_size(dims);
        let target = scaled_size(dims, screen, self.config.max_screen_fraction);

        if target == dims {
            self.surface.show(frame, &self.config.window_title)?;
        } else {
            let image = frame.to_rgb_image()?;
            let resized = imageops::resize(&image, target.0, target.1, FilterType::Triangle);
            let scaled = Frame::from_rgb(resized, frame.sequence(), frame.timestamp);
            self.surface.show(&scaled, &self.config.window_title)?;
        }
        metrics::histogram!("render_time_us").record(started.elapsed().as_micros() as f64);

        Ok(self.quit_requested())
    }

    fn quit_requested(&mut self) -> bool {
        while let Some(key) = self.surface.poll_key() {
            match key {
                KeyEvent::Close => return true,
                KeyEvent::Char(c) if c.eq_ignore_ascii_case(&self.config.quit_key) => return true,
                KeyEvent::Char(_) => {}
            }
        }
        false
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.surface.close();
        }
    }
}
