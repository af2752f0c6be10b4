//! SDL2 Window Display Module
//! Creates an SDL2 window and renders RGB24 frames into it.

use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::{debug, info};

use super::{DisplaySurface, KeyEvent};
use crate::capture::{Frame, PixelFormat};
use crate::error::{LookoutError, Result};

fn display_err(e: impl ToString) -> LookoutError {
    LookoutError::Display(e.to_string())
}

/// Live SDL objects; dropped together when the display closes
///
/// Field order is drop order: textures and the canvas go before the
/// subsystems they were created from.
struct SdlWindow {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    video: VideoSubsystem,
    _context: Sdl,
}

/// SDL2 Window Display
/// Handles window creation, key events and frame rendering, with vsync.
pub struct Sdl2Display {
    window: Option<SdlWindow>,
    size: (u32, u32),
    title: String,
}

impl Sdl2Display {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let context = sdl2::init().map_err(display_err)?;
        let video = context.video().map_err(display_err)?;

        let window = video
            .window(title, width, height)
            .position_centered()
            .build()
            .map_err(display_err)?;

        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(display_err)?;
        let texture_creator = canvas.texture_creator();
        let event_pump = context.event_pump().map_err(display_err)?;

        info!("Display window opened: {}x{}", width, height);
        Ok(Self {
            window: Some(SdlWindow {
                canvas,
                texture_creator,
                event_pump,
                video,
                _context: context,
            }),
            size: (width, height),
            title: title.to_string(),
        })
    }

    fn active(&mut self) -> Result<&mut SdlWindow> {
        self.window
            .as_mut()
            .ok_or_else(|| LookoutError::Display("display already closed".into()))
    }

    fn fit_window(&mut self, width: u32, height: u32, title: &str) -> Result<()> {
        let resize = self.size != (width, height);
        let retitle = self.title != title;
        let canvas = &mut self.active()?.canvas;
        if resize {
            canvas
                .window_mut()
                .set_size(width, height)
                .map_err(display_err)?;
            debug!("Display window resized to {}x{}", width, height);
        }
        if retitle {
            canvas.window_mut().set_title(title).map_err(display_err)?;
        }
        self.size = (width, height);
        self.title = title.to_string();
        Ok(())
    }
}

impl DisplaySurface for Sdl2Display {
    fn show(&mut self, frame: &Frame, title: &str) -> Result<()> {
        if frame.format() != PixelFormat::Rgb24 {
            return Err(LookoutError::UnsupportedFormat(frame.format()));
        }
        let (width, height) = (frame.width(), frame.height());
        self.fit_window(width, height, title)?;
        let window = self.active()?;

        let mut texture = window
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(display_err)?;

        texture
            .update(None, &frame.data, (width * 3) as usize)
            .map_err(display_err)?;

        window.canvas.clear();
        window
            .canvas
            .copy(&texture, None, None)
            .map_err(display_err)?;

        window.canvas.present();
        Ok(())
    }

    fn poll_key(&mut self) -> Option<KeyEvent> {
        let window = self.window.as_mut()?;
        for event in window.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    return Some(KeyEvent::Close);
                }
                Event::KeyDown {
                    keycode: Some(keycode),
                    ..
                } => {
                    let name = keycode.name();
                    let mut chars = name.chars();
                    if let (Some(c), None) = (chars.next(), chars.next()) {
                        return Some(KeyEvent::Char(c.to_ascii_lowercase()));
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn detect_display_size(&mut self) -> Result<(u32, u32)> {
        let mode = self
            .active()?
            .video
            .current_display_mode(0)
            .map_err(display_err)?;
        Ok((mode.w.max(0) as u32, mode.h.max(0) as u32))
    }

    /// Destroys the window and shuts SDL video down
    fn close(&mut self) {
        if let Some(mut window) = self.window.take() {
            window.canvas.window_mut().hide();
            drop(window);
            info!("Display window closed");
        }
    }
}
