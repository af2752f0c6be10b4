//! Lookout: camera capture, detection and live preview
#![cfg_attr(not(feature = "v4l2"), allow(dead_code, unused_imports))]

use std::path::PathBuf;
use std::process::ExitCode;

use color_eyre::eyre::Report;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookout::detect::MotionDetector;
use lookout::display::DisplaySurface;
use lookout::pipeline::{Collaborators, JpegSnapshotWriter, Pipeline};
use lookout::{signal, Config, LookoutError, Result};

const DEFAULT_CONFIG_FILE: &str = "lookout.toml";

fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Lookout launching...");

    match run() {
        Ok(()) => {
            info!("Lookout shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = e.exit_code();
            error!("Startup failed: {}", e);
            eprintln!("{:?}", Report::new(e));
            ExitCode::from(code)
        }
    }
}

/// `LOOKOUT_CONFIG` if set, otherwise `lookout.toml` when present
fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("LOOKOUT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    default.exists().then_some(default)
}

fn open_display(config: &Config) -> Result<Option<Box<dyn DisplaySurface>>> {
    if !config.display.enabled {
        return Ok(None);
    }
    #[cfg(feature = "sdl-display")]
    {
        let surface = lookout::display::Sdl2Display::new(
            &config.display.window_title,
            config.capture.width,
            config.capture.height,
        )?;
        Ok(Some(Box::new(surface)))
    }
    #[cfg(not(feature = "sdl-display"))]
    {
        Err(LookoutError::Config(
            "display enabled but lookout was built without the sdl-display feature".into(),
        ))
    }
}

#[cfg(feature = "v4l2")]
fn run() -> Result<()> {
    let path = config_path();
    if let Some(path) = &path {
        info!("Loading configuration from {}", path.display());
    }
    let config = Config::load(path.as_deref())?;

    let parts = Collaborators {
        camera: lookout::capture::V4l2Camera,
        detector: Box::new(MotionDetector::new(config.inference.motion.clone())),
        writer: Box::new(JpegSnapshotWriter::new(config.persistence.jpeg_quality)),
        display: open_display(&config)?,
    };

    let mut pipeline = Pipeline::new(&config, parts)?;
    signal::spawn_interrupt_listener(pipeline.interrupt_flag())?;

    let reason = pipeline.run()?;
    info!("Stopped: {}", reason);
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn run() -> Result<()> {
    Err(LookoutError::CameraOpen {
        device: String::new(),
        reason: "lookout was built without the v4l2 feature".into(),
    })
}
