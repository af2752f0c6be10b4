//! V4L2 camera driver with memory-mapped streaming

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::driver::{CameraDriver, CameraSession};
use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::{LookoutError, Result};
use crate::CaptureConfig;

/// Opens `/dev/videoN` devices
#[derive(Debug, Default)]
pub struct V4l2Camera;

/// Open V4L2 device plus its stream
pub struct V4l2Session {
    device: Device,
    stream: Option<MmapStream<'static>>,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
}

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Nv12 => FourCC::new(b"NV12"),
    }
}

impl CameraDriver for V4l2Camera {
    type Session = V4l2Session;

    #[instrument(skip(self, config))]
    fn open(&mut self, config: &CaptureConfig) -> Result<V4l2Session> {
        let path = if config.device.is_empty() {
            auto_detect_device()?
        } else {
            config.device.clone()
        };
        let open_err = |reason: String| LookoutError::CameraOpen {
            device: path.clone(),
            reason,
        };

        info!("Initializing V4L2 capture: {}", path);
        let device = Device::with_path(&path).map_err(|e| open_err(e.to_string()))?;

        // Query capabilities
        let caps = device.query_caps().map_err(|e| open_err(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(open_err("device doesn't support video capture".into()));
        }

        // Set format
        let mut fmt = device.format().map_err(|e| open_err(e.to_string()))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);
        let actual = device
            .set_format(&fmt)
            .map_err(|e| open_err(e.to_string()))?;
        if actual.fourcc != fmt.fourcc {
            return Err(open_err(format!(
                "device refused {} (offered {})",
                fmt.fourcc, actual.fourcc
            )));
        }

        let params = device
            .set_params(&Parameters::with_fps(config.fps))
            .map_err(|e| open_err(e.to_string()))?;

        info!(
            "Actual resolution set: {}x{} @ {}/{} s per frame ({})",
            actual.width,
            actual.height,
            params.interval.numerator,
            params.interval.denominator,
            actual.fourcc
        );

        Ok(V4l2Session {
            device,
            stream: None,
            buffer_count: config.buffer_count,
            width: actual.width,
            height: actual.height,
            format: config.format,
            sequence: 0,
        })
    }
}

impl CameraSession for V4l2Session {
    /// Start streaming with memory-mapped buffers
    fn start(&mut self) -> Result<()> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        stream.start()?;
        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let timestamp = Instant::now();

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LookoutError::Camera("stream not started".into()))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(LookoutError::Camera("driver returned an empty buffer".into()));
        }

        self.sequence += 1;
        let mut frame = Frame::new(
            buf[..used].to_vec(),
            FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.format.stride(self.width),
                format: self.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec.max(0) as u64)
                        + Duration::from_micros(meta.timestamp.usec.max(0) as u64),
                ),
            },
        );
        frame.timestamp = timestamp;
        Ok(frame)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.stop()?;
        }
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        // Buffers must be unmapped before the device handle goes away
        self.stream.take();
        debug!("Closing V4L2 device");
        drop(self.device);
        Ok(())
    }
}

/// Auto-detect the first device that can stream MJPEG or YUYV
pub fn auto_detect_device() -> Result<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats
                .iter()
                .any(|f| f.fourcc == FourCC::new(b"MJPG") || f.fourcc == FourCC::new(b"YUYV"))
            {
                info!("Found capture device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(LookoutError::CameraOpen {
        device: "auto".into(),
        reason: "no suitable capture device found".into(),
    })
}
