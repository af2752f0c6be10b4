//! Capture thread that keeps the raw slot fed with the newest frame

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use super::driver::{CameraDriver, CameraSession};
use super::frame::Frame;
use crate::error::{LookoutError, Result};
use crate::pipeline::{LatestValueSlot, RunFlag};
use crate::CaptureConfig;

/// Lifecycle of a [`FrameSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Created,
    /// Hardware open and streaming, no capture thread attached
    Started,
    Running,
    Stopped,
}

enum SourceState<S> {
    Created,
    Started(S),
    Running(JoinHandle<Option<S>>),
    Stopped,
}

/// Owns the camera and runs the capture loop on its own thread
pub struct FrameSource<D: CameraDriver> {
    driver: D,
    config: CaptureConfig,
    error_backoff: Duration,
    slot: Arc<LatestValueSlot<Frame>>,
    running: RunFlag,
    state: SourceState<D::Session>,
}

impl<D: CameraDriver> FrameSource<D> {
    pub fn new(
        driver: D,
        config: CaptureConfig,
        error_backoff: Duration,
        slot: Arc<LatestValueSlot<Frame>>,
        running: RunFlag,
    ) -> Self {
        Self {
            driver,
            config,
            error_backoff,
            slot,
            running,
            state: SourceState::Created,
        }
    }

    /// Open the camera, start streaming and spawn the capture thread
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, SourceState::Created) {
            return Err(LookoutError::InvalidState("frame source already started"));
        }

        info!("Opening camera {}", self.config.device);
        let mut session = self.driver.open(&self.config)?;
        if let Err(e) = session.start() {
            if let Err(close_err) = session.close() {
                warn!("Failed to close camera after start failure: {}", close_err);
            }
            self.state = SourceState::Stopped;
            return Err(match e {
                open @ LookoutError::CameraOpen { .. } => open,
                other => LookoutError::CameraOpen {
                    device: self.config.device.clone(),
                    reason: format!("stream start failed: {other}"),
                },
            });
        }
        self.state = SourceState::Started(session);

        self.running.start();
        self.spawn_capture_thread()
    }

    fn spawn_capture_thread(&mut self) -> Result<()> {
        let session = match std::mem::replace(&mut self.state, SourceState::Stopped) {
            SourceState::Started(session) => session,
            other => {
                self.state = other;
                return Err(LookoutError::InvalidState("camera session not started"));
            }
        };

        let slot = self.slot.clone();
        let running = self.running.clone();
        let backoff = self.error_backoff;
        // The session is handed over only once the thread exists, so a failed
        // spawn can still close it
        let (handoff_tx, handoff_rx) = flume::bounded::<D::Session>(1);
        let spawned = thread::Builder::new()
            .name("lookout-capture".into())
            .spawn(move || {
                let session = handoff_rx.recv().ok()?;
                Some(capture_loop(session, &slot, &running, backoff))
            });

        match spawned {
            Ok(handle) => {
                if let Err(flume::SendError(session)) = handoff_tx.send(session) {
                    self.state = SourceState::Started(session);
                    self.running.stop();
                    return Err(LookoutError::InvalidState("capture thread exited before start"));
                }
                self.state = SourceState::Running(handle);
                info!("Camera capture thread started");
                Ok(())
            }
            Err(e) => {
                self.running.stop();
                self.state = SourceState::Started(session);
                Err(e.into())
            }
        }
    }

    /// Lower the run flag and wait for the capture thread, keeping the
    /// hardware handle open
    pub fn halt(&mut self) {
        self.running.stop();
        if !matches!(self.state, SourceState::Running(_)) {
            return;
        }
        if let SourceState::Running(handle) = std::mem::replace(&mut self.state, SourceState::Stopped)
        {
            match handle.join() {
                Ok(Some(session)) => self.state = SourceState::Started(session),
                Ok(None) => warn!("Capture thread ended without a camera session"),
                Err(_) => error!("Capture thread panicked; camera handle dropped during unwind"),
            }
        }
    }

    /// Join the capture thread and release the hardware. Idempotent.
    pub fn stop(&mut self) {
        self.halt();
        if let SourceState::Started(mut session) =
            std::mem::replace(&mut self.state, SourceState::Stopped)
        {
            if let Err(e) = session.stop() {
                warn!("Failed to stop camera stream: {}", e);
            }
            if let Err(e) = session.close() {
                warn!("Failed to close camera: {}", e);
            }
            info!("Camera capture stopped");
        }
    }

    pub fn status(&self) -> SourceStatus {
        match self.state {
            SourceState::Created => SourceStatus::Created,
            SourceState::Started(_) => SourceStatus::Started,
            SourceState::Running(_) => SourceStatus::Running,
            SourceState::Stopped => SourceStatus::Stopped,
        }
    }

    /// True while the capture thread has not exited
    pub fn is_alive(&self) -> bool {
        matches!(&self.state, SourceState::Running(handle) if !handle.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.slot.read_latest()
    }
}

impl<D: CameraDriver> Drop for FrameSource<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: CameraSession>(
    mut session: S,
    slot: &LatestValueSlot<Frame>,
    running: &RunFlag,
    backoff: Duration,
) -> S {
    while running.is_running() {
        match panic::catch_unwind(AssertUnwindSafe(|| session.capture_frame())) {
            Ok(Ok(frame)) => {
                metrics::counter!("capture_frames_total").increment(1);
                slot.publish(frame);
            }
            Ok(Err(e)) => {
                metrics::counter!("capture_errors_total").increment(1);
                warn!("Capture error: {}", e);
                thread::sleep(backoff);
            }
            Err(_) => {
                // The thread ends here; the session goes back for release
                error!("Camera driver panicked; capture loop stopping");
                break;
            }
        }
    }
    info!("Capture loop exited");
    session
}
