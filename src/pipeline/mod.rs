pub mod annotate;
pub mod bundle;
pub mod inference;
pub mod orchestrator;
pub mod persist;
pub mod preprocess;
pub mod slot;
pub mod state;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

pub use annotate::Annotator;
pub use bundle::ResultBundle;
pub use inference::{pacing_delay, InferenceWorker, JoinOutcome, WorkerHandle};
pub use orchestrator::{ExitReason, Orchestrator, Persistence};
pub use persist::{JpegSnapshotWriter, SaveReport, SnapshotStore, SnapshotWriter};
pub use preprocess::{ArchivePolicy, CropRect, Preprocessor, Region, Rotation};
pub use slot::{LatestValueSlot, SlotStats};
pub use state::{PipelineState, RunFlag};

use crate::capture::{CameraDriver, Frame, FrameSource};
use crate::detect::Detector;
use crate::display::{DisplaySurface, Preview};
use crate::error::{LookoutError, Result};
use crate::Config;

/// External collaborators the pipeline is assembled from
pub struct Collaborators<D> {
    pub camera: D,
    pub detector: Box<dyn Detector>,
    pub writer: Box<dyn SnapshotWriter>,
    pub display: Option<Box<dyn DisplaySurface>>,
}

/// Process-wide context: slots, run flag, threads and collaborators
///
/// Built once at startup. Teardown runs exactly once, either from [`run`]
/// or when the pipeline is dropped.
///
/// [`run`]: Pipeline::run
pub struct Pipeline<D: CameraDriver> {
    source: FrameSource<D>,
    worker: Option<InferenceWorker>,
    handle: Option<WorkerHandle>,
    orchestrator: Orchestrator,
    raw: Arc<LatestValueSlot<Frame>>,
    results: Arc<LatestValueSlot<ResultBundle>>,
    running: RunFlag,
    interrupt: Arc<AtomicBool>,
    join_timeout: Duration,
    shut_down: bool,
}

impl<D: CameraDriver> Pipeline<D> {
    #[instrument(skip_all)]
    pub fn new(config: &Config, parts: Collaborators<D>) -> Result<Self> {
        config.validate()?;

        let raw = Arc::new(LatestValueSlot::new("raw"));
        let results = Arc::new(LatestValueSlot::new("results"));
        let running = RunFlag::new();
        let interrupt = Arc::new(AtomicBool::new(false));

        let persistence = if config.persistence.enabled {
            let store = SnapshotStore::new(parts.writer, &config.persistence);
            store.prepare()?;
            Some(Persistence {
                store,
                interval: config.persistence.interval(),
            })
        } else {
            None
        };

        let preview = match (config.display.enabled, parts.display) {
            (true, Some(surface)) => Some(Preview::new(surface, config.display.clone())),
            (true, None) => {
                return Err(LookoutError::Config(
                    "display enabled but no display surface was provided".into(),
                ))
            }
            (false, _) => None,
        };

        let source = FrameSource::new(
            parts.camera,
            config.capture.clone(),
            config.timing.capture_backoff(),
            raw.clone(),
            running.clone(),
        );
        let worker = InferenceWorker::new(
            parts.detector,
            raw.clone(),
            results.clone(),
            running.clone(),
            config,
        );
        let orchestrator = Orchestrator::new(
            results.clone(),
            persistence,
            preview,
            config.timing.clone(),
            interrupt.clone(),
            PipelineState::new(),
        );

        Ok(Self {
            source,
            worker: Some(worker),
            handle: None,
            orchestrator,
            raw,
            results,
            running,
            interrupt,
            join_timeout: config.timing.inference_join_timeout(),
            shut_down: false,
        })
    }

    /// Setting this flag stops the control loop at its next iteration
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn raw_slot(&self) -> &Arc<LatestValueSlot<Frame>> {
        &self.raw
    }

    pub fn result_slot(&self) -> &Arc<LatestValueSlot<ResultBundle>> {
        &self.results
    }

    /// Start the frame source, then the inference worker
    pub fn start(&mut self) -> Result<()> {
        let worker = self
            .worker
            .take()
            .ok_or(LookoutError::InvalidState("pipeline already started"))?;
        self.source.start()?;
        self.handle = Some(worker.spawn()?);
        info!("Pipeline started");
        Ok(())
    }

    /// Start everything, run the control loop on this thread, then tear down
    pub fn run(&mut self) -> Result<ExitReason> {
        if let Err(e) = self.start() {
            self.shutdown();
            return Err(e);
        }

        let source = &self.source;
        let handle = &self.handle;
        let reason = self.orchestrator.run(|| {
            if !source.is_alive() {
                Some("capture")
            } else if !handle.as_ref().is_some_and(WorkerHandle::is_alive) {
                Some("inference")
            } else {
                None
            }
        });
        info!("Control loop exited: {}", reason);

        self.shutdown();
        Ok(reason)
    }

    /// Ordered teardown; only the first call does anything
    ///
    /// Capture is joined without a bound, inference with the configured
    /// timeout, then the display and finally the camera are released.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Starting cleanup...");

        self.running.stop();
        self.source.halt();
        if let Some(handle) = self.handle.as_mut() {
            if handle.join_timeout(self.join_timeout) == JoinOutcome::TimedOut {
                warn!("Inference thread left running after shutdown timeout");
            }
        }
        self.orchestrator.release_display();
        self.source.stop();

        let raw = self.raw.stats();
        let results = self.results.stats();
        info!(
            raw_published = raw.published,
            raw_overwritten = raw.overwritten,
            results_published = results.published,
            "Cleanup complete."
        );
    }
}

impl<D: CameraDriver> Drop for Pipeline<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
