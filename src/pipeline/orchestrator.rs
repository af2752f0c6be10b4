//! Control loop: persistence, rendering and liveness on the calling thread

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use super::bundle::ResultBundle;
use super::persist::{unix_timestamp, SnapshotStore};
use super::slot::LatestValueSlot;
use super::state::PipelineState;
use crate::display::Preview;
use crate::TimingConfig;

/// Why the control loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    QuitKey,
    /// A background thread ended on its own (headless mode)
    WorkerExited(&'static str),
    Interrupted,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::QuitKey => write!(f, "quit key pressed"),
            ExitReason::WorkerExited(name) => write!(f, "{name} thread stopped"),
            ExitReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Periodic persistence settings
pub struct Persistence {
    pub store: SnapshotStore,
    pub interval: std::time::Duration,
}

pub struct Orchestrator {
    results: Arc<LatestValueSlot<ResultBundle>>,
    persistence: Option<Persistence>,
    preview: Option<Preview>,
    timing: TimingConfig,
    interrupt: Arc<AtomicBool>,
    state: PipelineState,
}

impl Orchestrator {
    pub fn new(
        results: Arc<LatestValueSlot<ResultBundle>>,
        persistence: Option<Persistence>,
        preview: Option<Preview>,
        timing: TimingConfig,
        interrupt: Arc<AtomicBool>,
        state: PipelineState,
    ) -> Self {
        Self {
            results,
            persistence,
            preview,
            timing,
            interrupt,
            state,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run until an exit trigger fires
    ///
    /// `dead_worker` reports the name of a background thread that has ended;
    /// it is only consulted in headless mode.
    pub fn run<F>(&mut self, mut dead_worker: F) -> ExitReason
    where
        F: FnMut() -> Option<&'static str>,
    {
        info!(
            "Control loop started ({})",
            if self.preview.is_some() {
                "display"
            } else {
                "headless"
            }
        );

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return ExitReason::Interrupted;
            }

            let Some(bundle) = self.results.read_latest() else {
                if self.preview.is_none() {
                    if let Some(name) = dead_worker() {
                        return ExitReason::WorkerExited(name);
                    }
                }
                thread::sleep(self.timing.poll());
                continue;
            };

            let now = Instant::now();
            self.persist_if_due(&bundle, now);

            match self.preview.as_mut() {
                Some(preview) => {
                    self.state.last_render = Some(now);
                    match preview.render(&bundle.annotated) {
                        Ok(true) => {
                            info!("Quit key pressed. Initiating shutdown...");
                            return ExitReason::QuitKey;
                        }
                        Ok(false) => {}
                        Err(e) => warn!("Render failed: {}", e),
                    }
                }
                None => {
                    if let Some(name) = dead_worker() {
                        warn!("Background {} thread stopped. Exiting main loop.", name);
                        return ExitReason::WorkerExited(name);
                    }
                    thread::sleep(self.timing.headless_idle());
                }
            }
        }
    }

    fn persist_if_due(&mut self, bundle: &ResultBundle, now: Instant) {
        let Some(persistence) = self.persistence.as_ref() else {
            return;
        };
        if now.duration_since(self.state.last_persist) < persistence.interval {
            return;
        }
        persistence.store.save(bundle, unix_timestamp());
        // Advances even after a failed write
        self.state.last_persist = now;
    }

    /// Release display resources
    pub fn release_display(&mut self) {
        if let Some(preview) = self.preview.as_mut() {
            preview.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::display::{DisplaySurface, KeyEvent};
    use crate::error::{LookoutError, Result};
    use crate::pipeline::persist::SnapshotWriter;
    use crate::{DisplayConfig, PersistenceConfig};
    use image::RgbImage;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Recorder {
        paths: Arc<Mutex<Vec<PathBuf>>>,
        fail: bool,
    }

    impl SnapshotWriter for Recorder {
        fn encode_and_write(&self, _frame: &Frame, path: &Path) -> Result<()> {
            self.paths.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                return Err(LookoutError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    struct QuitAfter {
        frames_left: u32,
    }

    impl DisplaySurface for QuitAfter {
        fn show(&mut self, _frame: &Frame, _title: &str) -> Result<()> {
            self.frames_left = self.frames_left.saturating_sub(1);
            Ok(())
        }

        fn poll_key(&mut self) -> Option<KeyEvent> {
            (self.frames_left == 0).then_some(KeyEvent::Char('q'))
        }

        fn detect_display_size(&mut self) -> Result<(u32, u32)> {
            Ok((1920, 1080))
        }
    }

    fn timing() -> TimingConfig {
        TimingConfig {
            poll_ms: 1,
            headless_idle_ms: 5,
            ..TimingConfig::default()
        }
    }

    fn bundle() -> ResultBundle {
        let frame = Frame::from_rgb(RgbImage::new(8, 8), 1, Instant::now());
        ResultBundle {
            sequence: 1,
            source_sequence: 1,
            raw_processed: frame.clone(),
            annotated: frame,
            detections: Vec::new(),
            inference_time: Duration::ZERO,
        }
    }

    fn orchestrator(
        results: &Arc<LatestValueSlot<ResultBundle>>,
        persistence: Option<Persistence>,
        preview: Option<Preview>,
        interrupt: &Arc<AtomicBool>,
    ) -> Orchestrator {
        Orchestrator::new(
            results.clone(),
            persistence,
            preview,
            timing(),
            interrupt.clone(),
            PipelineState::new(),
        )
    }

    fn persistence(writer: &Recorder, interval: Duration) -> Persistence {
        let config = PersistenceConfig {
            originals_dir: PathBuf::from("orig"),
            detections_dir: PathBuf::from("det"),
            ..PersistenceConfig::default()
        };
        Persistence {
            store: SnapshotStore::new(Box::new(writer.clone()), &config),
            interval,
        }
    }

    /// Reports a dead worker once `after` has elapsed
    fn dies_after(after: Duration) -> impl FnMut() -> Option<&'static str> {
        let started = Instant::now();
        move || (started.elapsed() >= after).then_some("inference")
    }

    #[test]
    fn interrupt_wins_over_everything() {
        let results = Arc::new(LatestValueSlot::new("results"));
        let interrupt = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(&results, None, None, &interrupt);
        assert_eq!(orch.run(|| None), ExitReason::Interrupted);
    }

    #[test]
    fn headless_exits_when_worker_dies_before_first_result() {
        let results = Arc::new(LatestValueSlot::new("results"));
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut orch = orchestrator(&results, None, None, &interrupt);
        assert_eq!(
            orch.run(|| Some("capture")),
            ExitReason::WorkerExited("capture")
        );
    }

    #[test]
    fn nothing_is_saved_before_the_first_interval() {
        let results = Arc::new(LatestValueSlot::new("results"));
        results.publish(bundle());
        let interrupt = Arc::new(AtomicBool::new(false));
        let writer = Recorder::default();
        let mut orch = orchestrator(
            &results,
            Some(persistence(&writer, Duration::from_secs(60))),
            None,
            &interrupt,
        );

        orch.run(dies_after(Duration::from_millis(30)));
        assert!(writer.paths.lock().unwrap().is_empty());
    }

    #[test]
    fn saves_follow_the_interval_even_when_writes_fail() {
        let results = Arc::new(LatestValueSlot::new("results"));
        results.publish(bundle());
        let interrupt = Arc::new(AtomicBool::new(false));
        let writer = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut orch = orchestrator(
            &results,
            Some(persistence(&writer, Duration::from_millis(40))),
            None,
            &interrupt,
        );

        let exit = orch.run(dies_after(Duration::from_millis(130)));
        assert_eq!(exit, ExitReason::WorkerExited("inference"));

        let paths = writer.paths.lock().unwrap();
        // Each save attempts an original and an annotated image
        assert_eq!(paths.len() % 2, 0);
        let saves = paths.len() / 2;
        assert!((1..=3).contains(&saves), "saves = {saves}");
        assert!(paths[0].starts_with("orig"));
        assert!(paths[1].starts_with("det"));
    }

    #[test]
    fn quit_key_ends_display_loop() {
        let results = Arc::new(LatestValueSlot::new("results"));
        results.publish(bundle());
        let interrupt = Arc::new(AtomicBool::new(false));
        let preview = Preview::new(Box::new(QuitAfter { frames_left: 3 }), DisplayConfig::default());
        let mut orch = orchestrator(&results, None, Some(preview), &interrupt);

        // A dead worker is not an exit trigger while a display is attached
        assert_eq!(orch.run(|| Some("inference")), ExitReason::QuitKey);
        assert!(orch.state().last_render.is_some());
        orch.release_display();
    }
}
