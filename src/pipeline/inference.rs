//! Inference thread: newest raw frame -> preprocess -> detect -> annotate -> publish

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use tracing::{debug, error, info, warn};

use super::annotate::Annotator;
use super::bundle::ResultBundle;
use super::preprocess::Preprocessor;
use super::slot::LatestValueSlot;
use super::state::RunFlag;
use crate::capture::decoder::decode_to_rgb;
use crate::capture::Frame;
use crate::detect::Detector;
use crate::error::Result;
use crate::Config;

/// Time left in the current period, or `None` when the pass overran
pub fn pacing_delay(elapsed: Duration, target: Duration) -> Option<Duration> {
    target.checked_sub(elapsed).filter(|d| !d.is_zero())
}

/// Consumes the raw slot and feeds the result slot at a paced rate
///
/// There is no stop method: the loop exits once the shared run flag (owned by
/// the frame source) is lowered.
pub struct InferenceWorker {
    detector: Box<dyn Detector>,
    raw: Arc<LatestValueSlot<Frame>>,
    results: Arc<LatestValueSlot<ResultBundle>>,
    running: RunFlag,
    preprocessor: Preprocessor,
    annotator: Annotator,
    confidence_threshold: f32,
    interval: Duration,
    poll_interval: Duration,
    passes: u64,
}

impl InferenceWorker {
    pub fn new(
        detector: Box<dyn Detector>,
        raw: Arc<LatestValueSlot<Frame>>,
        results: Arc<LatestValueSlot<ResultBundle>>,
        running: RunFlag,
        config: &Config,
    ) -> Self {
        Self {
            detector,
            raw,
            results,
            running,
            preprocessor: Preprocessor::from(&config.preprocess),
            annotator: Annotator::new(&config.annotation),
            confidence_threshold: config.inference.confidence_threshold,
            interval: config.inference.interval(),
            poll_interval: config.timing.poll(),
            passes: 0,
        }
    }

    pub fn spawn(self) -> Result<WorkerHandle> {
        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("lookout-inference".into())
            .spawn(move || {
                // Dropped on return or unwind; the handle sees a disconnect
                let _done = done_tx;
                self.run();
            })?;

        Ok(WorkerHandle {
            name: "inference",
            thread: Some(thread),
            done: done_rx,
        })
    }

    pub fn run(mut self) {
        info!("Inference thread started ({} detector)", self.detector.name());

        while self.running.is_running() {
            let started = Instant::now();

            let Some(frame) = self.raw.read_latest() else {
                // Capture has not produced a first frame yet
                thread::sleep(self.poll_interval);
                continue;
            };

            match self.analyze(&frame) {
                Ok(bundle) => self.results.publish(bundle),
                Err(e) => warn!("Skipping frame {}: {}", frame.sequence(), e),
            }

            match pacing_delay(started.elapsed(), self.interval) {
                Some(delay) => thread::sleep(delay),
                None => metrics::counter!("inference_overruns_total").increment(1),
            }
        }

        info!("Inference thread stopped after {} passes", self.passes);
    }

    /// One full pass over `frame`; errors only come from decoding the capture
    pub fn analyze(&mut self, frame: &Frame) -> Result<ResultBundle> {
        let decoded = decode_to_rgb(frame)?;
        let prepared = self.preprocessor.prepare(decoded);
        let input = Frame::from_rgb(prepared.processed.clone(), frame.sequence(), frame.timestamp);

        let started = Instant::now();
        let detections = match self.detector.infer(&input, self.confidence_threshold) {
            Ok(detections) => detections,
            Err(e) => {
                metrics::counter!("inference_failures_total").increment(1);
                warn!("Inference failed, treating as no detections: {}", e);
                Vec::new()
            }
        };
        let inference_time = started.elapsed();
        metrics::histogram!("inference_time_us").record(inference_time.as_micros() as f64);
        metrics::histogram!("inference_detections").record(detections.len() as f64);

        let annotated = self.annotator.annotate(&prepared.processed, &detections);

        self.passes += 1;
        debug!(
            pass = self.passes,
            frame = frame.sequence(),
            detections = detections.len(),
            "Inference pass complete in {:?}",
            inference_time
        );

        Ok(ResultBundle {
            sequence: self.passes,
            source_sequence: frame.sequence(),
            raw_processed: Frame::from_rgb(prepared.archive, frame.sequence(), frame.timestamp),
            annotated: Frame::from_rgb(annotated, frame.sequence(), frame.timestamp),
            detections,
            inference_time,
        })
    }
}

/// How a bounded join ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Panicked,
    /// The thread was detached and left to finish on its own
    TimedOut,
    AlreadyJoined,
}

/// Join handle for a worker thread that supports a join timeout
pub struct WorkerHandle {
    name: &'static str,
    thread: Option<JoinHandle<()>>,
    done: flume::Receiver<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn join_timeout(&mut self, timeout: Duration) -> JoinOutcome {
        let Some(handle) = self.thread.take() else {
            return JoinOutcome::AlreadyJoined;
        };

        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} thread did not exit within {:?}; detaching it",
                    self.name, timeout
                );
                JoinOutcome::TimedOut
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
                Ok(()) => JoinOutcome::Joined,
                Err(_) => {
                    error!("{} thread panicked", self.name);
                    JoinOutcome::Panicked
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use crate::error::LookoutError;
    use crate::pipeline::{CropRect, Rotation};

    struct Fixed(Vec<Detection>);

    impl Detector for Fixed {
        fn infer(&mut self, _frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
            Ok(self.0.iter().filter(|d| d.confidence >= threshold).cloned().collect())
        }
    }

    struct Broken;

    impl Detector for Broken {
        fn infer(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
            Err(LookoutError::Inference("model exploded".into()))
        }
    }

    fn worker(detector: Box<dyn Detector>, config: &Config) -> InferenceWorker {
        InferenceWorker::new(
            detector,
            Arc::new(LatestValueSlot::new("raw")),
            Arc::new(LatestValueSlot::new("results")),
            RunFlag::new(),
            config,
        )
    }

    fn capture(width: u32, height: u32, sequence: u64) -> Frame {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([50, 60, 70]));
        Frame::from_rgb(img, sequence, Instant::now())
    }

    #[test]
    fn pacing_never_sleeps_negative_time() {
        let target = Duration::from_millis(100);
        assert_eq!(
            pacing_delay(Duration::from_millis(30), target),
            Some(Duration::from_millis(70))
        );
        assert_eq!(pacing_delay(target, target), None);
        assert_eq!(pacing_delay(Duration::from_millis(250), target), None);
    }

    #[test]
    fn bundle_fields_come_from_one_pass() {
        let mut config = Config::default();
        config.preprocess.rotation = Rotation::None;
        config.preprocess.crop = Some(CropRect::new(10, 10, 40, 30));
        config.annotation.draw_labels = false;
        let det = Detection {
            label: "cup".into(),
            confidence: 0.9,
            bbox: BoundingBox::new(2, 2, 20, 20),
        };
        let mut w = worker(Box::new(Fixed(vec![det.clone()])), &config);

        let bundle = w.analyze(&capture(100, 80, 42)).unwrap();
        assert_eq!(bundle.sequence, 1);
        assert_eq!(bundle.source_sequence, 42);
        assert_eq!(bundle.detections, vec![det]);
        // Rotated (here: unrotated) archive keeps the full frame
        assert_eq!((bundle.raw_processed.width(), bundle.raw_processed.height()), (100, 80));
        assert_eq!((bundle.annotated.width(), bundle.annotated.height()), (40, 30));

        let annotated = bundle.annotated.to_rgb_image().unwrap();
        assert_eq!(annotated.get_pixel(2, 10).0, config.annotation.color);
        let raw = bundle.raw_processed.to_rgb_image().unwrap();
        assert!(raw.pixels().all(|p| p.0 == [50, 60, 70]));

        assert_eq!(w.analyze(&capture(100, 80, 43)).unwrap().sequence, 2);
    }

    #[test]
    fn detector_failure_means_zero_detections() {
        let mut w = worker(Box::new(Broken), &Config::default());
        let bundle = w.analyze(&capture(32, 32, 1)).unwrap();
        assert!(bundle.detections.is_empty());
    }

    #[test]
    fn threshold_is_forwarded() {
        let mut config = Config::default();
        config.inference.confidence_threshold = 0.8;
        let weak = Detection {
            label: "cat".into(),
            confidence: 0.5,
            bbox: BoundingBox::new(0, 0, 4, 4),
        };
        let mut w = worker(Box::new(Fixed(vec![weak])), &config);
        assert!(w.analyze(&capture(16, 16, 1)).unwrap().detections.is_empty());
    }

    #[test]
    fn join_timeout_detaches_a_stuck_thread() {
        let (tx, rx) = flume::bounded::<()>(1);
        let thread = thread::spawn(move || {
            let _done = tx;
            thread::sleep(Duration::from_millis(500));
        });
        let mut handle = WorkerHandle {
            name: "stuck",
            thread: Some(thread),
            done: rx,
        };
        let start = Instant::now();
        assert_eq!(handle.join_timeout(Duration::from_millis(50)), JoinOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(400));
        assert_eq!(handle.join_timeout(Duration::from_millis(50)), JoinOutcome::AlreadyJoined);
    }

    #[test]
    fn panicking_worker_is_reported() {
        let (tx, rx) = flume::bounded::<()>(1);
        let thread = thread::spawn(move || {
            let _done = tx;
            panic!("boom");
        });
        let mut handle = WorkerHandle {
            name: "panicky",
            thread: Some(thread),
            done: rx,
        };
        assert_eq!(handle.join_timeout(Duration::from_secs(2)), JoinOutcome::Panicked);
    }
}
