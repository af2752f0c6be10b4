use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Advisory cancellation flag shared by the capture and inference loops
///
/// Checked once per loop iteration; in-flight driver or inference calls are
/// never interrupted.
#[derive(Clone, Debug, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Control-loop bookkeeping, only touched by the orchestrator thread
#[derive(Debug)]
pub struct PipelineState {
    pub last_persist: Instant,
    pub last_render: Option<Instant>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            // First snapshot lands one full interval after startup
            last_persist: Instant::now(),
            last_render: None,
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = RunFlag::new();
        let seen_by_worker = flag.clone();
        assert!(!seen_by_worker.is_running());
        flag.start();
        assert!(seen_by_worker.is_running());
        flag.stop();
        assert!(!seen_by_worker.is_running());
    }
}
