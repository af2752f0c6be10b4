use std::time::Duration;

use crate::capture::Frame;
use crate::detect::Detection;

/// Everything one inference pass produced, published as a single value
///
/// Fields are never updated in place: a new pass builds a new bundle and
/// replaces the old one in the result slot.
#[derive(Debug, Clone)]
pub struct ResultBundle {
    /// Inference pass id, increasing by one per published bundle
    pub sequence: u64,
    /// Sequence number of the captured frame this pass analysed
    pub source_sequence: u64,
    /// Unannotated frame kept for archival
    pub raw_processed: Frame,
    pub annotated: Frame,
    pub detections: Vec<Detection>,
    pub inference_time: Duration,
}
