use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BoundingBox, Detection, Detector};
use crate::capture::{Frame, PixelFormat};
use crate::error::{LookoutError, Result};

/// Settings for the built-in frame-differencing detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub grid_columns: u32,
    pub grid_rows: u32,
    /// Mean absolute luma change (0-255) that marks a cell as moving
    pub cell_threshold: f32,
    /// Smallest connected region reported, in cells
    pub min_cells: usize,
    /// Mean luma change that maps to confidence 1.0
    pub saturation: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            grid_columns: 32,
            grid_rows: 24,
            cell_threshold: 18.0,
            min_cells: 2,
            saturation: 64.0,
        }
    }
}

/// Reports regions that changed since the previous frame as `motion`
///
/// Frames are reduced to a coarse grid of mean luma values, differenced
/// against the previous grid, and 4-connected groups of changed cells become
/// one detection each.
pub struct MotionDetector {
    config: MotionConfig,
    previous: Option<LumaGrid>,
}

#[derive(Debug, Clone, PartialEq)]
struct LumaGrid {
    width: u32,
    height: u32,
    cells: Vec<f32>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    fn grid(&self, frame: &Frame) -> Result<LumaGrid> {
        if frame.format() != PixelFormat::Rgb24 {
            return Err(LookoutError::UnsupportedFormat(frame.format()));
        }
        let width = frame.width();
        let height = frame.height();
        let cols = self.config.grid_columns.clamp(1, width.max(1));
        let rows = self.config.grid_rows.clamp(1, height.max(1));
        if frame.data.len() < width as usize * height as usize * 3 {
            return Err(LookoutError::Decode("RGB payload shorter than frame".into()));
        }

        let mut sums = vec![0f64; (cols * rows) as usize];
        let mut counts = vec![0u32; (cols * rows) as usize];
        for (y, row) in frame
            .data
            .chunks_exact(width as usize * 3)
            .take(height as usize)
            .enumerate()
        {
            let cy = (y as u32 * rows / height) as usize;
            for (x, px) in row.chunks_exact(3).enumerate() {
                let cx = (x as u32 * cols / width) as usize;
                let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
                let idx = cy * cols as usize + cx;
                sums[idx] += luma;
                counts[idx] += 1;
            }
        }

        let cells = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &n)| if n == 0 { 0.0 } else { (sum / n as f64) as f32 })
            .collect();

        Ok(LumaGrid {
            width: cols,
            height: rows,
            cells,
        })
    }

    fn regions(&self, prev: &LumaGrid, current: &LumaGrid, frame: &Frame) -> Vec<Detection> {
        let cols = current.width as usize;
        let rows = current.height as usize;
        let diffs: Vec<f32> = prev
            .cells
            .iter()
            .zip(&current.cells)
            .map(|(a, b)| (a - b).abs())
            .collect();
        let mut visited = vec![false; diffs.len()];
        let mut detections = Vec::new();

        for start in 0..diffs.len() {
            if visited[start] || diffs[start] < self.config.cell_threshold {
                continue;
            }

            // Flood fill one region
            let mut stack = vec![start];
            visited[start] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (cols, rows, 0, 0);
            let mut total = 0f32;
            let mut count = 0usize;
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % cols, idx / cols);
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
                total += diffs[idx];
                count += 1;

                let mut visit = |n: usize| {
                    if !visited[n] && diffs[n] >= self.config.cell_threshold {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < cols {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - cols);
                }
                if y + 1 < rows {
                    visit(idx + cols);
                }
            }

            if count < self.config.min_cells {
                continue;
            }

            let fw = frame.width() as usize;
            let fh = frame.height() as usize;
            let bbox = BoundingBox::new(
                (min_x * fw / cols) as i32,
                (min_y * fh / rows) as i32,
                ((max_x + 1) * fw / cols) as i32,
                ((max_y + 1) * fh / rows) as i32,
            );
            let confidence = (total / count as f32 / self.config.saturation).clamp(0.0, 1.0);
            detections.push(Detection {
                label: "motion".into(),
                confidence,
                bbox,
            });
        }

        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections
    }
}

impl Detector for MotionDetector {
    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let current = self.grid(frame)?;
        let previous = self.previous.replace(current.clone());

        let Some(previous) = previous else {
            debug!("first frame, no motion reference yet");
            return Ok(Vec::new());
        };
        if previous.width != current.width || previous.height != current.height {
            debug!("frame geometry changed, resetting motion reference");
            return Ok(Vec::new());
        }

        let mut detections = self.regions(&previous, &current, frame);
        detections.retain(|d| d.confidence >= confidence_threshold);
        Ok(detections)
    }

    fn name(&self) -> &str {
        "motion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    fn frame(image: RgbImage) -> Frame {
        Frame::from_rgb(image, 0, Instant::now())
    }

    fn detector() -> MotionDetector {
        MotionDetector::new(MotionConfig {
            grid_columns: 8,
            grid_rows: 8,
            ..MotionConfig::default()
        })
    }

    #[test]
    fn first_frame_has_no_reference() {
        let mut det = detector();
        let out = det
            .infer(&frame(RgbImage::new(64, 64)), 0.0)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn static_scene_reports_nothing() {
        let mut det = detector();
        let img = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
        det.infer(&frame(img.clone()), 0.0).unwrap();
        assert!(det.infer(&frame(img), 0.0).unwrap().is_empty());
    }

    #[test]
    fn bright_block_is_boxed() {
        let mut det = detector();
        let dark = RgbImage::new(64, 64);
        let mut lit = dark.clone();
        // Covers grid cells (2..4, 2..4) on an 8x8 grid
        for y in 16..32 {
            for x in 16..32 {
                lit.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        det.infer(&frame(dark), 0.25).unwrap();
        let out = det.infer(&frame(lit), 0.25).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "motion");
        assert_eq!(out[0].bbox, BoundingBox::new(16, 16, 32, 32));
        assert!((out[0].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn threshold_filters_weak_regions() {
        let mut det = detector();
        let base = RgbImage::from_pixel(64, 64, Rgb([100, 100, 100]));
        let mut shifted = base.clone();
        for y in 0..16 {
            for x in 0..64 {
                shifted.put_pixel(x, y, Rgb([125, 125, 125]));
            }
        }
        det.infer(&frame(base), 0.9).unwrap();
        assert!(det.infer(&frame(shifted), 0.9).unwrap().is_empty());
    }

    #[test]
    fn non_rgb_frames_are_rejected() {
        let mut det = detector();
        let frame = Frame::new(
            vec![0u8; 8],
            crate::capture::FrameMetadata {
                sequence: 0,
                width: 2,
                height: 2,
                stride: 4,
                format: PixelFormat::Yuyv4,
                device_timestamp: None,
            },
        );
        assert!(det.infer(&frame, 0.5).is_err());
    }
}
