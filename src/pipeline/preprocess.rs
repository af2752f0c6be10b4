//! Deterministic frame preparation ahead of inference: rotate, then crop

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// Orientation correction applied to every captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    None,
    Cw90,
    #[default]
    Rotate180,
    Cw270,
}

/// Requested region of interest; any values are accepted and clamped on use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// A crop rectangle that lies fully inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which stage of the frame is archived as the "original" snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePolicy {
    /// Decoded capture, before rotation
    Capture,
    /// After rotation, before the crop
    #[default]
    Rotated,
    /// Exactly what the detector saw
    Processed,
}

impl CropRect {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp into `[0, width) x [0, height)`
    ///
    /// The origin is clamped to `[0, dim - 1]` and the far corner to
    /// `[0, dim]`; a far corner at or before the origin still yields one
    /// pixel, so the result is never empty. Returns `None` only for an empty
    /// frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Region> {
        let (x, width) = clamp_axis(self.x, self.width, frame_width)?;
        let (y, height) = clamp_axis(self.y, self.height, frame_height)?;
        Some(Region {
            x,
            y,
            width,
            height,
        })
    }
}

fn clamp_axis(origin: i64, extent: i64, dim: u32) -> Option<(u32, u32)> {
    if dim == 0 {
        return None;
    }
    let dim = dim as i64;
    let start = origin.clamp(0, dim - 1);
    let end = origin.saturating_add(extent).clamp(0, dim);
    let len = (end - start).max(1);
    Some((start as u32, len as u32))
}

impl From<Region> for CropRect {
    fn from(r: Region) -> Self {
        CropRect::new(r.x as i64, r.y as i64, r.width as i64, r.height as i64)
    }
}

pub fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Rotate180 => {
            let mut image = image;
            imageops::rotate180_in_place(&mut image);
            image
        }
        Rotation::Cw270 => imageops::rotate270(&image),
    }
}

/// Crop with clamping; never fails on out-of-range requests
pub fn crop(image: &RgbImage, rect: &CropRect) -> RgbImage {
    match rect.clamp_to(image.width(), image.height()) {
        Some(r) => imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image(),
        None => image.clone(),
    }
}

/// Output of one preprocessing pass
pub struct Prepared {
    /// Frame kept for archival according to the [`ArchivePolicy`]
    pub archive: RgbImage,
    /// Input handed to the detector
    pub processed: RgbImage,
}

/// Applies the configured rotation and region of interest in fixed order
#[derive(Debug, Clone)]
pub struct Preprocessor {
    rotation: Rotation,
    crop: Option<CropRect>,
    archive: ArchivePolicy,
}

impl Preprocessor {
    pub fn new(rotation: Rotation, crop: Option<CropRect>, archive: ArchivePolicy) -> Self {
        Self {
            rotation,
            crop,
            archive,
        }
    }

    pub fn prepare(&self, decoded: RgbImage) -> Prepared {
        let capture = (self.archive == ArchivePolicy::Capture).then(|| decoded.clone());
        let rotated = rotate(decoded, self.rotation);
        let processed = match &self.crop {
            Some(rect) => crop(&rotated, rect),
            None => rotated.clone(),
        };
        let archive = match self.archive {
            ArchivePolicy::Capture => capture.unwrap_or_else(|| rotated.clone()),
            ArchivePolicy::Rotated => rotated,
            ArchivePolicy::Processed => processed.clone(),
        };
        Prepared { archive, processed }
    }
}

impl From<&crate::PreprocessConfig> for Preprocessor {
    fn from(config: &crate::PreprocessConfig) -> Self {
        Self::new(config.rotation, config.crop, config.archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn inside(r: &Region, w: u32, h: u32) -> bool {
        r.width > 0 && r.height > 0 && r.x + r.width <= w && r.y + r.height <= h
    }

    #[test]
    fn oversized_request_clamps_inside_frame() {
        let r = CropRect::new(880, 5, 1550, 2500).clamp_to(1280, 800).unwrap();
        assert_eq!(
            r,
            Region {
                x: 880,
                y: 5,
                width: 400,
                height: 795
            }
        );
        assert!(inside(&r, 1280, 800));
    }

    #[test]
    fn any_request_stays_inside_and_is_idempotent() {
        let values = [i64::MIN, -5000, -1, 0, 1, 7, 639, 640, 641, 5000, i64::MAX];
        for &x in &values {
            for &w in &values {
                for &y in &[-3i64, 0, 100, 479, 480, 900] {
                    for &h in &[-10i64, 0, 1, 50, 480, 10_000] {
                        let r = CropRect::new(x, y, w, h).clamp_to(640, 480).unwrap();
                        assert!(inside(&r, 640, 480), "{x},{y},{w},{h} -> {r:?}");
                        let again = CropRect::from(r).clamp_to(640, 480).unwrap();
                        assert_eq!(r, again);
                    }
                }
            }
        }
    }

    #[test]
    fn empty_frame_has_no_region() {
        assert_eq!(CropRect::new(0, 0, 10, 10).clamp_to(0, 10), None);
    }

    #[test]
    fn crop_returns_clamped_pixels() {
        let mut img = RgbImage::new(10, 10);
        img.put_pixel(9, 9, Rgb([1, 2, 3]));
        let out = crop(&img, &CropRect::new(8, 8, 100, 100));
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(out.get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn rotation_then_crop_order() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let pre = Preprocessor::new(
            Rotation::Rotate180,
            Some(CropRect::new(2, 0, 2, 2)),
            ArchivePolicy::Rotated,
        );
        let prepared = pre.prepare(img);
        // (0,0) lands at (3,1) after 180 degrees, then at (1,1) inside the crop
        assert_eq!(prepared.processed.dimensions(), (2, 2));
        assert_eq!(prepared.processed.get_pixel(1, 1).0, [255, 0, 0]);
        assert_eq!(prepared.archive.dimensions(), (4, 2));
        assert_eq!(prepared.archive.get_pixel(3, 1).0, [255, 0, 0]);
    }

    #[test]
    fn archive_policy_selects_stage() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([9, 9, 9]));
        let crop = Some(CropRect::new(0, 0, 1, 1));

        let capture = Preprocessor::new(Rotation::Cw90, crop, ArchivePolicy::Capture).prepare(img.clone());
        assert_eq!(capture.archive.dimensions(), (4, 2));
        assert_eq!(capture.archive.get_pixel(0, 0).0, [9, 9, 9]);

        let processed =
            Preprocessor::new(Rotation::Cw90, crop, ArchivePolicy::Processed).prepare(img);
        assert_eq!(processed.archive.dimensions(), (1, 1));
        assert_eq!(processed.processed.dimensions(), (1, 1));
    }
}
