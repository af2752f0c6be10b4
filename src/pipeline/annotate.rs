//! Bounding boxes and captions drawn onto a copy of the analysed frame

use image::{Rgb, RgbImage};

use crate::detect::Detection;
use crate::AnnotationConfig;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

#[derive(Debug, Clone)]
pub struct Annotator {
    color: Rgb<u8>,
    thickness: u32,
    draw_labels: bool,
    label_scale: u32,
}

impl Annotator {
    pub fn new(config: &AnnotationConfig) -> Self {
        Self {
            color: Rgb(config.color),
            thickness: config.thickness.max(1),
            draw_labels: config.draw_labels,
            label_scale: config.label_scale.max(1),
        }
    }

    /// Returns an annotated copy; `image` itself is left untouched
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        for det in detections {
            let b = det.bbox;
            for t in 0..self.thickness as i32 {
                draw_rectangle(&mut canvas, b.x1 + t, b.y1 + t, b.x2 - t, b.y2 - t, self.color);
            }
            if self.draw_labels {
                let scale = self.label_scale as i32;
                let text_height = GLYPH_HEIGHT * scale;
                // Above the box when there is room, otherwise just inside it
                let y = if b.y1 - text_height - 3 >= 0 {
                    b.y1 - text_height - 3
                } else {
                    b.y1 + self.thickness as i32 + 1
                };
                draw_label(&mut canvas, b.x1, y, &det.caption(), scale, self.color);
            }
        }
        canvas
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let l = left.clamp(0, width - 1);
    let r = right.clamp(0, width - 1);
    let t = top.clamp(0, height - 1);
    let b = bottom.clamp(0, height - 1);

    for x in l..=r {
        if (0..height).contains(&top) {
            image.put_pixel(x as u32, top as u32, color);
        }
        if (0..height).contains(&bottom) {
            image.put_pixel(x as u32, bottom as u32, color);
        }
    }
    for y in t..=b {
        if (0..width).contains(&left) {
            image.put_pixel(left as u32, y as u32, color);
        }
        if (0..width).contains(&right) {
            image.put_pixel(right as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut pen = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if (0..width).contains(&px) && (0..height).contains(&py) {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen += (GLYPH_WIDTH + 1) * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn annotator(draw_labels: bool) -> Annotator {
        Annotator::new(&AnnotationConfig {
            color: [255, 0, 0],
            thickness: 2,
            draw_labels,
            label_scale: 1,
        })
    }

    fn person(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "person".into(),
            confidence: 0.87,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn source_image_is_not_modified() {
        let img = RgbImage::new(40, 40);
        let out = annotator(true).annotate(&img, &[person(5, 20, 30, 35)]);
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
        assert_ne!(out, img);
    }

    #[test]
    fn box_edges_honor_thickness() {
        let img = RgbImage::new(40, 40);
        let out = annotator(false).annotate(&img, &[person(10, 10, 20, 20)]);
        assert_eq!(out.get_pixel(10, 15).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(11, 15).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(12, 15).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(15, 15).0, [0, 0, 0]);
    }

    #[test]
    fn out_of_frame_boxes_are_clipped() {
        let img = RgbImage::new(16, 16);
        let out = annotator(true).annotate(&img, &[person(-50, -50, 500, 500)]);
        assert_eq!(out.dimensions(), (16, 16));
    }

    #[test]
    fn no_detections_means_identical_copy() {
        let img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        assert_eq!(annotator(true).annotate(&img, &[]), img);
    }

    #[test]
    fn every_caption_character_has_a_glyph() {
        for ch in "PERSON (0.87) MOTION_1-2:3%".chars() {
            assert!(glyph_bits(ch).is_some(), "missing glyph {ch:?}");
        }
    }
}
