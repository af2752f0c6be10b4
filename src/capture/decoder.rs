use image::RgbImage;
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat};
use crate::error::{LookoutError, Result};

/// Decode any supported capture format into an owned RGB image
pub fn decode_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let data = &frame.data[..];

    if let Some(expected) = frame.format().frame_len(width, height) {
        if data.len() < expected {
            return Err(LookoutError::Decode(format!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                frame.format(),
                width,
                height,
                expected,
                data.len()
            )));
        }
    }

    match frame.format() {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            let len = width as usize * height as usize * 3;
            rgb_image(width, height, data[..len].to_vec())
        }
        PixelFormat::Bgr24 => rgb_image(width, height, bgr_to_rgb(data, width, height)),
        PixelFormat::Yuyv4 => rgb_image(width, height, yuyv_to_rgb(data, width, height)),
        PixelFormat::Nv12 => rgb_image(width, height, nv12_to_rgb(data, width, height)),
    }
}

fn rgb_image(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbImage> {
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| LookoutError::Decode(format!("pixel buffer does not fit {width}x{height}")))
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| LookoutError::Decode(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| LookoutError::Decode("JPEG header carried no dimensions".into()))?;

    if pixels.len() != width * height * 3 {
        return Err(LookoutError::Decode(format!(
            "JPEG decoded to {} bytes, expected RGB {}x{}",
            pixels.len(),
            width,
            height
        )));
    }
    rgb_image(width as u32, height as u32, pixels)
}

fn bgr_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let len = width as usize * height as usize * 3;
    let mut rgb = Vec::with_capacity(len);
    for chunk in data[..len].chunks_exact(3) {
        rgb.push(chunk[2]);
        rgb.push(chunk[1]);
        rgb.push(chunk[0]);
    }
    rgb
}

/// BT.601 limited-range conversion
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (c + 409 * e + 128) >> 8;
    let g = (c - 100 * d - 208 * e + 128) >> 8;
    let b = (c + 516 * d + 128) >> 8;
    [
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    ]
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    // Y0 U Y1 V covers two pixels
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    // Odd widths leave a trailing half pair
    rgb.resize(pixels * 3, 0);
    rgb
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let (luma, chroma) = data.split_at(w * h);
    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let chroma_row = (row / 2) * w;
        for col in 0..w {
            let uv = chroma_row + (col & !1);
            let u = chroma.get(uv).copied().unwrap_or(128);
            let v = chroma.get(uv + 1).copied().unwrap_or(128);
            rgb.extend_from_slice(&yuv_to_rgb(luma[row * w + col], u, v));
        }
    }
    rgb
}
