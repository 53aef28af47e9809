//! Frames and annotation overlays.
//!
//! - `Frame`: one RGB24 image pulled from a source, tagged with its arrival index.
//! - Overlays (`outline`, `banner`) are drawn in place; the annotated frame is
//!   what the preview shows and what clips record.

use anyhow::{anyhow, Result};
use std::time::SystemTime;

use crate::detect::BoundingRegion;

/// Overlay color for detection outlines.
pub const OUTLINE_COLOR: [u8; 3] = [255, 64, 0];

/// Banner color while any incident class is active.
pub const BANNER_COLOR: [u8; 3] = [220, 0, 0];

/// Thickness of detection outlines, in pixels.
const OUTLINE_THICKNESS: u32 = 2;

/// One decoded frame. Pixels are tightly packed RGB24, row-major.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based arrival index within the source.
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: SystemTime,
    pixels: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting buffers that do not match the dimensions.
    pub fn new(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            captured_at: SystemTime::now(),
            pixels,
        })
    }

    /// Solid-color frame, mostly useful for synthetic sources and tests.
    pub fn filled(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..len / 3 {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(index, width, height, pixels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Draw a rectangular outline around a normalized region.
    pub fn outline(&mut self, region: &BoundingRegion, color: [u8; 3]) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let (x0, y0, x1, y1) = region.to_pixels(self.width, self.height);
        for t in 0..OUTLINE_THICKNESS {
            let top = (y0 + t).min(y1);
            let bottom = y1.saturating_sub(t).max(y0);
            let left = (x0 + t).min(x1);
            let right = x1.saturating_sub(t).max(x0);
            for x in x0..=x1 {
                self.put(x, top, color);
                self.put(x, bottom, color);
            }
            for y in y0..=y1 {
                self.put(left, y, color);
                self.put(right, y, color);
            }
        }
    }

    /// Fill a strip across the top of the frame to flag an active incident.
    pub fn banner(&mut self, color: [u8; 3]) {
        let rows = (self.height / 12).max(1).min(self.height);
        for y in 0..rows {
            for x in 0..self.width {
                self.put(x, y, color);
            }
        }
    }

    fn put(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&color);
    }

    #[cfg(test)]
    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }
}

/// Byte length of a tightly packed RGB24 image.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(0, 4, 4, vec![0u8; 10]).is_err());
        assert!(Frame::new(0, 4, 4, vec![0u8; 48]).is_ok());
    }

    #[test]
    fn outline_marks_edges_but_not_center() {
        let mut frame = Frame::filled(0, 20, 20, [0, 0, 0]).unwrap();
        let region = BoundingRegion::new(0.25, 0.25, 0.5, 0.5);
        frame.outline(&region, OUTLINE_COLOR);
        assert_eq!(frame.pixel(5, 5), OUTLINE_COLOR);
        assert_eq!(frame.pixel(10, 10), [0, 0, 0]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn banner_fills_top_rows_only() {
        let mut frame = Frame::filled(0, 24, 24, [9, 9, 9]).unwrap();
        frame.banner(BANNER_COLOR);
        assert_eq!(frame.pixel(3, 0), BANNER_COLOR);
        assert_eq!(frame.pixel(3, 1), BANNER_COLOR);
        assert_eq!(frame.pixel(3, 23), [9, 9, 9]);
    }
}
