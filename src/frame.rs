//! Decoded camera frames.
//!
//! - `Frame`: RGB pixels plus capture timestamps. Shared read-only through `Arc`
//!   once published into the snapshot store.
//! - `decode_jpeg`: the single JPEG decode path used by every network source.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Width and height of the synthesized "waiting for camera" frame.
pub const PLACEHOLDER_SIZE: u32 = 320;

/// One decoded RGB frame.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant, used for delay/staleness metrics.
    pub captured_at: Instant,
    /// Wall-clock capture time, exposed on the read surface.
    pub captured_wall: SystemTime,
}

impl Frame {
    /// Create a frame from packed RGB8 pixels captured "now".
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
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
            pixels,
            width,
            height,
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
        })
    }

    /// Black frame shown to readers before the camera ever delivered anything.
    pub fn placeholder() -> Self {
        let len = (PLACEHOLDER_SIZE * PLACEHOLDER_SIZE * 3) as usize;
        Self {
            pixels: vec![0u8; len],
            width: PLACEHOLDER_SIZE,
            height: PLACEHOLDER_SIZE,
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Time elapsed since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decode a JPEG buffer into an RGB frame.
pub fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Frame::new(rgb.into_raw(), width, height)
}

/// Seconds since the Unix epoch, as used on the snapshot read surface.
pub fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 4, 4).is_err());
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).unwrap();
        assert_eq!(frame.byte_len(), 48);
    }

    #[test]
    fn placeholder_is_black_and_square() {
        let frame = Frame::placeholder();
        assert_eq!(frame.width, PLACEHOLDER_SIZE);
        assert_eq!(frame.height, PLACEHOLDER_SIZE);
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn decode_jpeg_rejects_garbage() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]).is_err());
    }
}
