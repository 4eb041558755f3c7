//! Generated frames for `stub://` camera URLs.
//!
//! `stub://WxH` yields a drifting gradient of that size (default 640x480).
//! `stub://WxH/fail` refuses every request, for exercising the backoff path.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use url::Url;

use super::{FrameSource, SourceStats};
use crate::error::CaptureError;
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
/// Largest accepted stub side, keeping a frame well under 64 MB.
const MAX_SIDE: u32 = 4096;

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    failing: bool,
    scene_state: u8,
    stats: SourceStats,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            url: format!("stub://{width}x{height}"),
            width,
            height,
            failing: false,
            scene_state: 0,
            stats: SourceStats::default(),
        }
    }

    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).context("parse stub url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("not a stub url: {raw}"));
        }
        let (width, height) = match url.host_str().filter(|h| !h.is_empty()) {
            Some(size) => parse_size(size)?,
            None => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        };
        let mut source = Self::new(width, height);
        source.failing = url.path().trim_matches('/') == "fail";
        source.url = raw.to_string();
        Ok(source)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let frame_count = self.stats.frames_captured;
        if frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.width as usize * self.height as usize * 3;
        (0..len)
            .map(|i| ((i as u64 + frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}

fn parse_size(size: &str) -> Result<(u32, u32)> {
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SIZE_RE.get_or_init(|| Regex::new(r"^([0-9]{1,5})x([0-9]{1,5})$").unwrap());
    let caps = re
        .captures(size)
        .ok_or_else(|| anyhow!("stub size must look like 640x480, got '{size}'"))?;
    let width: u32 = caps[1].parse().context("stub width")?;
    let height: u32 = caps[2].parse().context("stub height")?;
    if width == 0 || height == 0 {
        return Err(anyhow!("stub size must be non-zero"));
    }
    if width > MAX_SIDE || height > MAX_SIDE {
        return Err(anyhow!("stub size {width}x{height} exceeds {MAX_SIDE}x{MAX_SIDE}"));
    }
    Ok((width, height))
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic {}", self.url)
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.failing {
            return Err(CaptureError::ConnectionRefused(self.url.clone()));
        }
        let pixels = self.generate_pixels();
        let frame = Frame::new(pixels, self.width, self.height)
            .map_err(|err| CaptureError::Malformed(err.to_string()))?;
        self.stats.frames_captured += 1;
        self.stats.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn stub_url_sets_size() {
        let mut source = SyntheticSource::from_url("stub://64x48").unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn stub_defaults_to_vga() {
        let mut source = SyntheticSource::from_url("stub://").unwrap();
        assert_eq!(source.next_frame().unwrap().width, 640);
    }

    #[test]
    fn failing_stub_refuses() {
        let mut source = SyntheticSource::from_url("stub://8x8/fail").unwrap();
        assert_eq!(
            source.next_frame().unwrap_err().kind(),
            FailureKind::ConnectionRefused
        );
        assert!(SyntheticSource::from_url("stub://0x8").is_err());
        assert!(SyntheticSource::from_url("http://cam").is_err());
        assert!(SyntheticSource::from_url("stub://64by48").is_err());
        assert!(SyntheticSource::from_url("stub://999999x8").is_err());
    }

    #[test]
    fn oversized_stub_is_rejected() {
        assert!(SyntheticSource::from_url("stub://99999x99999").is_err());
        assert!(SyntheticSource::from_url("stub://4097x8").is_err());
        let mut source = SyntheticSource::from_url("stub://4096x2").unwrap();
        assert_eq!(source.next_frame().unwrap().pixels().len(), 4096 * 2 * 3);
    }
}
