//! ESP32-CAM frame source.
//!
//! Two access modes against the stock ESP32 camera firmware:
//! - `capture`: one `GET http://<ip>/capture` per frame, body is a single JPEG
//! - `stream`: a long-lived `GET http://<ip>:81/stream` multipart MJPEG response
//!
//! A dropped stream is reported as a failure and reconnected on the next call, so the
//! ingest loop's backoff applies to reconnects too.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use super::mjpeg::{MjpegParser, MAX_JPEG_BYTES};
use super::{FrameSource, SourceStats};
use crate::error::CaptureError;
use crate::frame::{decode_jpeg, Frame};

/// Single-shot bodies shorter than this are not real frames (error pages, truncation).
pub const MIN_CAPTURE_BYTES: usize = 1000;
const STREAM_PORT: u16 = 81;
/// Large enough that a backlog of small frames lands in one read and collapses to
/// the newest.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Capture,
    #[default]
    Stream,
}

impl std::str::FromStr for CameraMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capture" => Ok(CameraMode::Capture),
            "stream" => Ok(CameraMode::Stream),
            other => Err(anyhow!("unknown camera mode '{}'; expected capture or stream", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Esp32Config {
    /// Camera base URL (`http://<ip>`), or a full `/capture` or `/stream` URL.
    pub url: String,
    pub mode: CameraMode,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for Esp32Config {
    fn default() -> Self {
        Self {
            url: "http://192.168.132.244".to_string(),
            mode: CameraMode::Stream,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl Esp32Config {
    /// Resolve the endpoint for the configured mode.
    ///
    /// A bare base URL gets `/capture` on the same port, or `/stream` on port 81.
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        if url.path() != "/" && !url.path().is_empty() {
            return Ok(url);
        }
        match self.mode {
            CameraMode::Capture => url.set_path("/capture"),
            CameraMode::Stream => {
                if url.port().is_none() {
                    url.set_port(Some(STREAM_PORT))
                        .map_err(|_| anyhow!("camera url cannot carry a port"))?;
                }
                url.set_path("/stream");
            }
        }
        Ok(url)
    }
}

pub struct Esp32Source {
    endpoint: Url,
    mode: CameraMode,
    agent: ureq::Agent,
    stream: Option<Box<dyn Read + Send>>,
    parser: MjpegParser,
    read_buf: Vec<u8>,
    stats: SourceStats,
}

impl Esp32Source {
    pub fn new(config: Esp32Config) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            endpoint,
            mode: config.mode,
            agent,
            stream: None,
            parser: MjpegParser::default(),
            read_buf: vec![0; READ_CHUNK],
            stats: SourceStats::default(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let response = self.agent.request_url("GET", &self.endpoint).call()?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() < MIN_CAPTURE_BYTES {
            return Err(CaptureError::Malformed(format!(
                "capture body of {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(CaptureError::Malformed("capture body too large".into()));
        }
        decode_jpeg(&bytes).map_err(|err| CaptureError::Malformed(format!("{err:#}")))
    }

    fn connect_stream(&mut self) -> Result<(), CaptureError> {
        let response = self.agent.request_url("GET", &self.endpoint).call()?;
        let content_type = response.content_type().to_ascii_lowercase();
        if !content_type.contains("multipart") {
            log::debug!("camera stream content type is '{content_type}'; scanning anyway");
        }
        log::info!("camera stream connected: {}", self.endpoint);
        self.stream = Some(response.into_reader());
        self.parser = MjpegParser::default();
        Ok(())
    }

    fn next_streamed(&mut self) -> Result<Frame, CaptureError> {
        if self.stream.is_none() {
            self.connect_stream()?;
        }
        loop {
            let Some(reader) = self.stream.as_mut() else {
                return Err(CaptureError::StreamEnded);
            };
            let read = match reader.read(&mut self.read_buf) {
                Ok(0) => {
                    self.stream = None;
                    return Err(CaptureError::StreamEnded);
                }
                Ok(n) => n,
                Err(err) => {
                    self.stream = None;
                    return Err(err.into());
                }
            };
            // Only the newest complete frame matters; older ones are already stale.
            let Some(jpeg) = self.parser.push(&self.read_buf[..read]).pop() else {
                continue;
            };
            match decode_jpeg(&jpeg) {
                Ok(frame) => return Ok(frame),
                Err(err) => {
                    self.stats.malformed_frames += 1;
                    log::debug!("skipping undecodable stream frame: {err:#}");
                }
            }
        }
    }
}

impl FrameSource for Esp32Source {
    fn describe(&self) -> String {
        format!("esp32 {:?} {}", self.mode, self.endpoint)
    }

    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let result = match self.mode {
            CameraMode::Capture => self.capture(),
            CameraMode::Stream => self.next_streamed(),
        };
        if result.is_ok() {
            self.stats.frames_captured += 1;
            self.stats.last_frame_at = Some(Instant::now());
        }
        result
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    fn is_streaming(&self) -> bool {
        self.mode == CameraMode::Stream
    }
}
