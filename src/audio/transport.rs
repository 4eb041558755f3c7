use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crate::audio::{pcm1, PcmClip};
use crate::error::AudioError;

/// Where and how to push PCM1 frames.
#[derive(Clone, Debug)]
pub struct SpeakerConfig {
    /// `host:port` of the speaker's PCM1 listener.
    pub addr: String,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub chunk_size: usize,
    pub attempts: u32,
    /// Delay before retry `n` is `retry_step * n`.
    pub retry_step: Duration,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            addr: "192.168.132.244:23456".to_string(),
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            chunk_size: 4096,
            attempts: 3,
            retry_step: Duration::from_millis(200),
        }
    }
}

/// Blocking PCM1 sender. One TCP connection per clip.
#[derive(Clone, Debug)]
pub struct SpeakerTransport {
    config: SpeakerConfig,
}

impl SpeakerTransport {
    pub fn new(config: SpeakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpeakerConfig {
        &self.config
    }

    /// Send with the configured retry budget.
    pub fn send(&self, clip: &PcmClip) -> Result<(), AudioError> {
        self.send_with_attempts(clip, self.config.attempts)
    }

    /// Single attempt, no retry delay. Used for latency-sensitive beeps.
    pub fn send_once(&self, clip: &PcmClip) -> Result<(), AudioError> {
        self.send_with_attempts(clip, 1)
    }

    fn send_with_attempts(&self, clip: &PcmClip, attempts: u32) -> Result<(), AudioError> {
        let header = pcm1::Header::for_payload(clip.sample_rate(), clip.data())?;
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.write_frame(&header, clip.data()) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    log::debug!(
                        "speaker send attempt {attempt}/{attempts} to {} failed: {err}",
                        self.config.addr
                    );
                    thread::sleep(self.config.retry_step * attempt);
                }
                Err(err) => {
                    if attempts > 1 {
                        log::warn!(
                            "speaker send to {} failed after {attempts} attempts: {err}",
                            self.config.addr
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    fn write_frame(&self, header: &pcm1::Header, pcm: &[u8]) -> Result<(), AudioError> {
        let addr = self.resolve()?;
        let mut stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.write_all(&header.encode())?;
        for chunk in pcm.chunks(self.config.chunk_size.max(1)) {
            stream.write_all(chunk)?;
        }
        stream.flush()?;
        Ok(())
    }

    fn resolve(&self) -> Result<SocketAddr, AudioError> {
        self.config
            .addr
            .to_socket_addrs()
            .map_err(|err| {
                AudioError::ConnectionRefused(format!("resolve {}: {err}", self.config.addr))
            })?
            .next()
            .ok_or_else(|| {
                AudioError::ConnectionRefused(format!("{} resolved to nothing", self.config.addr))
            })
    }
}
