//! Frame ingestion.
//!
//! A [`FrameSource`] yields decoded frames; [`spawn_ingest`] runs one on its own
//! thread, republishing the newest frame into the snapshot store. Pull sources are
//! paced by `fetch_interval`; streaming sources are read as fast as the camera pushes.
//! Network trouble never leaves this module: failures are counted, logged at a
//! throttled rate and retried with a growing backoff.
//!
//! Sources:
//! - `Esp32Source`: ESP32-CAM over HTTP (single-shot capture or MJPEG stream)
//! - `SyntheticSource`: generated frames for `stub://` URLs

pub mod esp32;
pub mod mjpeg;
pub mod synthetic;

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{CaptureError, FailureKind};
use crate::frame::Frame;
use crate::shutdown::Shutdown;
use crate::store::SnapshotStore;

pub use esp32::{CameraMode, Esp32Config, Esp32Source};
pub use synthetic::SyntheticSource;

const HEALTH_LOG_EVERY: Duration = Duration::from_secs(5);

/// Counters kept by a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Frames dropped inside the source because they failed to decode.
    pub malformed_frames: u64,
    pub last_frame_at: Option<Instant>,
}

pub trait FrameSource: Send {
    fn describe(&self) -> String;

    /// Block until the next frame or a failure.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    fn stats(&self) -> SourceStats;

    /// Push-based sources set the pace themselves and must be drained without pauses,
    /// or unread frames pile up in the socket buffers.
    fn is_streaming(&self) -> bool {
        false
    }
}

/// Pick a source for a camera URL: `stub://` is synthetic, anything else the ESP32.
pub fn open_source(config: &Esp32Config) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_url(&config.url)?));
    }
    Ok(Box::new(Esp32Source::new(config.clone())?))
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Minimum spacing between frame requests. Not applied to streaming sources.
    pub fetch_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Log the 1st, (K+1)th, (2K+1)th... consecutive failure.
    pub fail_log_every: u64,
    /// A source with no frame for this long reports unhealthy.
    pub health_grace: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_millis(40),
            backoff_base: Duration::from_millis(30),
            backoff_max: Duration::from_millis(500),
            fail_log_every: 30,
            health_grace: Duration::from_secs(2),
        }
    }
}

/// Failure backoff: `base`, then x1.5 per failure up to `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to sleep now; advances the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 3 / 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Whether the `n`th consecutive failure (1-based) should be logged.
pub fn should_log_failure(n: u64, every: u64) -> bool {
    every <= 1 || n % every == 1
}

/// Loop-level view of ingestion health.
#[derive(Clone, Debug, Default)]
pub struct IngestStats {
    pub frames_published: u64,
    pub failures_total: u64,
    pub consecutive_failures: u64,
    pub malformed_frames: u64,
    pub last_error: Option<FailureKind>,
    pub last_frame_at: Option<Instant>,
}

impl IngestStats {
    pub fn is_healthy(&self, grace: Duration) -> bool {
        self.last_frame_at.is_some_and(|at| at.elapsed() <= grace)
    }
}

pub struct IngestHandle {
    shutdown: Shutdown,
    stats: Arc<Mutex<IngestStats>>,
    join: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn stats(&self) -> IngestStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.join_inner()
    }

    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("ingest thread panicked"))?;
        }
        Ok(())
    }
}

pub fn spawn_ingest(
    source: Box<dyn FrameSource>,
    store: Arc<SnapshotStore>,
    config: IngestConfig,
    shutdown: Shutdown,
) -> Result<IngestHandle> {
    let stats = Arc::new(Mutex::new(IngestStats::default()));
    let loop_stats = Arc::clone(&stats);
    let stop = shutdown.clone();
    let join = std::thread::Builder::new()
        .name("ingest".into())
        .spawn(move || run_ingest(source, &store, &config, &stop, &loop_stats))
        .context("spawn ingest thread")?;
    Ok(IngestHandle {
        shutdown,
        stats,
        join: Some(join),
    })
}

fn run_ingest(
    mut source: Box<dyn FrameSource>,
    store: &SnapshotStore,
    config: &IngestConfig,
    shutdown: &Shutdown,
    stats: &Mutex<IngestStats>,
) {
    log::info!("ingest started: {}", source.describe());
    let streaming = source.is_streaming();
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_max);
    let mut consecutive: u64 = 0;
    let mut malformed_errors: u64 = 0;
    let mut last_health_log = Instant::now();

    while !shutdown.is_triggered() {
        let started = Instant::now();
        let result = source.next_frame();
        let source_stats = source.stats();

        let pause = match result {
            Ok(frame) => {
                if consecutive > 0 {
                    log::info!("camera recovered after {consecutive} failed attempt(s)");
                }
                consecutive = 0;
                backoff.reset();
                store.publish_frame(frame);
                update(stats, |s| {
                    s.frames_published += 1;
                    s.consecutive_failures = 0;
                    s.last_frame_at = Some(Instant::now());
                    s.malformed_frames = source_stats.malformed_frames + malformed_errors;
                });
                if streaming {
                    Duration::ZERO
                } else {
                    config.fetch_interval.saturating_sub(started.elapsed())
                }
            }
            Err(err) => {
                consecutive += 1;
                let kind = err.kind();
                if kind == FailureKind::Malformed {
                    malformed_errors += 1;
                }
                if should_log_failure(consecutive, config.fail_log_every) {
                    log::warn!("camera fetch failed ({consecutive}x, {kind}): {err}");
                }
                update(stats, |s| {
                    s.failures_total += 1;
                    s.consecutive_failures = consecutive;
                    s.last_error = Some(kind);
                    s.malformed_frames = source_stats.malformed_frames + malformed_errors;
                });
                backoff.next_delay()
            }
        };

        if last_health_log.elapsed() >= HEALTH_LOG_EVERY {
            last_health_log = Instant::now();
            let snapshot = stats
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            log::info!(
                "ingest health: healthy={} frames={} failures={} malformed={}",
                snapshot.is_healthy(config.health_grace),
                snapshot.frames_published,
                snapshot.failures_total,
                snapshot.malformed_frames
            );
        }

        if shutdown.sleep(pause) {
            break;
        }
    }
    log::info!("ingest stopped: {}", source.describe());
}

fn update(stats: &Mutex<IngestStats>, f: impl FnOnce(&mut IngestStats)) {
    let mut guard = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(30), Duration::from_millis(500));
        let delays: Vec<u128> = (0..9).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays[..4], [30, 45, 67, 101]);
        assert_eq!(*delays.last().unwrap(), 500);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(30));
    }

    #[test]
    fn failure_logging_is_throttled() {
        let logged: Vec<u64> = (1..=65).filter(|n| should_log_failure(*n, 30)).collect();
        assert_eq!(logged, vec![1, 31, 61]);
        assert!(should_log_failure(7, 1));
    }

    #[test]
    fn ingest_publishes_and_stops() {
        let store = SnapshotStore::new();
        let handle = spawn_ingest(
            Box::new(SyntheticSource::new(8, 6)),
            Arc::clone(&store),
            IngestConfig {
                fetch_interval: Duration::from_millis(5),
                ..IngestConfig::default()
            },
            Shutdown::new(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.latest_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.latest_frame().unwrap().width, 8);
        assert!(handle.stats().frames_published >= 1);
        handle.stop().unwrap();
    }

    /// Streams frames numbered by width, as fast as asked.
    struct PushSource {
        next: u32,
    }

    impl FrameSource for PushSource {
        fn describe(&self) -> String {
            "push".to_string()
        }

        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            self.next += 1;
            Frame::new(vec![0; self.next as usize * 3], self.next, 1)
                .map_err(|err| CaptureError::Malformed(err.to_string()))
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }

        fn is_streaming(&self) -> bool {
            true
        }
    }

    #[test]
    fn streaming_sources_are_not_paced() {
        let store = SnapshotStore::new();
        let handle = spawn_ingest(
            Box::new(PushSource { next: 0 }),
            Arc::clone(&store),
            IngestConfig {
                fetch_interval: Duration::from_secs(1),
                ..IngestConfig::default()
            },
            Shutdown::new(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().frames_published < 50 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // With pacing this would take 50 seconds.
        assert!(handle.stats().frames_published >= 50);
        handle.stop().unwrap();
    }

    #[test]
    fn failing_source_never_publishes() {
        let store = SnapshotStore::new();
        let handle = spawn_ingest(
            Box::new(SyntheticSource::from_url("stub://4x4/fail").unwrap()),
            Arc::clone(&store),
            IngestConfig {
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
                ..IngestConfig::default()
            },
            Shutdown::new(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().failures_total < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stats();
        assert!(stats.consecutive_failures >= 3);
        assert_eq!(stats.last_error, Some(FailureKind::ConnectionRefused));
        assert!(store.latest_frame().is_none());
        handle.stop().unwrap();
    }
}
