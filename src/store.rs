//! The one piece of state shared by every loop.
//!
//! Ingestion writes the newest camera frame, the risk cycle writes its results, the
//! audio dispatcher writes send health and the voice assistant writes its status.
//! Everything sits behind one mutex; a condvar wakes readers waiting for the next
//! processed frame. No lock is ever held across I/O or inference.

use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use crate::alert::VoiceStatus;
use crate::detect::Detection;
use crate::frame::{epoch_secs, Frame};
use crate::risk::{RiskLevel, RiskTarget};
use crate::search::{SearchTarget, TargetInfo};

/// Default bounded wait for readers of the processed-frame surface.
pub const FRAME_WAIT: Duration = Duration::from_millis(500);

/// What the risk cycle publishes after each processed frame.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    pub detections: Vec<Detection>,
    pub infer_ms: f64,
    pub delay_ms: f64,
    pub alert: AlertSnapshot,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AlertSnapshot {
    pub level: RiskLevel,
    pub text: String,
    pub target: Option<RiskTarget>,
    pub should_notify: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AudioHealth {
    /// Wall time of the last successful send.
    pub last_send_ts: Option<f64>,
    /// Outcome of the most recent send attempt.
    pub last_send_ok: Option<bool>,
}

/// Search mode state. `active == false` means every other field is cleared.
#[derive(Clone, Debug, Default)]
pub struct SearchState {
    pub target: Option<SearchTarget>,
    pub last_beep: Option<Instant>,
    pub info: Option<TargetInfo>,
}

impl SearchState {
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameShape {
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchSnapshot {
    pub active: bool,
    pub target_class: Option<String>,
    pub target_label: Option<String>,
    pub target_info: Option<TargetInfo>,
}

/// Point-in-time copy of everything the UI layer may show.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    /// Wall time of the last cycle or heartbeat, seconds since the epoch.
    pub ts: f64,
    pub shape: Option<FrameShape>,
    pub count: usize,
    pub detections: Vec<Detection>,
    pub infer_ms: f64,
    pub fps_infer: f64,
    pub delay_ms: f64,
    pub alert: AlertSnapshot,
    pub audio: AudioHealth,
    pub voice_status: VoiceStatus,
    pub search: SearchSnapshot,
    pub oracle_errors: u64,
    pub generation: u64,
}

#[derive(Default)]
struct State {
    latest: Option<Arc<Frame>>,
    processed: Option<Arc<Frame>>,
    report: CycleReport,
    ts: Option<SystemTime>,
    generation: u64,
    audio: AudioHealth,
    voice: VoiceStatus,
    search: SearchState,
    oracle_errors: u64,
}

#[derive(Default)]
pub struct SnapshotStore {
    state: Mutex<State>,
    processed: Condvar,
}

impl SnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current camera frame.
    pub fn publish_frame(&self, frame: Frame) {
        let frame = Arc::new(frame);
        self.lock().latest = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.lock().latest.clone()
    }

    /// Publish one processed cycle and wake every waiting reader.
    pub fn publish_cycle(&self, frame: Arc<Frame>, report: CycleReport) {
        let mut state = self.lock();
        state.processed = Some(frame);
        state.report = report;
        state.ts = Some(SystemTime::now());
        state.generation = state.generation.wrapping_add(1);
        self.processed.notify_all();
    }

    /// Liveness update for cycles that had no frame to process.
    pub fn heartbeat(&self) {
        self.lock().ts = Some(SystemTime::now());
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Wait up to `timeout` for a cycle newer than `seen`.
    ///
    /// Always returns a frame: the last processed one, or a placeholder if nothing
    /// was processed yet. The returned generation is what to pass as `seen` next.
    pub fn wait_for_frame(&self, seen: u64, timeout: Duration) -> (Arc<Frame>, u64) {
        let guard = self.lock();
        let (state, _) = self
            .processed
            .wait_timeout_while(guard, timeout, |s| s.generation == seen)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let frame = state
            .processed
            .clone()
            .unwrap_or_else(|| Arc::new(Frame::placeholder()));
        (frame, state.generation)
    }

    pub fn record_send(&self, ok: bool, at: SystemTime) {
        let mut state = self.lock();
        state.audio.last_send_ok = Some(ok);
        if ok {
            state.audio.last_send_ts = Some(epoch_secs(at));
        }
    }

    pub fn audio_health(&self) -> AudioHealth {
        self.lock().audio.clone()
    }

    pub fn set_voice_status(&self, status: VoiceStatus) {
        self.lock().voice = status;
    }

    pub fn voice_status(&self) -> VoiceStatus {
        self.lock().voice
    }

    pub fn record_oracle_error(&self) -> u64 {
        let mut state = self.lock();
        state.oracle_errors += 1;
        state.oracle_errors
    }

    pub fn start_search(&self, target: SearchTarget) {
        log::info!("search mode on: {} -> {}", target.label, target.class);
        self.lock().search = SearchState {
            target: Some(target),
            last_beep: None,
            info: None,
        };
    }

    pub fn stop_search(&self) {
        let mut state = self.lock();
        if state.search.is_active() {
            log::info!("search mode off");
        }
        state.search = SearchState::default();
    }

    pub fn search_state(&self) -> SearchState {
        self.lock().search.clone()
    }

    /// Store the latest target sighting. Ignored if the search for `class` has ended.
    pub fn update_search_target(&self, class: &str, info: Option<TargetInfo>) {
        let mut state = self.lock();
        if state.search.target.as_ref().is_some_and(|t| t.class == class) {
            state.search.info = info;
        }
    }

    /// Take the beep slot if `interval` has passed since the last beep.
    ///
    /// Returns false if search is inactive or the slot is not due yet.
    pub fn claim_beep(&self, class: &str, now: Instant, interval: Duration) -> bool {
        let mut state = self.lock();
        let search = &mut state.search;
        if !search.target.as_ref().is_some_and(|t| t.class == class) {
            return false;
        }
        let due = search
            .last_beep
            .map_or(true, |at| now.saturating_duration_since(at) >= interval);
        if due {
            search.last_beep = Some(now);
        }
        due
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        let report = &state.report;
        let search = &state.search;
        Snapshot {
            ts: state.ts.map(epoch_secs).unwrap_or(0.0),
            shape: state.processed.as_ref().map(|f| FrameShape {
                w: f.width,
                h: f.height,
            }),
            count: report.detections.len(),
            detections: report.detections.clone(),
            infer_ms: report.infer_ms,
            fps_infer: if report.infer_ms > 0.0 {
                1000.0 / report.infer_ms
            } else {
                0.0
            },
            delay_ms: report.delay_ms,
            alert: report.alert.clone(),
            audio: state.audio.clone(),
            voice_status: state.voice,
            search: SearchSnapshot {
                active: search.is_active(),
                target_class: search.target.as_ref().map(|t| t.class.clone()),
                target_label: search.target.as_ref().map(|t| t.label.clone()),
                target_info: search.info.clone(),
            },
            oracle_errors: state.oracle_errors,
            generation: state.generation,
        }
    }
}
