//! Wayfinder
//!
//! Assistive hazard alerts for a visually-impaired walker, driven by a head-worn
//! ESP32 camera and spoken through an ESP32 speaker.
//!
//! # Architecture
//!
//! Three threads share one [`SnapshotStore`]:
//!
//! 1. **Ingest** pulls frames from the camera (single-shot capture or MJPEG stream)
//!    and keeps only the newest one.
//! 2. **Risk cycle** runs the detector on that frame, scores hazards, smooths the
//!    level and rate-limits alerts; in search mode it beeps toward a requested object
//!    instead.
//! 3. **Audio dispatch** drains a small drop-oldest queue and pushes each clip to the
//!    speaker over PCM1, one at a time.
//!
//! Every loop takes a cloned [`Shutdown`] token and exits promptly once it fires.
//!
//! # Module Structure
//!
//! - `frame`, `store`: frames and the shared snapshot
//! - `ingest`: camera sources and the ingest loop
//! - `detect`: detector boundary and backends
//! - `risk`, `alert`, `search`: per-frame scoring, hysteresis, rate limiting, search mode
//! - `audio`: PCM1 framing, speaker transport, dispatch queue, clips
//! - `pipeline`: the risk cycle
//! - `config`: file + environment configuration

pub mod alert;
pub mod audio;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod risk;
pub mod search;
pub mod shutdown;
pub mod store;

pub use alert::{NotificationGate, StabilityFilter, VoiceStatus};
pub use audio::{AlertClips, AudioJob, DispatchQueue, PcmClip, SpeakerConfig, SpeakerTransport};
pub use config::WayfinderConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend};
pub use error::{AudioError, CaptureError, FailureKind};
pub use frame::Frame;
pub use ingest::{FrameSource, IngestConfig};
pub use pipeline::{PipelineConfig, RiskCycle};
pub use risk::{AreaHistory, LevelTable, RiskAssessment, RiskConfig, RiskEngine, RiskLevel};
pub use search::{resolve_target, SearchTarget};
pub use shutdown::Shutdown;
pub use store::{Snapshot, SnapshotStore};
