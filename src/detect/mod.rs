//! Detection oracle boundary.
//!
//! The object detector is an external collaborator: the pipeline only sees the
//! [`DetectorBackend`] trait and the boxes it returns. Backends provided here:
//! - `StubBackend`: never detects anything (camera bring-up, audio checks)
//! - `ReplayBackend`: replays scripted detections (offline runs, tests)
//! - `TractBackend`: YOLOv8 ONNX model via tract (feature: backend-tract)

mod backend;
mod backends;
pub mod labels;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{ReplayBackend, StubBackend};
pub use result::{BoundingBox, Detection};
