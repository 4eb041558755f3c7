//! Typed failures for the camera and speaker I/O paths.
//!
//! Both paths retry on their own and never unwind into the pipeline; callers match on
//! [`FailureKind`] to decide what to log and which health flag to flip.

use std::io;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    Malformed,
    ValidationFailed,
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::Malformed => "malformed",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Camera ingestion failure.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera request timed out: {0}")]
    Timeout(String),
    #[error("camera refused connection: {0}")]
    ConnectionRefused(String),
    #[error("malformed camera payload: {0}")]
    Malformed(String),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("camera i/o error: {0}")]
    Io(#[source] io::Error),
}

impl CaptureError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CaptureError::Timeout(_) => FailureKind::Timeout,
            CaptureError::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            CaptureError::Malformed(_) => FailureKind::Malformed,
            CaptureError::StreamEnded | CaptureError::Io(_) => FailureKind::Io,
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        match classify_io(&err) {
            FailureKind::Timeout => CaptureError::Timeout(err.to_string()),
            FailureKind::ConnectionRefused => CaptureError::ConnectionRefused(err.to_string()),
            _ => CaptureError::Io(err),
        }
    }
}

impl From<ureq::Error> for CaptureError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => CaptureError::Malformed(format!("http status {code}")),
            ureq::Error::Transport(transport) => {
                let io_kind = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<io::Error>())
                    .map(classify_io);
                match (transport.kind(), io_kind) {
                    (_, Some(FailureKind::Timeout)) => CaptureError::Timeout(transport.to_string()),
                    (ureq::ErrorKind::ConnectionFailed, _)
                    | (ureq::ErrorKind::Dns, _)
                    | (_, Some(FailureKind::ConnectionRefused)) => {
                        CaptureError::ConnectionRefused(transport.to_string())
                    }
                    (ureq::ErrorKind::BadStatus, _) | (ureq::ErrorKind::BadHeader, _) => {
                        CaptureError::Malformed(transport.to_string())
                    }
                    _ => CaptureError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        transport.to_string(),
                    )),
                }
            }
        }
    }
}

/// Speaker transport failure.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid audio payload: {0}")]
    ValidationFailed(String),
    #[error("speaker connection timed out: {0}")]
    Timeout(String),
    #[error("speaker refused connection: {0}")]
    ConnectionRefused(String),
    #[error("malformed audio data: {0}")]
    Malformed(String),
    #[error("speaker i/o error: {0}")]
    Io(#[source] io::Error),
}

impl AudioError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AudioError::ValidationFailed(_) => FailureKind::ValidationFailed,
            AudioError::Timeout(_) => FailureKind::Timeout,
            AudioError::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            AudioError::Malformed(_) => FailureKind::Malformed,
            AudioError::Io(_) => FailureKind::Io,
        }
    }

    /// Validation and decode problems will not go away on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AudioError::ValidationFailed(_) | AudioError::Malformed(_)
        )
    }
}

impl From<io::Error> for AudioError {
    fn from(err: io::Error) -> Self {
        match classify_io(&err) {
            FailureKind::Timeout => AudioError::Timeout(err.to_string()),
            FailureKind::ConnectionRefused => AudioError::ConnectionRefused(err.to_string()),
            _ => AudioError::Io(err),
        }
    }
}

pub(crate) fn classify_io(err: &io::Error) -> FailureKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureKind::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => FailureKind::ConnectionRefused,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => FailureKind::Malformed,
        _ => FailureKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_failure_kinds() {
        let timeout: CaptureError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let refused: AudioError = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        assert_eq!(refused.kind(), FailureKind::ConnectionRefused);
        assert!(refused.is_retryable());

        let other: AudioError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(other.kind(), FailureKind::Io);
    }

    #[test]
    fn validation_failures_are_not_retried() {
        let err = AudioError::ValidationFailed("stereo".into());
        assert_eq!(err.kind(), FailureKind::ValidationFailed);
        assert!(!err.is_retryable());
    }
}
