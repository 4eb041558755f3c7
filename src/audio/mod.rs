//! Speaker output path.
//!
//! - `pcm1`: wire framing understood by the ESP32 speaker
//! - `transport`: TCP sender with retry
//! - `queue`: bounded drop-oldest queue and its single dispatcher thread
//! - `wav` / `beep`: clip loading and tone synthesis

pub mod beep;
pub mod pcm1;
pub mod queue;
pub mod transport;
pub mod wav;

use std::path::Path;
use std::sync::Arc;

use crate::error::AudioError;
use crate::risk::RiskLevel;

pub use queue::{spawn_dispatcher, DispatchQueue, DispatcherHandle, JobReceiver};
pub use transport::{SpeakerConfig, SpeakerTransport};

/// Mono 16-bit little-endian PCM with its sample rate. Cheap to clone.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmClip {
    sample_rate: u32,
    data: Arc<[u8]>,
}

impl PcmClip {
    /// Validated constructor.
    pub fn new(sample_rate: u32, data: Vec<u8>) -> Result<Self, AudioError> {
        pcm1::validate_payload(sample_rate, &data)?;
        Ok(Self::from_parts(sample_rate, data))
    }

    pub(crate) fn from_parts(sample_rate: u32, data: Vec<u8>) -> Self {
        Self {
            sample_rate,
            data: data.into(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.data.len() as u64 / 2) * 1000 / self.sample_rate as u64
    }
}

/// Work for the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub enum AudioJob {
    /// Play the clip registered for a hazard level.
    Alert(RiskLevel),
    /// Play arbitrary PCM, e.g. a reply from the voice assistant.
    Pcm(PcmClip),
}

/// One clip per alerting level, in level order.
#[derive(Clone, Debug)]
pub struct AlertClips {
    clips: Vec<PcmClip>,
}

impl AlertClips {
    /// Load `l1.wav`, `l2.wav`, `l3.wav` from `dir`. Unusable files fall back to a
    /// synthesized beep pattern so a level is never silent.
    pub fn load(dir: &Path) -> Self {
        let mut clips = Vec::with_capacity(3);
        for level in RiskLevel::ALERTING {
            let path = dir.join(format!("l{}.wav", level.as_u8()));
            let clip = match wav::read_wav(&path) {
                Ok(clip) => {
                    log::info!(
                        "alert clip L{} loaded from {} ({} ms)",
                        level.as_u8(),
                        path.display(),
                        clip.duration_ms()
                    );
                    clip
                }
                Err(err) => {
                    log::warn!(
                        "alert clip {} unusable ({}): {err}; using tone pattern",
                        path.display(),
                        err.kind()
                    );
                    beep::alert_pattern(level)
                }
            };
            clips.push(clip);
        }
        Self { clips }
    }

    /// Tone patterns only; no files involved.
    pub fn synthesized() -> Self {
        Self {
            clips: RiskLevel::ALERTING
                .iter()
                .map(|level| beep::alert_pattern(*level))
                .collect(),
        }
    }

    pub fn get(&self, level: RiskLevel) -> Option<&PcmClip> {
        match level {
            RiskLevel::Clear => None,
            other => self.clips.get(other.as_u8() as usize - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_fall_back_to_tones_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("l2.wav"),
            wav::build_wav(22_050, 1, 16, &[0u8; 4410]),
        )
        .unwrap();
        std::fs::write(dir.path().join("l3.wav"), b"not a wav").unwrap();

        let clips = AlertClips::load(dir.path());
        assert_eq!(clips.get(RiskLevel::Caution).unwrap().sample_rate(), 22_050);
        assert_eq!(clips.get(RiskLevel::Caution).unwrap().duration_ms(), 100);
        assert_eq!(
            clips.get(RiskLevel::Notice).unwrap(),
            &beep::alert_pattern(RiskLevel::Notice)
        );
        assert_eq!(
            clips.get(RiskLevel::Danger).unwrap(),
            &beep::alert_pattern(RiskLevel::Danger)
        );
        assert!(clips.get(RiskLevel::Clear).is_none());
    }

    #[test]
    fn clip_constructor_validates() {
        assert!(PcmClip::new(16_000, vec![0; 3]).is_err());
        assert!(PcmClip::new(0, vec![0; 2]).is_err());
        assert_eq!(PcmClip::new(16_000, vec![0; 32_000]).unwrap().duration_ms(), 1000);
    }
}
