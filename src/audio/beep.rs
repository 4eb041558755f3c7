//! Synthesized tones: search-mode beeps and fallback alert patterns.

use std::f32::consts::PI;

use crate::audio::PcmClip;
use crate::risk::RiskLevel;

pub const BEEP_SAMPLE_RATE: u32 = 16_000;
const AMPLITUDE: f32 = 0.5;
const MAX_FADE: usize = 50;

/// Sine tone as 16-bit little-endian PCM, with a short linear fade at both ends.
pub fn tone(freq_hz: f32, duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let n = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let mut samples: Vec<f32> = (0..n)
        .map(|i| {
            // Sample times span [0, duration] inclusive.
            let t = if n > 1 {
                i as f32 * (duration_ms as f32 / 1000.0) / (n - 1) as f32
            } else {
                0.0
            };
            (2.0 * PI * freq_hz * t).sin()
        })
        .collect();

    let fade = MAX_FADE.min(n / 4);
    if fade > 0 {
        for i in 0..fade {
            let gain = if fade > 1 { i as f32 / (fade - 1) as f32 } else { 0.0 };
            samples[i] *= gain;
            samples[n - 1 - i] *= gain;
        }
    }

    let mut out = Vec::with_capacity(n * 2);
    for s in samples {
        let value = (s * i16::MAX as f32 * AMPLITUDE) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// One proximity beep for search mode.
pub fn search_beep(freq_hz: f32, duration_ms: u32) -> PcmClip {
    PcmClip::from_parts(BEEP_SAMPLE_RATE, tone(freq_hz, duration_ms, BEEP_SAMPLE_RATE))
}

/// Stand-in alert clip: level N plays N short beeps, pitched up with severity.
pub fn alert_pattern(level: RiskLevel) -> PcmClip {
    let count = level.as_u8().max(1) as usize;
    let freq = 660.0 + 220.0 * (count as f32 - 1.0);
    let beep = tone(freq, 120, BEEP_SAMPLE_RATE);
    let gap = vec![0u8; (BEEP_SAMPLE_RATE as usize * 80 / 1000) * 2];
    let mut pcm = Vec::with_capacity(count * (beep.len() + gap.len()));
    for i in 0..count {
        if i > 0 {
            pcm.extend_from_slice(&gap);
        }
        pcm.extend_from_slice(&beep);
    }
    PcmClip::from_parts(BEEP_SAMPLE_RATE, pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn default_beep_shape() {
        let pcm = tone(1000.0, 50, 16_000);
        let s = samples(&pcm);
        assert_eq!(s.len(), 800);
        assert_eq!(s[0], 0);
        assert_eq!(*s.last().unwrap(), 0);
        let peak = s.iter().map(|v| v.unsigned_abs()).max().unwrap();
        assert!(peak <= (i16::MAX / 2) as u16 + 1);
        assert!(peak > 15_000);
    }

    #[test]
    fn tiny_tone_has_no_fade_panic() {
        assert_eq!(tone(440.0, 0, 16_000).len(), 0);
        assert_eq!(tone(440.0, 1, 1000).len(), 2);
    }

    #[test]
    fn alert_pattern_grows_with_level() {
        let l1 = alert_pattern(RiskLevel::Notice);
        let l3 = alert_pattern(RiskLevel::Danger);
        assert_eq!(l1.sample_rate(), BEEP_SAMPLE_RATE);
        assert!(l3.data().len() > 2 * l1.data().len());
    }
}
