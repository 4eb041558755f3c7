//! Just enough RIFF/WAVE parsing to pull mono 16-bit PCM out of alert clips.

use std::path::Path;

use crate::audio::PcmClip;
use crate::error::AudioError;

const FORMAT_PCM: u16 = 1;

pub fn read_wav(path: &Path) -> Result<PcmClip, AudioError> {
    let bytes = std::fs::read(path)?;
    parse_wav(&bytes)
}

pub fn parse_wav(bytes: &[u8]) -> Result<PcmClip, AudioError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::Malformed("not a RIFF/WAVE file".into()));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(AudioError::Malformed("fmt chunk too short".into()));
                }
                format = Some((
                    u16::from_le_bytes([body[0], body[1]]),
                    u16::from_le_bytes([body[2], body[3]]),
                    u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                    u16::from_le_bytes([body[14], body[15]]),
                ));
            }
            b"data" => {
                let (tag, channels, sample_rate, bits) = format
                    .ok_or_else(|| AudioError::Malformed("data chunk before fmt chunk".into()))?;
                if tag != FORMAT_PCM {
                    return Err(AudioError::ValidationFailed(format!(
                        "unsupported WAV format tag {tag}"
                    )));
                }
                if channels != 1 || bits != 16 {
                    return Err(AudioError::ValidationFailed(format!(
                        "clip must be mono 16-bit, got {channels} channel(s) at {bits} bits"
                    )));
                }
                // Drop a trailing odd byte from a truncated file.
                let even = body.len() & !1;
                return PcmClip::new(sample_rate, body[..even].to_vec());
            }
            _ => {}
        }
        // Chunks are word aligned.
        offset = body_start.saturating_add(size + (size & 1));
    }
    Err(AudioError::Malformed("no data chunk".into()))
}

#[cfg(test)]
pub(crate) fn build_wav(sample_rate: u32, channels: u16, bits: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    let block_align = channels * bits / 8;
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}
