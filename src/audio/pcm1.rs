//! PCM1 wire framing.
//!
//! ```text
//! "PCM1" | u32 LE sample rate | u16 LE channels (1) | u16 LE bits (16) | u32 LE length | PCM
//! ```
//!
//! One framed clip per TCP connection; the speaker never answers.

use crate::error::AudioError;

pub const MAGIC: &[u8; 4] = b"PCM1";
pub const HEADER_LEN: usize = 16;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

impl Header {
    /// Header for a mono 16-bit payload, validated first.
    pub fn for_payload(sample_rate: u32, pcm: &[u8]) -> Result<Self, AudioError> {
        validate_payload(sample_rate, pcm)?;
        Ok(Self {
            sample_rate,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
            data_len: pcm.len() as u32,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8..10].copy_from_slice(&self.channels.to_le_bytes());
        out[10..12].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[12..16].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AudioError> {
        if bytes.len() < HEADER_LEN {
            return Err(AudioError::Malformed(format!(
                "PCM1 header needs {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(AudioError::Malformed("missing PCM1 magic".into()));
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            sample_rate: u32_at(4),
            channels: u16_at(8),
            bits_per_sample: u16_at(10),
            data_len: u32_at(12),
        })
    }
}

/// Reject payloads the speaker cannot play before touching the network.
pub fn validate_payload(sample_rate: u32, pcm: &[u8]) -> Result<(), AudioError> {
    if sample_rate == 0 {
        return Err(AudioError::ValidationFailed("sample rate is zero".into()));
    }
    if pcm.len() % 2 != 0 {
        return Err(AudioError::ValidationFailed(format!(
            "16-bit payload has odd length {}",
            pcm.len()
        )));
    }
    if u32::try_from(pcm.len()).is_err() {
        return Err(AudioError::ValidationFailed(format!(
            "payload of {} bytes exceeds the PCM1 length field",
            pcm.len()
        )));
    }
    Ok(())
}

/// Header followed by payload, as written on the wire.
pub fn encode(sample_rate: u32, pcm: &[u8]) -> Result<Vec<u8>, AudioError> {
    let header = Header::for_payload(sample_rate, pcm)?;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(pcm);
    Ok(out)
}

/// Split a received stream into header and payload.
pub fn decode(bytes: &[u8]) -> Result<(Header, &[u8]), AudioError> {
    let header = Header::decode(bytes)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != header.data_len as usize {
        return Err(AudioError::Malformed(format!(
            "header announces {} bytes, stream carries {}",
            header.data_len,
            body.len()
        )));
    }
    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn header_layout_is_little_endian() {
        let framed = encode(16_000, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&framed[..4], b"PCM1");
        assert_eq!(&framed[4..8], &[0x80, 0x3e, 0, 0]);
        assert_eq!(&framed[8..10], &[1, 0]);
        assert_eq!(&framed[10..12], &[16, 0]);
        assert_eq!(&framed[12..16], &[4, 0, 0, 0]);
        assert_eq!(&framed[16..], &[1, 2, 3, 4]);
    }

    #[test]
    fn decode_recovers_rate_and_payload() {
        let pcm: Vec<u8> = (0..200u8).collect();
        let framed = encode(22_050, &pcm).unwrap();
        let (header, body) = decode(&framed).unwrap();
        assert_eq!(header.sample_rate, 22_050);
        assert_eq!(header.channels, 1);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(body, &pcm[..]);
    }

    #[test]
    fn rejects_bad_payloads_before_sending() {
        assert_eq!(
            encode(0, &[0, 0]).unwrap_err().kind(),
            FailureKind::ValidationFailed
        );
        assert_eq!(
            encode(16_000, &[0, 0, 0]).unwrap_err().kind(),
            FailureKind::ValidationFailed
        );
        assert!(encode(16_000, &[]).is_ok());
    }

    #[test]
    fn decode_rejects_truncated_streams() {
        let framed = encode(16_000, &[9, 9, 9, 9]).unwrap();
        assert!(decode(&framed[..10]).is_err());
        assert!(decode(&framed[..18]).is_err());
        let mut bad = framed.clone();
        bad[0] = b'X';
        assert!(decode(&bad).is_err());
    }
}
