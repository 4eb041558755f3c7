//! JPEG extraction from a multipart MJPEG byte stream.
//!
//! The multipart boundaries are ignored; frames are recovered by scanning for the
//! SOI (`FF D8`) and EOI (`FF D9`) markers. Output does not depend on how the byte
//! stream is split across reads.

/// Upper bound on one JPEG; a buffer growing past this without an EOI is garbage.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug)]
pub struct MjpegParser {
    buffer: Vec<u8>,
    max_len: usize,
    discarded: u64,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new(MAX_JPEG_BYTES)
    }
}

impl MjpegParser {
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            max_len,
            discarded: 0,
        }
    }

    /// Append one read and return every complete JPEG it finished, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            let Some(start) = find(&self.buffer, &SOI, 0) else {
                // Keep the last byte: it may be the first half of a split SOI.
                self.keep_tail();
                break;
            };
            match find(&self.buffer, &EOI, start + 2) {
                Some(end) => {
                    frames.push(self.buffer[start..end + 2].to_vec());
                    self.buffer.drain(..end + 2);
                }
                None => {
                    if start > 0 {
                        self.buffer.drain(..start);
                    }
                    if self.buffer.len() > self.max_len {
                        self.discarded += 1;
                        self.keep_tail();
                    }
                    break;
                }
            }
        }
        frames
    }

    /// Bytes currently held waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Oversized partial frames thrown away so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn keep_tail(&mut self) {
        let len = self.buffer.len();
        if len > 1 {
            self.buffer.drain(..len - 1);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        [&SOI[..], body, &EOI[..]].concat()
    }

    fn stream() -> (Vec<u8>, Vec<Vec<u8>>) {
        let a = jpeg(&[1, 2, 3]);
        let b = jpeg(&[0xFF, 0x00, 4, 0xFF]);
        let mut bytes = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        bytes.extend_from_slice(&a);
        bytes.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        bytes.extend_from_slice(&b);
        bytes.extend_from_slice(b"\r\n--frame\r\n");
        (bytes, vec![a, b])
    }

    #[test]
    fn extracts_frames_from_one_read() {
        let (bytes, expected) = stream();
        let mut parser = MjpegParser::default();
        assert_eq!(parser.push(&bytes), expected);
    }

    #[test]
    fn output_is_independent_of_split_point() {
        let (bytes, expected) = stream();
        for split in 0..=bytes.len() {
            let mut parser = MjpegParser::default();
            let mut got = parser.push(&bytes[..split]);
            got.extend(parser.push(&bytes[split..]));
            assert_eq!(got, expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let (bytes, expected) = stream();
        let mut parser = MjpegParser::default();
        let got: Vec<Vec<u8>> = bytes.iter().flat_map(|b| parser.push(&[*b])).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn junk_without_soi_is_trimmed() {
        let mut parser = MjpegParser::default();
        assert!(parser.push(&[0u8; 1000]).is_empty());
        assert_eq!(parser.buffered(), 1);
        assert!(parser.push(&[0xFF]).is_empty());
        assert_eq!(parser.push(&[0xD8, 7, 0xFF, 0xD9]), vec![jpeg(&[7])]);
    }

    #[test]
    fn oversized_partial_frame_is_discarded() {
        let mut parser = MjpegParser::new(16);
        assert!(parser.push(&SOI).is_empty());
        assert!(parser.push(&[0u8; 32]).is_empty());
        assert_eq!(parser.discarded(), 1);
        assert_eq!(parser.buffered(), 1);
        assert_eq!(parser.push(&jpeg(&[9])), vec![jpeg(&[9])]);
    }
}
