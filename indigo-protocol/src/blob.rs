//! Streaming base64 decoding of BLOB payloads.
//!
//! The decoder is fed base64 text either byte by byte (scan mode, legacy
//! protocol) or in large slices read straight from the transport (bulk mode,
//! protocol 2.0). Text is only ever decoded in quanta of four characters and
//! the decoded output is checked against the declared size before it is
//! appended, so a lying `size` attribute can never grow the destination past
//! what was declared.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Number of base64 characters needed to transfer `size` bytes, padding included.
pub fn encoded_len(size: usize) -> usize {
    size.div_ceil(3) * 4
}

pub struct BlobDecoder {
    pending: Vec<u8>,
    chunk: usize,
    data: Vec<u8>,
    expected: usize,
    failed: bool,
}

impl BlobDecoder {
    /// Creates a decoder for a payload of `expected` bytes that decodes
    /// accumulated text whenever `chunk` characters are pending.
    pub fn new(expected: usize, chunk: usize) -> BlobDecoder {
        let chunk = (chunk / 4 * 4).max(4);
        BlobDecoder {
            pending: Vec::with_capacity(chunk.min(encoded_len(expected))),
            chunk,
            data: Vec::with_capacity(expected),
            expected,
            failed: false,
        }
    }

    /// The declared payload size in bytes.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of bytes decoded so far.
    pub fn decoded(&self) -> usize {
        self.data.len()
    }

    /// Feeds one character of scanned base64 text. Whitespace is skipped.
    pub fn push(&mut self, byte: u8) {
        if byte.is_ascii_whitespace() {
            return;
        }
        self.pending.push(byte);
        if self.pending.len() >= self.chunk {
            self.flush();
        }
    }

    /// Feeds a run of base64 text that contains no whitespace.
    pub fn extend(&mut self, mut bytes: &[u8]) {
        if !self.pending.is_empty() {
            let missing = (4 - self.pending.len() % 4) % 4;
            let take = missing.min(bytes.len());
            self.pending.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.pending.len() % 4 != 0 {
                return;
            }
            self.flush();
        }
        let aligned = bytes.len() / 4 * 4;
        self.decode(&bytes[..aligned]);
        self.pending.extend_from_slice(&bytes[aligned..]);
    }

    /// Decodes what is left and returns the payload, or `None` if decoding failed.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        let misaligned = self.pending.len() % 4;
        if misaligned != 0 {
            log::warn!(
                "BLOB payload is not aligned to 4 characters, dropping {} trailing characters",
                misaligned
            );
            self.pending.truncate(self.pending.len() - misaligned);
        }
        self.flush();
        if self.failed {
            return None;
        }
        if self.data.len() != self.expected {
            log::warn!(
                "BLOB declared {} bytes, but {} bytes were transferred",
                self.expected,
                self.data.len()
            );
        }
        Some(self.data)
    }

    fn flush(&mut self) {
        let aligned = self.pending.len() / 4 * 4;
        let pending = std::mem::take(&mut self.pending);
        self.decode(&pending[..aligned]);
        self.pending = pending;
        self.pending.drain(..aligned);
    }

    fn decode(&mut self, chunk: &[u8]) {
        if self.failed || chunk.is_empty() {
            return;
        }
        let padding = chunk.iter().rev().take(2).filter(|&&b| b == b'=').count();
        let len = chunk.len() / 4 * 3 - padding;
        if self.data.len() + len > self.expected {
            log::warn!(
                "BLOB payload exceeds the declared size of {} bytes",
                self.expected
            );
            self.failed = true;
            return;
        }
        if let Err(error) = STANDARD.decode_vec(chunk, &mut self.data) {
            log::warn!("Invalid base64 in BLOB payload: {}", error);
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(encoded_len(0), 0);
        assert_eq!(encoded_len(1), 4);
        assert_eq!(encoded_len(3), 4);
        assert_eq!(encoded_len(4), 8);
        assert_eq!(encoded_len(1000), STANDARD.encode(payload(1000)).len());
    }

    #[test]
    fn scanned_lines_with_small_chunks() {
        let data = payload(1000);
        let encoded = STANDARD.encode(&data);
        let mut decoder = BlobDecoder::new(data.len(), 8);
        for line in encoded.as_bytes().chunks(72) {
            line.iter().for_each(|&b| decoder.push(b));
            decoder.push(b'\n');
        }
        assert_eq!(decoder.finish(), Some(data));
    }

    #[test]
    fn bulk_slices_at_odd_offsets() {
        let data = payload(4096 + 2);
        let encoded = STANDARD.encode(&data);
        let mut decoder = BlobDecoder::new(data.len(), 512);
        for slice in encoded.as_bytes().chunks(7) {
            decoder.extend(slice);
        }
        assert_eq!(decoder.decoded(), data.len());
        assert_eq!(decoder.finish(), Some(data));
    }

    #[test]
    fn payload_larger_than_declared_is_rejected() {
        let encoded = STANDARD.encode(payload(30));
        let mut decoder = BlobDecoder::new(10, 16);
        decoder.extend(encoded.as_bytes());
        assert!(decoder.decoded() <= 10);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn short_payload_is_kept() {
        let data = payload(10);
        let encoded = STANDARD.encode(&data);
        let mut decoder = BlobDecoder::new(20, 16);
        decoder.extend(encoded.as_bytes());
        assert_eq!(decoder.finish(), Some(data));
    }

    #[test]
    fn invalid_characters_fail() {
        let mut decoder = BlobDecoder::new(6, 4);
        b"ab$dabcd".iter().for_each(|&b| decoder.push(b));
        assert_eq!(decoder.finish(), None);
    }
}
