//! `FramedStreamReader` (C1): accumulates bytes from a transport and yields
//! complete, delimiter-stripped UTF-8 frames.

use c123_protocol::{DEFAULT_MAX_FRAME_BYTES, FRAME_DELIMITER};

use crate::error::FrameError;

/// Accumulates bytes across reads and yields complete frames once a
/// delimiter byte is seen. Empty frames (two delimiters back to back) are
/// dropped. A frame longer than `max_frame_bytes` is reported as an error
/// and the buffer reset, so one oversized frame can't wedge the reader.
pub struct FramedStreamReader {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl FramedStreamReader {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_frame_bytes,
        }
    }

    /// Feed raw bytes just read from the transport. Returns every frame
    /// that became complete as a result, in order; each entry is `Ok(frame)`
    /// for well-formed UTF-8 or `Err` for a malformed/oversized frame
    /// (decoding then continues with the next frame).
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<String, FrameError>> {
        self.buffer.extend_from_slice(data);

        let mut results = Vec::new();
        loop {
            let Some(delim_pos) = self.buffer.iter().position(|&b| b == FRAME_DELIMITER) else {
                if self.buffer.len() > self.max_frame_bytes {
                    results.push(Err(FrameError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    }));
                    self.buffer.clear();
                }
                break;
            };

            let raw: Vec<u8> = self.buffer.drain(..=delim_pos).collect();
            let body = &raw[..raw.len() - 1];

            if body.is_empty() {
                continue;
            }

            if body.len() > self.max_frame_bytes {
                results.push(Err(FrameError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                }));
                continue;
            }

            match std::str::from_utf8(body) {
                Ok(frame) => results.push(Ok(frame.to_string())),
                Err(_) => results.push(Err(FrameError::MalformedFrame)),
            }
        }
        results
    }
}

impl Default for FramedStreamReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter() {
        let mut reader = FramedStreamReader::new();
        let out = reader.feed(b"frame-one|frame-two|");
        assert_eq!(
            out,
            vec![Ok("frame-one".to_string()), Ok("frame-two".to_string())]
        );
    }

    #[test]
    fn buffers_partial_content_across_reads() {
        let mut reader = FramedStreamReader::new();
        assert!(reader.feed(b"frame-o").is_empty());
        let out = reader.feed(b"ne|");
        assert_eq!(out, vec![Ok("frame-one".to_string())]);
    }

    #[test]
    fn drops_empty_frames() {
        let mut reader = FramedStreamReader::new();
        let out = reader.feed(b"||a|");
        assert_eq!(out, vec![Ok("a".to_string())]);
    }

    #[test]
    fn reports_and_resets_on_oversized_frame() {
        let mut reader = FramedStreamReader::with_limit(4);
        let out = reader.feed(b"toolong|ok|");
        assert_eq!(
            out,
            vec![
                Err(FrameError::FrameTooLarge { limit: 4 }),
                Ok("ok".to_string())
            ]
        );
    }

    #[test]
    fn reports_malformed_utf8_and_continues() {
        let mut reader = FramedStreamReader::new();
        let mut data = vec![0xFFu8, 0xFE];
        data.push(b'|');
        data.extend_from_slice(b"good|");
        let out = reader.feed(&data);
        assert_eq!(
            out,
            vec![Err(FrameError::MalformedFrame), Ok("good".to_string())]
        );
    }

    proptest::proptest! {
        #[test]
        fn total_over_wellformed_frames(frames in proptest::collection::vec("[a-zA-Z0-9]{1,20}", 0..20)) {
            let mut input = Vec::new();
            for f in &frames {
                input.extend_from_slice(f.as_bytes());
                input.push(b'|');
            }
            let mut reader = FramedStreamReader::new();
            let out = reader.feed(&input);
            let expected: Vec<_> = frames.iter().map(|f| Ok(f.clone())).collect();
            proptest::prop_assert_eq!(out, expected);
        }
    }
}
