//! Sentinel framing for the UDP task channel.
//!
//! ```text
//! "Message has started." <payload> "Message has finished."
//! ```
//!
//! There is no length prefix. A frame may span several datagrams, so the
//! receiver accumulates bytes until the buffer holds a start sentinel, a
//! payload and an end sentinel, then hands the payload on and starts over.
//! A payload containing the end sentinel cannot be framed: [`encode_frame`]
//! refuses it, and a received frame with bytes after its first end sentinel
//! is rejected whole rather than truncated.

use bytes::Bytes;

/// Literal opening every frame.
pub const START_SENTINEL: &str = "Message has started.";

/// Literal closing every frame.
pub const END_SENTINEL: &str = "Message has finished.";

/// Largest frame accepted by [`FrameAssembler`].
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors from reassembling a frame. The assembler is reset after each.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The buffered bytes do not begin with the start sentinel.
    #[error("datagram does not begin a frame")]
    MissingStart,

    /// The frame grew past [`MAX_FRAME_SIZE`] without an end sentinel.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge {
        /// Bytes buffered so far.
        size: usize,
    },

    /// The payload is not UTF-8 text.
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,

    /// The payload contains the end sentinel.
    #[error("payload contains the end sentinel {END_SENTINEL:?}")]
    SentinelInPayload,

    /// Bytes followed the first end sentinel of a frame.
    #[error("{trailing} bytes after the end of the frame")]
    TrailingData {
        /// Bytes after the end sentinel.
        trailing: usize,
    },
}

/// Wrap `payload` in sentinels.
pub fn encode_frame(payload: &str) -> Result<Bytes, FrameError> {
    if payload.contains(END_SENTINEL) {
        return Err(FrameError::SentinelInPayload);
    }
    let mut frame =
        String::with_capacity(START_SENTINEL.len() + payload.len() + END_SENTINEL.len());
    frame.push_str(START_SENTINEL);
    frame.push_str(payload);
    frame.push_str(END_SENTINEL);
    Ok(Bytes::from(frame))
}

/// Split an encoded frame into datagrams of at most `max_datagram` bytes.
pub fn split_frame(frame: &Bytes, max_datagram: usize) -> Vec<Bytes> {
    let size = max_datagram.max(1);
    (0..frame.len())
        .step_by(size)
        .map(|start| frame.slice(start..(start + size).min(frame.len())))
        .collect()
}

/// Reassembles one frame at a time from a stream of datagrams.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether part of a frame is buffered.
    pub fn is_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Append a datagram. Returns the payload once a frame is complete.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<String>, FrameError> {
        self.buffer.extend_from_slice(datagram);
        let start = START_SENTINEL.as_bytes();

        let prefix = self.buffer.len().min(start.len());
        if self.buffer[..prefix] != start[..prefix] {
            self.buffer.clear();
            return Err(FrameError::MissingStart);
        }
        if self.buffer.len() > MAX_FRAME_SIZE {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(FrameError::TooLarge { size });
        }
        if self.buffer.len() < start.len() {
            return Ok(None);
        }

        let body = &self.buffer[start.len()..];
        let Some(end) = find(body, END_SENTINEL.as_bytes()) else {
            return Ok(None);
        };
        let trailing = body.len() - end - END_SENTINEL.len();
        let payload = if trailing > 0 {
            Err(FrameError::TrailingData { trailing })
        } else {
            std::str::from_utf8(&body[..end])
                .map(str::to_string)
                .map_err(|_| FrameError::InvalidUtf8)
        };
        self.buffer.clear();
        payload.map(Some)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_datagram() {
        let mut assembler = FrameAssembler::new();
        let frame = encode_frame("hello").unwrap();
        assert_eq!(assembler.push(&frame), Ok(Some("hello".to_string())));
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_split_frame_reassembles() {
        let payload = "Burst container KEY finished with the following result 42";
        let frame = encode_frame(payload).unwrap();
        let parts = split_frame(&frame, 7);
        assert!(parts.len() > 2);
        assert!(parts.iter().all(|part| part.len() <= 7));

        let mut assembler = FrameAssembler::new();
        let (last, head) = parts.split_last().unwrap();
        for part in head {
            assert_eq!(assembler.push(part), Ok(None));
        }
        assert!(assembler.is_partial());
        assert_eq!(assembler.push(last), Ok(Some(payload.to_string())));
    }

    #[test]
    fn test_end_sentinel_split_across_datagrams() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(b"Message has started.abcMessage has fin"), Ok(None));
        assert_eq!(assembler.push(b"ished."), Ok(Some("abc".to_string())));
    }

    #[test]
    fn test_empty_payload() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(&encode_frame("").unwrap()), Ok(Some(String::new())));
    }

    #[test]
    fn test_garbage_resets() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(b"hello"), Err(FrameError::MissingStart));
        assert!(!assembler.is_partial());
        assert_eq!(assembler.push(&encode_frame("ok").unwrap()), Ok(Some("ok".to_string())));
    }

    #[test]
    fn test_partial_start_sentinel_waits() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(b"Message"), Ok(None));
        assert_eq!(assembler.push(b" has started.x"), Ok(None));
        assert_eq!(assembler.push(END_SENTINEL.as_bytes()), Ok(Some("x".to_string())));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut assembler = FrameAssembler::new();
        let mut frame = START_SENTINEL.as_bytes().to_vec();
        frame.push(0xff);
        frame.extend_from_slice(END_SENTINEL.as_bytes());
        assert_eq!(assembler.push(&frame), Err(FrameError::InvalidUtf8));
        assert!(!assembler.is_partial());
    }

    #[test]
    fn test_payload_with_end_sentinel_is_refused() {
        let payload = format!("print('{END_SENTINEL}') done");
        assert_eq!(encode_frame(&payload), Err(FrameError::SentinelInPayload));
        assert!(encode_frame(&format!("ok {START_SENTINEL} twice")).is_ok());
    }

    #[test]
    fn test_bytes_after_end_reject_the_frame() {
        let mut assembler = FrameAssembler::new();
        let raw = format!("{START_SENTINEL}print('{END_SENTINEL}') done{END_SENTINEL}");
        assert_eq!(
            assembler.push(raw.as_bytes()),
            Err(FrameError::TrailingData {
                trailing: "') done".len() + END_SENTINEL.len()
            })
        );
        assert!(!assembler.is_partial());
        assert_eq!(
            assembler.push(&encode_frame("next").unwrap()),
            Ok(Some("next".to_string()))
        );
    }
}
