//! Message framing: reconstructs one HTTP/1.1 request from a byte stream.
//!
//! A frame ends at the `\r\n\r\n` header terminator plus `Content-Length`
//! bytes of body (zero when the header is absent). The framer is single-use:
//! once a frame has been emitted it ignores further input, because each
//! connection carries exactly one request.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors raised while locating the message boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("request exceeds maximum allowed size of {limit} bytes")]
    TooLarge { limit: usize },
}

/// Where the framer is in the life of its single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No header terminator seen yet.
    Accumulating,
    /// Header block located; waiting for `content_length` body bytes.
    HeadersKnown {
        body_start: usize,
        content_length: usize,
    },
    /// The frame has been emitted.
    Complete,
}

/// One complete HTTP message as it arrived on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    head: Bytes,
    body: Bytes,
}

impl Frame {
    /// Builds a frame from an already separated header block and body.
    pub fn new(head: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            head: head.into(),
            body: body.into(),
        }
    }

    /// The request line and header lines, without the blank-line terminator.
    pub fn head(&self) -> &Bytes {
        &self.head
    }

    /// Exactly `Content-Length` bytes of body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (Bytes, Bytes) {
        (self.head, self.body)
    }
}

/// Incremental request framer for a single connection.
///
/// # Examples
///
/// ```
/// use spindle::http::RequestFramer;
///
/// let mut framer = RequestFramer::new(1024);
/// assert!(framer.push(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe").unwrap().is_none());
/// let frame = framer.push(b"llo").unwrap().unwrap();
/// assert_eq!(&frame.body()[..], b"hello");
/// ```
#[derive(Debug)]
pub struct RequestFramer {
    buf: BytesMut,
    state: FrameState,
    max_size: usize,
    // Bytes already searched for the terminator.
    scanned: usize,
}

impl RequestFramer {
    /// Creates a framer that rejects messages larger than `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self::with_capacity(max_size, 0)
    }

    /// Creates a framer with `capacity` bytes of buffer pre-allocated.
    pub fn with_capacity(max_size: usize, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            state: FrameState::Accumulating,
            max_size,
            scanned: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Exposes the read buffer so the connection can read straight into it.
    ///
    /// Call [`advance`](Self::advance) after every read.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Appends `chunk` and advances the state machine.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Frame>, FrameError> {
        if self.state == FrameState::Complete {
            return Ok(None);
        }
        self.buf.extend_from_slice(chunk);
        self.advance()
    }

    /// Re-examines the buffer, returning the frame once it is complete.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidContentLength`]: the declared length is not a number.
    /// - [`FrameError::TooLarge`]: the buffered or declared size exceeds the limit.
    pub fn advance(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.state == FrameState::Accumulating {
            match self.find_terminator() {
                Some(head_end) => {
                    let content_length = declared_content_length(&self.buf[..head_end])?;
                    let body_start = head_end + TERMINATOR.len();
                    if body_start.saturating_add(content_length) > self.max_size {
                        return Err(FrameError::TooLarge {
                            limit: self.max_size,
                        });
                    }
                    self.state = FrameState::HeadersKnown {
                        body_start,
                        content_length,
                    };
                }
                None if self.buf.len() > self.max_size => {
                    return Err(FrameError::TooLarge {
                        limit: self.max_size,
                    });
                }
                None => return Ok(None),
            }
        }

        let FrameState::HeadersKnown {
            body_start,
            content_length,
        } = self.state
        else {
            return Ok(None);
        };

        if self.buf.len() - body_start < content_length {
            return Ok(None);
        }

        let raw = self.buf.split().freeze();
        self.state = FrameState::Complete;
        Ok(Some(Frame {
            head: raw.slice(..body_start - TERMINATOR.len()),
            body: raw.slice(body_start..body_start + content_length),
        }))
    }

    fn find_terminator(&mut self) -> Option<usize> {
        // Resume a few bytes back so a terminator split across reads is found.
        let from = self.scanned.saturating_sub(TERMINATOR.len() - 1);
        let found = self.buf[from..]
            .windows(TERMINATOR.len())
            .position(|w| w == TERMINATOR)
            .map(|pos| from + pos);
        self.scanned = self.buf.len();
        found
    }
}

/// Reads `Content-Length` from a header block; the last occurrence wins.
fn declared_content_length(head: &[u8]) -> Result<usize, FrameError> {
    let mut declared = None;
    for line in head.split(|&b| b == b'\n').skip(1) {
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        if line[..colon].trim_ascii().eq_ignore_ascii_case(b"content-length") {
            declared = Some(line[colon + 1..].trim_ascii());
        }
    }

    match declared {
        None => Ok(0),
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FrameError::InvalidContentLength {
                value: String::from_utf8_lossy(raw).into_owned(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_only_request_completes_at_terminator() {
        let mut framer = RequestFramer::new(1024);
        let frame = framer
            .push(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(&frame.head()[..], b"GET / HTTP/1.1\r\nHost: x");
        assert!(frame.body().is_empty());
        assert_eq!(framer.state(), FrameState::Complete);
    }

    #[test]
    fn terminator_split_across_chunks() {
        let mut framer = RequestFramer::new(1024);
        assert!(framer.push(b"GET / HTTP/1.1\r\nHost: x\r").unwrap().is_none());
        assert_eq!(framer.state(), FrameState::Accumulating);
        assert!(framer.push(b"\n\r").unwrap().is_none());
        assert!(framer.push(b"\n").unwrap().is_some());
    }

    #[test]
    fn waits_for_declared_body() {
        let mut framer = RequestFramer::new(1024);
        assert!(
            framer
                .push(b"POST /echo HTTP/1.1\r\ncontent-length: 7\r\n\r\n{\"a\"")
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            framer.state(),
            FrameState::HeadersKnown {
                content_length: 7,
                ..
            }
        ));
        let frame = framer.push(b":1}").unwrap().unwrap();
        assert_eq!(&frame.body()[..], b"{\"a\":1}");
    }

    #[test]
    fn surplus_bytes_are_not_part_of_the_body() {
        let mut framer = RequestFramer::new(1024);
        let frame = framer
            .push(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokEXTRA")
            .unwrap()
            .unwrap();
        assert_eq!(&frame.body()[..], b"ok");
    }

    #[test]
    fn input_after_completion_is_ignored() {
        let mut framer = RequestFramer::new(1024);
        framer.push(b"GET / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert!(framer.push(b"GET /again HTTP/1.1\r\n\r\n").unwrap().is_none());
    }

    #[test]
    fn non_numeric_content_length_is_rejected() {
        let mut framer = RequestFramer::new(1024);
        let err = framer
            .push(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength { value } if value == "ten"));
    }

    #[test]
    fn declared_body_over_limit_is_rejected_early() {
        let mut framer = RequestFramer::new(64);
        let err = framer
            .push(b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, FrameError::TooLarge { limit: 64 });
    }

    #[test]
    fn unterminated_head_over_limit_is_rejected() {
        let mut framer = RequestFramer::new(16);
        let err = framer.push(&[b'a'; 32]).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { limit: 16 });
    }
}
