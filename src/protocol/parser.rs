//! Incremental frame parser.
//!
//! TCP delivers a byte stream, not messages: a read may hand us half a frame
//! or three frames at once. The parser therefore works against an
//! accumulation buffer and reports one of three outcomes:
//!
//! - `Ok(Some((frame, consumed)))` — a complete frame; advance the buffer by
//!   `consumed` bytes.
//! - `Ok(None)` — the buffer ends mid-frame; read more and try again. A
//!   partial frame never produces a value.
//! - `Err(ParseError)` — the bytes violate the protocol. The caller must not
//!   resynchronize by skipping input; for a connection this is fatal, for the
//!   append-only log it marks the end of the usable tail.
//!
//! CRLF is strict: a lone LF never terminates a line. An unknown tag byte is
//! a hard error rather than something to guess around.

use crate::protocol::types::{tag, Frame, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Largest accepted bulk payload (512 MB, matching Redis).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth before the parser gives up.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Tag byte is not one of `+ - : $ *`.
    #[error("malformed frame: unknown tag {0:#04x}")]
    UnknownTag(u8),

    #[error("malformed frame: invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("malformed frame: invalid utf-8 in line")]
    InvalidUtf8,

    #[error("malformed frame: invalid bulk length {0}")]
    InvalidBulkLength(i64),

    #[error("malformed frame: invalid array length {0}")]
    InvalidArrayLength(i64),

    #[error("malformed frame: {0}")]
    Protocol(&'static str),

    #[error("bulk payload of {size} bytes exceeds limit of {max}")]
    BulkTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Streaming parser over an external accumulation buffer.
#[derive(Debug, Default)]
pub struct FrameParser {
    depth: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one complete frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        self.depth = 0;
        self.parse_frame(buf)
    }

    fn parse_frame(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if self.depth > MAX_DEPTH {
            return Err(ParseError::Protocol("array nesting too deep"));
        }

        match buf[0] {
            tag::SIMPLE => self.parse_simple(buf),
            tag::ERROR => self.parse_error(buf),
            tag::INTEGER => self.parse_integer(buf),
            tag::BULK => self.parse_bulk(buf),
            tag::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownTag(other)),
        }
    }

    /// `+<text>\r\n`
    fn parse_simple(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, used)) => {
                let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
                Ok(Some((Frame::Simple(text.to_string()), 1 + used)))
            }
            None => Ok(None),
        }
    }

    /// `-<text>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, used)) => {
                let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
                Ok(Some((Frame::Error(text.to_string()), 1 + used)))
            }
            None => Ok(None),
        }
    }

    /// `:<i64>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        match read_line(&buf[1..])? {
            Some((line, used)) => {
                let n = parse_i64(line)?;
                Ok(Some((Frame::Integer(n), 1 + used)))
            }
            None => Ok(None),
        }
    }

    /// `$<len>\r\n<len bytes>\r\n`, or `$-1\r\n` for null.
    fn parse_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (line, header_used) = match read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };
        let len = parse_i64(line)?;

        if len == -1 {
            return Ok(Some((Frame::Null, 1 + header_used)));
        }
        if len < 0 {
            return Err(ParseError::InvalidBulkLength(len));
        }
        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(ParseError::BulkTooLarge {
                size: len,
                max: MAX_BULK_LEN,
            });
        }

        let body_start = 1 + header_used;
        let total = body_start + len + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[body_start + len..total] != CRLF {
            return Err(ParseError::Protocol("bulk payload not terminated by CRLF"));
        }

        let data = Bytes::copy_from_slice(&buf[body_start..body_start + len]);
        Ok(Some((Frame::Bulk(data), total)))
    }

    /// `*<count>\r\n<count frames>`, or `*-1\r\n` for null.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (line, header_used) = match read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };
        let count = parse_i64(line)?;

        if count == -1 {
            return Ok(Some((Frame::Null, 1 + header_used)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut items = Vec::with_capacity(count.min(64));
        let mut consumed = 1 + header_used;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_frame(&buf[consumed..])? {
                Some((item, used)) => {
                    items.push(item);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((Frame::Array(items), consumed)))
    }
}

/// Finds the next CRLF-terminated line.
///
/// Returns the line content (terminator excluded) and the bytes consumed
/// including the terminator, or `None` when no full line is buffered yet.
/// A CR that is buffered without its LF is malformed only once the next byte
/// proves it; until then the line is simply incomplete.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            b'\r' => {
                if i + 1 >= buf.len() {
                    return Ok(None);
                }
                if buf[i + 1] != b'\n' {
                    return Err(ParseError::Protocol("CR not followed by LF"));
                }
                return Ok(Some((&buf[..i], i + 2)));
            }
            b'\n' => return Err(ParseError::Protocol("lone LF in line")),
            _ => i += 1,
        }
    }
    Ok(None)
}

fn parse_i64(line: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
    text.parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Parses a single frame from a standalone byte slice.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    FrameParser::new().parse(buf)
}
