//! Wire frames of the RESP protocol.
//!
//! Every frame starts with a one-byte tag and every line ends with CRLF:
//!
//! - `+` simple string: `+OK\r\n`
//! - `-` error: `-ERR unknown command\r\n`
//! - `:` integer: `:1000\r\n`
//! - `$` bulk string: `$5\r\nhello\r\n`, null form `$-1\r\n`
//! - `*` array: `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n`, null form `*-1\r\n`
//!
//! Bulk strings are length-prefixed and therefore binary safe; arrays are
//! heterogeneous and may nest, which is how multi-argument commands and
//! multi-value replies travel without a second framing layer.

use bytes::Bytes;
use std::fmt;

/// Line terminator for every protocol line.
pub const CRLF: &[u8] = b"\r\n";

/// Frame tag bytes.
pub mod tag {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One protocol message.
///
/// Both directions of the wire use the same type: requests arrive as arrays
/// of bulk strings, replies go out as whichever variant fits. A null read as
/// `*-1` or `$-1` collapses into the single [`Frame::Null`] variant and is
/// always re-serialized in the bulk form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-binary-safe string without CR or LF, e.g. `+OK\r\n`.
    Simple(String),
    /// Error reply, rendered to clients with a leading `-`.
    Error(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Binary-safe, length-prefixed payload.
    Bulk(Bytes),
    /// Null bulk string or null array.
    Null,
    /// Possibly nested sequence of frames.
    Array(Vec<Frame>),
}

impl Frame {
    pub fn simple(s: impl Into<String>) -> Self {
        Frame::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Frame::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    pub fn array(items: Vec<Frame>) -> Self {
        Frame::Array(items)
    }

    /// The canonical `+OK\r\n` reply.
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// Serializes the frame into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the frame into an existing buffer, recursing into arrays.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                buf.push(tag::SIMPLE);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                buf.push(tag::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Integer(n) => {
                buf.push(tag::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Bulk(data) => {
                buf.push(tag::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            // Null always leaves in the bulk form, whichever form it arrived in.
            Frame::Null => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            Frame::Array(items) => {
                buf.push(tag::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Payload bytes of a bulk or simple string frame.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(b) => Some(b),
            Frame::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "\"{}\"", s),
            Frame::Error(s) => write!(f, "(error) {}", s),
            Frame::Integer(n) => write!(f, "(integer) {}", n),
            Frame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary, {} bytes)", data.len()),
            },
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                writeln!(f)?;
                for (i, item) in items.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_string_wire_form() {
        assert_eq!(Frame::ok().serialize(), b"+OK\r\n");
        assert_eq!(Frame::simple("PONG").serialize(), b"+PONG\r\n");
    }

    #[test]
    fn error_wire_form() {
        let frame = Frame::error("ERR unknown command");
        assert_eq!(frame.serialize(), b"-ERR unknown command\r\n");
    }

    #[test]
    fn integer_wire_form() {
        assert_eq!(Frame::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Frame::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(Frame::integer(0).serialize(), b":0\r\n");
    }

    #[test]
    fn bulk_wire_form() {
        let frame = Frame::bulk(Bytes::from("hello"));
        assert_eq!(frame.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn bulk_length_counts_payload_exactly() {
        let payload = b"hel\x00o with \r\n inside";
        let frame = Frame::bulk(Bytes::from(&payload[..]));
        let wire = frame.serialize();
        let header = format!("${}\r\n", payload.len());
        assert!(wire.starts_with(header.as_bytes()));
        assert_eq!(wire.len(), header.len() + payload.len() + 2);
        assert!(wire.ends_with(b"\r\n"));
    }

    #[test]
    fn null_serializes_as_bulk_null() {
        assert_eq!(Frame::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn array_wire_form() {
        let frame = Frame::array(vec![
            Frame::bulk(Bytes::from("GET")),
            Frame::bulk(Bytes::from("foo")),
        ]);
        assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn nested_array_recurses() {
        let frame = Frame::array(vec![
            Frame::integer(1),
            Frame::array(vec![Frame::integer(2), Frame::integer(3)]),
        ]);
        assert_eq!(frame.serialize(), b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }
}
