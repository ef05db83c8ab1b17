//! Incremental RESP Parser
//!
//! The same decoder reads client requests off a socket and records off the
//! append-only file. Both callers accumulate bytes in a `BytesMut` and call
//! [`RespParser::decode`], which either:
//! - returns `Ok(Some(value))` and advances the buffer past the value,
//! - returns `Ok(None)` and leaves the buffer untouched (need more bytes),
//! - returns `Err(ParseError)` for data that can never become valid.
//!
//! For the AOF loader an `Ok(None)` at end-of-file means a record was cut
//! short by a crash mid-write.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Input that can never decode into a frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Simple strings, errors and inline commands must be UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the `-1` null marker
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Upper bound on one bulk string
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Arrays nested deeper than this are rejected
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP parser.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes one value from the front of `buf`, consuming its bytes.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        match self.parse(buf)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Attempts to parse a RESP value from the front of `buf` without
    /// consuming it. On success returns the value and its encoded length.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => Ok(parse_line(buf)?
                .map(|(line, n)| (RespValue::SimpleString(line.to_string()), n))),
            prefix::ERROR => {
                Ok(parse_line(buf)?.map(|(line, n)| (RespValue::Error(line.to_string()), n)))
            }
            prefix::INTEGER => match parse_line(buf)? {
                Some((line, n)) => Ok(Some((RespValue::Integer(parse_int(line)?), n))),
                None => Ok(None),
            },
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// `$<len>\r\n<data>\r\n`; `$-1` is null.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (line, header_len) = match parse_line(buf)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let length = parse_int(line)?;
        if length == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header_len + length + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_len + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// `*<count>\r\n` then `count` frames; `*-1` is null.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let (line, header_len) = match parse_line(buf)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let count = parse_int(line)?;
        if count == -1 {
            return Ok(Some((RespValue::Null, header_len)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, n)) => {
                    elements.push(value);
                    consumed += n;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    /// Parses a whitespace-separated inline command such as `PING\r\n`.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let crlf_pos = match find_crlf(buf) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buf[..crlf_pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(ParseError::ProtocolError("empty inline command".to_string()));
        }

        let value = RespValue::multi_bulk(parts.into_iter().map(|s| Bytes::from(s.to_string())));
        Ok(Some((value, crlf_pos + 2)))
    }
}

/// Splits `<prefix><line>\r\n` off the front of the buffer.
fn parse_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[1..]) {
        Some(pos) => {
            let line = std::str::from_utf8(&buf[1..1 + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((line, 1 + pos + 2)))
        }
        None => Ok(None),
    }
}

fn parse_int(s: &str) -> ParseResult<i64> {
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> (Vec<RespValue>, BytesMut) {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(input);
        let mut values = Vec::new();
        while let Some(value) = parser.decode(&mut buf).unwrap() {
            values.push(value);
        }
        (values, buf)
    }

    #[test]
    fn test_parse_bulk_string() {
        let (value, consumed) = RespParser::new().parse(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn test_parse_null_and_empty() {
        let (values, _) = decode_all(b"$-1\r\n$0\r\n\r\n*0\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::Null,
                RespValue::BulkString(Bytes::new()),
                RespValue::Array(vec![]),
            ]
        );
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$3\r\nada\r\n";
        let (values, rest) = decode_all(input);
        assert!(rest.is_empty());
        assert_eq!(
            values[0].clone().into_cmd_line().unwrap(),
            vec![
                Bytes::from("SET"),
                Bytes::from("user:101"),
                Bytes::from("ada")
            ]
        );
    }

    #[test]
    fn test_decode_leaves_incomplete_tail() {
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1";
        let (values, rest) = decode_all(input);
        assert_eq!(values.len(), 1);
        assert_eq!(&rest[..], b"*2\r\n$3\r\nGET\r\n$1");
    }

    #[test]
    fn test_parse_nested_array() {
        let (values, _) = decode_all(b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
        assert_eq!(
            values[0],
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2), RespValue::Integer(3)]),
            ])
        );
    }

    #[test]
    fn test_parse_inline_command() {
        let (values, _) = decode_all(b"SET k v\r\n");
        assert_eq!(values[0], RespValue::multi_bulk(["SET", "k", "v"]));
    }

    #[test]
    fn test_parse_errors() {
        let mut parser = RespParser::new();
        assert!(matches!(
            parser.parse(b":not_a_number\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parser.parse(b"$3\r\nabcde\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
        assert!(matches!(
            parser.parse(b"*-5\r\n"),
            Err(ParseError::InvalidArrayLength(-5))
        ));
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (values, _) = decode_all(b"$5\r\nhel\x00o\r\n");
        assert_eq!(values[0], RespValue::BulkString(Bytes::from(&b"hel\x00o"[..])));
    }
}
