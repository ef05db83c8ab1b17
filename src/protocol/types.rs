//! RESP (Redis Serialization Protocol) Data Types
//!
//! Replies produced by command handlers and records written to the
//! append-only file share one representation, [`RespValue`]. An AOF record is
//! simply a command line serialized as an array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n
//! ```
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array

use bytes::Bytes;

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// A command line: the command name followed by its arguments.
pub type CmdLine = Vec<Bytes>;

/// Leading type byte of each frame
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply, or a decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),

    /// `-ERR message\r\n`
    Error(String),

    /// `:42\r\n`
    Integer(i64),

    /// `$5\r\nhello\r\n`, binary safe
    BulkString(Bytes),

    /// Null bulk string (`$-1\r\n`) or null array (`*-1\r\n`)
    Null,

    /// `*<n>\r\n` followed by `n` encoded values
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Builds an array of bulk strings, the framing used for command lines.
    pub fn multi_bulk<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(
            items
                .into_iter()
                .map(|item| RespValue::BulkString(item.into()))
                .collect(),
        )
    }

    /// Converts an array of bulk (or simple) strings back into a command line.
    ///
    /// Returns `None` for anything that is not a flat array of strings.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        match self {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(b) => Some(b),
                    RespValue::SimpleString(s) => Some(Bytes::from(s)),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Encodes the value in wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the wire encoding to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => put_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::Null => put_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::BulkString(data) => {
                put_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                put_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                values.iter().for_each(|value| value.serialize_into(buf));
            }
        }
    }

    /// Rough size of the encoding, used to presize buffers.
    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(values) => 16 + values.iter().map(Self::encoded_len_hint).sum::<usize>(),
            _ => 32,
        }
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

/// Writes `<prefix><body>\r\n`.
fn put_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_serialize() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(
            RespValue::error("ERR unknown command").serialize(),
            b"-ERR unknown command\r\n"
        );
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_multi_bulk_is_command_framing() {
        let record = RespValue::multi_bulk(["SET", "a", "1"]);
        assert_eq!(
            record.serialize(),
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n"
        );
    }

    #[test]
    fn test_into_cmd_line() {
        let line = RespValue::multi_bulk(["GET", "k"]).into_cmd_line().unwrap();
        assert_eq!(line, vec![Bytes::from("GET"), Bytes::from("k")]);

        let nested = RespValue::array(vec![RespValue::array(vec![])]);
        assert!(nested.into_cmd_line().is_none());
        assert!(RespValue::integer(1).into_cmd_line().is_none());
    }
}
