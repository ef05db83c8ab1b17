//! Error Types
//!
//! Command-level failures are values, not panics: every handler returns a
//! [`CommandResult`] and the error variants render as Redis-compatible error
//! strings (`ERR ...`, `WRONGTYPE ...`).
//!
//! Persistence failures have their own type, [`AofError`], since they never
//! reach a client directly.

use crate::protocol::{ParseError, RespValue};
use thiserror::Error;

/// The result of executing a single command.
pub type CommandResult = Result<RespValue, CommandError>;

/// Errors returned to clients by the command layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// The command name is not registered
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// The argument count does not satisfy the command's arity
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// The key holds a different kind of entity than the accessor expects
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Malformed option, integer or score argument
    #[error("ERR {0}")]
    Syntax(String),

    /// User-supplied index or rank outside the valid bounds
    #[error("ERR {0}")]
    OutOfRange(String),

    /// The command requires an existing key
    #[error("ERR no such key")]
    NoSuchKey,

    /// Catch-all for unexpected failures at the outermost boundary
    #[error("ERR {0}")]
    Unknown(String),
}

impl CommandError {
    pub fn syntax() -> Self {
        CommandError::Syntax("syntax error".to_string())
    }

    pub fn not_integer() -> Self {
        CommandError::Syntax("value is not an integer or out of range".to_string())
    }

    pub fn not_float() -> Self {
        CommandError::Syntax("value is not a valid float".to_string())
    }

    pub fn index_out_of_range() -> Self {
        CommandError::OutOfRange("index out of range".to_string())
    }

    /// Converts the error into the RESP error reply sent to clients.
    pub fn into_reply(self) -> RespValue {
        RespValue::error(self.to_string())
    }
}

/// Errors raised while writing or replaying the append-only file.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Parse(#[from] ParseError),

    #[error("persister is closed")]
    Closed,
}
