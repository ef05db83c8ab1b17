//! Command Registry
//!
//! Commands are registered explicitly into a [`CommandTable`] that is built
//! once at startup and shared by every database. Each entry carries:
//!
//! - the handler that runs against a [`Database`] with the key locks held,
//! - the arity (counting the command name; `-N` means "at least N"),
//! - a key extractor that splits the arguments into write and read keys,
//! - whether the command mutates the keyspace,
//! - for mutating commands, how to turn the executed line into AOF records.
//!
//! ```text
//! cmd line ──▶ lookup ──▶ arity ──▶ extract keys ──▶ lock ──▶ handler
//!                                                              │
//!                      append ◀── unlock ◀── AOF records ◀─────┘
//! ```
//!
//! The pipeline itself lives in [`Database::exec`].
//!
//! ## Handler modules
//!
//! - `keys`: DEL, EXISTS, EXPIRE family, TTL/PTTL, PERSIST, TYPE, RENAME,
//!   KEYS, RANDOMKEY, DBSIZE, FLUSHDB, PING, ECHO
//! - `strings`: SET family, GET family, counters, APPEND, STRLEN, MSET, MGET
//! - `lists`: push/pop, LLEN, LINDEX, LSET, LRANGE, LREM, LINSERT
//! - `hashes`: HSET, HGET, HDEL, HEXISTS, HLEN, HGETALL, HKEYS, HVALS, HINCRBY
//! - `sets`: SADD, SREM, SISMEMBER, SCARD, SMEMBERS
//! - `sorted_sets`: ZADD, ZSCORE, ZINCRBY, ranks, ranges, ZREM, ZCOUNT

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod sets;
pub mod sorted_sets;
pub mod strings;

use crate::error::{CommandError, CommandResult};
use crate::protocol::{CmdLine, RespValue};
use crate::storage::Database;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Runs a command against a database. Receives the arguments after the name.
pub type Handler = fn(&Database, &[Bytes]) -> CommandResult;

/// Splits arguments into `(write_keys, read_keys)`.
pub type KeyExtractor = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);

/// Produces the AOF records for a successfully executed mutating command.
/// Runs with the key locks still held. Receives the full command line.
pub type AofFn = fn(&Database, &[Bytes], &RespValue) -> Vec<CmdLine>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A registered command.
#[derive(Clone)]
pub struct Command {
    pub name: &'static str,
    pub handler: Handler,
    pub keys: KeyExtractor,
    pub arity: i32,
    pub access: Access,
    pub aof: AofFn,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("access", &self.access)
            .finish()
    }
}

impl Command {
    /// A command that only reads the keyspace.
    pub fn read(name: &'static str, handler: Handler, arity: i32, keys: KeyExtractor) -> Self {
        Self {
            name,
            handler,
            keys,
            arity,
            access: Access::ReadOnly,
            aof: log_verbatim,
        }
    }

    /// A command that mutates the keyspace and is logged to the AOF.
    pub fn write(name: &'static str, handler: Handler, arity: i32, keys: KeyExtractor) -> Self {
        Self {
            access: Access::ReadWrite,
            ..Self::read(name, handler, arity, keys)
        }
    }

    /// Overrides how the command is logged.
    pub fn with_aof(mut self, aof: AofFn) -> Self {
        self.aof = aof;
        self
    }

    pub fn is_write(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Validates the argument count of a full command line.
    pub fn check_arity(&self, argc: usize) -> Result<(), CommandError> {
        let ok = if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= self.arity.unsigned_abs() as usize
        };
        if ok {
            Ok(())
        } else {
            Err(CommandError::WrongArity(self.name.to_string()))
        }
    }
}

/// Name → command lookup, keyed by lowercase name.
#[derive(Debug, Default)]
pub struct CommandTable {
    commands: HashMap<&'static str, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full command set.
    pub fn standard() -> Self {
        let mut table = Self::new();
        keys::register(&mut table);
        strings::register(&mut table);
        lists::register(&mut table);
        hashes::register(&mut table);
        sets::register(&mut table);
        sorted_sets::register(&mut table);
        table
    }

    /// Adds a command. Registering the same name twice is a bug.
    pub fn register(&mut self, command: Command) {
        debug_assert_eq!(command.name, command.name.to_ascii_lowercase());
        let previous = self.commands.insert(command.name, command);
        assert!(previous.is_none(), "command registered twice");
    }

    /// Looks up a command by its lowercase name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// ============================================================================
// Key extractors
// ============================================================================

/// The first argument is written.
pub fn write_first(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.first().cloned().into_iter().collect(), Vec::new())
}

/// The first argument is read.
pub fn read_first(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.first().cloned().into_iter().collect())
}

/// Every argument is written.
pub fn write_all(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.to_vec(), Vec::new())
}

/// Every argument is read.
pub fn read_all(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

/// Even-positioned arguments (`k1 v1 k2 v2 ...`) are written.
pub fn write_even(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.iter().step_by(2).cloned().collect(), Vec::new())
}

/// Source and destination of a rename are both written.
pub fn write_first_two(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.iter().take(2).cloned().collect(), Vec::new())
}

/// The command touches no keys, or the whole database.
pub fn no_keys(_args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), Vec::new())
}

// ============================================================================
// AOF record builders
// ============================================================================

/// Logs the command line exactly as executed.
pub fn log_verbatim(_db: &Database, line: &[Bytes], _reply: &RespValue) -> Vec<CmdLine> {
    vec![line.to_vec()]
}

/// Builds `PEXPIREAT key <unix-ms>`, or `PERSIST key` for a key with no
/// deadline.
pub fn expiry_record(db: &Database, key: &Bytes) -> CmdLine {
    match db.expire_time(key) {
        Some(at) => vec![
            Bytes::from_static(b"PEXPIREAT"),
            key.clone(),
            Bytes::from(unix_millis(at).to_string()),
        ],
        None => vec![Bytes::from_static(b"PERSIST"), key.clone()],
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Lowercases a command name for lookup.
pub fn command_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

pub fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(CommandError::not_integer)
}

/// Parses a float argument; accepts `inf`/`-inf`, rejects NaN.
pub fn parse_float(arg: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(arg).map_err(|_| CommandError::not_float())?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| CommandError::not_float())?,
    };
    if value.is_nan() {
        return Err(CommandError::not_float());
    }
    Ok(value)
}

/// Case-insensitive comparison of an option argument.
pub fn is_option(arg: &[u8], option: &str) -> bool {
    arg.eq_ignore_ascii_case(option.as_bytes())
}

/// Converts an inclusive `start..=stop` pair that may use negative
/// (from-the-end) indices into a half-open range clamped to `0..len`.
/// Returns `None` when the range is empty.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}

/// Resolves a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Milliseconds since the Unix epoch (zero for instants before it).
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn bulk_array<I: IntoIterator<Item = Bytes>>(items: I) -> RespValue {
    RespValue::array(items.into_iter().map(RespValue::BulkString).collect())
}
