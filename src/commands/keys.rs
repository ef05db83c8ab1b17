//! Keyspace and connection commands.

use crate::commands::{
    bulk_array, expiry_record, no_keys, parse_int, read_all, read_first, write_all, write_first,
    write_first_two, Command, CommandTable,
};
use crate::error::{CommandError, CommandResult};
use crate::protocol::{CmdLine, RespValue};
use crate::storage::Database;
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("del", del, -2, write_all));
    table.register(Command::read("exists", exists, -2, read_all));
    table.register(Command::write("expire", expire, 3, write_first).with_aof(expire_aof));
    table.register(Command::write("pexpire", pexpire, 3, write_first).with_aof(expire_aof));
    table.register(Command::write("expireat", expireat, 3, write_first).with_aof(expire_aof));
    table.register(Command::write("pexpireat", pexpireat, 3, write_first).with_aof(expire_aof));
    table.register(Command::read("ttl", ttl, 2, read_first));
    table.register(Command::read("pttl", pttl, 2, read_first));
    table.register(Command::write("persist", persist, 2, write_first));
    table.register(Command::read("type", key_type, 2, read_first));
    table.register(Command::write("rename", rename, 3, write_first_two));
    table.register(Command::write("renamenx", renamenx, 3, write_first_two));
    table.register(Command::read("keys", keys, 2, no_keys));
    table.register(Command::read("randomkey", randomkey, 1, no_keys));
    table.register(Command::read("dbsize", dbsize, 1, no_keys));
    table.register(Command::write("flushdb", flushdb, 1, no_keys));
    table.register(Command::read("ping", ping, -1, no_keys));
    table.register(Command::read("echo", echo, 2, no_keys));
}

/// DEL key [key ...]
fn del(db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(db.remove_all(args) as i64))
}

/// EXISTS key [key ...]
fn exists(db: &Database, args: &[Bytes]) -> CommandResult {
    let count = args.iter().filter(|key| db.exists(key)).count();
    Ok(RespValue::integer(count as i64))
}

// ============================================================================
// Expiry
// ============================================================================

fn invalid_expire(command: &str) -> CommandError {
    CommandError::Syntax(format!("invalid expire time in '{}' command", command))
}

/// `now + millis`, where `millis` may be negative.
fn from_now(millis: i64) -> Option<SystemTime> {
    let now = SystemTime::now();
    let offset = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        now.checked_add(offset)
    } else {
        Some(now.checked_sub(offset).unwrap_or(UNIX_EPOCH))
    }
}

/// Unix-epoch milliseconds to an instant; negative values clamp to the epoch.
fn from_unix_millis(millis: i64) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_millis(millis.max(0) as u64))
}

/// Applies a deadline to an existing key. A deadline already in the past
/// deletes the key.
fn set_deadline(db: &Database, key: &Bytes, at: SystemTime) -> CommandResult {
    if !db.exists(key) {
        return Ok(RespValue::integer(0));
    }
    if at <= SystemTime::now() {
        db.remove(key);
    } else {
        db.expire(key, at);
    }
    Ok(RespValue::integer(1))
}

/// EXPIRE key seconds
fn expire(db: &Database, args: &[Bytes]) -> CommandResult {
    let seconds = parse_int(&args[1])?;
    let at = seconds
        .checked_mul(1000)
        .and_then(from_now)
        .ok_or_else(|| invalid_expire("expire"))?;
    set_deadline(db, &args[0], at)
}

/// PEXPIRE key milliseconds
fn pexpire(db: &Database, args: &[Bytes]) -> CommandResult {
    let at = from_now(parse_int(&args[1])?).ok_or_else(|| invalid_expire("pexpire"))?;
    set_deadline(db, &args[0], at)
}

/// EXPIREAT key unix-seconds
fn expireat(db: &Database, args: &[Bytes]) -> CommandResult {
    let seconds = parse_int(&args[1])?;
    let at = seconds
        .checked_mul(1000)
        .and_then(from_unix_millis)
        .ok_or_else(|| invalid_expire("expireat"))?;
    set_deadline(db, &args[0], at)
}

/// PEXPIREAT key unix-milliseconds
fn pexpireat(db: &Database, args: &[Bytes]) -> CommandResult {
    let at = from_unix_millis(parse_int(&args[1])?).ok_or_else(|| invalid_expire("pexpireat"))?;
    set_deadline(db, &args[0], at)
}

/// Logs the resulting deadline as an absolute `PEXPIREAT`, or a `DEL` when
/// the deadline had already passed.
fn expire_aof(db: &Database, line: &[Bytes], reply: &RespValue) -> Vec<CmdLine> {
    let key = &line[1];
    if *reply != RespValue::integer(1) {
        return Vec::new();
    }
    if db.exists(key) {
        vec![expiry_record(db, key)]
    } else {
        vec![vec![Bytes::from_static(b"DEL"), key.clone()]]
    }
}

enum Remaining {
    Missing,
    Persistent,
    Left(Duration),
}

impl Remaining {
    fn of(db: &Database, key: &[u8]) -> Self {
        if !db.exists(key) {
            return Remaining::Missing;
        }
        match db.expire_time(key) {
            None => Remaining::Persistent,
            Some(at) => Remaining::Left(
                at.duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO),
            ),
        }
    }

    /// `-2` for a missing key, `-1` without a deadline, else `unit(left)`.
    fn reply(self, unit: impl FnOnce(Duration) -> i64) -> RespValue {
        RespValue::integer(match self {
            Remaining::Missing => -2,
            Remaining::Persistent => -1,
            Remaining::Left(left) => unit(left),
        })
    }
}

/// TTL key
fn ttl(db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(Remaining::of(db, &args[0]).reply(|left| ((left.as_millis() + 500) / 1000) as i64))
}

/// PTTL key
fn pttl(db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(Remaining::of(db, &args[0]).reply(|left| left.as_millis() as i64))
}

/// PERSIST key
fn persist(db: &Database, args: &[Bytes]) -> CommandResult {
    let cleared = db.exists(&args[0]) && db.persist(&args[0]);
    Ok(RespValue::integer(cleared as i64))
}

// ============================================================================
// Inspection and renaming
// ============================================================================

/// TYPE key
fn key_type(db: &Database, args: &[Bytes]) -> CommandResult {
    let name = db.get_entity(&args[0], |e| e.type_name()).unwrap_or("none");
    Ok(RespValue::simple_string(name))
}

/// Moves `src` (with its deadline) onto `dst`, replacing anything there.
fn move_key(db: &Database, src: &Bytes, dst: &Bytes) -> Result<(), CommandError> {
    if src == dst {
        return if db.exists(src) {
            Ok(())
        } else {
            Err(CommandError::NoSuchKey)
        };
    }
    let deadline = db.expire_time(src);
    let entity = db.take(src).ok_or(CommandError::NoSuchKey)?;
    db.remove(dst);
    db.put_entity(dst.clone(), entity);
    if let Some(at) = deadline {
        db.expire(dst, at);
    }
    Ok(())
}

/// RENAME key newkey
fn rename(db: &Database, args: &[Bytes]) -> CommandResult {
    move_key(db, &args[0], &args[1])?;
    Ok(RespValue::ok())
}

/// RENAMENX key newkey
fn renamenx(db: &Database, args: &[Bytes]) -> CommandResult {
    if !db.exists(&args[0]) {
        return Err(CommandError::NoSuchKey);
    }
    if db.exists(&args[1]) {
        return Ok(RespValue::integer(0));
    }
    move_key(db, &args[0], &args[1])?;
    Ok(RespValue::integer(1))
}

/// KEYS pattern
fn keys(db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(bulk_array(db.keys(&args[0])))
}

/// RANDOMKEY
fn randomkey(db: &Database, _args: &[Bytes]) -> CommandResult {
    Ok(match db.random_keys(1).into_iter().next() {
        Some(key) => RespValue::BulkString(key),
        None => RespValue::null(),
    })
}

/// DBSIZE
fn dbsize(db: &Database, _args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(db.key_count() as i64))
}

/// FLUSHDB
fn flushdb(db: &Database, _args: &[Bytes]) -> CommandResult {
    db.flush();
    Ok(RespValue::ok())
}

/// PING [message]
fn ping(_db: &Database, args: &[Bytes]) -> CommandResult {
    match args {
        [] => Ok(RespValue::simple_string("PONG")),
        [message] => Ok(RespValue::BulkString(message.clone())),
        _ => Err(CommandError::WrongArity("ping".to_string())),
    }
}

/// ECHO message
fn echo(_db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::BulkString(args[0].clone()))
}
