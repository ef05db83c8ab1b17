//! String commands.

use crate::commands::{
    expiry_record, is_option, parse_int, read_all, read_first, write_even, write_first, Command,
    CommandTable,
};
use crate::error::{CommandError, CommandResult};
use crate::protocol::{CmdLine, RespValue};
use crate::storage::{Database, Entity};
use bytes::{Bytes, BytesMut};
use std::time::{Duration, SystemTime};

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("set", set, -3, write_first).with_aof(set_aof));
    table.register(Command::write("setnx", setnx, 3, write_first));
    table.register(Command::write("setex", setex, 4, write_first).with_aof(setex_aof));
    table.register(Command::write("psetex", psetex, 4, write_first).with_aof(setex_aof));
    table.register(Command::read("get", get, 2, read_first));
    table.register(Command::write("getset", getset, 3, write_first));
    table.register(Command::write("getdel", getdel, 2, write_first));
    table.register(Command::write("incr", incr, 2, write_first));
    table.register(Command::write("incrby", incrby, 3, write_first));
    table.register(Command::write("decr", decr, 2, write_first));
    table.register(Command::write("decrby", decrby, 3, write_first));
    table.register(Command::write("append", append, 3, write_first));
    table.register(Command::read("strlen", strlen, 2, read_first));
    table.register(Command::write("mset", mset, -3, write_even));
    table.register(Command::read("mget", mget, -2, read_all));
}

/// The string stored under `key`. `None` if absent; `WRONGTYPE` for other types.
fn get_string(db: &Database, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
    db.get_entity(key, |entity| entity.as_string().cloned())
        .transpose()
}

fn bulk_or_null(value: Option<Bytes>) -> RespValue {
    match value {
        Some(value) => RespValue::BulkString(value),
        None => RespValue::null(),
    }
}

/// Stores a plain string and clears any previous deadline.
fn store(db: &Database, key: &Bytes, value: Bytes) {
    db.put_entity(key.clone(), Entity::String(value));
    db.persist(key);
}

fn ttl_from_now(amount: i64, unit: fn(u64) -> Duration, command: &str) -> Result<SystemTime, CommandError> {
    if amount <= 0 {
        return Err(CommandError::Syntax(format!(
            "invalid expire time in '{}' command",
            command
        )));
    }
    SystemTime::now()
        .checked_add(unit(amount as u64))
        .ok_or_else(|| CommandError::Syntax(format!("invalid expire time in '{}' command", command)))
}

// ============================================================================
// SET family
// ============================================================================

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
fn set(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = &args[0];
    let value = args[1].clone();

    let mut deadline: Option<SystemTime> = None;
    let mut nx = false;
    let mut xx = false;

    let mut i = 2;
    while i < args.len() {
        let option = &args[i];
        if is_option(option, "nx") {
            nx = true;
        } else if is_option(option, "xx") {
            xx = true;
        } else if (is_option(option, "ex") || is_option(option, "px")) && deadline.is_none() {
            i += 1;
            let amount = parse_int(args.get(i).ok_or_else(CommandError::syntax)?)?;
            let unit: fn(u64) -> Duration = if is_option(option, "ex") {
                Duration::from_secs
            } else {
                Duration::from_millis
            };
            deadline = Some(ttl_from_now(amount, unit, "set")?);
        } else {
            return Err(CommandError::syntax());
        }
        i += 1;
    }
    if nx && xx {
        return Err(CommandError::syntax());
    }

    let exists = db.exists(key);
    if (nx && exists) || (xx && !exists) {
        return Ok(RespValue::null());
    }

    store(db, key, value);
    if let Some(at) = deadline {
        db.expire(key, at);
    }
    Ok(RespValue::ok())
}

/// Logs `SET key value` plus the absolute deadline, if any.
fn log_set(db: &Database, key: &Bytes, value: &Bytes) -> Vec<CmdLine> {
    let mut records = vec![vec![Bytes::from_static(b"SET"), key.clone(), value.clone()]];
    if db.expire_time(key).is_some() {
        records.push(expiry_record(db, key));
    }
    records
}

fn set_aof(db: &Database, line: &[Bytes], reply: &RespValue) -> Vec<CmdLine> {
    if *reply == RespValue::null() {
        return Vec::new();
    }
    log_set(db, &line[1], &line[2])
}

fn setex_aof(db: &Database, line: &[Bytes], _reply: &RespValue) -> Vec<CmdLine> {
    log_set(db, &line[1], &line[3])
}

/// SETNX key value
fn setnx(db: &Database, args: &[Bytes]) -> CommandResult {
    let inserted = db.put_if_absent(args[0].clone(), Entity::String(args[1].clone()));
    Ok(RespValue::integer(inserted as i64))
}

/// SETEX key seconds value
fn setex(db: &Database, args: &[Bytes]) -> CommandResult {
    let at = ttl_from_now(parse_int(&args[1])?, Duration::from_secs, "setex")?;
    store(db, &args[0], args[2].clone());
    db.expire(&args[0], at);
    Ok(RespValue::ok())
}

/// PSETEX key milliseconds value
fn psetex(db: &Database, args: &[Bytes]) -> CommandResult {
    let at = ttl_from_now(parse_int(&args[1])?, Duration::from_millis, "psetex")?;
    store(db, &args[0], args[2].clone());
    db.expire(&args[0], at);
    Ok(RespValue::ok())
}

// ============================================================================
// GET family
// ============================================================================

/// GET key
fn get(db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(bulk_or_null(get_string(db, &args[0])?))
}

/// GETSET key value
fn getset(db: &Database, args: &[Bytes]) -> CommandResult {
    let old = get_string(db, &args[0])?;
    store(db, &args[0], args[1].clone());
    Ok(bulk_or_null(old))
}

/// GETDEL key
fn getdel(db: &Database, args: &[Bytes]) -> CommandResult {
    let old = get_string(db, &args[0])?;
    if old.is_some() {
        db.remove(&args[0]);
    }
    Ok(bulk_or_null(old))
}

// ============================================================================
// Counters
// ============================================================================

fn incr_by(db: &Database, key: &Bytes, delta: i64) -> CommandResult {
    let current = match get_string(db, key)? {
        Some(raw) => parse_int(&raw)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or_else(|| {
        CommandError::OutOfRange("increment or decrement would overflow".to_string())
    })?;
    // Keeps any deadline.
    db.put_entity(key.clone(), Entity::String(Bytes::from(next.to_string())));
    Ok(RespValue::integer(next))
}

/// INCR key
fn incr(db: &Database, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[0], 1)
}

/// INCRBY key increment
fn incrby(db: &Database, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[0], parse_int(&args[1])?)
}

/// DECR key
fn decr(db: &Database, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[0], -1)
}

/// DECRBY key decrement
fn decrby(db: &Database, args: &[Bytes]) -> CommandResult {
    let delta = parse_int(&args[1])?
        .checked_neg()
        .ok_or_else(CommandError::not_integer)?;
    incr_by(db, &args[0], delta)
}

/// APPEND key value
fn append(db: &Database, args: &[Bytes]) -> CommandResult {
    let joined = match get_string(db, &args[0])? {
        Some(existing) => {
            let mut buf = BytesMut::with_capacity(existing.len() + args[1].len());
            buf.extend_from_slice(&existing);
            buf.extend_from_slice(&args[1]);
            buf.freeze()
        }
        None => args[1].clone(),
    };
    let len = joined.len();
    db.put_entity(args[0].clone(), Entity::String(joined));
    Ok(RespValue::integer(len as i64))
}

/// STRLEN key
fn strlen(db: &Database, args: &[Bytes]) -> CommandResult {
    let len = get_string(db, &args[0])?.map_or(0, |v| v.len());
    Ok(RespValue::integer(len as i64))
}

// ============================================================================
// Multi-key
// ============================================================================

/// MSET key value [key value ...]
fn mset(db: &Database, args: &[Bytes]) -> CommandResult {
    if args.len() % 2 != 0 {
        return Err(CommandError::WrongArity("mset".to_string()));
    }
    for pair in args.chunks_exact(2) {
        store(db, &pair[0], pair[1].clone());
    }
    Ok(RespValue::ok())
}

/// MGET key [key ...]
fn mget(db: &Database, args: &[Bytes]) -> CommandResult {
    let values = args
        .iter()
        .map(|key| bulk_or_null(get_string(db, key).ok().flatten()))
        .collect();
    Ok(RespValue::array(values))
}
