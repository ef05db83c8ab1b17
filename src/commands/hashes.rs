//! Hash commands.

use crate::commands::{bulk_array, parse_int, read_first, write_first, Command, CommandTable};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{Database, Entity};
use bytes::Bytes;
use std::collections::HashMap;

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("hset", hset, -4, write_first));
    table.register(Command::read("hget", hget, 3, read_first));
    table.register(Command::write("hdel", hdel, -3, write_first));
    table.register(Command::read("hexists", hexists, 3, read_first));
    table.register(Command::read("hlen", hlen, 2, read_first));
    table.register(Command::read("hgetall", hgetall, 2, read_first));
    table.register(Command::read("hkeys", hkeys, 2, read_first));
    table.register(Command::read("hvals", hvals, 2, read_first));
    table.register(Command::write("hincrby", hincrby, 4, write_first));
}

/// Runs `f` on the hash under `key`; `None` when the key is absent.
fn with_hash<R>(
    db: &Database,
    key: &[u8],
    f: impl FnOnce(&HashMap<Bytes, Bytes>) -> R,
) -> Result<Option<R>, CommandError> {
    db.get_entity(key, |entity| entity.as_hash().map(f))
        .transpose()
}

fn with_hash_or_insert<R>(
    db: &Database,
    key: &Bytes,
    f: impl FnOnce(&mut HashMap<Bytes, Bytes>) -> Result<R, CommandError>,
) -> Result<R, CommandError> {
    db.entity_or_insert_with(
        key,
        || Entity::Hash(HashMap::new()),
        |entity| f(entity.as_hash_mut()?),
    )
}

/// HSET key field value [field value ...]
fn hset(db: &Database, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity("hset".to_string()));
    }
    let added = with_hash_or_insert(db, &args[0], |hash| {
        Ok(pairs
            .chunks_exact(2)
            .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
            .count())
    })?;
    Ok(RespValue::integer(added as i64))
}

/// HGET key field
fn hget(db: &Database, args: &[Bytes]) -> CommandResult {
    let value = with_hash(db, &args[0], |hash| hash.get(&args[1]).cloned())?.flatten();
    Ok(value.map_or_else(RespValue::null, RespValue::BulkString))
}

/// HDEL key field [field ...]
fn hdel(db: &Database, args: &[Bytes]) -> CommandResult {
    let removed = db
        .get_entity_mut(&args[0], |entity| {
            let hash = entity.as_hash_mut()?;
            Ok::<_, CommandError>(
                args[1..]
                    .iter()
                    .filter(|field| hash.remove(*field).is_some())
                    .count(),
            )
        })
        .transpose()?
        .unwrap_or(0);
    db.remove_if_empty(&args[0]);
    Ok(RespValue::integer(removed as i64))
}

/// HEXISTS key field
fn hexists(db: &Database, args: &[Bytes]) -> CommandResult {
    let found = with_hash(db, &args[0], |hash| hash.contains_key(&args[1]))?.unwrap_or(false);
    Ok(RespValue::integer(found as i64))
}

/// HLEN key
fn hlen(db: &Database, args: &[Bytes]) -> CommandResult {
    let len = with_hash(db, &args[0], HashMap::len)?.unwrap_or(0);
    Ok(RespValue::integer(len as i64))
}

/// HGETALL key
fn hgetall(db: &Database, args: &[Bytes]) -> CommandResult {
    let flat = with_hash(db, &args[0], |hash| {
        hash.iter()
            .flat_map(|(field, value)| [field.clone(), value.clone()])
            .collect::<Vec<_>>()
    })?
    .unwrap_or_default();
    Ok(bulk_array(flat))
}

/// HKEYS key
fn hkeys(db: &Database, args: &[Bytes]) -> CommandResult {
    let fields = with_hash(db, &args[0], |hash| hash.keys().cloned().collect::<Vec<_>>())?
        .unwrap_or_default();
    Ok(bulk_array(fields))
}

/// HVALS key
fn hvals(db: &Database, args: &[Bytes]) -> CommandResult {
    let values = with_hash(db, &args[0], |hash| hash.values().cloned().collect::<Vec<_>>())?
        .unwrap_or_default();
    Ok(bulk_array(values))
}

/// HINCRBY key field increment
fn hincrby(db: &Database, args: &[Bytes]) -> CommandResult {
    let delta = parse_int(&args[2])?;
    let next = with_hash_or_insert(db, &args[0], |hash| {
        let current = match hash.get(&args[1]) {
            Some(raw) => parse_int(raw)
                .map_err(|_| CommandError::Syntax("hash value is not an integer".to_string()))?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            CommandError::OutOfRange("increment or decrement would overflow".to_string())
        })?;
        hash.insert(args[1].clone(), Bytes::from(next.to_string()));
        Ok(next)
    });
    // A failed increment on a fresh key must not leave an empty hash behind.
    db.remove_if_empty(&args[0]);
    Ok(RespValue::integer(next?))
}
