//! List commands, backed by [`PagedList`].

use crate::commands::{
    bulk_array, is_option, normalize_index, normalize_range, parse_int, read_first, write_first,
    Command, CommandTable,
};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{Database, Entity, PagedList};
use bytes::Bytes;

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("lpush", lpush, -3, write_first));
    table.register(Command::write("rpush", rpush, -3, write_first));
    table.register(Command::write("lpop", lpop, 2, write_first));
    table.register(Command::write("rpop", rpop, 2, write_first));
    table.register(Command::read("llen", llen, 2, read_first));
    table.register(Command::read("lindex", lindex, 3, read_first));
    table.register(Command::write("lset", lset, 4, write_first));
    table.register(Command::read("lrange", lrange, 4, read_first));
    table.register(Command::write("lrem", lrem, 4, write_first));
    table.register(Command::write("linsert", linsert, 5, write_first));
}

fn push(db: &Database, args: &[Bytes], front: bool) -> CommandResult {
    let page_size = db.list_page_size();
    let len = db.entity_or_insert_with(
        &args[0],
        || Entity::List(PagedList::new(page_size)),
        |entity| {
            let list = entity.as_list_mut()?;
            for value in &args[1..] {
                if front {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Ok::<_, CommandError>(list.len())
        },
    )?;
    Ok(RespValue::integer(len as i64))
}

/// LPUSH key value [value ...]
fn lpush(db: &Database, args: &[Bytes]) -> CommandResult {
    push(db, args, true)
}

/// RPUSH key value [value ...]
fn rpush(db: &Database, args: &[Bytes]) -> CommandResult {
    push(db, args, false)
}

fn pop(db: &Database, key: &Bytes, front: bool) -> CommandResult {
    let popped = db
        .get_entity_mut(key, |entity| {
            let list = entity.as_list_mut()?;
            Ok::<_, CommandError>(if front {
                list.pop_front()
            } else {
                list.pop_back()
            })
        })
        .transpose()?
        .flatten();
    db.remove_if_empty(key);
    Ok(popped.map_or_else(RespValue::null, RespValue::BulkString))
}

/// LPOP key
fn lpop(db: &Database, args: &[Bytes]) -> CommandResult {
    pop(db, &args[0], true)
}

/// RPOP key
fn rpop(db: &Database, args: &[Bytes]) -> CommandResult {
    pop(db, &args[0], false)
}

/// LLEN key
fn llen(db: &Database, args: &[Bytes]) -> CommandResult {
    let len = db
        .get_entity(&args[0], |entity| entity.as_list().map(PagedList::len))
        .transpose()?
        .unwrap_or(0);
    Ok(RespValue::integer(len as i64))
}

/// LINDEX key index
fn lindex(db: &Database, args: &[Bytes]) -> CommandResult {
    let index = parse_int(&args[1])?;
    let value = db
        .get_entity(&args[0], |entity| {
            let list = entity.as_list()?;
            Ok::<_, CommandError>(normalize_index(index, list.len()).map(|i| list.get(i).clone()))
        })
        .transpose()?
        .flatten();
    Ok(value.map_or_else(RespValue::null, RespValue::BulkString))
}

/// LSET key index value
fn lset(db: &Database, args: &[Bytes]) -> CommandResult {
    let index = parse_int(&args[1])?;
    db.get_entity_mut(&args[0], |entity| {
        let list = entity.as_list_mut()?;
        let i = normalize_index(index, list.len()).ok_or_else(CommandError::index_out_of_range)?;
        list.set(i, args[2].clone());
        Ok::<_, CommandError>(RespValue::ok())
    })
    .unwrap_or(Err(CommandError::NoSuchKey))
}

/// LRANGE key start stop
fn lrange(db: &Database, args: &[Bytes]) -> CommandResult {
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let items = db
        .get_entity(&args[0], |entity| {
            let list = entity.as_list()?;
            Ok::<_, CommandError>(match normalize_range(start, stop, list.len()) {
                Some((from, to)) => list.range(from, to).cloned().collect(),
                None => Vec::new(),
            })
        })
        .transpose()?
        .unwrap_or_default();
    Ok(bulk_array(items))
}

/// LREM key count value
///
/// A positive count removes from the head, a negative one from the tail,
/// and zero removes every match.
fn lrem(db: &Database, args: &[Bytes]) -> CommandResult {
    let count = parse_int(&args[1])?;
    let target = &args[2];
    let removed = db
        .get_entity_mut(&args[0], |entity| {
            let list = entity.as_list_mut()?;
            Ok::<_, CommandError>(list.remove_matching(count, |item| item == target))
        })
        .transpose()?
        .unwrap_or(0);
    db.remove_if_empty(&args[0]);
    Ok(RespValue::integer(removed as i64))
}

/// LINSERT key BEFORE|AFTER pivot value
fn linsert(db: &Database, args: &[Bytes]) -> CommandResult {
    let after = if is_option(&args[1], "before") {
        false
    } else if is_option(&args[1], "after") {
        true
    } else {
        return Err(CommandError::syntax());
    };
    let pivot = &args[2];
    let len = db
        .get_entity_mut(&args[0], |entity| {
            let list = entity.as_list_mut()?;
            Ok::<_, CommandError>(match list.position(|item| item == pivot) {
                Some(i) => {
                    list.insert(if after { i + 1 } else { i }, args[3].clone());
                    list.len() as i64
                }
                None => -1,
            })
        })
        .transpose()?
        .unwrap_or(0);
    Ok(RespValue::integer(len))
}
