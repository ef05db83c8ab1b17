//! Set commands.

use crate::commands::{bulk_array, read_first, write_first, Command, CommandTable};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{Database, Entity};
use bytes::Bytes;
use std::collections::HashSet;

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("sadd", sadd, -3, write_first));
    table.register(Command::write("srem", srem, -3, write_first));
    table.register(Command::read("sismember", sismember, 3, read_first));
    table.register(Command::read("scard", scard, 2, read_first));
    table.register(Command::read("smembers", smembers, 2, read_first));
}

fn with_set<R>(
    db: &Database,
    key: &[u8],
    f: impl FnOnce(&HashSet<Bytes>) -> R,
) -> Result<Option<R>, CommandError> {
    db.get_entity(key, |entity| entity.as_set().map(f)).transpose()
}

/// SADD key member [member ...]
fn sadd(db: &Database, args: &[Bytes]) -> CommandResult {
    let added = db.entity_or_insert_with(
        &args[0],
        || Entity::Set(HashSet::new()),
        |entity| {
            let set = entity.as_set_mut()?;
            Ok::<_, CommandError>(
                args[1..]
                    .iter()
                    .filter(|member| set.insert((*member).clone()))
                    .count(),
            )
        },
    )?;
    Ok(RespValue::integer(added as i64))
}

/// SREM key member [member ...]
fn srem(db: &Database, args: &[Bytes]) -> CommandResult {
    let removed = db
        .get_entity_mut(&args[0], |entity| {
            let set = entity.as_set_mut()?;
            Ok::<_, CommandError>(args[1..].iter().filter(|member| set.remove(*member)).count())
        })
        .transpose()?
        .unwrap_or(0);
    db.remove_if_empty(&args[0]);
    Ok(RespValue::integer(removed as i64))
}

/// SISMEMBER key member
fn sismember(db: &Database, args: &[Bytes]) -> CommandResult {
    let found = with_set(db, &args[0], |set| set.contains(&args[1]))?.unwrap_or(false);
    Ok(RespValue::integer(found as i64))
}

/// SCARD key
fn scard(db: &Database, args: &[Bytes]) -> CommandResult {
    let len = with_set(db, &args[0], HashSet::len)?.unwrap_or(0);
    Ok(RespValue::integer(len as i64))
}

/// SMEMBERS key
fn smembers(db: &Database, args: &[Bytes]) -> CommandResult {
    let members = with_set(db, &args[0], |set| set.iter().cloned().collect::<Vec<_>>())?
        .unwrap_or_default();
    Ok(bulk_array(members))
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::error::CommandError;
    use crate::protocol::RespValue;
    use crate::storage::Database;
    use bytes::Bytes;
    use std::sync::Arc;

    fn create_db() -> Arc<Database> {
        Database::standalone(&ServerConfig::default())
    }

    fn run(db: &Database, args: &[&str]) -> Result<RespValue, CommandError> {
        let line: Vec<Bytes> = args.iter().map(|s| Bytes::from(s.to_string())).collect();
        db.exec(&line)
    }

    #[test]
    fn test_sadd_srem() {
        let db = create_db();
        assert_eq!(run(&db, &["SADD", "s", "a", "b", "a"]), Ok(RespValue::integer(2)));
        assert_eq!(run(&db, &["SADD", "s", "b", "c"]), Ok(RespValue::integer(1)));
        assert_eq!(run(&db, &["SCARD", "s"]), Ok(RespValue::integer(3)));
        assert_eq!(run(&db, &["SREM", "s", "a", "zz"]), Ok(RespValue::integer(1)));
        assert_eq!(run(&db, &["SISMEMBER", "s", "a"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["SISMEMBER", "s", "b"]), Ok(RespValue::integer(1)));
        assert_eq!(run(&db, &["SREM", "s", "b", "c"]), Ok(RespValue::integer(2)));
        assert_eq!(run(&db, &["EXISTS", "s"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["SCARD", "s"]), Ok(RespValue::integer(0)));
    }

    #[test]
    fn test_smembers() {
        let db = create_db();
        run(&db, &["SADD", "s", "x", "y"]).unwrap();
        let Ok(RespValue::Array(items)) = run(&db, &["SMEMBERS", "s"]) else {
            panic!("expected array");
        };
        let mut members: Vec<Bytes> = items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::BulkString(b) => Some(b),
                _ => None,
            })
            .collect();
        members.sort();
        assert_eq!(members, vec![Bytes::from("x"), Bytes::from("y")]);
        assert_eq!(run(&db, &["SMEMBERS", "missing"]), Ok(RespValue::array(vec![])));
    }

    #[test]
    fn test_wrong_type() {
        let db = create_db();
        run(&db, &["SET", "k", "v"]).unwrap();
        assert_eq!(run(&db, &["SADD", "k", "a"]), Err(CommandError::WrongType));
        assert_eq!(run(&db, &["SMEMBERS", "k"]), Err(CommandError::WrongType));
    }
}
