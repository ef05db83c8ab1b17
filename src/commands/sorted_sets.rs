//! Sorted set commands, backed by [`SortedSet`].

use crate::commands::{
    is_option, normalize_range, parse_float, parse_int, read_first, write_first, Command,
    CommandTable,
};
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{Database, Entity, ScoreBorder, SortedSet};
use bytes::Bytes;

pub fn register(table: &mut CommandTable) {
    table.register(Command::write("zadd", zadd, -4, write_first));
    table.register(Command::read("zscore", zscore, 3, read_first));
    table.register(Command::write("zincrby", zincrby, 4, write_first));
    table.register(Command::read("zrank", zrank, 3, read_first));
    table.register(Command::read("zrevrank", zrevrank, 3, read_first));
    table.register(Command::read("zcard", zcard, 2, read_first));
    table.register(Command::read("zrange", zrange, -4, read_first));
    table.register(Command::read("zrevrange", zrevrange, -4, read_first));
    table.register(Command::write("zrem", zrem, -3, write_first));
    table.register(Command::read("zcount", zcount, 4, read_first));
    table.register(Command::read("zrangebyscore", zrangebyscore, -4, read_first));
}

/// Renders a score the way clients expect: `inf`, `-inf`, or the shortest
/// digits that round-trip, laid out like C's `%.17g`. Exponents below -4 or
/// from 17 up switch to scientific notation with a signed, two-digit exponent.
pub fn format_score(score: f64) -> Bytes {
    if score.is_infinite() {
        return Bytes::from_static(if score > 0.0 { b"inf" } else { b"-inf" });
    }
    if score == 0.0 {
        return Bytes::from_static(b"0");
    }
    let scientific = format!("{:e}", score);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return Bytes::from(score.to_string());
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..17).contains(&exponent) {
        return Bytes::from(score.to_string());
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    Bytes::from(format!("{}e{}{:02}", mantissa, sign, exponent.unsigned_abs()))
}

fn with_zset<R>(
    db: &Database,
    key: &[u8],
    f: impl FnOnce(&SortedSet) -> R,
) -> Result<Option<R>, CommandError> {
    db.get_entity(key, |entity| entity.as_sorted_set().map(f))
        .transpose()
}

fn with_zset_or_insert<R>(
    db: &Database,
    key: &Bytes,
    f: impl FnOnce(&mut SortedSet) -> R,
) -> Result<R, CommandError> {
    db.entity_or_insert_with(
        key,
        || Entity::SortedSet(SortedSet::new()),
        |entity| entity.as_sorted_set_mut().map(f),
    )
}

fn members_reply(members: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(members.len() * if with_scores { 2 } else { 1 });
    for (member, score) in members {
        out.push(RespValue::BulkString(member));
        if with_scores {
            out.push(RespValue::BulkString(format_score(score)));
        }
    }
    RespValue::array(out)
}

/// ZADD key score member [score member ...]
fn zadd(db: &Database, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::syntax());
    }
    // Every score is validated before anything is inserted.
    let entries = pairs
        .chunks_exact(2)
        .map(|pair| -> Result<(f64, Bytes), CommandError> {
            Ok((parse_float(&pair[0])?, pair[1].clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let added = with_zset_or_insert(db, &args[0], |zset| {
        entries
            .into_iter()
            .filter(|(score, member)| zset.add(member.clone(), *score))
            .count()
    })?;
    Ok(RespValue::integer(added as i64))
}

/// ZSCORE key member
fn zscore(db: &Database, args: &[Bytes]) -> CommandResult {
    let score = with_zset(db, &args[0], |zset| zset.score(&args[1]))?.flatten();
    Ok(score.map_or_else(RespValue::null, |s| RespValue::BulkString(format_score(s))))
}

/// ZINCRBY key increment member
fn zincrby(db: &Database, args: &[Bytes]) -> CommandResult {
    let delta = parse_float(&args[1])?;
    let member = &args[2];
    let score = with_zset_or_insert(db, &args[0], |zset| {
        let next = zset.score(member).unwrap_or(0.0) + delta;
        if next.is_nan() {
            return None;
        }
        zset.add(member.clone(), next);
        Some(next)
    });
    db.remove_if_empty(&args[0]);
    match score? {
        Some(score) => Ok(RespValue::BulkString(format_score(score))),
        None => Err(CommandError::Syntax(
            "resulting score is not a number (NaN)".to_string(),
        )),
    }
}

fn rank(db: &Database, args: &[Bytes], desc: bool) -> CommandResult {
    let rank = with_zset(db, &args[0], |zset| zset.rank(&args[1], desc))?.flatten();
    Ok(rank.map_or_else(RespValue::null, |r| RespValue::integer(r as i64)))
}

/// ZRANK key member
fn zrank(db: &Database, args: &[Bytes]) -> CommandResult {
    rank(db, args, false)
}

/// ZREVRANK key member
fn zrevrank(db: &Database, args: &[Bytes]) -> CommandResult {
    rank(db, args, true)
}

/// ZCARD key
fn zcard(db: &Database, args: &[Bytes]) -> CommandResult {
    let len = with_zset(db, &args[0], SortedSet::len)?.unwrap_or(0);
    Ok(RespValue::integer(len as i64))
}

fn range_by_rank(db: &Database, args: &[Bytes], desc: bool) -> CommandResult {
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let with_scores = match &args[3..] {
        [] => false,
        [option] if is_option(option, "withscores") => true,
        _ => return Err(CommandError::syntax()),
    };
    let members = with_zset(db, &args[0], |zset| {
        match normalize_range(start, stop, zset.len()) {
            Some((from, to)) => zset.range_by_rank(from, to, desc),
            None => Vec::new(),
        }
    })?
    .unwrap_or_default();
    Ok(members_reply(members, with_scores))
}

/// ZRANGE key start stop [WITHSCORES]
fn zrange(db: &Database, args: &[Bytes]) -> CommandResult {
    range_by_rank(db, args, false)
}

/// ZREVRANGE key start stop [WITHSCORES]
fn zrevrange(db: &Database, args: &[Bytes]) -> CommandResult {
    range_by_rank(db, args, true)
}

/// ZREM key member [member ...]
fn zrem(db: &Database, args: &[Bytes]) -> CommandResult {
    let removed = db
        .get_entity_mut(&args[0], |entity| {
            let zset = entity.as_sorted_set_mut()?;
            Ok::<_, CommandError>(args[1..].iter().filter(|member| zset.remove(member)).count())
        })
        .transpose()?
        .unwrap_or(0);
    db.remove_if_empty(&args[0]);
    Ok(RespValue::integer(removed as i64))
}

fn parse_borders(min: &[u8], max: &[u8]) -> Result<(ScoreBorder, ScoreBorder), CommandError> {
    match (ScoreBorder::parse(min), ScoreBorder::parse(max)) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(CommandError::Syntax("min or max is not a float".to_string())),
    }
}

/// ZCOUNT key min max
fn zcount(db: &Database, args: &[Bytes]) -> CommandResult {
    let (min, max) = parse_borders(&args[1], &args[2])?;
    let count = with_zset(db, &args[0], |zset| zset.count(&min, &max))?.unwrap_or(0);
    Ok(RespValue::integer(count as i64))
}

/// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
fn zrangebyscore(db: &Database, args: &[Bytes]) -> CommandResult {
    let (min, max) = parse_borders(&args[1], &args[2])?;

    let mut with_scores = false;
    let mut offset = 0usize;
    let mut limit: Option<usize> = None;
    let mut i = 3;
    while i < args.len() {
        if is_option(&args[i], "withscores") {
            with_scores = true;
            i += 1;
        } else if is_option(&args[i], "limit") && i + 2 < args.len() {
            let raw_offset = parse_int(&args[i + 1])?;
            let raw_count = parse_int(&args[i + 2])?;
            if raw_offset < 0 {
                return Ok(RespValue::array(Vec::new()));
            }
            offset = raw_offset as usize;
            // A negative count means no limit.
            limit = (raw_count >= 0).then_some(raw_count as usize);
            i += 3;
        } else {
            return Err(CommandError::syntax());
        }
    }

    let members = with_zset(db, &args[0], |zset| zset.range_by_score(&min, &max, false))?
        .unwrap_or_default()
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    Ok(members_reply(members, with_scores))
}

#[cfg(test)]
mod tests {
    use super::format_score;
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

    fn list(items: &[&str]) -> Result<RespValue, CommandError> {
        Ok(RespValue::multi_bulk(items.iter().map(|s| s.to_string())))
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(1.0), Bytes::from("1"));
        assert_eq!(format_score(1.5), Bytes::from("1.5"));
        assert_eq!(format_score(-0.25), Bytes::from("-0.25"));
        assert_eq!(format_score(f64::INFINITY), Bytes::from("inf"));
        assert_eq!(format_score(f64::NEG_INFINITY), Bytes::from("-inf"));
        assert_eq!(format_score(-0.0), Bytes::from("0"));
        assert_eq!(format_score(1e16), Bytes::from("10000000000000000"));
        assert_eq!(format_score(1e17), Bytes::from("1e+17"));
        assert_eq!(format_score(1e20), Bytes::from("1e+20"));
        assert_eq!(format_score(-2.5e100), Bytes::from("-2.5e+100"));
        assert_eq!(format_score(0.0001), Bytes::from("0.0001"));
        assert_eq!(format_score(0.00001), Bytes::from("1e-05"));
        assert_eq!(format_score(1.5e-7), Bytes::from("1.5e-07"));
        assert_eq!(
            format_score(1.2345678901234568e20),
            Bytes::from("1.2345678901234568e+20")
        );
    }

    #[test]
    fn test_ties_order_by_member() {
        let db = create_db();
        assert_eq!(
            run(&db, &["ZADD", "z", "1", "a", "1", "b", "1", "aa"]),
            Ok(RespValue::integer(3))
        );
        assert_eq!(run(&db, &["ZRANGE", "z", "0", "-1"]), list(&["a", "aa", "b"]));
        assert_eq!(run(&db, &["ZRANK", "z", "b"]), Ok(RespValue::integer(2)));
        assert_eq!(run(&db, &["ZREVRANK", "z", "b"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["ZRANK", "z", "zz"]), Ok(RespValue::null()));
    }

    #[test]
    fn test_zadd_rescore() {
        let db = create_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b"]).unwrap();
        assert_eq!(run(&db, &["ZADD", "z", "3", "a"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["ZSCORE", "z", "a"]), Ok(RespValue::bulk_string("3")));
        assert_eq!(run(&db, &["ZRANGE", "z", "0", "-1"]), list(&["b", "a"]));
        assert_eq!(run(&db, &["ZCARD", "z"]), Ok(RespValue::integer(2)));
        assert_eq!(run(&db, &["ZSCORE", "z", "zz"]), Ok(RespValue::null()));
    }

    #[test]
    fn test_zadd_validates_all_scores() {
        let db = create_db();
        assert_eq!(
            run(&db, &["ZADD", "z", "1", "a", "x", "b"]),
            Err(CommandError::not_float())
        );
        assert_eq!(run(&db, &["EXISTS", "z"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["ZADD", "z", "1", "a", "2"]), Err(CommandError::syntax()));
    }

    #[test]
    fn test_zincrby() {
        let db = create_db();
        assert_eq!(run(&db, &["ZINCRBY", "z", "2.5", "m"]), Ok(RespValue::bulk_string("2.5")));
        assert_eq!(run(&db, &["ZINCRBY", "z", "-1", "m"]), Ok(RespValue::bulk_string("1.5")));
        run(&db, &["ZADD", "z", "inf", "top"]).unwrap();
        assert!(run(&db, &["ZINCRBY", "z", "-inf", "top"]).is_err());
        assert_eq!(run(&db, &["ZSCORE", "z", "top"]), Ok(RespValue::bulk_string("inf")));
    }

    #[test]
    fn test_ranges_with_scores() {
        let db = create_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]).unwrap();
        assert_eq!(
            run(&db, &["ZRANGE", "z", "0", "1", "WITHSCORES"]),
            list(&["a", "1", "b", "2"])
        );
        assert_eq!(run(&db, &["ZREVRANGE", "z", "0", "1"]), list(&["c", "b"]));
        assert_eq!(run(&db, &["ZREVRANGE", "z", "-1", "-1"]), list(&["a"]));
        assert_eq!(run(&db, &["ZRANGE", "z", "5", "9"]), list(&[]));
        assert_eq!(run(&db, &["ZRANGE", "missing", "0", "-1"]), list(&[]));
        assert_eq!(run(&db, &["ZRANGE", "z", "0", "1", "BOGUS"]), Err(CommandError::syntax()));
    }

    #[test]
    fn test_zrem_removes_empty_set() {
        let db = create_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b"]).unwrap();
        assert_eq!(run(&db, &["ZREM", "z", "a", "zz"]), Ok(RespValue::integer(1)));
        assert_eq!(run(&db, &["ZREM", "z", "b"]), Ok(RespValue::integer(1)));
        assert_eq!(run(&db, &["EXISTS", "z"]), Ok(RespValue::integer(0)));
    }

    #[test]
    fn test_score_borders() {
        let db = create_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).unwrap();
        assert_eq!(run(&db, &["ZCOUNT", "z", "-inf", "+inf"]), Ok(RespValue::integer(4)));
        assert_eq!(run(&db, &["ZCOUNT", "z", "(1", "3"]), Ok(RespValue::integer(2)));
        assert_eq!(run(&db, &["ZCOUNT", "z", "(1", "(2"]), Ok(RespValue::integer(0)));
        assert_eq!(run(&db, &["ZRANGEBYSCORE", "z", "2", "(4"]), list(&["b", "c"]));
        assert_eq!(
            run(&db, &["ZRANGEBYSCORE", "z", "(3", "+inf", "WITHSCORES"]),
            list(&["d", "4"])
        );
        assert_eq!(
            run(&db, &["ZRANGEBYSCORE", "z", "-inf", "+inf", "LIMIT", "1", "2"]),
            list(&["b", "c"])
        );
        assert_eq!(
            run(&db, &["ZCOUNT", "z", "abc", "1"]),
            Err(CommandError::Syntax("min or max is not a float".to_string()))
        );
        assert_eq!(run(&db, &["ZCOUNT", "missing", "0", "1"]), Ok(RespValue::integer(0)));
    }

    #[test]
    fn test_wrong_type() {
        let db = create_db();
        run(&db, &["SET", "s", "v"]).unwrap();
        assert_eq!(run(&db, &["ZADD", "s", "1", "a"]), Err(CommandError::WrongType));
        assert_eq!(run(&db, &["ZSCORE", "s", "a"]), Err(CommandError::WrongType));
    }
}
