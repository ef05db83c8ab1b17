//! Per-Database Keyspace and Command Executor
//!
//! A [`Database`] owns three parallel tables sharing key identity:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Database                            │
//! │                                                              │
//! │   data:     ShardedMap<Entity>     key → value               │
//! │   ttl:      ShardedMap<SystemTime> key → absolute deadline    │
//! │   versions: ShardedMap<u64>        key → mutation counter    │
//! │                                                              │
//! │   locker:   LockManager            key → lock stripe         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking Contract
//!
//! The keyspace methods assume the caller holds the key's lock stripe; the
//! shard locks inside each table only protect raw map access. Commands get
//! their stripes from [`Database::exec`]. The one path that runs outside a
//! command, the expiry job, takes the stripe itself.
//!
//! ## Expiry
//!
//! Deadlines are wall-clock instants so they can be logged as `PEXPIREAT`.
//! Two mechanisms converge on the same "remove if deadline ≤ now" check:
//!
//! 1. **Lazy**: every entity access first checks the ttl table.
//! 2. **Active**: [`Database::expire`] schedules a time wheel job that locks
//!    the key, re-reads the deadline and only then deletes. A deadline that
//!    moved later in the meantime survives; the job reschedules itself.

use crate::aof::Persister;
use crate::commands::{command_name, CommandTable};
use crate::config::ServerConfig;
use crate::error::{CommandError, CommandResult};
use crate::protocol::CmdLine;
use crate::storage::dict::ShardedMap;
use crate::storage::entity::Entity;
use crate::storage::lock::{KeyLocks, LockManager};
use crate::storage::pattern::GlobPattern;
use crate::storage::timewheel::TimerHandle;
use bytes::{Bytes, BytesMut};
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Redraws allowed when a random sample lands on expired keys.
const SAMPLE_ROUNDS: usize = 8;

/// One keyspace, addressed by index through `SELECT`.
pub struct Database {
    index: usize,
    data: ShardedMap<Entity>,
    ttl: ShardedMap<SystemTime>,
    versions: ShardedMap<u64>,
    locker: LockManager,
    commands: Arc<CommandTable>,
    timer: TimerHandle,
    list_page_size: usize,
    aof: OnceLock<Arc<Persister>>,
    this: Weak<Database>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("index", &self.index)
            .field("keys", &self.data.len())
            .field("expiring", &self.ttl.len())
            .finish()
    }
}

impl Database {
    pub fn new(
        index: usize,
        config: &ServerConfig,
        commands: Arc<CommandTable>,
        timer: TimerHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            data: ShardedMap::new(config.data_shards),
            ttl: ShardedMap::new(config.ttl_shards),
            versions: ShardedMap::new(config.ttl_shards),
            locker: LockManager::new(config.lock_stripes),
            commands,
            timer,
            list_page_size: config.list_page_size,
            aof: OnceLock::new(),
            this: this.clone(),
        })
    }

    /// A standalone database with the full command set and no active expiry.
    pub fn standalone(config: &ServerConfig) -> Arc<Self> {
        Self::new(
            0,
            config,
            Arc::new(CommandTable::standard()),
            TimerHandle::detached(),
        )
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Page capacity for newly created lists.
    pub fn list_page_size(&self) -> usize {
        self.list_page_size
    }

    /// Starts logging successful mutations. Only the first call has effect.
    pub fn attach_aof(&self, persister: Arc<Persister>) {
        let _ = self.aof.set(persister);
    }

    // ========================================================================
    // Executor
    // ========================================================================

    /// Executes one command line against this database.
    pub fn exec(&self, line: &[Bytes]) -> CommandResult {
        let name = match line.first() {
            Some(raw) => command_name(raw),
            None => return Err(CommandError::UnknownCommand(String::new())),
        };
        let command = self
            .commands
            .get(&name)
            .ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;
        command.check_arity(line.len())?;

        let args = &line[1..];
        let (write_keys, read_keys) = (command.keys)(args);
        let locks = self.lock_keys(&write_keys, &read_keys);

        let reply = (command.handler)(self, args)?;

        let mut records: Vec<CmdLine> = Vec::new();
        if command.is_write() {
            for key in &write_keys {
                self.bump_version(key);
            }
            if self.aof.get().is_some() {
                records = (command.aof)(self, line, &reply);
            }
        }

        // Records go out before the stripes are released so the log keeps
        // the order in which writers to the same key completed.
        if let Some(persister) = self.aof.get() {
            for record in records {
                if let Err(err) = persister.append(self.index, record) {
                    warn!(db = self.index, error = %err, "Failed to append to AOF");
                }
            }
        }
        drop(locks);

        trace!(db = self.index, command = %name, "executed");
        Ok(reply)
    }

    /// Locks write keys exclusively and read keys shared.
    pub fn lock_keys(&self, write_keys: &[Bytes], read_keys: &[Bytes]) -> KeyLocks<'_> {
        self.locker.lock_keys(write_keys, read_keys)
    }

    /// Releases locks taken by [`lock_keys`](Self::lock_keys).
    pub fn unlock_keys(&self, locks: KeyLocks<'_>) {
        self.locker.unlock_keys(locks);
    }

    // ========================================================================
    // Entity access (caller holds the key's stripe)
    // ========================================================================

    /// Runs `f` on the live entity under `key`.
    pub fn get_entity<R>(&self, key: &[u8], f: impl FnOnce(&Entity) -> R) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.with(key, f)
    }

    /// Runs `f` on the live entity under `key`, mutably.
    pub fn get_entity_mut<R>(&self, key: &[u8], f: impl FnOnce(&mut Entity) -> R) -> Option<R> {
        if self.is_expired(key) {
            return None;
        }
        self.data.with_mut(key, f)
    }

    /// Runs `f` on the entity under `key`, creating it with `default` first.
    pub fn entity_or_insert_with<R>(
        &self,
        key: &Bytes,
        default: impl FnOnce() -> Entity,
        f: impl FnOnce(&mut Entity) -> R,
    ) -> R {
        self.is_expired(key);
        self.data.with_or_insert(key, default, f)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        !self.is_expired(key) && self.data.contains_key(key)
    }

    /// Stores `entity`, returning 1 if the key is new. Any deadline is kept.
    pub fn put_entity(&self, key: Bytes, entity: Entity) -> usize {
        self.is_expired(&key);
        self.data.put(key, entity)
    }

    /// Stores `entity` only if the key is absent. A fresh key starts
    /// without a deadline even if a stale one was left behind.
    pub fn put_if_absent(&self, key: Bytes, entity: Entity) -> usize {
        self.is_expired(&key);
        let inserted = self.data.put_if_absent(key.clone(), entity);
        if inserted == 1 && self.ttl.remove(&key).is_some() {
            self.timer.remove(self.timer_key(&key));
        }
        inserted
    }

    pub fn put_if_exists(&self, key: Bytes, entity: Entity) -> usize {
        if self.is_expired(&key) {
            return 0;
        }
        self.data.put_if_exists(key, entity)
    }

    /// Removes the key, its deadline and any scheduled expiry job.
    /// Returns the entity if one was live.
    pub fn take(&self, key: &[u8]) -> Option<Entity> {
        let expired = self.is_expired(key);
        let entity = self.data.remove(key);
        if self.ttl.remove(key).is_some() {
            self.timer.remove(self.timer_key(key));
        }
        if expired {
            None
        } else {
            entity
        }
    }

    /// Removes the key. Returns true if it was live.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.take(key).is_some()
    }

    /// Removes every key in `keys`, returning how many were live.
    pub fn remove_all(&self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Drops the key if it holds a collection with no elements left.
    pub fn remove_if_empty(&self, key: &[u8]) {
        if self
            .data
            .with(key, Entity::is_empty_collection)
            .unwrap_or(false)
        {
            self.remove(key);
        }
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Sets the deadline of an existing key and schedules its expiry job.
    pub fn expire(&self, key: &Bytes, at: SystemTime) {
        self.ttl.put(key.clone(), at);
        self.schedule_expiry(key, at);
    }

    /// Clears the deadline. Returns true if there was one.
    pub fn persist(&self, key: &[u8]) -> bool {
        if self.ttl.remove(key).is_some() {
            self.timer.remove(self.timer_key(key));
            true
        } else {
            false
        }
    }

    /// The key's deadline, if it has one.
    pub fn expire_time(&self, key: &[u8]) -> Option<SystemTime> {
        self.ttl.get(key)
    }

    /// Checks the deadline and deletes the key if it has passed.
    pub fn is_expired(&self, key: &[u8]) -> bool {
        let expired = self
            .ttl
            .with(key, |at| *at <= SystemTime::now())
            .unwrap_or(false);
        if expired {
            self.data.remove(key);
            self.ttl.remove(key);
            self.timer.remove(self.timer_key(key));
            trace!(db = self.index, key = ?key, "lazily expired");
        }
        expired
    }

    /// Identity of the key's task in the shared time wheel.
    fn timer_key(&self, key: &[u8]) -> Bytes {
        let prefix = self.index.to_string();
        let mut id = BytesMut::with_capacity(prefix.len() + 1 + key.len());
        id.extend_from_slice(prefix.as_bytes());
        id.extend_from_slice(b":");
        id.extend_from_slice(key);
        id.freeze()
    }

    fn schedule_expiry(&self, key: &Bytes, at: SystemTime) {
        let this = self.this.clone();
        let target = key.clone();
        self.timer.add_at(
            self.timer_key(key),
            at,
            Box::new(move || {
                if let Some(db) = this.upgrade() {
                    db.expire_if_due(&target);
                }
            }),
        );
    }

    /// Expiry job body: re-validates the deadline under the key's lock.
    fn expire_if_due(&self, key: &Bytes) {
        let _guard = self.locker.lock(key);
        match self.ttl.get(key) {
            Some(at) if at <= SystemTime::now() => {
                self.data.remove(key);
                self.ttl.remove(key);
                debug!(db = self.index, key = ?key, "expired");
            }
            // Fired early or the deadline moved: try again later.
            Some(at) => self.schedule_expiry(key, at),
            None => {}
        }
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Increments the key's mutation counter, returning the new value.
    pub fn bump_version(&self, key: &Bytes) -> u64 {
        self.versions.with_or_insert(key, || 0, |version| {
            *version += 1;
            *version
        })
    }

    /// The key's mutation counter (0 if never written).
    pub fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).unwrap_or(0)
    }

    // ========================================================================
    // Whole-database operations
    // ========================================================================

    /// Number of keys, including ones past their deadline but not yet removed.
    pub fn key_count(&self) -> usize {
        self.data.len()
    }

    /// Live keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let pattern = GlobPattern::new(pattern);
        let now = SystemTime::now();
        let mut result = Vec::new();
        self.data.for_each(|key, _| {
            let live = self.ttl.with(key, |at| *at > now).unwrap_or(true);
            if live && (pattern.matches_all() || pattern.matches(key)) {
                result.push(key.clone());
            }
            true
        });
        result
    }

    /// Samples `n` live keys with replacement.
    ///
    /// Keys past their deadline are skipped and the sample is redrawn, up to
    /// [`SAMPLE_ROUNDS`] times. A keyspace made up mostly of expired keys can
    /// therefore return fewer than `n`.
    pub fn random_keys(&self, n: usize) -> Vec<Bytes> {
        let mut result = Vec::with_capacity(n);
        for _ in 0..SAMPLE_ROUNDS {
            let missing = n - result.len();
            if missing == 0 {
                break;
            }
            let sample = self.data.random_keys(missing);
            if sample.is_empty() {
                break;
            }
            let now = SystemTime::now();
            result.extend(sample.into_iter().filter(|key| self.is_live(key, now)));
        }
        result
    }

    /// Samples up to `n` distinct live keys.
    pub fn random_distinct_keys(&self, n: usize) -> Vec<Bytes> {
        let now = SystemTime::now();
        let mut result = self.data.random_distinct_keys(n);
        result.retain(|key| self.is_live(key, now));
        result
    }

    /// True if `key` is stored and its deadline (if any) is after `now`.
    fn is_live(&self, key: &[u8], now: SystemTime) -> bool {
        self.data.contains_key(key) && self.ttl.with(key, |at| *at > now).unwrap_or(true)
    }

    /// Removes every key. Pending expiry jobs find no deadline and do nothing.
    ///
    /// Mutation counters survive and are bumped for every flushed key, so a
    /// counter never repeats a value it held before the flush.
    pub fn flush(&self) {
        let mut flushed = Vec::with_capacity(self.data.len());
        self.data.for_each(|key, _| {
            flushed.push(key.clone());
            true
        });
        self.data.clear();
        self.ttl.clear();
        for key in &flushed {
            self.bump_version(key);
        }
        debug!(db = self.index, keys = flushed.len(), "flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;
    use crate::storage::timewheel::TimeWheel;
    use std::thread;
    use std::time::Duration;

    fn create_db() -> Arc<Database> {
        Database::standalone(&ServerConfig::default())
    }

    fn cmd(args: &[&str]) -> Vec<Bytes> {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    // ========================================================================
    // Executor
    // ========================================================================

    #[test]
    fn test_exec_set_get() {
        let db = create_db();
        assert_eq!(db.exec(&cmd(&["SET", "key", "value"])), Ok(RespValue::ok()));
        assert_eq!(db.exec(&cmd(&["get", "key"])), Ok(bulk("value")));
        assert_eq!(db.exec(&cmd(&["GET", "missing"])), Ok(RespValue::null()));
    }

    #[test]
    fn test_exec_rejects_unknown_and_bad_arity() {
        let db = create_db();
        assert_eq!(
            db.exec(&cmd(&["NOPE"])),
            Err(CommandError::UnknownCommand("nope".to_string()))
        );
        assert_eq!(
            db.exec(&cmd(&["GET"])),
            Err(CommandError::WrongArity("get".to_string()))
        );
        assert_eq!(
            db.exec(&[]),
            Err(CommandError::UnknownCommand(String::new()))
        );
    }

    #[test]
    fn test_exec_releases_locks_on_error() {
        let db = create_db();
        db.exec(&cmd(&["LPUSH", "l", "a"])).unwrap();
        assert_eq!(db.exec(&cmd(&["GET", "l"])), Err(CommandError::WrongType));
        // Would deadlock if the failed command kept its stripe.
        assert_eq!(db.exec(&cmd(&["SET", "l", "v"])), Ok(RespValue::ok()));
    }

    #[test]
    fn test_versions_bump_on_successful_writes() {
        let db = create_db();
        assert_eq!(db.version(b"k"), 0);
        db.exec(&cmd(&["SET", "k", "1"])).unwrap();
        db.exec(&cmd(&["INCR", "k"])).unwrap();
        assert_eq!(db.version(b"k"), 2);

        db.exec(&cmd(&["GET", "k"])).unwrap();
        assert_eq!(db.version(b"k"), 2);

        db.exec(&cmd(&["LPUSH", "k", "x"])).unwrap_err();
        assert_eq!(db.version(b"k"), 2);
    }

    #[test]
    fn test_concurrent_incr_is_atomic() {
        let db = create_db();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for _ in 0..250 {
                        db.exec(&cmd(&["INCR", "counter"])).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(db.exec(&cmd(&["GET", "counter"])), Ok(bulk("2000")));
    }

    #[test]
    fn test_concurrent_mset_keeps_pairs_consistent() {
        let db = create_db();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    let value = t.to_string();
                    for _ in 0..200 {
                        db.exec(&cmd(&["MSET", "a", value.as_str(), "b", value.as_str()]))
                            .unwrap();
                        let reply = db.exec(&cmd(&["MGET", "a", "b"])).unwrap();
                        if let RespValue::Array(items) = reply {
                            assert_eq!(items.len(), 2);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let reply = db.exec(&cmd(&["MGET", "a", "b"])).unwrap();
        match reply {
            RespValue::Array(items) => assert_eq!(items[0], items[1]),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    // ========================================================================
    // Keyspace primitives
    // ========================================================================

    #[test]
    fn test_put_and_remove() {
        let db = create_db();
        let key = Bytes::from("k");
        assert_eq!(db.put_if_exists(key.clone(), Entity::String(Bytes::from("x"))), 0);
        assert_eq!(db.put_entity(key.clone(), Entity::String(Bytes::from("1"))), 1);
        assert_eq!(db.put_entity(key.clone(), Entity::String(Bytes::from("2"))), 0);
        assert_eq!(db.put_if_absent(key.clone(), Entity::String(Bytes::from("3"))), 0);
        assert_eq!(db.key_count(), 1);

        let value = db.get_entity(&key, |e| e.as_string().cloned());
        assert_eq!(value, Some(Ok(Bytes::from("2"))));

        assert!(db.remove(&key));
        assert!(!db.remove(&key));
        assert_eq!(db.key_count(), 0);
    }

    #[test]
    fn test_lazy_expiry_hides_and_deletes() {
        let db = create_db();
        let key = Bytes::from("k");
        db.put_entity(key.clone(), Entity::String(Bytes::from("v")));
        db.expire(&key, SystemTime::now() - Duration::from_secs(1));

        assert!(db.get_entity(&key, |_| ()).is_none());
        assert_eq!(db.key_count(), 0);
        assert_eq!(db.expire_time(&key), None);
    }

    #[test]
    fn test_ttl_via_commands() {
        let db = create_db();
        db.exec(&cmd(&["SET", "k", "v"])).unwrap();
        assert_eq!(db.exec(&cmd(&["TTL", "k"])), Ok(RespValue::integer(-1)));
        assert_eq!(db.exec(&cmd(&["TTL", "none"])), Ok(RespValue::integer(-2)));

        db.exec(&cmd(&["PEXPIRE", "k", "50"])).unwrap();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(db.exec(&cmd(&["GET", "k"])), Ok(RespValue::null()));
        assert_eq!(db.exec(&cmd(&["EXISTS", "k"])), Ok(RespValue::integer(0)));
    }

    #[test]
    fn test_keys_skips_expired() {
        let db = create_db();
        for name in ["user:1", "user:2", "order:1"] {
            db.exec(&cmd(&["SET", name, "v"])).unwrap();
        }
        db.expire(&Bytes::from("user:2"), SystemTime::now() - Duration::from_secs(1));

        let mut keys = db.keys(b"user:*");
        keys.sort();
        assert_eq!(keys, vec![Bytes::from("user:1")]);
        assert_eq!(db.keys(b"*").len(), 2);
    }

    #[test]
    fn test_flush() {
        let db = create_db();
        for i in 0..10 {
            db.exec(&cmd(&["SET", format!("k{}", i).as_str(), "v"])).unwrap();
        }
        db.expire(&Bytes::from("k1"), SystemTime::now() + Duration::from_secs(60));
        db.flush();
        assert_eq!(db.key_count(), 0);
        assert_eq!(db.expire_time(b"k1"), None);
    }

    #[test]
    fn test_random_sampling() {
        let db = create_db();
        assert!(db.random_keys(4).is_empty());
        for i in 0..5 {
            db.exec(&cmd(&["SET", format!("k{}", i).as_str(), "v"])).unwrap();
        }
        assert_eq!(db.random_keys(8).len(), 8);

        let mut distinct = db.random_distinct_keys(8);
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 5);
    }

    #[test]
    fn test_random_sampling_skips_expired_keys() {
        let db = create_db();
        db.exec(&cmd(&["SET", "gone", "v"])).unwrap();
        db.expire(&Bytes::from("gone"), SystemTime::now() - Duration::from_secs(1));
        assert!(db.random_keys(4).is_empty());
        assert!(db.random_distinct_keys(4).is_empty());

        db.exec(&cmd(&["SET", "live", "v"])).unwrap();
        let sample = db.random_keys(4);
        assert_eq!(sample.len(), 4);
        assert!(sample.iter().all(|key| key == "live"));
        assert_eq!(db.random_distinct_keys(4), vec![Bytes::from("live")]);
    }

    #[test]
    fn test_flush_never_rewinds_versions() {
        let db = create_db();
        db.exec(&cmd(&["SET", "k", "1"])).unwrap();
        db.exec(&cmd(&["SET", "k", "2"])).unwrap();
        assert_eq!(db.version(b"k"), 2);

        db.flush();
        assert_eq!(db.version(b"k"), 3);

        db.exec(&cmd(&["SET", "k", "1"])).unwrap();
        db.exec(&cmd(&["SET", "k", "2"])).unwrap();
        assert_eq!(db.version(b"k"), 5);
    }

    #[test]
    fn test_put_if_absent_drops_stale_deadline() {
        let db = create_db();
        let key = Bytes::from("k");
        db.ttl.put(key.clone(), SystemTime::now() + Duration::from_secs(60));

        assert_eq!(db.exec(&cmd(&["SETNX", "k", "v"])), Ok(RespValue::integer(1)));
        assert_eq!(db.expire_time(b"k"), None);
        assert_eq!(db.exec(&cmd(&["TTL", "k"])), Ok(RespValue::integer(-1)));
    }

    #[test]
    fn test_manual_locks_block_exec_until_released() {
        let db = create_db();
        let key = Bytes::from("k");
        let locks = db.lock_keys(std::slice::from_ref(&key), &[]);

        let writer = {
            let db = Arc::clone(&db);
            thread::spawn(move || db.exec(&cmd(&["SET", "k", "late"])).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        db.put_entity(key.clone(), Entity::String(Bytes::from("early")));
        db.unlock_keys(locks);

        writer.join().unwrap();
        assert_eq!(db.exec(&cmd(&["GET", "k"])), Ok(bulk("late")));
    }

    // ========================================================================
    // Active expiry
    // ========================================================================

    fn db_with_wheel(wheel: &TimeWheel) -> Arc<Database> {
        Database::new(
            0,
            &ServerConfig::default(),
            Arc::new(CommandTable::standard()),
            wheel.handle(),
        )
    }

    fn fast_wheel() -> TimeWheel {
        TimeWheel::start(&crate::config::TimeWheelConfig {
            interval: Duration::from_millis(10),
            slots: 64,
        })
    }

    #[tokio::test]
    async fn test_active_expiry_removes_untouched_key() {
        let wheel = fast_wheel();
        let db = db_with_wheel(&wheel);
        db.exec(&cmd(&["SET", "k", "v", "PX", "50"])).unwrap();
        assert_eq!(db.key_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        // Removed without any read touching it.
        assert_eq!(db.key_count(), 0);
    }

    #[tokio::test]
    async fn test_extended_deadline_survives_original_timer() {
        let wheel = fast_wheel();
        let db = db_with_wheel(&wheel);
        db.exec(&cmd(&["SET", "k", "v"])).unwrap();
        db.exec(&cmd(&["PEXPIRE", "k", "50"])).unwrap();
        db.exec(&cmd(&["PEXPIRE", "k", "10000"])).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(db.key_count(), 1);
        assert_eq!(db.exec(&cmd(&["GET", "k"])), Ok(bulk("v")));
    }

    #[tokio::test]
    async fn test_expiry_job_rechecks_deadline() {
        let wheel = fast_wheel();
        let db = db_with_wheel(&wheel);
        let key = Bytes::from("k");
        db.put_entity(key.clone(), Entity::String(Bytes::from("v")));
        db.expire(&key, SystemTime::now() + Duration::from_millis(30));
        // Move the deadline without going through the wheel, as a racing
        // EXPIRE would between the job firing and taking the lock.
        db.ttl.put(key.clone(), SystemTime::now() + Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(db.exists(&key));
    }
}
