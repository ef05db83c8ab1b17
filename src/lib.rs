//! # TideKV - An In-Memory Multi-Type Key-Value Store
//!
//! TideKV is a Redis-style storage engine: strings, lists, hashes, sets and
//! sorted sets behind a concurrent keyspace, with TTL expiry and an
//! append-only file for durability.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Server                                 │
//! │                                                                      │
//! │  Session ──▶ Database::exec                                          │
//! │               │ lookup + arity   (CommandTable)                      │
//! │               │ key extraction                                       │
//! │               │ lock_keys        (LockManager stripes)               │
//! │               │ handler          (ShardedMap<Entity> + ttl table)    │
//! │               │ version bump + AOF records                           │
//! │               ▼ unlock ──▶ Persister::append                         │
//! │                                                                      │
//! │  TimeWheel task ──▶ expiry job ──▶ lock key, re-check, delete        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use tidekv::config::ServerConfig;
//! use tidekv::{RespValue, Server};
//! use bytes::Bytes;
//!
//! let server = Server::open(ServerConfig::default()).unwrap();
//! let line = |args: &[&str]| args.iter().map(|s| Bytes::from(s.to_string())).collect::<Vec<_>>();
//!
//! server.exec(0, &line(&["ZADD", "board", "10", "ada", "7", "bob"])).unwrap();
//! let top = server.exec(0, &line(&["ZREVRANGE", "board", "0", "0"])).unwrap();
//! assert_eq!(top, RespValue::multi_bulk(["ada"]));
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: sharded maps, lock stripes, value types, time wheel and
//!   the per-database executor
//! - [`commands`]: the command table and every handler
//! - [`aof`]: append-only file writer and replay
//! - [`server`]: database set, `SELECT`, `FLUSHALL`, startup replay
//! - [`protocol`]: RESP values and parser
//! - [`connection`]: the TCP front end
//!
//! ## Expiry
//!
//! Keys with a deadline are removed two ways:
//! 1. **Lazy**: every access checks the deadline first
//! 2. **Active**: the time wheel fires a job at the deadline, which takes the
//!    key's stripe and deletes it if the deadline still holds

pub mod aof;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandTable};
pub use config::ServerConfig;
pub use error::{AofError, CommandError, CommandResult};
pub use protocol::{CmdLine, ParseError, RespParser, RespValue};
pub use server::{Server, Session};
pub use storage::Database;

/// The default port TideKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
