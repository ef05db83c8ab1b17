//! Storage Engine Module
//!
//! The concurrent keyspace and the data structures behind each value type.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                             │
//! │                                                             │
//! │  LockManager ──▶ stripes taken per command                  │
//! │                                                             │
//! │  ShardedMap<Entity>   ShardedMap<SystemTime>   versions     │
//! │        │                                                    │
//! │        ├── String(Bytes)                                    │
//! │        ├── List(PagedList)                                  │
//! │        ├── Hash / Set                                       │
//! │        └── SortedSet(HashMap + SkipList)                    │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ expiry jobs
//!              ┌─────────────┴─────────────┐
//!              │        TimeWheel          │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::config::ServerConfig;
//! use tidekv::storage::Database;
//! use tidekv::RespValue;
//! use bytes::Bytes;
//!
//! let db = Database::standalone(&ServerConfig::default());
//! let line = |args: &[&str]| args.iter().map(|s| Bytes::from(s.to_string())).collect::<Vec<_>>();
//!
//! db.exec(&line(&["SET", "name", "tide"])).unwrap();
//! let value = db.exec(&line(&["GET", "name"])).unwrap();
//! assert_eq!(value, RespValue::bulk_string("tide"));
//! ```

pub mod dict;
pub mod engine;
pub mod entity;
pub mod lock;
pub mod pattern;
pub mod quicklist;
pub mod skiplist;
pub mod sortedset;
pub mod timewheel;

// Re-export commonly used types
pub use dict::ShardedMap;
pub use engine::Database;
pub use entity::Entity;
pub use lock::{KeyLocks, LockManager};
pub use quicklist::PagedList;
pub use skiplist::{ScoreBorder, SkipList};
pub use sortedset::SortedSet;
pub use timewheel::{Job, TimeWheel, TimerHandle};
