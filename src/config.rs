//! Engine Configuration
//!
//! All tunables live here with the defaults the server starts with. The
//! binary fills these in from command-line flags; tests build them directly
//! with struct update syntax (`ServerConfig { databases: 2, ..Default::default() }`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration for a [`Server`](crate::server::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host the TCP front end binds to
    pub host: String,

    /// Port the TCP front end listens on
    pub port: u16,

    /// Number of independent keyspaces reachable through SELECT
    pub databases: usize,

    /// Shard count of each database's data table (rounded up to a power of two)
    pub data_shards: usize,

    /// Shard count of the ttl and version tables
    pub ttl_shards: usize,

    /// Number of reader-writer lock stripes per database
    pub lock_stripes: usize,

    /// Capacity of a single page in the list type
    pub list_page_size: usize,

    /// Expiration scheduler settings
    pub timewheel: TimeWheelConfig,

    /// Append-only file settings
    pub aof: AofConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            databases: 16,
            data_shards: 256,
            ttl_shards: 64,
            lock_stripes: 1024,
            list_page_size: 1024,
            timewheel: TimeWheelConfig::default(),
            aof: AofConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the hierarchical time wheel.
#[derive(Debug, Clone)]
pub struct TimeWheelConfig {
    /// Duration of one slot (the tick period)
    pub interval: Duration,

    /// Number of slots in one revolution
    pub slots: usize,
}

impl Default for TimeWheelConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            slots: 3600,
        }
    }
}

/// Configuration for the append-only file.
#[derive(Debug, Clone)]
pub struct AofConfig {
    /// Replay on startup and log mutating commands
    pub enabled: bool,

    /// Location of the log file
    pub path: PathBuf,

    /// When written records are forced to disk
    pub fsync: FsyncPolicy,

    /// Bound of the background writer queue (`everysec` and `no` only)
    pub queue_capacity: usize,
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("appendonly.aof"),
            fsync: FsyncPolicy::EverySec,
            queue_capacity: 1 << 16,
        }
    }
}

/// Fsync policies for the append-only file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Write and fsync inline with every command
    Always,
    /// Queue writes; fsync once per second
    EverySec,
    /// Queue writes; leave flushing to the OS
    No,
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" => Ok(FsyncPolicy::EverySec),
            "no" => Ok(FsyncPolicy::No),
            other => Err(format!("invalid appendfsync policy '{}'", other)),
        }
    }
}

impl fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::EverySec => "everysec",
            FsyncPolicy::No => "no",
        };
        f.write_str(name)
    }
}
