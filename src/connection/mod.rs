//! Client Connections
//!
//! The TCP front end: one task per client, each driving a
//! [`Session`](crate::server::Session) against the shared
//! [`Server`](crate::server::Server).
//!
//! ## Example
//!
//! ```ignore
//! use tidekv::config::ServerConfig;
//! use tidekv::connection::{handle_connection, ConnectionStats};
//! use tidekv::Server;
//! use std::sync::Arc;
//!
//! let server = Arc::new(Server::open(ServerConfig::default())?);
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&server), Arc::clone(&stats)));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, StatsSnapshot,
};
