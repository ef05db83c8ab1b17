//! Per-Client Connection Task
//!
//! A connection owns a read buffer and a [`Session`]. Each wakeup drains
//! every complete frame in the buffer, runs them in arrival order and sends
//! all of their replies in a single write:
//!
//! ```text
//!  socket ──read_buf──▶ BytesMut ──decode──▶ frame ──▶ Session::execute
//!     ▲                                                     │
//!     └───────────── write_all(batched replies) ◀───────────┘
//! ```
//!
//! A malformed frame gets one `-ERR Protocol error` reply and the connection
//! is closed, since the stream position can no longer be trusted.

use crate::protocol::{ParseError, RespParser, RespValue};
use crate::server::{Server, Session};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Requests larger than this are refused.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    commands: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// A point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub active: u64,
    pub commands: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: usize) {
        counter.fetch_add(by as u64, Ordering::Relaxed);
    }

    /// Marks a connection open until the returned guard is dropped.
    fn open(self: &Arc<Self>) -> ActiveGuard {
        Self::bump(&self.accepted, 1);
        Self::bump(&self.active, 1);
        ActiveGuard(Arc::clone(self))
    }
}

struct ActiveGuard(Arc<ConnectionStats>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Why a connection ended other than a clean close between requests.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Protocol(#[from] ParseError),

    #[error("client closed the connection mid-request")]
    Truncated,

    #[error("request exceeds {0} bytes")]
    Oversized(usize),
}

impl ConnectionError {
    /// Endings that are the client's business, not worth a warning.
    fn is_benign(&self) -> bool {
        match self {
            ConnectionError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
            ),
            ConnectionError::Truncated => true,
            _ => false,
        }
    }
}

/// One client's connection task.
pub struct ConnectionHandler {
    stream: TcpStream,
    addr: SocketAddr,
    inbound: BytesMut,
    outbound: Vec<u8>,
    parser: RespParser,
    session: Session,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        server: Arc<Server>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            stream,
            addr,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: Vec::new(),
            parser: RespParser::new(),
            session: Session::new(server),
            stats,
        }
    }

    /// Serves the client until it disconnects. `Ok` means a clean close.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let _active = self.stats.open();
        info!(client = %self.addr, "Client connected");

        let result = self.serve().await;
        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(err) if err.is_benign() => debug!(client = %self.addr, error = %err, "Client went away"),
            Err(err) => warn!(client = %self.addr, error = %err, "Connection closed on error"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let outcome = self.execute_buffered();
            self.flush().await?;
            outcome?;

            if !self.fill().await? {
                return if self.inbound.is_empty() {
                    Ok(())
                } else {
                    Err(ConnectionError::Truncated)
                };
            }
        }
    }

    /// Runs every complete frame in the read buffer, queueing the replies.
    fn execute_buffered(&mut self) -> Result<(), ConnectionError> {
        loop {
            let frame = match self.parser.decode(&mut self.inbound) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) => {
                    RespValue::error(format!("ERR Protocol error: {}", err))
                        .serialize_into(&mut self.outbound);
                    return Err(err.into());
                }
            };

            let reply = match frame.into_cmd_line() {
                Some(line) if !line.is_empty() => {
                    trace!(client = %self.addr, db = self.session.db(), argc = line.len(), "command");
                    self.session.execute(&line)
                }
                _ => RespValue::error("ERR Protocol error: expected a command array"),
            };
            ConnectionStats::bump(&self.stats.commands, 1);
            reply.serialize_into(&mut self.outbound);
        }
    }

    /// Reads more bytes. Returns false on end of stream.
    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        if self.inbound.len() >= MAX_REQUEST_BYTES {
            return Err(ConnectionError::Oversized(MAX_REQUEST_BYTES));
        }
        self.inbound.reserve(READ_CHUNK);

        let n = self.stream.read_buf(&mut self.inbound).await?;
        ConnectionStats::bump(&self.stats.bytes_in, n);
        Ok(n > 0)
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        ConnectionStats::bump(&self.stats.bytes_out, self.outbound.len());
        self.stream.write_all(&self.outbound).await?;
        self.outbound.clear();
        Ok(())
    }
}

/// Spawn target for accepted sockets.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: Arc<Server>,
    stats: Arc<ConnectionStats>,
) {
    // Already logged by `run`.
    let _ = ConnectionHandler::new(stream, addr, server, stats).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn spawn_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(
            Server::open(ServerConfig {
                databases: 2,
                ..Default::default()
            })
            .unwrap(),
        );
        let stats = Arc::new(ConnectionStats::new());

        let shared = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    Arc::clone(&server),
                    Arc::clone(&shared),
                ));
            }
        });

        (addr, stats)
    }

    /// Sends `request` and reads exactly `expected.len()` bytes back.
    async fn exchange(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).await.unwrap();
        let mut reply = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut reply))
            .await
            .expect("reply timed out")
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&reply), String::from_utf8_lossy(expected));
    }

    #[tokio::test]
    async fn test_ping() {
        let (addr, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
        exchange(&mut client, b"PING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\ntide\r\n",
            b"+OK\r\n",
        )
        .await;
        exchange(&mut client, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n", b"$4\r\ntide\r\n").await;
    }

    #[tokio::test]
    async fn test_select_is_per_connection() {
        let (addr, _) = spawn_server().await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        exchange(&mut first, b"*2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n", b"+OK\r\n").await;
        exchange(&mut first, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n", b"+OK\r\n").await;

        exchange(&mut second, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
        exchange(&mut first, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n").await;
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection() {
        let (addr, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(
            &mut client,
            b"*1\r\n$4\r\nNOPE\r\n",
            b"-ERR unknown command 'nope'\r\n",
        )
        .await;
        exchange(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_replies_keep_order() {
        let (addr, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
              *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
              *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
              *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let (addr, _) = spawn_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$-5\r\n").await.unwrap();

        let mut reply = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut reply))
            .await
            .expect("connection left open")
            .unwrap();
        assert!(reply.starts_with(b"-ERR Protocol error"));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = spawn_server().await;
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        let open = stats.snapshot();
        assert_eq!(open.accepted, 1);
        assert_eq!(open.active, 1);
        assert_eq!(open.commands, 1);
        assert_eq!(open.bytes_in, 14);
        assert_eq!(open.bytes_out, 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.snapshot().active, 0);
    }
}
