//! Append-Only File
//!
//! Every successful mutation is appended to a single log as a RESP array of
//! bulk strings, the same framing clients send commands in. There is no
//! header and no checksum:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n
//! *2\r\n$6\r\nSELECT\r\n$1\r\n1\r\n          <- inserted on db change
//! *3\r\n$3\r\nSET\r\n$1\r\nc\r\n$1\r\n3\r\n
//! ```
//!
//! ## Fsync Policies
//!
//! - `always`: the calling command writes and syncs inline, under a mutex.
//! - `everysec`: records go through a bounded queue to a writer thread,
//!   which syncs at most once per second.
//! - `no`: same queue; the writer only flushes to the OS.
//!
//! ## Replay
//!
//! [`load`] decodes records with the wire parser and hands each one to a
//! callback along with the database index tracked from `SELECT` records. A
//! truncated or malformed tail (a crash mid-write) ends the replay with a
//! warning instead of failing startup.

use crate::config::{AofConfig, FsyncPolicy};
use crate::error::AofError;
use crate::protocol::{CmdLine, RespParser, RespValue};
use bytes::{Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound between two syncs under `everysec`.
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

type Record = (usize, CmdLine);

/// `SELECT <db>`
pub fn select_record(db: usize) -> CmdLine {
    vec![Bytes::from_static(b"SELECT"), Bytes::from(db.to_string())]
}

fn encode(line: &[Bytes]) -> Vec<u8> {
    RespValue::multi_bulk(line.iter().cloned()).serialize()
}

/// The open log file plus the database the last record was written for.
struct LogWriter {
    out: BufWriter<File>,
    current_db: usize,
}

impl LogWriter {
    fn open(path: &Path, current_db: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            current_db,
        })
    }

    fn write(&mut self, db: usize, line: &[Bytes]) -> io::Result<()> {
        if db != self.current_db {
            self.out.write_all(&encode(&select_record(db)))?;
            self.current_db = db;
        }
        self.out.write_all(&encode(line))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()
    }
}

enum Sink {
    Inline(Mutex<Option<LogWriter>>),
    Queued {
        tx: Mutex<Option<SyncSender<Record>>>,
        worker: Mutex<Option<JoinHandle<()>>>,
    },
}

/// Appends mutating commands to the log according to the fsync policy.
pub struct Persister {
    path: PathBuf,
    policy: FsyncPolicy,
    sink: Sink,
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Persister {
    /// Opens the log for appending.
    ///
    /// `current_db` is the database the existing log ends in (as returned by
    /// [`load`]), so the first append does not emit a redundant `SELECT`.
    pub fn open(config: &AofConfig, current_db: usize) -> Result<Self, AofError> {
        let writer = LogWriter::open(&config.path, current_db)?;
        let sink = match config.fsync {
            FsyncPolicy::Always => Sink::Inline(Mutex::new(Some(writer))),
            policy => {
                let (tx, rx) = mpsc::sync_channel(config.queue_capacity.max(1));
                let worker = std::thread::Builder::new()
                    .name("aof-writer".to_string())
                    .spawn(move || run_writer(writer, rx, policy))?;
                Sink::Queued {
                    tx: Mutex::new(Some(tx)),
                    worker: Mutex::new(Some(worker)),
                }
            }
        };

        info!(path = %config.path.display(), fsync = %config.fsync, "Append-only file opened");
        Ok(Self {
            path: config.path.clone(),
            policy: config.fsync,
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Logs `line` as executed against database `db`.
    ///
    /// Under `always` this returns once the record is on disk; otherwise it
    /// returns once the record is queued, blocking only while the queue is full.
    pub fn append(&self, db: usize, line: CmdLine) -> Result<(), AofError> {
        match &self.sink {
            Sink::Inline(writer) => {
                let mut guard = writer.lock().map_err(|_| AofError::Closed)?;
                let writer = guard.as_mut().ok_or(AofError::Closed)?;
                writer.write(db, &line)?;
                writer.sync()?;
                Ok(())
            }
            Sink::Queued { tx, .. } => {
                let sender = tx
                    .lock()
                    .map_err(|_| AofError::Closed)?
                    .clone()
                    .ok_or(AofError::Closed)?;
                sender.send((db, line)).map_err(|_| AofError::Closed)
            }
        }
    }

    /// Drains queued records, stops the writer and syncs the file.
    /// Later appends fail with [`AofError::Closed`].
    pub fn close(&self) -> Result<(), AofError> {
        match &self.sink {
            Sink::Inline(writer) => {
                let taken = writer.lock().map_err(|_| AofError::Closed)?.take();
                if let Some(mut writer) = taken {
                    writer.sync()?;
                }
            }
            Sink::Queued { tx, worker } => {
                // Dropping the sender lets the writer drain and exit.
                drop(tx.lock().map_err(|_| AofError::Closed)?.take());
                let handle = worker.lock().map_err(|_| AofError::Closed)?.take();
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        error!("AOF writer thread panicked");
                    }
                }
            }
        }
        debug!(path = %self.path.display(), "Append-only file closed");
        Ok(())
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "Failed to close append-only file");
        }
    }
}

/// Body of the background writer used by `everysec` and `no`.
///
/// The timed wait on the queue doubles as the once-per-second ticker.
fn run_writer(mut writer: LogWriter, rx: Receiver<Record>, policy: FsyncPolicy) {
    let mut dirty = false;
    let mut last_sync = Instant::now();

    loop {
        match rx.recv_timeout(SYNC_INTERVAL) {
            Ok((db, line)) => {
                if let Err(err) = writer.write(db, &line) {
                    error!(error = %err, "AOF write failed");
                }
                dirty = true;
            }
            Err(RecvTimeoutError::Timeout) => {
                if dirty && policy == FsyncPolicy::No {
                    if let Err(err) = writer.flush() {
                        error!(error = %err, "AOF flush failed");
                    }
                    dirty = false;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if policy == FsyncPolicy::EverySec && dirty && last_sync.elapsed() >= SYNC_INTERVAL {
            if let Err(err) = writer.sync() {
                error!(error = %err, "AOF fsync failed");
            }
            dirty = false;
            last_sync = Instant::now();
        }
    }

    if let Err(err) = writer.sync() {
        error!(error = %err, "AOF final fsync failed");
    }
    debug!("AOF writer stopped");
}

/// Replays the log at `path`, calling `apply(db, line)` for every command
/// record. `SELECT` records only switch the database index.
///
/// Returns the database index in effect at the end of the log. A missing
/// file is an empty log.
pub fn load(path: &Path, mut apply: impl FnMut(usize, CmdLine)) -> Result<usize, AofError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append-only file to replay");
            return Ok(0);
        }
        Err(err) => return Err(err.into()),
    };

    let total = raw.len();
    let mut buf = BytesMut::from(&raw[..]);
    let mut parser = RespParser::new();
    let mut db = 0usize;
    let mut replayed = 0usize;

    while !buf.is_empty() {
        let offset = total - buf.len();
        if buf[0] != b'*' {
            warn!(offset, "Malformed record in append-only file, ignoring the rest");
            break;
        }
        let value = match parser.decode(&mut buf) {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!(offset, "Truncated record at end of append-only file, ignoring it");
                break;
            }
            Err(err) => {
                warn!(offset, error = %err, "Malformed record in append-only file, ignoring the rest");
                break;
            }
        };
        let Some(line) = value.into_cmd_line() else {
            warn!(offset, "Non-command record in append-only file, ignoring the rest");
            break;
        };

        if line.len() == 2 && line[0].eq_ignore_ascii_case(b"select") {
            match std::str::from_utf8(&line[1]).ok().and_then(|s| s.parse().ok()) {
                Some(index) => db = index,
                None => {
                    warn!(offset, "Invalid SELECT record in append-only file, ignoring the rest");
                    break;
                }
            }
        } else {
            apply(db, line);
            replayed += 1;
        }
    }

    info!(path = %path.display(), records = replayed, "Append-only file replayed");
    Ok(db)
}
