//! Server Assembly
//!
//! A [`Server`] owns everything the databases share: the command table, the
//! time wheel and the append-only file. Startup order matters:
//!
//! 1. build the databases (AOF not yet attached)
//! 2. replay the log through the normal executor
//! 3. open the log for appending and attach it to every database
//!
//! so replayed commands are never logged a second time.
//!
//! A [`Session`] is one client's view of the server: the currently selected
//! database plus the connection-level `SELECT` command.

use crate::aof::{self, Persister};
use crate::commands::{command_name, parse_int, CommandTable};
use crate::config::ServerConfig;
use crate::error::{AofError, CommandError, CommandResult};
use crate::protocol::{CmdLine, RespValue};
use crate::storage::{Database, TimeWheel};
use bytes::Bytes;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The set of numbered databases plus their shared services.
pub struct Server {
    config: ServerConfig,
    commands: Arc<CommandTable>,
    databases: Vec<Arc<Database>>,
    timewheel: TimeWheel,
    aof: Option<Arc<Persister>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("databases", &self.databases.len())
            .field("commands", &self.commands.len())
            .field("aof", &self.aof)
            .finish()
    }
}

impl Server {
    /// Builds the databases and, when enabled, replays and attaches the AOF.
    ///
    /// Active expiry needs a tokio runtime; without one, keys still expire
    /// lazily on access.
    pub fn open(config: ServerConfig) -> Result<Self, AofError> {
        let commands = Arc::new(CommandTable::standard());
        let timewheel = TimeWheel::start(&config.timewheel);
        let databases = (0..config.databases.max(1))
            .map(|index| {
                Database::new(index, &config, Arc::clone(&commands), timewheel.handle())
            })
            .collect();

        let mut server = Self {
            config,
            commands,
            databases,
            timewheel,
            aof: None,
        };

        if server.config.aof.enabled {
            let last_db = aof::load(&server.config.aof.path, |db, line| server.replay(db, line))?;
            let persister = Arc::new(Persister::open(&server.config.aof, last_db)?);
            for db in &server.databases {
                db.attach_aof(Arc::clone(&persister));
            }
            info!(
                path = %persister.path().display(),
                fsync = ?persister.policy(),
                resume_db = last_db,
                "AOF attached"
            );
            server.aof = Some(persister);
        }

        info!(
            databases = server.databases.len(),
            commands = server.commands.len(),
            aof = server.aof.is_some(),
            "Server ready"
        );
        Ok(server)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    pub fn database(&self, index: usize) -> Option<&Arc<Database>> {
        self.databases.get(index)
    }

    fn replay(&self, db: usize, line: CmdLine) {
        if db >= self.databases.len() {
            warn!(db, "AOF record targets a missing database, skipping");
            return;
        }
        if let Err(err) = self.exec(db, &line) {
            debug!(db, error = %err, "AOF record failed on replay");
        }
    }

    /// Executes one command line against database `db`.
    ///
    /// A panicking handler is turned into an error reply; its stripes are
    /// released during unwinding.
    pub fn exec(&self, db: usize, line: &[Bytes]) -> CommandResult {
        let database = self.databases.get(db).ok_or_else(db_out_of_range)?;

        if line
            .first()
            .is_some_and(|name| name.eq_ignore_ascii_case(b"flushall"))
        {
            return self.flush_all(db, line);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| database.exec(line))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let name = line.first().map(|raw| command_name(raw)).unwrap_or_default();
                error!(db, command = %name, panic = %message, "Command panicked");
                Err(CommandError::Unknown(message))
            }
        }
    }

    /// FLUSHALL: clears every database and logs a single record.
    fn flush_all(&self, db: usize, line: &[Bytes]) -> CommandResult {
        if line.len() != 1 {
            return Err(CommandError::WrongArity("flushall".to_string()));
        }
        for database in &self.databases {
            database.flush();
        }
        if let Some(persister) = &self.aof {
            if let Err(err) = persister.append(db, vec![Bytes::from_static(b"FLUSHALL")]) {
                warn!(error = %err, "Failed to append to AOF");
            }
        }
        Ok(RespValue::ok())
    }

    /// Validates a `SELECT` argument.
    pub fn select(&self, raw: &[u8]) -> Result<usize, CommandError> {
        let index = parse_int(raw)
            .map_err(|_| CommandError::Syntax("invalid DB index".to_string()))?;
        usize::try_from(index)
            .ok()
            .filter(|&index| index < self.databases.len())
            .ok_or_else(db_out_of_range)
    }

    /// Stops the time wheel and drains and closes the AOF.
    pub fn shutdown(&self) -> Result<(), AofError> {
        self.timewheel.stop();
        if let Some(persister) = &self.aof {
            persister.close()?;
        }
        info!("Server shut down");
        Ok(())
    }
}

fn db_out_of_range() -> CommandError {
    CommandError::OutOfRange("DB index is out of range".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}

/// One client's view of a [`Server`].
#[derive(Debug, Clone)]
pub struct Session {
    server: Arc<Server>,
    db: usize,
}

impl Session {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server, db: 0 }
    }

    /// The currently selected database.
    pub fn db(&self) -> usize {
        self.db
    }

    /// Executes a command line, handling `SELECT` locally. Errors become
    /// error replies.
    pub fn execute(&mut self, line: &[Bytes]) -> RespValue {
        let result = match line.first() {
            Some(name) if name.eq_ignore_ascii_case(b"select") => self.select(line),
            _ => self.server.exec(self.db, line),
        };
        result.unwrap_or_else(CommandError::into_reply)
    }

    fn select(&mut self, line: &[Bytes]) -> CommandResult {
        if line.len() != 2 {
            return Err(CommandError::WrongArity("select".to_string()));
        }
        self.db = self.server.select(&line[1])?;
        Ok(RespValue::ok())
    }
}
