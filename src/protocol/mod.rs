//! RESP Protocol Implementation
//!
//! The engine only needs RESP in two places: replies handed back by the
//! executor, and records in the append-only file (a command line framed as an
//! array of bulk strings). The thin TCP front end reuses the same codec.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` enum and serialization
//! - `parser`: Incremental decoder over a `BytesMut` buffer

pub mod parser;
pub mod types;

pub use parser::{ParseError, ParseResult, RespParser};
pub use types::{CmdLine, RespValue};
