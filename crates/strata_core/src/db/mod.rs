//! Storage session bootstrap and per-dialect storage conventions.
//!
//! # Responsibility
//! - Open and configure SQLite sessions for the persistence core.
//! - Own the dialect strategy: column types, default generators and
//!   concurrency-token mapping.
//! - Create entity tables from their type configuration.
//!
//! # Invariants
//! - Dialect differences never leak past `Dialect`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod dialect;
mod open;
pub mod schema;

pub use dialect::{Dialect, GlobalIdStrategy, TokenStrategy};
pub use open::{open_session, open_session_in_memory, SessionTarget};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    InvalidConnectionString(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidConnectionString(message) => {
                write!(f, "invalid connection string: {message}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidConnectionString(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
