//! Session bootstrap utilities.
//!
//! # Responsibility
//! - Turn a resolved connection string into an open SQLite session.
//! - Configure connection pragmas required by the persistence core.
//!
//! # Invariants
//! - Returned sessions have `foreign_keys=ON` and a busy timeout.
//! - Connection strings never reach the log; only the session mode does.

use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const MEMORY_TARGET: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a session lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Memory,
    File(PathBuf),
}

impl SessionTarget {
    /// Parses `:memory:`, a bare path, or `Data Source=<path>` /
    /// `Filename=<path>` key-value connection strings.
    pub fn parse(connection_string: &str) -> DbResult<Self> {
        let trimmed = connection_string.trim();
        if trimmed.is_empty() {
            return Err(DbError::InvalidConnectionString(
                "connection string must not be empty".to_string(),
            ));
        }

        let location = if trimmed.contains('=') {
            data_source_value(trimmed).ok_or_else(|| {
                DbError::InvalidConnectionString(
                    "expected a `Data Source` or `Filename` entry".to_string(),
                )
            })?
        } else {
            trimmed
        };

        if location.eq_ignore_ascii_case(MEMORY_TARGET) {
            return Ok(Self::Memory);
        }
        Ok(Self::File(PathBuf::from(location)))
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
        }
    }
}

fn data_source_value(connection_string: &str) -> Option<&str> {
    connection_string
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| {
            let key = key.trim();
            key.eq_ignore_ascii_case("data source") || key.eq_ignore_ascii_case("filename")
        })
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Opens a session for a resolved connection string.
///
/// # Side effects
/// - Creates the database file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_session(connection_string: &str) -> DbResult<Connection> {
    let target = SessionTarget::parse(connection_string)?;
    open_target(&target)
}

/// Opens a private in-memory session.
pub fn open_session_in_memory() -> DbResult<Connection> {
    open_target(&SessionTarget::Memory)
}

fn open_target(target: &SessionTarget) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match target {
        SessionTarget::Memory => Connection::open_in_memory(),
        SessionTarget::File(path) => Connection::open(path),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
                started_at.elapsed().as_millis()
            );
            return Err(err.into());
        }
    };

    match configure_session(&conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_configure_failed error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn configure_session(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
