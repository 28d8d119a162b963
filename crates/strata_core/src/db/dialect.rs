//! Per-dialect storage strategy.
//!
//! # Responsibility
//! - Map each supported dialect onto a concurrency-token strategy and a
//!   global-id default generator.
//! - Render the write statements whose shape depends on those strategies.
//! - Convert tokens and global ids between `VersionToken` / `Uuid` and their
//!   stored representation.
//!
//! # Invariants
//! - Every dialect regenerates the token inside the write statement itself;
//!   callers never compute tokens.
//! - Row stamps are exposed as 8-byte little-endian tokens, so all dialects
//!   share `VersionToken` equality.
//! - A caller-provided global id always wins over the backend default.
//!
//! All dialects execute on the embedded SQLite engine; each one mirrors the
//! column conventions of the backend it is named after.

use crate::model::token::VersionToken;
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

const ROW_VERSION_COLUMN: &str = "row_version";
const ROW_STAMP_COLUMN: &str = "row_stamp";

const SEQUENTIAL_UUID_SQL: &str = "unhex(printf('%012x', CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)) || hex(randomblob(10)))";
const RANDOM_UUID_SQL: &str = "randomblob(16)";
const TEXT_UUID_SQL: &str = "(SELECT lower(substr(h, 1, 8) || '-' || substr(h, 9, 4) || '-' || substr(h, 13, 4) || '-' || substr(h, 17, 4) || '-' || substr(h, 21, 12)) FROM (SELECT hex(randomblob(16)) AS h))";

/// How the backend versions a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStrategy {
    /// Backend-maintained opaque row-version bytes.
    RowVersion,
    /// Backend-assigned numeric stamp, exposed as fixed-width bytes.
    RowStamp,
}

/// How the backend fills `global_id` when the caller leaves it empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalIdStrategy {
    /// Time-prefixed binary id, increasing across inserts.
    Sequential,
    /// Random binary id.
    Random,
    /// Random id stored as 36-character text.
    Textual,
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "sqlserver")]
    MsSql,
    MySql,
    #[serde(alias = "postgres")]
    PostgreSql,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::MsSql, Dialect::MySql, Dialect::PostgreSql];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MsSql => "mssql",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
        }
    }

    pub fn token_strategy(self) -> TokenStrategy {
        match self {
            Self::MsSql | Self::MySql => TokenStrategy::RowVersion,
            Self::PostgreSql => TokenStrategy::RowStamp,
        }
    }

    pub fn global_id_strategy(self) -> GlobalIdStrategy {
        match self {
            Self::MsSql => GlobalIdStrategy::Sequential,
            Self::MySql => GlobalIdStrategy::Textual,
            Self::PostgreSql => GlobalIdStrategy::Random,
        }
    }

    /// Name of the column holding the concurrency token.
    pub fn token_column(self) -> &'static str {
        match self.token_strategy() {
            TokenStrategy::RowVersion => ROW_VERSION_COLUMN,
            TokenStrategy::RowStamp => ROW_STAMP_COLUMN,
        }
    }

    pub(crate) fn token_column_type(self) -> &'static str {
        match self.token_strategy() {
            TokenStrategy::RowVersion => "BLOB NOT NULL",
            TokenStrategy::RowStamp => "INTEGER NOT NULL",
        }
    }

    pub(crate) fn global_id_column_type(self) -> &'static str {
        match self.global_id_strategy() {
            GlobalIdStrategy::Sequential | GlobalIdStrategy::Random => {
                "BLOB NOT NULL UNIQUE CHECK (length(global_id) = 16)"
            }
            GlobalIdStrategy::Textual => "TEXT NOT NULL UNIQUE CHECK (length(global_id) = 36)",
        }
    }

    fn global_id_default_sql(self) -> &'static str {
        match self.global_id_strategy() {
            GlobalIdStrategy::Sequential => SEQUENTIAL_UUID_SQL,
            GlobalIdStrategy::Random => RANDOM_UUID_SQL,
            GlobalIdStrategy::Textual => TEXT_UUID_SQL,
        }
    }

    fn next_token_sql(self, table: &str) -> String {
        match self.token_strategy() {
            TokenStrategy::RowVersion => "randomblob(8)".to_string(),
            TokenStrategy::RowStamp => {
                format!("(SELECT COALESCE(MAX({ROW_STAMP_COLUMN}), 0) + 1 FROM {table})")
            }
        }
    }

    /// Stored form of a global id.
    pub(crate) fn global_id_value(self, global_id: Uuid) -> Value {
        match self.global_id_strategy() {
            GlobalIdStrategy::Sequential | GlobalIdStrategy::Random => {
                Value::Blob(global_id.as_bytes().to_vec())
            }
            GlobalIdStrategy::Textual => Value::Text(global_id.hyphenated().to_string()),
        }
    }

    /// Stored form of a token used as the optimistic-lock comparand.
    ///
    /// Returns `None` when the token cannot have come from this dialect; such
    /// a token can never match a stored row.
    pub(crate) fn token_comparand(self, token: &VersionToken) -> Option<Value> {
        match self.token_strategy() {
            TokenStrategy::RowVersion => Some(Value::Blob(token.as_bytes().to_vec())),
            TokenStrategy::RowStamp => token.as_row_stamp().map(Value::Integer),
        }
    }

    pub(crate) fn read_token(self, row: &Row<'_>, column: &str) -> rusqlite::Result<VersionToken> {
        let index = row.as_ref().column_index(column)?;
        match self.token_strategy() {
            TokenStrategy::RowVersion => {
                let bytes: Vec<u8> = row.get(index)?;
                Ok(VersionToken::from_bytes(bytes))
            }
            TokenStrategy::RowStamp => {
                let stamp: i64 = row.get(index)?;
                Ok(VersionToken::from_row_stamp(stamp))
            }
        }
    }

    pub(crate) fn read_global_id(self, row: &Row<'_>, column: &str) -> rusqlite::Result<Uuid> {
        let index = row.as_ref().column_index(column)?;
        match self.global_id_strategy() {
            GlobalIdStrategy::Sequential | GlobalIdStrategy::Random => {
                let bytes: Vec<u8> = row.get(index)?;
                Uuid::from_slice(&bytes).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(index, Type::Blob, Box::new(err))
                })
            }
            GlobalIdStrategy::Textual => {
                let text: String = row.get(index)?;
                Uuid::parse_str(&text).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
                })
            }
        }
    }

    /// `INSERT` with backend-generated global id fallback and token.
    ///
    /// Bind order: global id (or `NULL`), then `columns`.
    /// Returns `id, global_id, <token column>`.
    pub(crate) fn insert_sql(self, table: &str, columns: &[&str]) -> String {
        let token_column = self.token_column();
        let column_list = columns.join(", ");
        let placeholders = (2..columns.len() + 2)
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {table} (global_id, {column_list}, {token_column})
             VALUES (COALESCE(?1, {}), {placeholders}, {})
             RETURNING id, global_id, {token_column};",
            self.global_id_default_sql(),
            self.next_token_sql(table),
        )
    }

    /// Token-guarded `UPDATE` that regenerates the token.
    ///
    /// Bind order: `columns`, then id, then token comparand.
    /// Returns the new token; no row means the guard failed.
    pub(crate) fn update_sql(self, table: &str, columns: &[&str]) -> String {
        let token_column = self.token_column();
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let id_param = columns.len() + 1;
        let token_param = columns.len() + 2;
        format!(
            "UPDATE {table}
             SET {assignments}, {token_column} = {}
             WHERE id = ?{id_param} AND {token_column} = ?{token_param}
             RETURNING {token_column};",
            self.next_token_sql(table),
        )
    }

    /// Token-guarded `DELETE`. Bind order: id, token comparand.
    pub(crate) fn delete_sql(self, table: &str) -> String {
        format!(
            "DELETE FROM {table} WHERE id = ?1 AND {} = ?2;",
            self.token_column()
        )
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown dialect names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDialect(pub String);

impl Display for UnknownDialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown dialect `{}`; expected mssql|mysql|postgresql",
            self.0
        )
    }
}

impl std::error::Error for UnknownDialect {}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Self::MsSql),
            "mysql" => Ok(Self::MySql),
            "postgresql" | "postgres" => Ok(Self::PostgreSql),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}
