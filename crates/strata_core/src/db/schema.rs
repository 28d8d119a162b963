//! Entity table configuration.
//!
//! # Responsibility
//! - Name the base columns shared by every entity table.
//! - Render `CREATE TABLE` for an entity type under a dialect.
//!
//! # Invariants
//! - Every table enforces `is_deleted = (date_of_deletion IS NOT NULL)`.
//! - Audit principal columns are capped at 250 characters.
//! - Capability flags default to allowed.

use crate::db::dialect::Dialect;
use crate::db::DbResult;
use crate::repo::mapping::TableMapping;
use log::info;
use rusqlite::Connection;

pub const ID: &str = "id";
pub const GLOBAL_ID: &str = "global_id";
pub const VERSION: &str = "version";
pub const CREATED_BY: &str = "created_by";
pub const UPDATED_BY: &str = "updated_by";
pub const DELETED_BY: &str = "deleted_by";
pub const DATE_OF_CREATION: &str = "date_of_creation";
pub const DATE_OF_UPDATE: &str = "date_of_update";
pub const DATE_OF_DELETION: &str = "date_of_deletion";
pub const IS_DELETED: &str = "is_deleted";
pub const CAN_BE_HARD_DELETED: &str = "can_be_hard_deleted";
pub const CAN_BE_SOFT_DELETED: &str = "can_be_soft_deleted";
pub const CAN_BE_UPDATED: &str = "can_be_updated";

/// Audit columns written on insert, in bind order.
pub(crate) const INSERT_AUDIT_COLUMNS: &[&str] = &[
    VERSION,
    CREATED_BY,
    UPDATED_BY,
    DELETED_BY,
    DATE_OF_CREATION,
    DATE_OF_UPDATE,
    DATE_OF_DELETION,
    IS_DELETED,
    CAN_BE_HARD_DELETED,
    CAN_BE_SOFT_DELETED,
    CAN_BE_UPDATED,
];

/// Audit columns written on update. Creation stamps are insert-only.
pub(crate) const UPDATE_AUDIT_COLUMNS: &[&str] = &[
    VERSION,
    UPDATED_BY,
    DELETED_BY,
    DATE_OF_UPDATE,
    DATE_OF_DELETION,
    IS_DELETED,
    CAN_BE_HARD_DELETED,
    CAN_BE_SOFT_DELETED,
    CAN_BE_UPDATED,
];

/// Base columns readable and filterable on every entity table.
pub(crate) const BASE_COLUMNS: &[&str] = &[
    ID,
    GLOBAL_ID,
    VERSION,
    CREATED_BY,
    UPDATED_BY,
    DELETED_BY,
    DATE_OF_CREATION,
    DATE_OF_UPDATE,
    DATE_OF_DELETION,
    IS_DELETED,
    CAN_BE_HARD_DELETED,
    CAN_BE_SOFT_DELETED,
    CAN_BE_UPDATED,
];

/// Renders the `CREATE TABLE IF NOT EXISTS` statement for `E`.
pub fn create_table_sql<E: TableMapping>(dialect: Dialect) -> String {
    let mut definitions = vec![
        format!("{ID} INTEGER PRIMARY KEY AUTOINCREMENT"),
        format!("{GLOBAL_ID} {}", dialect.global_id_column_type()),
        format!("{} {}", dialect.token_column(), dialect.token_column_type()),
        format!("{VERSION} INTEGER NOT NULL DEFAULT 1"),
        format!("{CREATED_BY} TEXT CHECK (length({CREATED_BY}) <= 250)"),
        format!("{UPDATED_BY} TEXT CHECK (length({UPDATED_BY}) <= 250)"),
        format!("{DELETED_BY} TEXT CHECK (length({DELETED_BY}) <= 250)"),
        format!("{DATE_OF_CREATION} INTEGER NOT NULL"),
        format!("{DATE_OF_UPDATE} INTEGER"),
        format!("{DATE_OF_DELETION} INTEGER"),
        format!("{IS_DELETED} INTEGER NOT NULL DEFAULT 0"),
        format!("{CAN_BE_HARD_DELETED} INTEGER NOT NULL DEFAULT 1"),
        format!("{CAN_BE_SOFT_DELETED} INTEGER NOT NULL DEFAULT 1"),
        format!("{CAN_BE_UPDATED} INTEGER NOT NULL DEFAULT 1"),
    ];
    definitions.extend(
        E::columns()
            .iter()
            .map(|column| format!("{} {}", column.name, column.sql_type)),
    );
    definitions.push(format!(
        "CHECK ({IS_DELETED} = ({DATE_OF_DELETION} IS NOT NULL))"
    ));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        E::TABLE,
        definitions.join(",\n    ")
    )
}

/// Creates the table for `E` when it does not exist yet.
pub fn ensure_table<E: TableMapping>(conn: &Connection, dialect: Dialect) -> DbResult<()> {
    conn.execute_batch(&create_table_sql::<E>(dialect))?;
    info!(
        "event=ensure_table module=db status=ok table={} dialect={dialect}",
        E::TABLE
    );
    Ok(())
}
