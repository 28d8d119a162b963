//! Table mapping contract between entity types and storage rows.
//!
//! # Responsibility
//! - Let an entity type describe its own columns and row conversion.
//! - Decode and encode the base columns shared by every table.
//!
//! # Invariants
//! - `column_values()` returns values in `columns()` order.
//! - Base columns are never declared by the entity itself.

use crate::db::dialect::Dialect;
use crate::db::schema;
use crate::model::entity::{
    AuditTrail, Auditable, Capabilities, Identifiable, Identity, VersionControlled, Versioning,
};
use crate::repo::entity_repo::RepoResult;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

/// One entity-owned column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    /// Column type and constraints, e.g. `TEXT NOT NULL`.
    pub sql_type: &'static str,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self { name, sql_type }
    }
}

/// Base parts decoded from a row, handed to `TableMapping::from_row`.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub identity: Identity,
    pub audit: AuditTrail,
    pub versioning: Versioning,
}

/// Storage mapping for one entity type.
pub trait TableMapping: Identifiable + Auditable + VersionControlled + Sized {
    /// Table name. Must be a plain SQL identifier.
    const TABLE: &'static str;
    /// Name used in error reports.
    const ENTITY_TYPE: &'static str;

    /// Entity-owned columns, excluding the shared base columns.
    fn columns() -> &'static [ColumnDef];

    /// Values for `columns()`, in the same order.
    fn column_values(&self) -> Vec<Value>;

    /// Builds the entity from a row and its decoded base parts.
    fn from_row(row: &Row<'_>, header: RecordHeader) -> rusqlite::Result<Self>;

    /// Domain validation run before any write is staged.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Relation names accepted by `QuerySpec::include`.
    fn relations() -> &'static [&'static str] {
        &[]
    }

    /// Loads one relation named in `relations()` into `self`.
    fn load_relation(
        &mut self,
        _conn: &Connection,
        _dialect: Dialect,
        _relation: &str,
    ) -> RepoResult<()> {
        Ok(())
    }
}

/// Comma-separated select list for `E`.
pub(crate) fn select_list<E: TableMapping>(dialect: Dialect) -> String {
    let mut columns: Vec<&str> = schema::BASE_COLUMNS.to_vec();
    columns.push(dialect.token_column());
    columns.extend(E::columns().iter().map(|column| column.name));
    columns.join(", ")
}

/// Column names a query may reference for `E`.
pub(crate) fn known_columns<E: TableMapping>() -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = schema::BASE_COLUMNS.to_vec();
    columns.extend(E::columns().iter().map(|column| column.name));
    columns
}

pub(crate) fn read_header(row: &Row<'_>, dialect: Dialect) -> rusqlite::Result<RecordHeader> {
    let id = row.get(schema::ID)?;
    let global_id = dialect.read_global_id(row, schema::GLOBAL_ID)?;
    let token = dialect.read_token(row, dialect.token_column())?;

    let audit = AuditTrail {
        created_by: row.get(schema::CREATED_BY)?,
        updated_by: row.get(schema::UPDATED_BY)?,
        deleted_by: row.get(schema::DELETED_BY)?,
        date_of_creation: row.get(schema::DATE_OF_CREATION)?,
        date_of_update: row.get(schema::DATE_OF_UPDATE)?,
        date_of_deletion: row.get(schema::DATE_OF_DELETION)?,
        capabilities: Capabilities {
            can_be_updated: row.get(schema::CAN_BE_UPDATED)?,
            can_be_soft_deleted: row.get(schema::CAN_BE_SOFT_DELETED)?,
            can_be_hard_deleted: row.get(schema::CAN_BE_HARD_DELETED)?,
        },
    };

    Ok(RecordHeader {
        identity: Identity::restore(id, global_id),
        audit,
        versioning: Versioning::restore(token, row.get(schema::VERSION)?),
    })
}

/// Values for the given base audit columns, in order.
pub(crate) fn audit_values<E: TableMapping>(entity: &E, columns: &[&str]) -> Vec<Value> {
    let audit = entity.audit();
    let caps = audit.capabilities;
    columns
        .iter()
        .map(|column| match *column {
            schema::VERSION => Value::Integer(i64::from(entity.versioning().version())),
            schema::CREATED_BY => optional_text(audit.created_by()),
            schema::UPDATED_BY => optional_text(audit.updated_by()),
            schema::DELETED_BY => optional_text(audit.deleted_by()),
            schema::DATE_OF_CREATION => optional_integer(audit.date_of_creation()),
            schema::DATE_OF_UPDATE => optional_integer(audit.date_of_update()),
            schema::DATE_OF_DELETION => optional_integer(audit.date_of_deletion()),
            schema::IS_DELETED => bool_value(audit.is_deleted()),
            schema::CAN_BE_HARD_DELETED => bool_value(caps.can_be_hard_deleted),
            schema::CAN_BE_SOFT_DELETED => bool_value(caps.can_be_soft_deleted),
            schema::CAN_BE_UPDATED => bool_value(caps.can_be_updated),
            _ => Value::Null,
        })
        .collect()
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn bool_value(value: bool) -> Value {
    Value::Integer(if value { 1 } else { 0 })
}
