//! Repository write path, executed inside a Unit of Work transaction.
//!
//! The transaction handle lives only for one `save()` call and is never
//! stored by the repository.

use crate::db::dialect::Dialect;
use crate::model::entity::EntityId;
use crate::model::token::VersionToken;
use crate::uow::unit_of_work::{
    StageTicket, StagedWrite, UowError, UowResult, WriteKind, WriteOutcome,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Transaction};

pub(crate) fn execute_staged(
    tx: &Transaction<'_>,
    dialect: Dialect,
    ticket: StageTicket,
    write: &StagedWrite,
) -> UowResult<WriteOutcome> {
    match write.kind {
        WriteKind::Insert => insert(tx, dialect, ticket, write),
        WriteKind::Update => update(tx, dialect, ticket, write),
        WriteKind::Delete => delete(tx, dialect, ticket, write),
    }
}

fn insert(
    tx: &Transaction<'_>,
    dialect: Dialect,
    ticket: StageTicket,
    write: &StagedWrite,
) -> UowResult<WriteOutcome> {
    let sql = dialect.insert_sql(write.table, &write.columns);
    let mut binds = Vec::with_capacity(write.values.len() + 1);
    binds.push(
        write
            .global_id
            .map_or(Value::Null, |global_id| dialect.global_id_value(global_id)),
    );
    binds.extend(write.values.iter().cloned());

    let (id, global_id, token) = tx
        .query_row(&sql, params_from_iter(binds), |row| {
            Ok((
                row.get::<_, EntityId>(0)?,
                dialect.read_global_id(row, "global_id")?,
                dialect.read_token(row, dialect.token_column())?,
            ))
        })
        .map_err(|err| UowError::persistence(Some(write.entity_type), err))?;

    Ok(WriteOutcome {
        ticket,
        kind: WriteKind::Insert,
        id,
        global_id: Some(global_id),
        token: Some(token),
    })
}

fn update(
    tx: &Transaction<'_>,
    dialect: Dialect,
    ticket: StageTicket,
    write: &StagedWrite,
) -> UowResult<WriteOutcome> {
    let (id, comparand) = guard(dialect, write)?;
    let sql = dialect.update_sql(write.table, &write.columns);
    let mut binds = write.values.clone();
    binds.push(Value::Integer(id));
    binds.push(comparand);

    let token: Option<VersionToken> = tx
        .query_row(&sql, params_from_iter(binds), |row| {
            dialect.read_token(row, dialect.token_column())
        })
        .optional()
        .map_err(|err| UowError::persistence(Some(write.entity_type), err))?;

    match token {
        Some(token) => Ok(WriteOutcome {
            ticket,
            kind: WriteKind::Update,
            id,
            global_id: None,
            token: Some(token),
        }),
        None => Err(conflict(write)),
    }
}

fn delete(
    tx: &Transaction<'_>,
    dialect: Dialect,
    ticket: StageTicket,
    write: &StagedWrite,
) -> UowResult<WriteOutcome> {
    let (id, comparand) = guard(dialect, write)?;
    let changed = tx
        .execute(&dialect.delete_sql(write.table), params![id, comparand])
        .map_err(|err| UowError::persistence(Some(write.entity_type), err))?;

    if changed == 0 {
        return Err(conflict(write));
    }
    Ok(WriteOutcome {
        ticket,
        kind: WriteKind::Delete,
        id,
        global_id: None,
        token: None,
    })
}

/// Id and stored-form token for a guarded write.
///
/// A token the dialect cannot have produced can never match, so it is a
/// conflict rather than a backend failure.
fn guard(dialect: Dialect, write: &StagedWrite) -> UowResult<(EntityId, Value)> {
    let id = write.id.ok_or_else(|| conflict(write))?;
    let comparand = write
        .token
        .as_ref()
        .and_then(|token| dialect.token_comparand(token))
        .ok_or_else(|| conflict(write))?;
    Ok((id, comparand))
}

fn conflict(write: &StagedWrite) -> UowError {
    UowError::ConcurrencyConflict {
        entity_type: write.entity_type,
        id: write.id,
    }
}
