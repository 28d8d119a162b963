//! Transactional change-set boundary.
//!
//! # Responsibility
//! - Own one persistence session for its whole lifetime.
//! - Collect staged writes and apply them atomically on `save()`.
//! - Report backend-assigned values per staging ticket.
//!
//! # Invariants
//! - Exactly one transaction exists per `save()`; a failed save leaves the
//!   store unchanged and the change-set empty.
//! - A guarded write that matches no row is a `ConcurrencyConflict`.
//! - The session is released at most once, explicitly or on drop.

use crate::db::dialect::Dialect;
use crate::model::entity::EntityId;
use crate::model::token::VersionToken;
use crate::repo::write::execute_staged;
use log::{error, info, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type UowResult<T> = Result<T, UowError>;

/// Unit of Work failures.
#[derive(Debug)]
pub enum UowError {
    /// A guarded write found the stored token changed or the row gone.
    ConcurrencyConflict {
        entity_type: &'static str,
        id: Option<EntityId>,
    },
    /// Any other backend failure during the save.
    Persistence {
        entity_type: Option<&'static str>,
        source: rusqlite::Error,
    },
    /// The session has already been released.
    Released,
    /// A previous save was interrupted mid-transaction.
    SaveInProgress,
}

impl UowError {
    pub(crate) fn persistence(entity_type: Option<&'static str>, source: rusqlite::Error) -> Self {
        Self::Persistence {
            entity_type,
            source,
        }
    }
}

impl Display for UowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConcurrencyConflict { entity_type, id } => match id {
                Some(id) => write!(f, "concurrency conflict on {entity_type} {id}"),
                None => write!(f, "concurrency conflict on {entity_type}"),
            },
            Self::Persistence {
                entity_type: Some(entity_type),
                source,
            } => write!(f, "persistence failure on {entity_type}: {source}"),
            Self::Persistence { source, .. } => write!(f, "persistence failure: {source}"),
            Self::Released => write!(f, "unit of work session already released"),
            Self::SaveInProgress => write!(f, "unit of work has an unfinished save"),
        }
    }
}

impl Error for UowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Transaction state of the most recent save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTransaction,
    Committed,
    RolledBack,
}

/// Kind of a staged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Handle for one staged write; keys its outcome in the save report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageTicket(u64);

/// Values the backend assigned while applying one staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub ticket: StageTicket,
    pub kind: WriteKind,
    pub id: EntityId,
    /// Stored global id; only reported for inserts.
    pub global_id: Option<Uuid>,
    /// New token; `None` for deletes.
    pub token: Option<VersionToken>,
}

/// Result of one successful save. Outcomes are in ticket order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    outcomes: Vec<WriteOutcome>,
}

impl SaveReport {
    pub fn outcome(&self, ticket: StageTicket) -> Option<&WriteOutcome> {
        self.outcomes
            .binary_search_by_key(&ticket, |outcome| outcome.ticket)
            .ok()
            .map(|index| &self.outcomes[index])
    }

    pub fn outcomes(&self) -> &[WriteOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// One write waiting for the next save, already rendered to column values.
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub kind: WriteKind,
    pub entity_type: &'static str,
    pub table: &'static str,
    pub id: Option<EntityId>,
    pub global_id: Option<Uuid>,
    pub token: Option<VersionToken>,
    pub columns: Vec<&'static str>,
    pub values: Vec<Value>,
}

/// Transactional boundary over one owned session.
pub struct UnitOfWork {
    conn: Option<Connection>,
    dialect: Dialect,
    staged: Vec<(StageTicket, StagedWrite)>,
    state: TransactionState,
    next_ticket: u64,
}

impl UnitOfWork {
    /// Takes ownership of `conn` for the lifetime of this unit.
    pub fn new(conn: Connection, dialect: Dialect) -> Self {
        Self {
            conn: Some(conn),
            dialect,
            staged: Vec::new(),
            state: TransactionState::Idle,
            next_ticket: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of writes waiting for the next save.
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Read access to the owned session.
    pub fn session(&self) -> UowResult<&Connection> {
        self.conn.as_ref().ok_or(UowError::Released)
    }

    /// Drops every staged write without touching the store.
    pub fn discard(&mut self) {
        if !self.staged.is_empty() {
            info!(
                "event=uow_discard module=uow status=ok dropped={}",
                self.staged.len()
            );
        }
        self.staged.clear();
    }

    /// Applies every staged write in one transaction.
    ///
    /// # Errors
    /// - `ConcurrencyConflict` when a guarded update or delete matched no row.
    /// - `Persistence` on any other backend failure.
    /// - `Released` / `SaveInProgress` when the unit cannot save at all.
    ///
    /// On error the transaction is rolled back and the change-set discarded.
    pub fn save(&mut self) -> UowResult<SaveReport> {
        if self.state == TransactionState::InTransaction {
            return Err(UowError::SaveInProgress);
        }
        let conn = self.conn.as_mut().ok_or(UowError::Released)?;
        if self.staged.is_empty() {
            return Ok(SaveReport::default());
        }

        let started_at = Instant::now();
        let staged = std::mem::take(&mut self.staged);
        info!(
            "event=uow_save module=uow status=start dialect={} writes={}",
            self.dialect,
            staged.len()
        );

        self.state = TransactionState::InTransaction;
        match apply(conn, self.dialect, &staged) {
            Ok(report) => {
                self.state = TransactionState::Committed;
                info!(
                    "event=uow_save module=uow status=ok writes={} duration_ms={}",
                    report.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                self.state = TransactionState::RolledBack;
                let error_code = match err {
                    UowError::ConcurrencyConflict { .. } => "concurrency_conflict",
                    _ => "persistence_failure",
                };
                error!(
                    "event=uow_save module=uow status=error duration_ms={} error_code={error_code} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Async twin of [`UnitOfWork::save`].
    pub async fn save_async(&mut self) -> UowResult<SaveReport> {
        self.save()
    }

    /// Closes the session. Repeated calls are no-ops.
    pub fn release(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.staged.clear();
        match conn.close() {
            Ok(()) => info!("event=uow_release module=uow status=ok"),
            Err((_, err)) => {
                warn!("event=uow_release module=uow status=error error={err}")
            }
        }
    }

    pub(crate) fn stage(&mut self, write: StagedWrite) -> UowResult<StageTicket> {
        if self.conn.is_none() {
            return Err(UowError::Released);
        }
        let ticket = StageTicket(self.next_ticket);
        self.next_ticket += 1;
        self.staged.push((ticket, write));
        Ok(ticket)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.release();
    }
}

fn apply(
    conn: &mut Connection,
    dialect: Dialect,
    staged: &[(StageTicket, StagedWrite)],
) -> UowResult<SaveReport> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| UowError::persistence(None, err))?;

    let mut outcomes = Vec::with_capacity(staged.len());
    for (ticket, write) in staged {
        match execute_staged(&tx, dialect, *ticket, write) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("event=uow_rollback module=uow status=error error={rollback_err}");
                }
                return Err(err);
            }
        }
    }

    tx.commit().map_err(|err| UowError::persistence(None, err))?;
    Ok(SaveReport { outcomes })
}
