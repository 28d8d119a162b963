//! Entity use-case service.
//!
//! # Responsibility
//! - Gate every mutation on the entity's capability flags.
//! - Stamp audit principals from the caller-identity source.
//! - Drive Repository staging and Unit of Work saves, then write
//!   backend-assigned values back into the caller's entities.
//! - Translate lower-layer failures into `EntityError`.
//!
//! # Invariants
//! - Batches are checked and stamped in full before anything is staged.
//! - A failed mutation leaves nothing staged, the store unchanged and the
//!   caller's audit trails as they were.
//! - Soft-deleted entities are terminal; only hard delete accepts them.
//! - Soft delete is an update carrying the deletion marker; only the
//!   soft-delete flag gates it.
//! - Reads are pass-through and never gated.

use crate::identity::{resolve_principal, IdentitySource};
use crate::model::entity::{AuditTrail, EntityId};
use crate::query::spec::QuerySpec;
use crate::repo::entity_repo::{
    check_insertable, check_loaded, check_mutable, RepoError, RepoResult, Repository,
};
use crate::repo::mapping::TableMapping;
use crate::uow::unit_of_work::{SaveReport, StageTicket, UnitOfWork, UowError, WriteOutcome};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type EntityResult<T> = Result<T, EntityError>;

/// Mutation kinds named in capability and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    DeleteHard,
    DeleteSoft,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::DeleteHard => "deleteHard",
            Self::DeleteSoft => "deleteSoft",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error taxonomy surfaced to service callers.
#[derive(Debug)]
pub enum EntityError {
    /// Missing or empty argument, or an entity in the wrong lifecycle state.
    PreconditionViolation(String),
    /// An entity-level flag forbids the requested mutation.
    CapabilityDenied {
        operation: Operation,
        entity_type: &'static str,
        id: Option<EntityId>,
    },
    /// The stored token no longer matches. Safe to retry after reloading.
    ConcurrencyConflict {
        entity_type: &'static str,
        id: Option<EntityId>,
    },
    /// Any other backend failure.
    PersistenceFailure(RepoError),
    /// The Unit of Work was released or could not complete the save.
    OperationFailed {
        operation: Operation,
        entity_type: &'static str,
    },
    MultipleResults {
        entity_type: &'static str,
        count: usize,
    },
    InvalidQuery(String),
}

impl EntityError {
    /// Whether a caller may retry after reloading the entity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation(message.into())
    }
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreconditionViolation(message) => write!(f, "precondition violated: {message}"),
            Self::CapabilityDenied {
                operation,
                entity_type,
                id,
            } => match id {
                Some(id) => write!(f, "{operation} is not allowed for {entity_type} {id}"),
                None => write!(f, "{operation} is not allowed for {entity_type}"),
            },
            Self::ConcurrencyConflict { entity_type, id } => match id {
                Some(id) => write!(f, "{entity_type} {id} was changed by another writer"),
                None => write!(f, "{entity_type} was changed by another writer"),
            },
            Self::PersistenceFailure(err) => write!(f, "persistence failure: {err}"),
            Self::OperationFailed {
                operation,
                entity_type,
            } => write!(f, "{operation} of {entity_type} failed"),
            Self::MultipleResults { entity_type, count } => {
                write!(f, "expected one {entity_type}, found {count}")
            }
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
        }
    }
}

impl Error for EntityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PersistenceFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for EntityError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Uow(UowError::ConcurrencyConflict { entity_type, id }) => {
                Self::ConcurrencyConflict { entity_type, id }
            }
            RepoError::NotFound { .. }
            | RepoError::Lifecycle { .. }
            | RepoError::Validation { .. } => Self::PreconditionViolation(value.to_string()),
            RepoError::InvalidQuery(message) => Self::InvalidQuery(message),
            RepoError::MultipleResults { entity_type, count } => {
                Self::MultipleResults { entity_type, count }
            }
            other => Self::PersistenceFailure(other),
        }
    }
}

/// Orchestrates one Repository and one Unit of Work for entity type `E`.
pub struct EntityService<E: TableMapping, I: IdentitySource> {
    repo: Repository<E>,
    uow: UnitOfWork,
    identity: I,
}

impl<E: TableMapping, I: IdentitySource> EntityService<E, I> {
    pub fn new(repo: Repository<E>, uow: UnitOfWork, identity: I) -> Self {
        Self {
            repo,
            uow,
            identity,
        }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    /// Releases the owned session. Later calls fail.
    pub fn release(&mut self) {
        self.uow.release();
    }

    /// Stamps `created_by`, inserts and writes back id, global id and token.
    pub fn insert_one(&mut self, entity: &mut E) -> EntityResult<()> {
        self.insert_many(std::slice::from_mut(entity))
    }

    /// Inserts every entity or none.
    pub fn insert_many(&mut self, entities: &mut [E]) -> EntityResult<()> {
        let started_at = Instant::now();
        require_non_empty::<E>(entities.len())?;
        for entity in entities.iter() {
            check_insertable(entity)?;
        }

        let snapshot = audit_snapshot(entities);
        let principal = resolve_principal(&self.identity);
        for entity in entities.iter_mut() {
            entity.audit_mut().set_created_by(principal.clone());
        }

        self.persist(
            Operation::Insert,
            started_at,
            entities,
            snapshot,
            |repo, uow, entities| repo.insert_many(uow, entities),
        )
    }

    /// Stamps `updated_by` and applies a token-guarded update.
    ///
    /// # Errors
    /// - `PreconditionViolation` for soft-deleted entities.
    /// - `CapabilityDenied` when `can_be_updated` is false.
    /// - `ConcurrencyConflict` when the stored token changed since the read.
    pub fn update_one(&mut self, entity: &mut E) -> EntityResult<()> {
        self.update_many(std::slice::from_mut(entity))
    }

    pub fn update_many(&mut self, entities: &mut [E]) -> EntityResult<()> {
        let started_at = Instant::now();
        require_non_empty::<E>(entities.len())?;
        for entity in entities.iter() {
            check_mutable(entity)?;
        }
        for entity in entities.iter() {
            require_capability(entity, Operation::Update)?;
        }

        let snapshot = audit_snapshot(entities);
        let principal = resolve_principal(&self.identity);
        for entity in entities.iter_mut() {
            entity.audit_mut().set_updated_by(principal.clone());
        }

        self.persist(
            Operation::Update,
            started_at,
            entities,
            snapshot,
            |repo, uow, entities| repo.update_many(uow, entities),
        )
    }

    /// Physically removes the row. Soft-deleted rows may still be removed.
    pub fn delete_hard_one(&mut self, entity: &E) -> EntityResult<()> {
        self.delete_hard_many(std::slice::from_ref(entity))
    }

    /// Loads the row, deleted rows included, and removes it.
    pub fn delete_hard_by_id(&mut self, id: EntityId) -> EntityResult<()> {
        let entity = self.require_by_id(Operation::DeleteHard, id, true)?;
        self.delete_hard_one(&entity)
    }

    pub fn delete_hard_many(&mut self, entities: &[E]) -> EntityResult<()> {
        let started_at = Instant::now();
        require_non_empty::<E>(entities.len())?;
        for entity in entities {
            check_loaded(entity)?;
        }
        for entity in entities {
            require_capability(entity, Operation::DeleteHard)?;
        }

        let tickets = self.stage(Operation::DeleteHard, |repo, uow| {
            repo.delete_hard_many(uow, entities)
        })?;
        let report = self.commit(Operation::DeleteHard, started_at)?;
        for ticket in &tickets {
            outcome_for::<E>(&report, *ticket, Operation::DeleteHard)?;
        }
        Ok(())
    }

    /// Stamps `deleted_by`, sets the deletion marker and saves through the
    /// update path. Soft-deleted entities are rejected.
    pub fn delete_soft_one(&mut self, entity: &mut E) -> EntityResult<()> {
        self.delete_soft_many(std::slice::from_mut(entity))
    }

    /// Loads a visible row and soft-deletes it. Returns the stored state.
    pub fn delete_soft_by_id(&mut self, id: EntityId) -> EntityResult<E> {
        let mut entity = self.require_by_id(Operation::DeleteSoft, id, false)?;
        self.delete_soft_one(&mut entity)?;
        Ok(entity)
    }

    pub fn delete_soft_many(&mut self, entities: &mut [E]) -> EntityResult<()> {
        let started_at = Instant::now();
        require_non_empty::<E>(entities.len())?;
        for entity in entities.iter() {
            check_mutable(entity)?;
        }
        for entity in entities.iter() {
            require_capability(entity, Operation::DeleteSoft)?;
        }

        let snapshot = audit_snapshot(entities);
        let principal = resolve_principal(&self.identity);
        for entity in entities.iter_mut() {
            entity.audit_mut().set_deleted_by(principal.clone());
        }

        self.persist(
            Operation::DeleteSoft,
            started_at,
            entities,
            snapshot,
            |repo, uow, entities| repo.delete_soft_many(uow, entities),
        )
    }

    pub fn get_all(&self, spec: &QuerySpec) -> EntityResult<Vec<E>> {
        Ok(self.repo.get_all(&self.uow, spec)?)
    }

    pub fn get(&self, spec: &QuerySpec) -> EntityResult<Vec<E>> {
        Ok(self.repo.get(&self.uow, spec)?)
    }

    pub fn get_one(&self, spec: &QuerySpec) -> EntityResult<Option<E>> {
        Ok(self.repo.get_one(&self.uow, spec)?)
    }

    pub fn get_first(&self, spec: &QuerySpec) -> EntityResult<Option<E>> {
        Ok(self.repo.get_first(&self.uow, spec)?)
    }

    pub fn get_by_id(&self, id: EntityId, include_deleted: bool) -> EntityResult<Option<E>> {
        Ok(self.repo.get_by_id(&self.uow, id, include_deleted)?)
    }

    pub fn get_count(&self, spec: &QuerySpec) -> EntityResult<u64> {
        Ok(self.repo.get_count(&self.uow, spec)?)
    }

    pub fn get_exists(&self, spec: &QuerySpec) -> EntityResult<bool> {
        Ok(self.repo.get_exists(&self.uow, spec)?)
    }

    pub async fn insert_one_async(&mut self, entity: &mut E) -> EntityResult<()> {
        self.insert_one(entity)
    }

    pub async fn insert_many_async(&mut self, entities: &mut [E]) -> EntityResult<()> {
        self.insert_many(entities)
    }

    pub async fn update_one_async(&mut self, entity: &mut E) -> EntityResult<()> {
        self.update_one(entity)
    }

    pub async fn update_many_async(&mut self, entities: &mut [E]) -> EntityResult<()> {
        self.update_many(entities)
    }

    pub async fn delete_hard_one_async(&mut self, entity: &E) -> EntityResult<()> {
        self.delete_hard_one(entity)
    }

    pub async fn delete_hard_by_id_async(&mut self, id: EntityId) -> EntityResult<()> {
        self.delete_hard_by_id(id)
    }

    pub async fn delete_hard_many_async(&mut self, entities: &[E]) -> EntityResult<()> {
        self.delete_hard_many(entities)
    }

    pub async fn delete_soft_one_async(&mut self, entity: &mut E) -> EntityResult<()> {
        self.delete_soft_one(entity)
    }

    pub async fn delete_soft_by_id_async(&mut self, id: EntityId) -> EntityResult<E> {
        self.delete_soft_by_id(id)
    }

    pub async fn delete_soft_many_async(&mut self, entities: &mut [E]) -> EntityResult<()> {
        self.delete_soft_many(entities)
    }

    pub async fn get_all_async(&self, spec: &QuerySpec) -> EntityResult<Vec<E>> {
        Ok(self.repo.get_all_async(&self.uow, spec).await?)
    }

    pub async fn get_async(&self, spec: &QuerySpec) -> EntityResult<Vec<E>> {
        Ok(self.repo.get_async(&self.uow, spec).await?)
    }

    pub async fn get_one_async(&self, spec: &QuerySpec) -> EntityResult<Option<E>> {
        Ok(self.repo.get_one_async(&self.uow, spec).await?)
    }

    pub async fn get_first_async(&self, spec: &QuerySpec) -> EntityResult<Option<E>> {
        Ok(self.repo.get_first_async(&self.uow, spec).await?)
    }

    pub async fn get_by_id_async(
        &self,
        id: EntityId,
        include_deleted: bool,
    ) -> EntityResult<Option<E>> {
        Ok(self
            .repo
            .get_by_id_async(&self.uow, id, include_deleted)
            .await?)
    }

    pub async fn get_count_async(&self, spec: &QuerySpec) -> EntityResult<u64> {
        Ok(self.repo.get_count_async(&self.uow, spec).await?)
    }

    pub async fn get_exists_async(&self, spec: &QuerySpec) -> EntityResult<bool> {
        Ok(self.repo.get_exists_async(&self.uow, spec).await?)
    }

    fn require_by_id(
        &self,
        operation: Operation,
        id: EntityId,
        include_deleted: bool,
    ) -> EntityResult<E> {
        self.repo
            .get_by_id(&self.uow, id, include_deleted)
            .map_err(|err| mutation_error::<E>(operation, err))?
            .ok_or_else(|| {
                EntityError::precondition(format!("{} {id} does not exist", E::ENTITY_TYPE))
            })
    }

    /// Stages, saves and writes back; a failure restores the audit trails
    /// the caller passed in.
    fn persist(
        &mut self,
        operation: Operation,
        started_at: Instant,
        entities: &mut [E],
        snapshot: Vec<AuditTrail>,
        step: impl FnOnce(
            &Repository<E>,
            &mut UnitOfWork,
            &mut [E],
        ) -> RepoResult<Vec<StageTicket>>,
    ) -> EntityResult<()> {
        let result = self
            .stage(operation, |repo, uow| step(repo, uow, &mut *entities))
            .and_then(|tickets| {
                let report = self.commit(operation, started_at)?;
                write_back(entities, &tickets, &report, operation)
            });
        if result.is_err() {
            for (entity, audit) in entities.iter_mut().zip(snapshot) {
                *entity.audit_mut() = audit;
            }
        }
        result
    }

    /// Runs a staging step; on failure nothing staged by this call survives.
    fn stage<T>(
        &mut self,
        operation: Operation,
        step: impl FnOnce(&Repository<E>, &mut UnitOfWork) -> Result<T, RepoError>,
    ) -> EntityResult<T> {
        match step(&self.repo, &mut self.uow) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.uow.discard();
                error!(
                    "event=entity_{operation} module=service status=error entity_type={} stage=staging error={err}",
                    E::ENTITY_TYPE
                );
                Err(mutation_error::<E>(operation, err))
            }
        }
    }

    fn commit(&mut self, operation: Operation, started_at: Instant) -> EntityResult<SaveReport> {
        match self.uow.save() {
            Ok(report) => {
                info!(
                    "event=entity_{operation} module=service status=ok entity_type={} writes={} duration_ms={}",
                    E::ENTITY_TYPE,
                    report.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=entity_{operation} module=service status=error entity_type={} stage=save duration_ms={} error={err}",
                    E::ENTITY_TYPE,
                    started_at.elapsed().as_millis()
                );
                Err(match err {
                    UowError::Released | UowError::SaveInProgress => EntityError::OperationFailed {
                        operation,
                        entity_type: E::ENTITY_TYPE,
                    },
                    other => RepoError::Uow(other).into(),
                })
            }
        }
    }
}

/// A released unit fails the mutation itself rather than the backend.
fn mutation_error<E: TableMapping>(operation: Operation, err: RepoError) -> EntityError {
    match err {
        RepoError::Uow(UowError::Released) => EntityError::OperationFailed {
            operation,
            entity_type: E::ENTITY_TYPE,
        },
        other => other.into(),
    }
}

fn audit_snapshot<E: TableMapping>(entities: &[E]) -> Vec<AuditTrail> {
    entities.iter().map(|entity| entity.audit().clone()).collect()
}

fn require_non_empty<E: TableMapping>(len: usize) -> EntityResult<()> {
    if len == 0 {
        return Err(EntityError::precondition(format!(
            "at least one {} is required",
            E::ENTITY_TYPE
        )));
    }
    Ok(())
}

fn require_capability<E: TableMapping>(entity: &E, operation: Operation) -> EntityResult<()> {
    let caps = entity.capabilities();
    let allowed = match operation {
        Operation::Insert => true,
        Operation::Update => caps.can_be_updated,
        Operation::DeleteHard => caps.can_be_hard_deleted,
        Operation::DeleteSoft => caps.can_be_soft_deleted,
    };
    if allowed {
        return Ok(());
    }
    Err(EntityError::CapabilityDenied {
        operation,
        entity_type: E::ENTITY_TYPE,
        id: entity.id(),
    })
}

fn outcome_for<'r, E: TableMapping>(
    report: &'r SaveReport,
    ticket: StageTicket,
    operation: Operation,
) -> EntityResult<&'r WriteOutcome> {
    report
        .outcome(ticket)
        .ok_or(EntityError::OperationFailed {
            operation,
            entity_type: E::ENTITY_TYPE,
        })
}

fn write_back<E: TableMapping>(
    entities: &mut [E],
    tickets: &[StageTicket],
    report: &SaveReport,
    operation: Operation,
) -> EntityResult<()> {
    for (entity, ticket) in entities.iter_mut().zip(tickets) {
        let outcome = outcome_for::<E>(report, *ticket, operation)?;
        entity.identity_mut().assign(outcome.id, outcome.global_id);
        if let Some(token) = &outcome.token {
            entity.versioning_mut().set_token(token.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{EntityError, Operation};
    use crate::repo::entity_repo::RepoError;
    use crate::uow::unit_of_work::UowError;

    #[test]
    fn operation_names_match_failure_reports() {
        assert_eq!(Operation::Insert.to_string(), "insert");
        assert_eq!(Operation::Update.to_string(), "update");
        assert_eq!(Operation::DeleteHard.to_string(), "deleteHard");
        assert_eq!(Operation::DeleteSoft.to_string(), "deleteSoft");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict: EntityError = RepoError::Uow(UowError::ConcurrencyConflict {
            entity_type: "Customer",
            id: Some(1),
        })
        .into();
        assert!(conflict.is_retryable());

        let persistence: EntityError = RepoError::Uow(UowError::persistence(
            Some("Customer"),
            rusqlite::Error::QueryReturnedNoRows,
        ))
        .into();
        assert!(matches!(persistence, EntityError::PersistenceFailure(_)));
        assert!(!persistence.is_retryable());
    }

    #[test]
    fn lifecycle_and_lookup_failures_are_precondition_violations() {
        let err: EntityError = RepoError::NotFound {
            entity_type: "Customer",
            id: 7,
        }
        .into();
        assert!(matches!(err, EntityError::PreconditionViolation(_)));
    }
}
