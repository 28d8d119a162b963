//! Generic entity repository.
//!
//! # Responsibility
//! - Translate entity mutations into staged writes on a Unit of Work.
//! - Translate query specifications into snapshot reads.
//!
//! # Invariants
//! - The repository never opens, commits or rolls back a transaction.
//! - Default reads hide soft-deleted rows.
//! - Batch mutations check every element before staging any.
//! - Backend-owned values (id, global id, token) are never set here.
//! - Soft-deleted entities accept only hard deletes.
//! - Staging stamps dates into the caller's entity; after a failed save
//!   the caller reloads before retrying.

use crate::clock::{Clock, SystemClock};
use crate::db::schema;
use crate::db::DbError;
use crate::model::entity::{EntityId, Timestamp};
use crate::query::filter::Filter;
use crate::query::spec::{OrderBy, QuerySpec};
use crate::repo::mapping::{audit_values, known_columns, read_header, select_list, TableMapping};
use crate::repo::sql::{order_clause, paging_clause, where_clause};
use crate::uow::unit_of_work::{StageTicket, StagedWrite, UnitOfWork, UowError, WriteKind};
use log::debug;
use rusqlite::params_from_iter;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Uow(UowError),
    NotFound {
        entity_type: &'static str,
        id: EntityId,
    },
    /// The entity is in the wrong lifecycle state for the operation.
    Lifecycle {
        entity_type: &'static str,
        reason: &'static str,
    },
    Validation {
        entity_type: &'static str,
        message: String,
    },
    /// `column_values()` disagrees with `columns()`.
    InvalidMapping {
        entity_type: &'static str,
        expected: usize,
        actual: usize,
    },
    InvalidQuery(String),
    MultipleResults {
        entity_type: &'static str,
        count: usize,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Uow(err) => write!(f, "{err}"),
            Self::NotFound { entity_type, id } => write!(f, "{entity_type} not found: {id}"),
            Self::Lifecycle {
                entity_type,
                reason,
            } => write!(f, "{entity_type} {reason}"),
            Self::Validation {
                entity_type,
                message,
            } => write!(f, "invalid {entity_type}: {message}"),
            Self::InvalidMapping {
                entity_type,
                expected,
                actual,
            } => write!(
                f,
                "{entity_type} mapping returned {actual} values for {expected} columns"
            ),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::MultipleResults { entity_type, count } => {
                write!(f, "expected one {entity_type}, found {count}")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Uow(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<UowError> for RepoError {
    fn from(value: UowError) -> Self {
        Self::Uow(value)
    }
}

/// Parts of a specification a read path evaluates.
#[derive(Debug, Clone, Copy)]
struct ReadPlan<'a> {
    filter: Option<&'a Filter>,
    order_by: &'a [OrderBy],
    include: &'a [String],
    skip: Option<u32>,
    take: Option<u32>,
    include_deleted: bool,
}

impl<'a> ReadPlan<'a> {
    fn from_spec(spec: &'a QuerySpec) -> Self {
        Self {
            filter: spec.filter.as_ref(),
            order_by: &spec.order_by,
            include: &spec.include,
            skip: spec.skip,
            take: spec.take,
            include_deleted: spec.include_deleted,
        }
    }
}

/// Stateless repository for one entity type.
pub struct Repository<E: TableMapping> {
    clock: Arc<dyn Clock + Send + Sync>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: TableMapping> Default for Repository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TableMapping> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            _entity: PhantomData,
        }
    }
}

impl<E: TableMapping> Repository<E> {
    /// Repository stamping dates from the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            _entity: PhantomData,
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Stamps `date_of_creation` and stages an insert.
    pub fn insert_one(&self, uow: &mut UnitOfWork, entity: &mut E) -> RepoResult<StageTicket> {
        uow.session()?;
        check_insertable(entity)?;
        entity.audit_mut().mark_created(self.now());
        stage_insert(uow, entity)
    }

    pub fn insert_many(
        &self,
        uow: &mut UnitOfWork,
        entities: &mut [E],
    ) -> RepoResult<Vec<StageTicket>> {
        uow.session()?;
        for entity in entities.iter() {
            check_insertable(entity)?;
        }
        let now = self.now();
        let mut tickets = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            entity.audit_mut().mark_created(now);
            tickets.push(stage_insert(uow, entity)?);
        }
        Ok(tickets)
    }

    /// Stamps `date_of_update` and stages a token-guarded update.
    pub fn update_one(&self, uow: &mut UnitOfWork, entity: &mut E) -> RepoResult<StageTicket> {
        uow.session()?;
        check_mutable(entity)?;
        entity.audit_mut().mark_updated(self.now());
        stage_update(uow, entity)
    }

    pub fn update_many(
        &self,
        uow: &mut UnitOfWork,
        entities: &mut [E],
    ) -> RepoResult<Vec<StageTicket>> {
        uow.session()?;
        for entity in entities.iter() {
            check_mutable(entity)?;
        }
        let now = self.now();
        let mut tickets = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            entity.audit_mut().mark_updated(now);
            tickets.push(stage_update(uow, entity)?);
        }
        Ok(tickets)
    }

    /// Stages a token-guarded physical removal.
    pub fn delete_hard_one(&self, uow: &mut UnitOfWork, entity: &E) -> RepoResult<StageTicket> {
        uow.session()?;
        check_loaded(entity)?;
        stage_delete(uow, entity)
    }

    /// Loads the row (deleted rows included) and stages its removal.
    pub fn delete_hard_by_id(&self, uow: &mut UnitOfWork, id: EntityId) -> RepoResult<StageTicket> {
        let entity = self.require_by_id(uow, id, true)?;
        stage_delete(uow, &entity)
    }

    pub fn delete_hard_many(
        &self,
        uow: &mut UnitOfWork,
        entities: &[E],
    ) -> RepoResult<Vec<StageTicket>> {
        uow.session()?;
        for entity in entities {
            check_loaded(entity)?;
        }
        entities
            .iter()
            .map(|entity| stage_delete(uow, entity))
            .collect()
    }

    /// Sets the deletion marker and stages the entity through the update path.
    ///
    /// Soft-deleted entities are terminal; deleting one again is a
    /// `Lifecycle` error.
    pub fn delete_soft_one(&self, uow: &mut UnitOfWork, entity: &mut E) -> RepoResult<StageTicket> {
        uow.session()?;
        check_mutable(entity)?;
        let now = self.now();
        entity.audit_mut().mark_deleted(now);
        entity.audit_mut().mark_updated(now);
        stage_update(uow, entity)
    }

    /// Loads a visible row and soft-deletes it. Returns the stamped entity.
    pub fn delete_soft_by_id(
        &self,
        uow: &mut UnitOfWork,
        id: EntityId,
    ) -> RepoResult<(E, StageTicket)> {
        let mut entity = self.require_by_id(uow, id, false)?;
        let ticket = self.delete_soft_one(uow, &mut entity)?;
        Ok((entity, ticket))
    }

    pub fn delete_soft_many(
        &self,
        uow: &mut UnitOfWork,
        entities: &mut [E],
    ) -> RepoResult<Vec<StageTicket>> {
        uow.session()?;
        for entity in entities.iter() {
            check_mutable(entity)?;
        }
        let now = self.now();
        let mut tickets = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            entity.audit_mut().mark_deleted(now);
            entity.audit_mut().mark_updated(now);
            tickets.push(stage_update(uow, entity)?);
        }
        Ok(tickets)
    }

    /// Rows under the specification's visibility, ordering, inclusion and
    /// paging. The filter is not evaluated.
    pub fn get_all(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Vec<E>> {
        let mut plan = ReadPlan::from_spec(spec);
        plan.filter = None;
        self.select(uow, plan)
    }

    /// Rows under the full specification.
    pub fn get(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Vec<E>> {
        self.select(uow, ReadPlan::from_spec(spec))
    }

    /// The single matching row.
    ///
    /// # Errors
    /// - `MultipleResults` when more than one row matches.
    pub fn get_one(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Option<E>> {
        let plan = ReadPlan {
            order_by: &[],
            skip: None,
            take: Some(2),
            ..ReadPlan::from_spec(spec)
        };
        let mut rows = self.select(uow, plan)?;
        if rows.len() > 1 {
            let count = self.get_count(uow, spec)?;
            return Err(RepoError::MultipleResults {
                entity_type: E::ENTITY_TYPE,
                count: usize::try_from(count).unwrap_or(usize::MAX),
            });
        }
        Ok(rows.pop())
    }

    /// The first matching row under the specification's ordering.
    pub fn get_first(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Option<E>> {
        let plan = ReadPlan {
            skip: None,
            take: Some(1),
            ..ReadPlan::from_spec(spec)
        };
        Ok(self.select(uow, plan)?.pop())
    }

    /// Row by primary key. Soft-deleted rows are only returned when
    /// `include_deleted` is set.
    pub fn get_by_id(
        &self,
        uow: &UnitOfWork,
        id: EntityId,
        include_deleted: bool,
    ) -> RepoResult<Option<E>> {
        let filter = Filter::eq(schema::ID, id);
        let plan = ReadPlan {
            filter: Some(&filter),
            order_by: &[],
            include: &[],
            skip: None,
            take: Some(1),
            include_deleted,
        };
        Ok(self.select(uow, plan)?.pop())
    }

    /// Number of matching rows. Uses filter and visibility only.
    pub fn get_count(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<u64> {
        let conn = uow.session()?;
        let known = known_columns::<E>();
        let clause = where_clause(
            spec.filter.as_ref(),
            spec.include_deleted,
            &known,
            uow.dialect(),
        )?;
        let sql = format!("SELECT COUNT(*) FROM {}{};", E::TABLE, clause.sql);
        let count: i64 = conn.query_row(&sql, params_from_iter(clause.binds), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Whether any row matches. Uses filter and visibility only.
    pub fn get_exists(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<bool> {
        let conn = uow.session()?;
        let known = known_columns::<E>();
        let clause = where_clause(
            spec.filter.as_ref(),
            spec.include_deleted,
            &known,
            uow.dialect(),
        )?;
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {}{});", E::TABLE, clause.sql);
        let exists: bool =
            conn.query_row(&sql, params_from_iter(clause.binds), |row| row.get(0))?;
        Ok(exists)
    }

    pub async fn get_all_async(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Vec<E>> {
        self.get_all(uow, spec)
    }

    pub async fn get_async(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Vec<E>> {
        self.get(uow, spec)
    }

    pub async fn get_one_async(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<Option<E>> {
        self.get_one(uow, spec)
    }

    pub async fn get_first_async(
        &self,
        uow: &UnitOfWork,
        spec: &QuerySpec,
    ) -> RepoResult<Option<E>> {
        self.get_first(uow, spec)
    }

    pub async fn get_by_id_async(
        &self,
        uow: &UnitOfWork,
        id: EntityId,
        include_deleted: bool,
    ) -> RepoResult<Option<E>> {
        self.get_by_id(uow, id, include_deleted)
    }

    pub async fn get_count_async(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<u64> {
        self.get_count(uow, spec)
    }

    pub async fn get_exists_async(&self, uow: &UnitOfWork, spec: &QuerySpec) -> RepoResult<bool> {
        self.get_exists(uow, spec)
    }

    fn require_by_id(
        &self,
        uow: &UnitOfWork,
        id: EntityId,
        include_deleted: bool,
    ) -> RepoResult<E> {
        self.get_by_id(uow, id, include_deleted)?
            .ok_or(RepoError::NotFound {
                entity_type: E::ENTITY_TYPE,
                id,
            })
    }

    fn select(&self, uow: &UnitOfWork, plan: ReadPlan<'_>) -> RepoResult<Vec<E>> {
        let conn = uow.session()?;
        let dialect = uow.dialect();
        for relation in plan.include {
            if !E::relations().contains(&relation.as_str()) {
                return Err(RepoError::InvalidQuery(format!(
                    "unknown relation `{relation}` on {}",
                    E::ENTITY_TYPE
                )));
            }
        }

        let known = known_columns::<E>();
        let clause = where_clause(plan.filter, plan.include_deleted, &known, dialect)?;
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            select_list::<E>(dialect),
            E::TABLE,
            clause.sql
        );
        sql.push_str(&order_clause(plan.order_by, &known)?);
        let mut bind_values = clause.binds;
        sql.push_str(&paging_clause(plan.skip, plan.take, &mut bind_values));
        sql.push(';');

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            let header = read_header(row, dialect)?;
            entities.push(E::from_row(row, header)?);
        }

        for entity in &mut entities {
            for relation in plan.include {
                entity.load_relation(conn, dialect, relation)?;
            }
        }

        debug!(
            "event=repo_select module=repo status=ok table={} rows={}",
            E::TABLE,
            entities.len()
        );
        Ok(entities)
    }
}

pub(crate) fn check_insertable<E: TableMapping>(entity: &E) -> RepoResult<()> {
    if entity.id().is_some() {
        return Err(RepoError::Lifecycle {
            entity_type: E::ENTITY_TYPE,
            reason: "is already inserted",
        });
    }
    check_valid(entity)
}

pub(crate) fn check_loaded<E: TableMapping>(entity: &E) -> RepoResult<()> {
    if entity.id().is_none() || entity.concurrency_token().is_none() {
        return Err(RepoError::Lifecycle {
            entity_type: E::ENTITY_TYPE,
            reason: "was never loaded from storage",
        });
    }
    Ok(())
}

/// Loaded, not soft-deleted and valid.
pub(crate) fn check_mutable<E: TableMapping>(entity: &E) -> RepoResult<()> {
    check_loaded(entity)?;
    if entity.is_deleted() {
        return Err(RepoError::Lifecycle {
            entity_type: E::ENTITY_TYPE,
            reason: "is already soft-deleted",
        });
    }
    check_valid(entity)
}

pub(crate) fn check_valid<E: TableMapping>(entity: &E) -> RepoResult<()> {
    let actual = entity.column_values().len();
    if actual != E::columns().len() {
        return Err(RepoError::InvalidMapping {
            entity_type: E::ENTITY_TYPE,
            expected: E::columns().len(),
            actual,
        });
    }
    entity
        .validate()
        .map_err(|message| RepoError::Validation {
            entity_type: E::ENTITY_TYPE,
            message,
        })
}

fn stage_insert<E: TableMapping>(uow: &mut UnitOfWork, entity: &E) -> RepoResult<StageTicket> {
    let write = render_write(WriteKind::Insert, schema::INSERT_AUDIT_COLUMNS, entity)?;
    Ok(uow.stage(write)?)
}

fn stage_update<E: TableMapping>(uow: &mut UnitOfWork, entity: &E) -> RepoResult<StageTicket> {
    let write = render_write(WriteKind::Update, schema::UPDATE_AUDIT_COLUMNS, entity)?;
    Ok(uow.stage(write)?)
}

fn stage_delete<E: TableMapping>(uow: &mut UnitOfWork, entity: &E) -> RepoResult<StageTicket> {
    let write = render_write(WriteKind::Delete, &[], entity)?;
    Ok(uow.stage(write)?)
}

fn render_write<E: TableMapping>(
    kind: WriteKind,
    audit_columns: &[&'static str],
    entity: &E,
) -> RepoResult<StagedWrite> {
    let (columns, values) = if kind == WriteKind::Delete {
        (Vec::new(), Vec::new())
    } else {
        let mut columns = audit_columns.to_vec();
        columns.extend(E::columns().iter().map(|column| column.name));
        let mut values = audit_values(entity, audit_columns);
        values.extend(entity.column_values());
        (columns, values)
    };

    Ok(StagedWrite {
        kind,
        entity_type: E::ENTITY_TYPE,
        table: E::TABLE,
        id: entity.id(),
        global_id: entity.global_id(),
        token: entity.concurrency_token().cloned(),
        columns,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::{RepoError, Repository};
    use crate::clock::FixedClock;
    use crate::db::dialect::Dialect;
    use crate::model::entity::{
        AuditTrail, Auditable, Identifiable, Identity, VersionControlled, Versioning,
    };
    use crate::model::token::VersionToken;
    use crate::repo::mapping::{ColumnDef, RecordHeader, TableMapping};
    use crate::uow::unit_of_work::UnitOfWork;
    use rusqlite::types::Value;
    use rusqlite::{Connection, Row};
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct Note {
        identity: Identity,
        audit: AuditTrail,
        versioning: Versioning,
        title: String,
    }

    impl Note {
        fn draft(title: &str) -> Self {
            Self {
                identity: Identity::new(),
                audit: AuditTrail::new(),
                versioning: Versioning::new(),
                title: title.to_string(),
            }
        }

        fn stored(id: i64, title: &str) -> Self {
            Self {
                identity: Identity::restore(id, Uuid::new_v4()),
                versioning: Versioning::restore(VersionToken::from_row_stamp(1), 0),
                ..Self::draft(title)
            }
        }
    }

    impl Identifiable for Note {
        fn identity(&self) -> &Identity {
            &self.identity
        }

        fn identity_mut(&mut self) -> &mut Identity {
            &mut self.identity
        }
    }

    impl Auditable for Note {
        fn audit(&self) -> &AuditTrail {
            &self.audit
        }

        fn audit_mut(&mut self) -> &mut AuditTrail {
            &mut self.audit
        }
    }

    impl VersionControlled for Note {
        fn versioning(&self) -> &Versioning {
            &self.versioning
        }

        fn versioning_mut(&mut self) -> &mut Versioning {
            &mut self.versioning
        }
    }

    impl TableMapping for Note {
        const TABLE: &'static str = "notes";
        const ENTITY_TYPE: &'static str = "Note";

        fn columns() -> &'static [ColumnDef] {
            const COLUMNS: &[ColumnDef] = &[ColumnDef::new("title", "TEXT NOT NULL")];
            COLUMNS
        }

        // `unmapped` notes return no values to exercise the mapping check.
        fn column_values(&self) -> Vec<Value> {
            if self.title == "unmapped" {
                return Vec::new();
            }
            vec![Value::Text(self.title.clone())]
        }

        fn from_row(row: &Row<'_>, header: RecordHeader) -> rusqlite::Result<Self> {
            Ok(Self {
                identity: header.identity,
                audit: header.audit,
                versioning: header.versioning,
                title: row.get("title")?,
            })
        }
    }

    fn unit() -> UnitOfWork {
        UnitOfWork::new(Connection::open_in_memory().unwrap(), Dialect::PostgreSql)
    }

    fn repo() -> Repository<Note> {
        Repository::with_clock(Arc::new(FixedClock(42)))
    }

    #[test]
    fn mapping_mismatch_rejects_whole_batch_before_staging() {
        let mut uow = unit();
        let mut batch = vec![Note::draft("first"), Note::draft("unmapped")];

        let err = repo().insert_many(&mut uow, &mut batch).unwrap_err();

        assert!(matches!(
            err,
            RepoError::InvalidMapping {
                expected: 1,
                actual: 0,
                ..
            }
        ));
        assert_eq!(uow.pending(), 0);
        assert!(batch[0].audit().date_of_creation().is_none());

        let mut loaded = vec![Note::stored(1, "kept"), Note::stored(2, "unmapped")];
        assert!(repo().update_many(&mut uow, &mut loaded).is_err());
        assert_eq!(uow.pending(), 0);
    }

    #[test]
    fn soft_deleted_entities_only_accept_hard_delete() {
        let mut uow = unit();
        let mut note = Note::stored(7, "gone");
        note.audit_mut().mark_deleted(10);

        for err in [
            repo().update_one(&mut uow, &mut note).unwrap_err(),
            repo().delete_soft_one(&mut uow, &mut note).unwrap_err(),
            repo()
                .delete_soft_many(&mut uow, std::slice::from_mut(&mut note))
                .unwrap_err(),
        ] {
            assert!(matches!(err, RepoError::Lifecycle { .. }), "{err}");
        }
        assert_eq!(uow.pending(), 0);
        assert_eq!(note.audit().date_of_deletion(), Some(10));
        assert!(note.audit().date_of_update().is_none());

        repo().delete_hard_one(&mut uow, &note).unwrap();
        assert_eq!(uow.pending(), 1);
    }

    #[test]
    fn soft_delete_stamps_deletion_and_update_dates() {
        let mut uow = unit();
        let mut note = Note::stored(3, "live");

        repo().delete_soft_one(&mut uow, &mut note).unwrap();

        assert!(note.is_deleted());
        assert_eq!(note.audit().date_of_deletion(), Some(42));
        assert_eq!(note.audit().date_of_update(), Some(42));
        assert_eq!(uow.pending(), 1);
    }
}
