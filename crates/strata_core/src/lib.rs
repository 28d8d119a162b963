//! Generic versioned entity persistence.
//! Repository, Unit of Work and Entity Service over interchangeable SQL
//! dialects, with optimistic concurrency and audit stamping.

pub mod clock;
pub mod config;
pub mod db;
pub mod identity;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;
pub mod uow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, ConnectionResolver, JsonConnectionResolver, StoreConfig};
pub use db::schema::{create_table_sql, ensure_table};
pub use db::{open_session, open_session_in_memory, DbError, Dialect};
pub use identity::{FixedIdentity, IdentitySource};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::entity::{
    AuditTrail, Auditable, Capabilities, EntityId, Identifiable, Identity, Timestamp,
    VersionControlled, Versioning,
};
pub use model::token::VersionToken;
pub use query::filter::{CompareOp, Filter, FilterValue};
pub use query::spec::{OrderBy, QuerySpec, SortDirection};
pub use repo::entity_repo::{RepoError, RepoResult, Repository};
pub use repo::mapping::{ColumnDef, RecordHeader, TableMapping};
pub use service::entity_service::{EntityError, EntityResult, EntityService, Operation};
pub use uow::unit_of_work::{
    SaveReport, StageTicket, TransactionState, UnitOfWork, UowError, UowResult, WriteKind,
    WriteOutcome,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
