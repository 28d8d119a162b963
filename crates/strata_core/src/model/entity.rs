//! Capability contracts shared by every persisted entity.
//!
//! # Responsibility
//! - Define the three value parts every entity embeds: `Identity`,
//!   `AuditTrail`, `Versioning`.
//! - Define one capability trait per part so callers depend only on the
//!   capability they need.
//!
//! # Invariants
//! - `id` is assigned once by the backend and never changes afterwards.
//! - `is_deleted()` is derived from `date_of_deletion`, so the two cannot
//!   disagree.
//! - `date_of_creation` and `date_of_deletion` are written at most once.
//! - Audit stamps are written by the persistence layers only; callers own the
//!   capability flags and the informational `version`.

use crate::model::token::VersionToken;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend-assigned primary key.
pub type EntityId = i64;

/// Unix epoch milliseconds.
pub type Timestamp = i64;

/// Primary key and cross-system correlation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: Option<EntityId>,
    global_id: Option<Uuid>,
}

impl Identity {
    /// Identity of an entity that has not been inserted yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity carrying a caller-provided global id.
    ///
    /// Used by import paths where the correlation id already exists
    /// elsewhere. The backend keeps it instead of generating one.
    pub fn with_global_id(global_id: Uuid) -> Self {
        Self {
            id: None,
            global_id: Some(global_id),
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn global_id(&self) -> Option<Uuid> {
        self.global_id
    }

    pub(crate) fn restore(id: EntityId, global_id: Uuid) -> Self {
        Self {
            id: Some(id),
            global_id: Some(global_id),
        }
    }

    /// Records backend-assigned keys. Already assigned values are kept.
    pub(crate) fn assign(&mut self, id: EntityId, global_id: Option<Uuid>) {
        if self.id.is_none() {
            self.id = Some(id);
        }
        if self.global_id.is_none() {
            self.global_id = global_id;
        }
    }
}

/// Per-entity authorization gates for mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_be_updated: bool,
    pub can_be_soft_deleted: bool,
    pub can_be_hard_deleted: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_be_updated: true,
            can_be_soft_deleted: true,
            can_be_hard_deleted: true,
        }
    }
}

impl Capabilities {
    /// Capabilities of a record that may never change after insert.
    pub fn read_only() -> Self {
        Self {
            can_be_updated: false,
            can_be_soft_deleted: false,
            can_be_hard_deleted: false,
        }
    }
}

/// Audit stamps, deletion marker and capability flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub(crate) created_by: Option<String>,
    pub(crate) updated_by: Option<String>,
    pub(crate) deleted_by: Option<String>,
    pub(crate) date_of_creation: Option<Timestamp>,
    pub(crate) date_of_update: Option<Timestamp>,
    pub(crate) date_of_deletion: Option<Timestamp>,
    pub capabilities: Capabilities,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn updated_by(&self) -> Option<&str> {
        self.updated_by.as_deref()
    }

    pub fn deleted_by(&self) -> Option<&str> {
        self.deleted_by.as_deref()
    }

    pub fn date_of_creation(&self) -> Option<Timestamp> {
        self.date_of_creation
    }

    pub fn date_of_update(&self) -> Option<Timestamp> {
        self.date_of_update
    }

    pub fn date_of_deletion(&self) -> Option<Timestamp> {
        self.date_of_deletion
    }

    /// Soft-delete state. True iff a deletion date is recorded.
    pub fn is_deleted(&self) -> bool {
        self.date_of_deletion.is_some()
    }

    pub(crate) fn mark_created(&mut self, at: Timestamp) {
        if self.date_of_creation.is_none() {
            self.date_of_creation = Some(at);
        }
    }

    pub(crate) fn mark_updated(&mut self, at: Timestamp) {
        self.date_of_update = Some(at);
    }

    pub(crate) fn mark_deleted(&mut self, at: Timestamp) {
        if self.date_of_deletion.is_none() {
            self.date_of_deletion = Some(at);
        }
    }

    pub(crate) fn set_created_by(&mut self, principal: Option<String>) {
        self.created_by = principal;
    }

    pub(crate) fn set_updated_by(&mut self, principal: Option<String>) {
        self.updated_by = principal;
    }

    pub(crate) fn set_deleted_by(&mut self, principal: Option<String>) {
        self.deleted_by = principal;
    }
}

/// Concurrency token plus the informational version counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioning {
    token: Option<VersionToken>,
    version: i16,
}

impl Default for Versioning {
    fn default() -> Self {
        Self {
            token: None,
            version: 1,
        }
    }
}

impl Versioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<&VersionToken> {
        self.token.as_ref()
    }

    pub fn version(&self) -> i16 {
        self.version
    }

    /// Sets the informational counter. Never used for conflict detection.
    pub fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    pub(crate) fn restore(token: VersionToken, version: i16) -> Self {
        Self {
            token: Some(token),
            version,
        }
    }

    pub(crate) fn set_token(&mut self, token: VersionToken) {
        self.token = Some(token);
    }
}

/// Entities addressable by backend id and global id.
pub trait Identifiable {
    fn identity(&self) -> &Identity;
    fn identity_mut(&mut self) -> &mut Identity;

    fn id(&self) -> Option<EntityId> {
        self.identity().id()
    }

    fn global_id(&self) -> Option<Uuid> {
        self.identity().global_id()
    }
}

/// Entities carrying audit stamps and capability flags.
pub trait Auditable {
    fn audit(&self) -> &AuditTrail;
    fn audit_mut(&mut self) -> &mut AuditTrail;

    fn is_deleted(&self) -> bool {
        self.audit().is_deleted()
    }

    fn capabilities(&self) -> Capabilities {
        self.audit().capabilities
    }
}

/// Entities guarded by an optimistic concurrency token.
pub trait VersionControlled {
    fn versioning(&self) -> &Versioning;
    fn versioning_mut(&mut self) -> &mut Versioning;

    fn concurrency_token(&self) -> Option<&VersionToken> {
        self.versioning().token()
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditTrail, Capabilities, Identity, Versioning};
    use uuid::Uuid;

    #[test]
    fn capabilities_default_to_all_allowed() {
        let caps = Capabilities::default();
        assert!(caps.can_be_updated);
        assert!(caps.can_be_soft_deleted);
        assert!(caps.can_be_hard_deleted);
    }

    #[test]
    fn deletion_marker_is_written_once() {
        let mut audit = AuditTrail::new();
        assert!(!audit.is_deleted());

        audit.mark_deleted(100);
        audit.mark_deleted(200);
        assert!(audit.is_deleted());
        assert_eq!(audit.date_of_deletion(), Some(100));
    }

    #[test]
    fn creation_date_is_written_once() {
        let mut audit = AuditTrail::new();
        audit.mark_created(10);
        audit.mark_created(20);
        assert_eq!(audit.date_of_creation(), Some(10));
    }

    #[test]
    fn assign_keeps_existing_keys() {
        let global_id = Uuid::new_v4();
        let mut identity = Identity::with_global_id(global_id);
        identity.assign(5, Some(Uuid::new_v4()));
        identity.assign(9, None);
        assert_eq!(identity.id(), Some(5));
        assert_eq!(identity.global_id(), Some(global_id));
    }

    #[test]
    fn versioning_defaults_to_version_one_without_token() {
        let versioning = Versioning::new();
        assert_eq!(versioning.version(), 1);
        assert!(versioning.token().is_none());
    }
}
