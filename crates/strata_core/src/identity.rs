//! Caller-identity source used for audit stamping.
//!
//! # Invariants
//! - An unresolved identity never fails an operation; the audit field is
//!   stored as `NULL`.
//! - Blank principal names are treated as unresolved.

/// Resolves the acting principal for `created_by` / `updated_by` /
/// `deleted_by` stamps.
pub trait IdentitySource {
    /// Returns the current principal name, or `None` when it cannot be
    /// resolved.
    fn current_principal(&self) -> Option<String>;
}

impl<F> IdentitySource for F
where
    F: Fn() -> Option<String>,
{
    fn current_principal(&self) -> Option<String> {
        self()
    }
}

/// Identity source that always reports the same principal.
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity(Option<String>);

impl FixedIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self(Some(principal.into()))
    }

    /// Source that never resolves a principal.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentitySource for FixedIdentity {
    fn current_principal(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Resolves the principal and drops blank names.
pub(crate) fn resolve_principal(source: &impl IdentitySource) -> Option<String> {
    source
        .current_principal()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}
