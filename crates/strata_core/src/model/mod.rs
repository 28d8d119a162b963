//! Versioned, auditable entity model.
//!
//! # Responsibility
//! - Define the record parts and capability traits every entity composes.
//! - Define the opaque concurrency token shared by all dialects.
//!
//! # Invariants
//! - Entities compose `Identifiable + Auditable + VersionControlled`; no base
//!   struct is inherited.
//! - Soft deletion is a recorded deletion date, never a separate flag.

pub mod entity;
pub mod token;
