//! Dialect-agnostic read descriptions.
//!
//! # Responsibility
//! - Describe which rows a read should see, in which order, and which
//!   relations to load.
//! - Stay free of storage types; the repository renders these into SQL.

pub mod filter;
pub mod spec;
