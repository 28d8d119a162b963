//! Repository layer: entity mapping, query rendering and staged writes.

pub mod entity_repo;
pub mod mapping;
mod sql;
pub(crate) mod write;
