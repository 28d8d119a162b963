//! Service layer: capability gates, audit stamping and error translation.

pub mod entity_service;
