//! Unit of Work: one transaction per change-set.

pub mod unit_of_work;
