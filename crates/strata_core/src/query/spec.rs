//! Query specification: filter, ordering, inclusion, paging, visibility.
//!
//! # Invariants
//! - A specification is a description only; building it touches no storage.
//! - `include_deleted = false` always adds `date_of_deletion IS NULL`; explicit
//!   filters are ANDed with it and never replace it.
//! - `skip` is applied before `take`.

use crate::query::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// Reusable, dialect-agnostic read description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub include: Vec<String>,
    pub skip: Option<u32>,
    pub take: Option<u32>,
    pub include_deleted: bool,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate. Repeated calls AND the predicates together.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn order_by_asc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Ascending)
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, SortDirection::Descending)
    }

    /// Requests a named relation to be loaded into each result.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include.push(relation.into());
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u32) -> Self {
        self.take = Some(take);
        self
    }

    pub fn include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    /// Same specification without its filter.
    pub fn without_filter(&self) -> Self {
        Self {
            filter: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{QuerySpec, SortDirection};
    use crate::query::filter::Filter;

    #[test]
    fn default_spec_hides_deleted_rows_and_has_no_paging() {
        let spec = QuerySpec::new();
        assert!(!spec.include_deleted);
        assert!(spec.filter.is_none());
        assert_eq!(spec.skip, None);
        assert_eq!(spec.take, None);
    }

    #[test]
    fn repeated_filters_are_conjoined() {
        let spec = QuerySpec::new()
            .filter(Filter::eq("name", "a"))
            .filter(Filter::gt("age", 3));
        assert_eq!(
            spec.filter,
            Some(Filter::eq("name", "a").and(Filter::gt("age", 3)))
        );
    }

    #[test]
    fn builder_records_ordering_and_paging() {
        let spec = QuerySpec::new()
            .order_by_desc("date_of_creation")
            .order_by_asc("id")
            .skip(2)
            .take(3);
        assert_eq!(spec.order_by.len(), 2);
        assert_eq!(spec.order_by[0].direction, SortDirection::Descending);
        assert_eq!(spec.skip, Some(2));
        assert_eq!(spec.take, Some(3));
    }

    #[test]
    fn without_filter_keeps_everything_else() {
        let spec = QuerySpec::new()
            .filter(Filter::eq("name", "a"))
            .include("addresses")
            .include_deleted(true);
        let stripped = spec.without_filter();
        assert!(stripped.filter.is_none());
        assert!(stripped.include_deleted);
        assert_eq!(stripped.include, vec!["addresses".to_string()]);
    }
}
