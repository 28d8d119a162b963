//! Rendering of query specifications into SQLite clauses.
//!
//! # Invariants
//! - Only column names from the entity's known set reach SQL text; every
//!   literal is bound as a parameter.
//! - The visibility predicate is always the first conjunct when deleted rows
//!   are hidden.

use crate::db::dialect::Dialect;
use crate::db::schema;
use crate::query::filter::{CompareOp, Filter, FilterValue};
use crate::query::spec::OrderBy;
use crate::repo::entity_repo::{RepoError, RepoResult};
use rusqlite::types::Value;

/// WHERE clause plus its bind values.
#[derive(Debug, Default)]
pub(crate) struct Clause {
    pub sql: String,
    pub binds: Vec<Value>,
}

pub(crate) fn where_clause(
    filter: Option<&Filter>,
    include_deleted: bool,
    known: &[&str],
    dialect: Dialect,
) -> RepoResult<Clause> {
    let mut clause = Clause::default();
    let mut conjuncts = Vec::new();

    if !include_deleted {
        conjuncts.push(format!("{} IS NULL", schema::DATE_OF_DELETION));
    }
    if let Some(filter) = filter {
        let mut rendered = String::new();
        render(filter, known, dialect, &mut rendered, &mut clause.binds)?;
        conjuncts.push(rendered);
    }

    if !conjuncts.is_empty() {
        clause.sql = format!(" WHERE {}", conjuncts.join(" AND "));
    }
    Ok(clause)
}

pub(crate) fn order_clause(order_by: &[OrderBy], known: &[&str]) -> RepoResult<String> {
    if order_by.is_empty() {
        return Ok(String::new());
    }
    let mut keys = Vec::with_capacity(order_by.len());
    for key in order_by {
        ensure_known(&key.column, known)?;
        keys.push(format!("{} {}", key.column, key.direction.as_sql()));
    }
    Ok(format!(" ORDER BY {}", keys.join(", ")))
}

/// Appends LIMIT/OFFSET. `skip` applies before `take`.
pub(crate) fn paging_clause(skip: Option<u32>, take: Option<u32>, binds: &mut Vec<Value>) -> String {
    let offset = skip.filter(|value| *value > 0);
    match (take, offset) {
        (Some(take), Some(skip)) => {
            binds.push(Value::Integer(i64::from(take)));
            binds.push(Value::Integer(i64::from(skip)));
            " LIMIT ? OFFSET ?".to_string()
        }
        (Some(take), None) => {
            binds.push(Value::Integer(i64::from(take)));
            " LIMIT ?".to_string()
        }
        (None, Some(skip)) => {
            binds.push(Value::Integer(i64::from(skip)));
            " LIMIT -1 OFFSET ?".to_string()
        }
        (None, None) => String::new(),
    }
}

fn render(
    filter: &Filter,
    known: &[&str],
    dialect: Dialect,
    sql: &mut String,
    binds: &mut Vec<Value>,
) -> RepoResult<()> {
    match filter {
        Filter::Compare { column, op, value } => {
            ensure_known(column, known)?;
            match (op, value) {
                (CompareOp::Eq, FilterValue::Null) => sql.push_str(&format!("{column} IS NULL")),
                (CompareOp::Ne, FilterValue::Null) => {
                    sql.push_str(&format!("{column} IS NOT NULL"))
                }
                _ => {
                    sql.push_str(&format!("{column} {} ?", op.as_sql()));
                    binds.push(to_value(value, dialect));
                }
            }
        }
        Filter::Like { column, pattern } => {
            ensure_known(column, known)?;
            sql.push_str(&format!("{column} LIKE ?"));
            binds.push(Value::Text(pattern.clone()));
        }
        Filter::In { column, values } => {
            ensure_known(column, known)?;
            if values.is_empty() {
                sql.push_str("1 = 0");
            } else {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{column} IN ({placeholders})"));
                binds.extend(values.iter().map(|value| to_value(value, dialect)));
            }
        }
        Filter::IsNull(column) => {
            ensure_known(column, known)?;
            sql.push_str(&format!("{column} IS NULL"));
        }
        Filter::IsNotNull(column) => {
            ensure_known(column, known)?;
            sql.push_str(&format!("{column} IS NOT NULL"));
        }
        Filter::And(items) => render_group(items, " AND ", "1 = 1", known, dialect, sql, binds)?,
        Filter::Or(items) => render_group(items, " OR ", "1 = 0", known, dialect, sql, binds)?,
        Filter::Not(inner) => {
            sql.push_str("NOT (");
            render(inner, known, dialect, sql, binds)?;
            sql.push(')');
        }
    }
    Ok(())
}

fn render_group(
    items: &[Filter],
    separator: &str,
    empty: &str,
    known: &[&str],
    dialect: Dialect,
    sql: &mut String,
    binds: &mut Vec<Value>,
) -> RepoResult<()> {
    if items.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    sql.push('(');
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            sql.push_str(separator);
        }
        render(item, known, dialect, sql, binds)?;
    }
    sql.push(')');
    Ok(())
}

fn ensure_known(column: &str, known: &[&str]) -> RepoResult<()> {
    if known.contains(&column) {
        Ok(())
    } else {
        Err(RepoError::InvalidQuery(format!("unknown column `{column}`")))
    }
}

fn to_value(value: &FilterValue, dialect: Dialect) -> Value {
    match value {
        FilterValue::Null => Value::Null,
        FilterValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        FilterValue::Integer(number) => Value::Integer(*number),
        FilterValue::Real(number) => Value::Real(*number),
        FilterValue::Text(text) => Value::Text(text.clone()),
        FilterValue::Blob(bytes) => Value::Blob(bytes.clone()),
        FilterValue::Uuid(uuid) => dialect.global_id_value(*uuid),
    }
}

#[cfg(test)]
mod tests {
    use super::{order_clause, paging_clause, where_clause};
    use crate::db::dialect::Dialect;
    use crate::query::filter::Filter;
    use crate::query::spec::{OrderBy, SortDirection};
    use crate::repo::entity_repo::RepoError;
    use rusqlite::types::Value;

    const KNOWN: &[&str] = &["id", "name", "city", "date_of_deletion"];

    #[test]
    fn hidden_deleted_rows_are_anded_with_explicit_filter() {
        let filter = Filter::eq("name", "ada").or(Filter::eq("city", "Oslo"));
        let clause = where_clause(Some(&filter), false, KNOWN, Dialect::MsSql).unwrap();
        assert_eq!(
            clause.sql,
            " WHERE date_of_deletion IS NULL AND (name = ? OR city = ?)"
        );
        assert_eq!(
            clause.binds,
            vec![Value::Text("ada".into()), Value::Text("Oslo".into())]
        );
    }

    #[test]
    fn include_deleted_without_filter_has_no_where() {
        let clause = where_clause(None, true, KNOWN, Dialect::MsSql).unwrap();
        assert!(clause.sql.is_empty());
    }

    #[test]
    fn null_comparisons_become_null_checks() {
        let filter = Filter::eq("city", Option::<String>::None);
        let clause = where_clause(Some(&filter), true, KNOWN, Dialect::MsSql).unwrap();
        assert_eq!(clause.sql, " WHERE city IS NULL");
        assert!(clause.binds.is_empty());
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let filter = Filter::is_in("id", Vec::<i64>::new());
        let clause = where_clause(Some(&filter), true, KNOWN, Dialect::MsSql).unwrap();
        assert_eq!(clause.sql, " WHERE 1 = 0");
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let filter = Filter::eq("name; DROP TABLE x", 1);
        let err = where_clause(Some(&filter), false, KNOWN, Dialect::MsSql).unwrap_err();
        assert!(matches!(err, RepoError::InvalidQuery(_)));

        let order = vec![OrderBy {
            column: "nope".to_string(),
            direction: SortDirection::Ascending,
        }];
        assert!(order_clause(&order, KNOWN).is_err());
    }

    #[test]
    fn paging_binds_take_then_skip() {
        let mut binds = Vec::new();
        let sql = paging_clause(Some(2), Some(3), &mut binds);
        assert_eq!(sql, " LIMIT ? OFFSET ?");
        assert_eq!(binds, vec![Value::Integer(3), Value::Integer(2)]);

        let mut binds = Vec::new();
        assert_eq!(paging_clause(Some(4), None, &mut binds), " LIMIT -1 OFFSET ?");
    }
}
