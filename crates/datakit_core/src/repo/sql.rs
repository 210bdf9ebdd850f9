//! SQL text builders over an `EntityMapping`.
//!
//! # Invariants
//! - Identifiers come from validated mappings and are always quoted.
//! - Every value is bound as a parameter.

use crate::model::entity::Field;
use crate::model::filter::Filter;
use crate::schema::model::EntityMapping;
use rusqlite::types::Value;

/// Incrementally built `SELECT` over one mapped table.
#[derive(Debug, Clone)]
pub(crate) struct SelectQuery<'m> {
    mapping: &'m EntityMapping,
    conditions: Vec<String>,
    params: Vec<Value>,
    order_by_key: bool,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'m> SelectQuery<'m> {
    pub(crate) fn new(mapping: &'m EntityMapping) -> Self {
        Self {
            mapping,
            conditions: Vec::new(),
            params: Vec::new(),
            order_by_key: false,
            limit: None,
            offset: None,
        }
    }

    /// Adds `filter` as a condition; an absent filter leaves the query as is.
    pub(crate) fn filter<F: Field>(mut self, filter: Option<&Filter<F>>) -> Self {
        let Some(filter) = filter else {
            return self;
        };
        let mapping = self.mapping;
        let mut condition = String::new();
        filter.render(
            &|field: F| mapping.quoted_column(field.index()),
            &mut condition,
            &mut self.params,
        );
        self.conditions.push(condition);
        self
    }

    /// Restricts the query to one primary key.
    pub(crate) fn by_key(mut self, key: &[Value]) -> Self {
        self.conditions.push(self.mapping.key_predicate());
        self.params.extend(key.iter().cloned());
        self
    }

    pub(crate) fn order_by_key(mut self) -> Self {
        self.order_by_key = true;
        self
    }

    pub(crate) fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Column list in field order plus `WHERE`/`ORDER BY`/`LIMIT` clauses.
    pub(crate) fn build(self) -> (String, Vec<Value>) {
        let sql = format!(
            "SELECT {} FROM {}",
            self.mapping.select_list(),
            self.mapping.quoted_table()
        );
        self.finish(sql)
    }

    pub(crate) fn build_count(self) -> (String, Vec<Value>) {
        let sql = format!("SELECT COUNT(*) FROM {}", self.mapping.quoted_table());
        self.finish(sql)
    }

    pub(crate) fn build_exists(self) -> (String, Vec<Value>) {
        let inner = format!("SELECT 1 FROM {}", self.mapping.quoted_table());
        let (inner, params) = self.limit(1).finish(inner);
        (format!("SELECT EXISTS ({inner})"), params)
    }

    fn finish(mut self, mut sql: String) -> (String, Vec<Value>) {
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if self.order_by_key {
            sql.push_str(&format!(" ORDER BY {}", self.mapping.key_order()));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                self.params.push(Value::Integer(limit));
                self.params.push(Value::Integer(offset));
            }
            (Some(limit), None) => {
                sql.push_str(" LIMIT ?");
                self.params.push(Value::Integer(limit));
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                self.params.push(Value::Integer(offset));
            }
            (None, None) => {}
        }
        (sql, self.params)
    }
}

pub(crate) fn insert_sql(mapping: &EntityMapping) -> String {
    let placeholders = vec!["?"; mapping.columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        mapping.quoted_table(),
        mapping.select_list()
    )
}

/// `UPDATE` of exactly `fields`, keyed by primary key.
pub(crate) fn update_sql(mapping: &EntityMapping, fields: &[usize]) -> String {
    let assignments = fields
        .iter()
        .map(|index| format!("{} = ?", mapping.quoted_column(*index)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {}",
        mapping.quoted_table(),
        mapping.key_predicate()
    )
}

pub(crate) fn delete_sql(mapping: &EntityMapping) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        mapping.quoted_table(),
        mapping.key_predicate()
    )
}
