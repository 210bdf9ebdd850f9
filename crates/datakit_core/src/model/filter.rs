//! Typed query predicates.
//!
//! # Responsibility
//! - Describe boolean predicates over entity fields without closures, so the
//!   engine evaluates them.
//! - Render predicates into parameterised SQL.
//!
//! # Invariants
//! - Values are always bound as parameters, never inlined into SQL text.
//! - Empty `And` is true, empty `Or` and empty `In` are false.

use crate::model::entity::Field;
use rusqlite::types::Value;

/// Comparison operator for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Comparison {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Boolean predicate over the fields `F` of one entity type.
#[derive(Debug, Clone)]
pub enum Filter<F> {
    Compare(F, Comparison, Value),
    IsNull(F),
    IsNotNull(F),
    In(F, Vec<Value>),
    And(Vec<Filter<F>>),
    Or(Vec<Filter<F>>),
    Not(Box<Filter<F>>),
}

impl<F: Field> Filter<F> {
    pub fn eq(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Eq, value.into())
    }

    pub fn ne(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Ne, value.into())
    }

    pub fn lt(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Lt, value.into())
    }

    pub fn le(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Le, value.into())
    }

    pub fn gt(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Gt, value.into())
    }

    pub fn ge(field: F, value: impl Into<Value>) -> Self {
        Self::Compare(field, Comparison::Ge, value.into())
    }

    /// SQL `LIKE` pattern match (`%` and `_` wildcards).
    pub fn like(field: F, pattern: impl Into<String>) -> Self {
        Self::Compare(field, Comparison::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(field: F) -> Self {
        Self::IsNull(field)
    }

    pub fn is_not_null(field: F) -> Self {
        Self::IsNotNull(field)
    }

    pub fn one_of<V: Into<Value>>(field: F, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Appends this predicate as SQL to `sql`, pushing bound values to `params`.
    ///
    /// `column` maps a field to its quoted column reference.
    pub(crate) fn render(
        &self,
        column: &dyn Fn(F) -> String,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        match self {
            Self::Compare(field, op, value) => {
                sql.push_str(&format!("{} {} ?", column(*field), op.sql()));
                params.push(value.clone());
            }
            Self::IsNull(field) => sql.push_str(&format!("{} IS NULL", column(*field))),
            Self::IsNotNull(field) => sql.push_str(&format!("{} IS NOT NULL", column(*field))),
            Self::In(_, values) if values.is_empty() => sql.push_str("1 = 0"),
            Self::In(field, values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("{} IN ({placeholders})", column(*field)));
                params.extend(values.iter().cloned());
            }
            Self::And(parts) => render_group(parts, " AND ", "1 = 1", column, sql, params),
            Self::Or(parts) => render_group(parts, " OR ", "1 = 0", column, sql, params),
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(column, sql, params);
                sql.push(')');
            }
        }
    }
}

fn render_group<F: Field>(
    parts: &[Filter<F>],
    joiner: &str,
    empty: &str,
    column: &dyn Fn(F) -> String,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if parts.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (position, part) in parts.iter().enumerate() {
        if position > 0 {
            sql.push_str(joiner);
        }
        part.render(column, sql, params);
    }
    sql.push(')');
}
