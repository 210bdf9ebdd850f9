//! Immutable schema model produced by the registry.
//!
//! # Responsibility
//! - Hold one validated `EntityMapping` per mapped entity type.
//! - Render SQL fragments and DDL that follow the mappings.
//!
//! # Invariants
//! - A model is never mutated after `build_schema` returns it.
//! - `EntityMapping::columns[i]` backs field `Field::ALL[i]`.

use crate::db::DbResult;
use crate::model::entity::Entity;
use crate::schema::builder::SqlType;
use log::info;
use rusqlite::Connection;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Storage shape of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub field_name: &'static str,
    pub column: String,
    pub sql_type: Option<SqlType>,
    pub required: bool,
    pub default_sql: Option<String>,
}

/// Relationship from this entity's columns to a principal table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyMapping {
    pub fields: Vec<usize>,
    pub principal_table: String,
    pub principal_columns: Vec<String>,
    pub cascade_delete: bool,
}

/// Validated storage shape of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    pub(crate) type_id: TypeId,
    pub entity_name: &'static str,
    pub table: String,
    pub columns: Vec<ColumnMapping>,
    /// Field indexes forming the primary key, in key order.
    pub key: Vec<usize>,
    pub unique_indexes: Vec<Vec<usize>>,
    pub foreign_keys: Vec<ForeignKeyMapping>,
}

impl EntityMapping {
    pub fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    /// Quoted column for the field at `index`.
    pub fn quoted_column(&self, index: usize) -> String {
        quote_ident(&self.columns[index].column)
    }

    /// Comma-separated quoted columns in field order.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| quote_ident(&column.column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `"a" = ? AND "b" = ?` over the key columns.
    pub fn key_predicate(&self) -> String {
        self.key
            .iter()
            .map(|index| format!("{} = ?", self.quoted_column(*index)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Primary-key column list, used for stable ordering.
    pub fn key_order(&self) -> String {
        self.key
            .iter()
            .map(|index| self.quoted_column(*index))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_key_field(&self, index: usize) -> bool {
        self.key.contains(&index)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this mapping.
    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut definition = quote_ident(&column.column);
                if let Some(sql_type) = column.sql_type {
                    definition.push(' ');
                    definition.push_str(sql_type.as_sql());
                }
                if column.required {
                    definition.push_str(" NOT NULL");
                }
                if let Some(default_sql) = &column.default_sql {
                    definition.push_str(&format!(" DEFAULT ({default_sql})"));
                }
                definition
            })
            .collect();

        parts.push(format!("PRIMARY KEY ({})", self.key_order()));

        for unique in &self.unique_indexes {
            let columns = unique
                .iter()
                .map(|index| self.quoted_column(*index))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("UNIQUE ({columns})"));
        }

        for foreign_key in &self.foreign_keys {
            let columns = foreign_key
                .fields
                .iter()
                .map(|index| self.quoted_column(*index))
                .collect::<Vec<_>>()
                .join(", ");
            let principal_columns = foreign_key
                .principal_columns
                .iter()
                .map(|column| quote_ident(column))
                .collect::<Vec<_>>()
                .join(", ");
            let mut clause = format!(
                "FOREIGN KEY ({columns}) REFERENCES {} ({principal_columns})",
                quote_ident(&foreign_key.principal_table)
            );
            if foreign_key.cascade_delete {
                clause.push_str(" ON DELETE CASCADE");
            }
            parts.push(clause);
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.quoted_table(),
            parts.join(",\n    ")
        )
    }
}

/// One descriptor or entity that was reported and left out of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub source: String,
    pub message: String,
}

/// Aggregate of every applied mapping.
#[derive(Debug, Default)]
pub struct SchemaModel {
    mappings: HashMap<TypeId, Arc<EntityMapping>>,
    failures: Vec<MappingFailure>,
}

impl SchemaModel {
    pub(crate) fn new(mappings: Vec<EntityMapping>, failures: Vec<MappingFailure>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|mapping| (mapping.type_id, Arc::new(mapping)))
                .collect(),
            failures,
        }
    }

    pub fn mapping_for<E: Entity>(&self) -> Option<Arc<EntityMapping>> {
        self.mapping_by_type(TypeId::of::<E>())
    }

    pub(crate) fn mapping_by_type(&self, type_id: TypeId) -> Option<Arc<EntityMapping>> {
        self.mappings.get(&type_id).cloned()
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<E>())
    }

    /// Mapped entity names, sorted.
    pub fn entity_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .mappings
            .values()
            .map(|mapping| mapping.entity_name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Failures reported and skipped while building this model.
    pub fn failures(&self) -> &[MappingFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Creates every mapped table that does not exist yet, in one transaction.
    ///
    /// Principal tables of foreign keys are created first when they are part
    /// of this model.
    pub fn ensure_created(&self, conn: &Connection) -> DbResult<usize> {
        let ordered = self.creation_order();
        let tx = conn.unchecked_transaction()?;
        for mapping in &ordered {
            tx.execute_batch(&mapping.create_table_sql())?;
        }
        tx.commit()?;

        info!(
            "event=schema_ensure_created module=schema status=ok tables={}",
            ordered.len()
        );
        Ok(ordered.len())
    }

    fn creation_order(&self) -> Vec<Arc<EntityMapping>> {
        let mut pending: Vec<Arc<EntityMapping>> = self.mappings.values().cloned().collect();
        pending.sort_by(|a, b| a.table.cmp(&b.table));

        let mut ordered: Vec<Arc<EntityMapping>> = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready = pending.iter().position(|candidate| {
                candidate.foreign_keys.iter().all(|foreign_key| {
                    foreign_key.principal_table == candidate.table
                        || ordered
                            .iter()
                            .any(|done| done.table == foreign_key.principal_table)
                        || !pending
                            .iter()
                            .any(|other| other.table == foreign_key.principal_table)
                })
            });
            // A reference cycle falls back to name order; SQLite resolves
            // foreign keys lazily so creation still succeeds.
            let next = ready.unwrap_or(0);
            ordered.push(pending.remove(next));
        }
        ordered
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
