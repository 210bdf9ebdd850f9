//! Statically typed schema builders.
//!
//! # Responsibility
//! - Collect per-entity storage configuration (table, columns, key, indexes,
//!   relationships) through an API typed by the entity's `Field` tokens.
//! - Validate accumulated configuration into immutable `EntityMapping`s.
//!
//! # Invariants
//! - Every entity config starts with one column per field, named after
//!   `Field::name()`, in `Field::ALL` order.
//! - Builders never touch a database; validation is purely structural.

use crate::error::ConfigurationError;
use crate::model::entity::{Entity, Field};
use crate::schema::model::{ColumnMapping, EntityMapping, ForeignKeyMapping};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Declared SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl SqlType {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ColumnConfig {
    pub(crate) field_name: &'static str,
    pub(crate) column: String,
    pub(crate) sql_type: Option<SqlType>,
    pub(crate) required: bool,
    pub(crate) default_sql: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyConfig {
    pub(crate) fields: Vec<usize>,
    pub(crate) principal_table: String,
    pub(crate) principal_columns: Vec<String>,
    pub(crate) cascade_delete: bool,
}

/// Untyped accumulated configuration for one entity type.
#[derive(Debug, Clone)]
pub(crate) struct EntityConfig {
    pub(crate) entity_name: &'static str,
    pub(crate) table: String,
    pub(crate) columns: Vec<ColumnConfig>,
    pub(crate) key: Vec<usize>,
    pub(crate) unique_indexes: Vec<Vec<usize>>,
    pub(crate) foreign_keys: Vec<ForeignKeyConfig>,
}

impl EntityConfig {
    pub(crate) fn for_entity<E: Entity>() -> Self {
        Self {
            entity_name: E::entity_name(),
            table: E::entity_name().to_string(),
            columns: E::Field::ALL
                .iter()
                .map(|field| ColumnConfig {
                    field_name: field.name(),
                    column: field.name().to_string(),
                    sql_type: None,
                    required: false,
                    default_sql: None,
                })
                .collect(),
            key: Vec::new(),
            unique_indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Validates this configuration into an immutable mapping.
    pub(crate) fn validate(&self, type_id: TypeId) -> Result<EntityMapping, ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidMapping {
            entity: self.entity_name.to_string(),
            message,
        };

        if !IDENTIFIER_RE.is_match(&self.table) {
            return Err(invalid(format!("table name `{}` is not a valid identifier", self.table)));
        }
        if self.key.is_empty() {
            return Err(invalid("no primary key declared".to_string()));
        }

        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if !IDENTIFIER_RE.is_match(&column.column) {
                return Err(invalid(format!(
                    "column name `{}` for field `{}` is not a valid identifier",
                    column.column, column.field_name
                )));
            }
            if !seen.insert(column.column.to_ascii_lowercase()) {
                return Err(invalid(format!("column `{}` is mapped twice", column.column)));
            }
        }

        for foreign_key in &self.foreign_keys {
            if foreign_key.fields.len() != foreign_key.principal_columns.len() {
                return Err(invalid(format!(
                    "foreign key to `{}` maps {} field(s) onto {} column(s)",
                    foreign_key.principal_table,
                    foreign_key.fields.len(),
                    foreign_key.principal_columns.len()
                )));
            }
            let names = std::iter::once(&foreign_key.principal_table)
                .chain(foreign_key.principal_columns.iter());
            for name in names {
                if !IDENTIFIER_RE.is_match(name) {
                    return Err(invalid(format!(
                        "foreign key identifier `{name}` is not a valid identifier"
                    )));
                }
            }
        }

        let mut key_required = self.columns.clone();
        for index in &self.key {
            key_required[*index].required = true;
        }

        Ok(EntityMapping {
            type_id,
            entity_name: self.entity_name,
            table: self.table.clone(),
            columns: key_required
                .into_iter()
                .map(|column| ColumnMapping {
                    field_name: column.field_name,
                    column: column.column,
                    sql_type: column.sql_type,
                    required: column.required,
                    default_sql: column.default_sql,
                })
                .collect(),
            key: self.key.clone(),
            unique_indexes: self.unique_indexes.clone(),
            foreign_keys: self
                .foreign_keys
                .iter()
                .map(|foreign_key| ForeignKeyMapping {
                    fields: foreign_key.fields.clone(),
                    principal_table: foreign_key.principal_table.clone(),
                    principal_columns: foreign_key.principal_columns.clone(),
                    cascade_delete: foreign_key.cascade_delete,
                })
                .collect(),
        })
    }
}

/// Typed configuration surface for one entity type.
pub struct EntityTypeBuilder<'a, E: Entity> {
    config: &'a mut EntityConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> EntityTypeBuilder<'a, E> {
    pub(crate) fn new(config: &'a mut EntityConfig) -> Self {
        Self {
            config,
            _entity: PhantomData,
        }
    }

    /// Maps the entity to `table`. Defaults to `Entity::entity_name()`.
    pub fn to_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.config.table = table.into();
        self
    }

    /// Declares the primary key, in key order.
    pub fn has_key(&mut self, fields: &[E::Field]) -> &mut Self {
        self.config.key = dedup_indexes(fields);
        self
    }

    /// Configures the column backing one field.
    pub fn property(&mut self, field: E::Field) -> PropertyBuilder<'_> {
        PropertyBuilder {
            column: &mut self.config.columns[field.index()],
        }
    }

    /// Declares a unique index over the given fields.
    pub fn has_unique_index(&mut self, fields: &[E::Field]) -> &mut Self {
        let index = dedup_indexes(fields);
        if !index.is_empty() && !self.config.unique_indexes.contains(&index) {
            self.config.unique_indexes.push(index);
        }
        self
    }

    /// Declares a relationship: `fields` reference `principal_columns` of
    /// `principal_table`.
    pub fn has_foreign_key(
        &mut self,
        fields: &[E::Field],
        principal_table: impl Into<String>,
        principal_columns: &[&str],
    ) -> ForeignKeyBuilder<'_> {
        self.config.foreign_keys.push(ForeignKeyConfig {
            fields: fields.iter().map(|field| field.index()).collect(),
            principal_table: principal_table.into(),
            principal_columns: principal_columns
                .iter()
                .map(|column| (*column).to_string())
                .collect(),
            cascade_delete: false,
        });
        let last = self.config.foreign_keys.len() - 1;
        ForeignKeyBuilder {
            foreign_key: &mut self.config.foreign_keys[last],
        }
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn key(&self) -> Vec<E::Field> {
        self.config
            .key
            .iter()
            .map(|index| E::Field::ALL[*index])
            .collect()
    }
}

/// Column configuration for one field.
pub struct PropertyBuilder<'a> {
    column: &'a mut ColumnConfig,
}

impl PropertyBuilder<'_> {
    pub fn has_column_name(&mut self, column: impl Into<String>) -> &mut Self {
        self.column.column = column.into();
        self
    }

    pub fn has_column_type(&mut self, sql_type: SqlType) -> &mut Self {
        self.column.sql_type = Some(sql_type);
        self
    }

    /// Marks the column `NOT NULL`.
    pub fn is_required(&mut self) -> &mut Self {
        self.column.required = true;
        self
    }

    /// Raw SQL default expression, e.g. `0` or `CURRENT_TIMESTAMP`.
    pub fn has_default_sql(&mut self, expression: impl Into<String>) -> &mut Self {
        self.column.default_sql = Some(expression.into());
        self
    }
}

pub struct ForeignKeyBuilder<'a> {
    foreign_key: &'a mut ForeignKeyConfig,
}

impl ForeignKeyBuilder<'_> {
    pub fn on_delete_cascade(&mut self) -> &mut Self {
        self.foreign_key.cascade_delete = true;
        self
    }
}

/// Whole-model builder handed to the base schema step and descriptors.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: HashMap<TypeId, EntityConfig>,
    ignored: BTreeSet<IgnoredEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IgnoredEntity {
    name: &'static str,
    type_id: TypeId,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes an entity type from the model. Existing configuration for it
    /// is dropped.
    pub fn ignore<E: Entity>(&mut self) -> &mut Self {
        self.ignore_type(TypeId::of::<E>(), E::entity_name());
        self
    }

    pub(crate) fn ignore_type(&mut self, type_id: TypeId, name: &'static str) {
        self.entities.remove(&type_id);
        self.ignored.insert(IgnoredEntity { name, type_id });
    }

    pub fn is_ignored<E: Entity>(&self) -> bool {
        self.is_type_ignored(TypeId::of::<E>())
    }

    pub(crate) fn is_type_ignored(&self, type_id: TypeId) -> bool {
        self.ignored.iter().any(|entry| entry.type_id == type_id)
    }

    /// Configures one entity type in place, creating its config on first use.
    ///
    /// Returns `None` when the type is ignored.
    pub fn entity<E: Entity>(&mut self) -> Option<EntityTypeBuilder<'_, E>> {
        if self.is_ignored::<E>() {
            return None;
        }
        let config = self
            .entities
            .entry(TypeId::of::<E>())
            .or_insert_with(EntityConfig::for_entity::<E>);
        Some(EntityTypeBuilder::new(config))
    }

    pub(crate) fn config_snapshot<E: Entity>(&self) -> EntityConfig {
        self.entities
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_else(EntityConfig::for_entity::<E>)
    }

    pub(crate) fn store_config<E: Entity>(&mut self, config: EntityConfig) {
        self.entities.insert(TypeId::of::<E>(), config);
    }

    pub(crate) fn into_configs(self) -> Vec<(TypeId, EntityConfig)> {
        let mut configs: Vec<_> = self.entities.into_iter().collect();
        configs.sort_by(|a, b| a.1.entity_name.cmp(b.1.entity_name));
        configs
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn dedup_indexes<F: Field>(fields: &[F]) -> Vec<usize> {
    let mut indexes = Vec::with_capacity(fields.len());
    for field in fields {
        let index = field.index();
        if !indexes.contains(&index) {
            indexes.push(index);
        }
    }
    indexes
}

#[cfg(test)]
mod tests {
    use super::{EntityConfig, ModelBuilder, SqlType};
    use crate::error::ConfigurationError;
    use crate::model::entity::{Entity, EntityRow, Field};
    use rusqlite::types::Value;
    use std::any::TypeId;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TagField {
        Id,
        Label,
    }

    impl Field for TagField {
        const ALL: &'static [Self] = &[Self::Id, Self::Label];

        fn index(self) -> usize {
            self as usize
        }

        fn name(self) -> &'static str {
            match self {
                Self::Id => "id",
                Self::Label => "label",
            }
        }
    }

    struct Tag;

    impl Entity for Tag {
        type Field = TagField;

        fn value(&self, _field: TagField) -> Value {
            Value::Null
        }

        fn from_row(_row: &EntityRow<'_, '_, TagField>) -> rusqlite::Result<Self> {
            Ok(Tag)
        }
    }

    #[test]
    fn defaults_follow_field_names() {
        let config = EntityConfig::for_entity::<Tag>();
        assert_eq!(config.table, "Tag");
        assert_eq!(config.columns[1].column, "label");
    }

    #[test]
    fn configured_mapping_validates() {
        let mut model = ModelBuilder::new();
        {
            let mut tag = model.entity::<Tag>().unwrap();
            tag.to_table("tags").has_key(&[TagField::Id]);
            tag.property(TagField::Label)
                .has_column_name("tag_label")
                .has_column_type(SqlType::Text)
                .is_required();
        }
        let config = model.config_snapshot::<Tag>();
        let mapping = config.validate(TypeId::of::<Tag>()).unwrap();
        assert_eq!(mapping.table, "tags");
        assert_eq!(mapping.columns[1].column, "tag_label");
        assert!(mapping.columns[0].required, "key columns are implicitly required");
    }

    #[test]
    fn missing_key_is_invalid() {
        let config = EntityConfig::for_entity::<Tag>();
        let err = config.validate(TypeId::of::<Tag>()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidMapping { .. }));
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let mut model = ModelBuilder::new();
        model
            .entity::<Tag>()
            .unwrap()
            .to_table("tags; DROP TABLE x")
            .has_key(&[TagField::Id]);
        let err = model
            .config_snapshot::<Tag>()
            .validate(TypeId::of::<Tag>())
            .unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"));
    }

    #[test]
    fn ignored_entity_has_no_builder() {
        let mut model = ModelBuilder::new();
        model.ignore::<Tag>();
        assert!(model.entity::<Tag>().is_none());
        assert!(model.is_empty());
    }
}
