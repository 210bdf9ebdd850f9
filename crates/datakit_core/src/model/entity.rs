//! Entity and field contracts.
//!
//! # Responsibility
//! - Define what an application record must expose to be stored generically.
//! - Provide typed field tokens used by filters, mappings and partial updates.
//!
//! # Invariants
//! - `Field::ALL[i].index() == i` for every field.
//! - Columns are always selected in `Field::ALL` order, so `EntityRow::get`
//!   resolves a field by its index.

use rusqlite::types::{FromSql, Value};
use rusqlite::Row;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;

/// Typed field-selector token, normally a fieldless enum.
pub trait Field: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every field of the entity, in column order.
    const ALL: &'static [Self];

    /// Dense position of this field inside `ALL`.
    fn index(self) -> usize;

    /// Default column name.
    fn name(self) -> &'static str;
}

/// Application record that can be mapped, tracked and persisted.
pub trait Entity: Sized + 'static {
    type Field: Field;

    /// Name used in diagnostics and as the default table name.
    fn entity_name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Current value of one field.
    fn value(&self, field: Self::Field) -> Value;

    /// Materializes an entity from a row selected in `Field::ALL` order.
    fn from_row(row: &EntityRow<'_, '_, Self::Field>) -> rusqlite::Result<Self>;

    /// Snapshot of every field value, in `Field::ALL` order.
    fn values(&self) -> Vec<Value> {
        Self::Field::ALL
            .iter()
            .map(|field| self.value(*field))
            .collect()
    }
}

/// Row view that resolves typed fields to column positions.
pub struct EntityRow<'r, 's, F> {
    row: &'r Row<'s>,
    _fields: PhantomData<F>,
}

impl<'r, 's, F: Field> EntityRow<'r, 's, F> {
    pub(crate) fn new(row: &'r Row<'s>) -> Self {
        Self {
            row,
            _fields: PhantomData,
        }
    }

    /// Reads one field value.
    pub fn get<T: FromSql>(&self, field: F) -> rusqlite::Result<T> {
        self.row.get(field.index())
    }
}

/// Hashable primary-key value.
///
/// `REAL` parts compare by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(v) => Self::Integer(*v),
            Value::Real(v) => Self::Real(v.to_bits()),
            Value::Text(v) => Self::Text(v.clone()),
            Value::Blob(v) => Self::Blob(v.clone()),
        }
    }
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Ordered primary-key values of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(Vec<KeyPart>);

impl EntityKey {
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        Self(values.into_iter().map(KeyPart::from).collect())
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (position, part) in self.0.iter().enumerate() {
            if position > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    // Generic arguments may contain `::`; cut them off before splitting.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
