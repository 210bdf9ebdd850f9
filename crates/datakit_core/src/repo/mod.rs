//! Repository layer: the generic entity store and its SQL builders.

pub mod entity_store;
pub(crate) mod sql;

pub use entity_store::EntityStore;
