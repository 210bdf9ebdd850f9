//! Schema registration: descriptors, builders, the immutable model and its
//! process-wide cache.
//!
//! # Responsibility
//! - Turn a context's registered mapping descriptors into one `SchemaModel`.
//! - Keep exactly one model per context type for the process lifetime.
//!
//! # Invariants
//! - Individual mapping failures are tolerated; base failures are not.

pub mod builder;
pub mod cache;
pub mod model;
pub mod registry;

pub use builder::{EntityTypeBuilder, ForeignKeyBuilder, ModelBuilder, PropertyBuilder, SqlType};
pub use cache::{evict_schema, is_schema_built, reset_schema_cache, schema_for};
pub use model::{ColumnMapping, EntityMapping, ForeignKeyMapping, MappingFailure, SchemaModel};
pub use registry::{build_schema, DescriptorCatalog, IgnoreList, MappingDescriptor};
