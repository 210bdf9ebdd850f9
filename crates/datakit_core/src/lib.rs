//! Generic data-access core over SQLite.
//! Schema registration, typed entity stores and units of work.

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod schema;
pub mod service;
pub mod session;

pub use error::{
    format_error_chain, ConfigurationError, DataError, DataResult, ErrorReporter, LogReporter,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityKey, EntityRow, Field};
pub use model::filter::{Comparison, Filter};
pub use repo::EntityStore;
pub use schema::{
    DescriptorCatalog, EntityTypeBuilder, IgnoreList, MappingDescriptor, ModelBuilder,
    SchemaModel, SqlType,
};
pub use service::{TransactionResult, TransactionState, UnitOfWork};
pub use session::{DataContext, EntityState, Session, SessionOptions, TrackingMode};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
