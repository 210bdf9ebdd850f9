//! Context types: the static configuration a family of sessions shares.

use crate::db::migrations::Migration;
use crate::error::{DataResult, ErrorReporter, LogReporter};
use crate::model::entity::short_type_name;
use crate::schema::{DescriptorCatalog, IgnoreList, ModelBuilder};
use std::sync::Arc;

/// Static configuration of one session type.
///
/// Implemented on a marker type. Every session opened for the same context
/// shares one cached `SchemaModel`.
pub trait DataContext: 'static {
    /// Registers every mapping descriptor this context applies.
    fn register_descriptors(catalog: &mut DescriptorCatalog);

    /// Entity types excluded from mapping. Applied before anything else.
    fn ignore_entities(_ignore: &mut IgnoreList) {}

    /// Runs before per-entity mapping. A failure aborts the model build.
    fn configure_base(_model: &mut ModelBuilder) -> DataResult<()> {
        Ok(())
    }

    /// Ordered SQL migrations applied when a session is opened.
    fn migrations() -> &'static [Migration] {
        &[]
    }

    fn error_reporter() -> Arc<dyn ErrorReporter> {
        Arc::new(LogReporter)
    }

    fn context_name() -> &'static str {
        short_type_name::<Self>()
    }
}
