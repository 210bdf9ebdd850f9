//! Process-wide schema model cache, one entry per context type.
//!
//! # Invariants
//! - A context's model is built at most once while cached; concurrent first
//!   use is serialized by the cache lock.
//! - A failed build is not cached; the next request retries.
//! - Descriptors must not open sessions of their own context while the model
//!   is being built (the cache lock is held).

use crate::error::DataResult;
use crate::schema::model::SchemaModel;
use crate::schema::registry::{build_schema, DescriptorCatalog, IgnoreList};
use crate::session::DataContext;
use log::info;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static SCHEMA_CACHE: Lazy<Mutex<HashMap<TypeId, Arc<SchemaModel>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_cache() -> MutexGuard<'static, HashMap<TypeId, Arc<SchemaModel>>> {
    // Models are immutable once inserted, so a poisoned map is still valid.
    SCHEMA_CACHE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the cached model for `C`, building it on first use.
pub fn schema_for<C: DataContext>() -> DataResult<Arc<SchemaModel>> {
    let mut cache = lock_cache();
    if let Some(model) = cache.get(&TypeId::of::<C>()) {
        return Ok(Arc::clone(model));
    }

    let mut catalog = DescriptorCatalog::new();
    C::register_descriptors(&mut catalog);
    let mut ignore = IgnoreList::new();
    C::ignore_entities(&mut ignore);
    let reporter = C::error_reporter();

    let model = Arc::new(build_schema(
        &catalog,
        &ignore,
        &C::configure_base,
        reporter.as_ref(),
    )?);
    cache.insert(TypeId::of::<C>(), Arc::clone(&model));
    info!(
        "event=schema_cache module=schema status=ok action=insert context={} entities={}",
        C::context_name(),
        model.len()
    );
    Ok(model)
}

/// Returns whether the model for `C` is currently cached.
pub fn is_schema_built<C: DataContext>() -> bool {
    is_built_type(TypeId::of::<C>())
}

pub(crate) fn is_built_type(type_id: TypeId) -> bool {
    lock_cache().contains_key(&type_id)
}

/// Drops the cached model for `C`. Sessions already holding it keep their copy.
pub fn evict_schema<C: DataContext>() -> bool {
    let removed = lock_cache().remove(&TypeId::of::<C>()).is_some();
    if removed {
        info!(
            "event=schema_cache module=schema status=ok action=evict context={}",
            C::context_name()
        );
    }
    removed
}

/// Drops every cached model. Intended for test teardown.
pub fn reset_schema_cache() {
    let mut cache = lock_cache();
    let dropped = cache.len();
    cache.clear();
    info!("event=schema_cache module=schema status=ok action=reset dropped={dropped}");
}
