//! Mapping descriptor registration and schema building.
//!
//! # Responsibility
//! - Hold the explicit list of mapping descriptors a context applies.
//! - Build a `SchemaModel` from the ignore list, the base step and every
//!   descriptor, tolerating individual descriptor failures.
//!
//! # Invariants
//! - The ignore list is applied before anything else.
//! - A base-step failure is reported and returned; nothing is built.
//! - A descriptor failure is reported exactly once, logged, recorded, and the
//!   scan continues. A failing descriptor leaves its entity's prior
//!   configuration untouched.
//! - Descriptors must not depend on application order.

use crate::error::{ConfigurationError, DataError, DataResult, ErrorReporter};
use crate::model::entity::Entity;
use crate::schema::builder::{EntityTypeBuilder, ModelBuilder};
use crate::schema::model::{MappingFailure, SchemaModel};
use log::{debug, error, info, warn};
use std::any::TypeId;
use std::time::Instant;

/// Storage-shape description for one entity type.
pub trait MappingDescriptor: Send + Sync + 'static {
    type Entity: Entity;

    fn configure(&self, builder: &mut EntityTypeBuilder<'_, Self::Entity>) -> DataResult<()>;
}

type ApplyFn = Box<dyn Fn(&mut ModelBuilder) -> Result<(), ConfigurationError> + Send + Sync>;

struct Registration {
    descriptor: &'static str,
    entity: &'static str,
    target: TypeId,
    apply: ApplyFn,
}

/// Explicit registry of the mapping descriptors a context applies.
#[derive(Default)]
pub struct DescriptorCatalog {
    registrations: Vec<Registration>,
}

impl DescriptorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor built through `Default`.
    pub fn register<D>(&mut self) -> &mut Self
    where
        D: MappingDescriptor + Default,
    {
        self.register_factory(|| Ok(D::default()))
    }

    /// Registers a descriptor built by a fallible factory, invoked once per
    /// schema build.
    pub fn register_factory<D, F>(&mut self, factory: F) -> &mut Self
    where
        D: MappingDescriptor,
        F: Fn() -> DataResult<D> + Send + Sync + 'static,
    {
        let descriptor_name = std::any::type_name::<D>();
        let entity_name = <D::Entity as Entity>::entity_name();
        let apply: ApplyFn = Box::new(move |model: &mut ModelBuilder| {
            let descriptor =
                factory().map_err(|err| ConfigurationError::DescriptorInstantiation {
                    descriptor: descriptor_name.to_string(),
                    message: err.to_string(),
                })?;

            let mut scratch = model.config_snapshot::<D::Entity>();
            descriptor
                .configure(&mut EntityTypeBuilder::new(&mut scratch))
                .map_err(|err| ConfigurationError::DescriptorConfiguration {
                    descriptor: descriptor_name.to_string(),
                    entity: entity_name.to_string(),
                    message: err.to_string(),
                })?;
            model.store_config::<D::Entity>(scratch);
            Ok(())
        });

        self.registrations.push(Registration {
            descriptor: descriptor_name,
            entity: entity_name,
            target: TypeId::of::<D::Entity>(),
            apply,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Registered descriptor type names, in registration order.
    pub fn descriptor_names(&self) -> Vec<&'static str> {
        self.registrations
            .iter()
            .map(|registration| registration.descriptor)
            .collect()
    }
}

/// Entity types excluded from mapping entirely.
#[derive(Debug, Default, Clone)]
pub struct IgnoreList {
    entries: Vec<(TypeId, &'static str)>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore<E: Entity>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<E>();
        if !self.entries.iter().any(|(id, _)| *id == type_id) {
            self.entries.push((type_id, E::entity_name()));
        }
        self
    }

    pub fn contains<E: Entity>(&self) -> bool {
        self.entries.iter().any(|(id, _)| *id == TypeId::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a schema model.
///
/// Order: ignore list, base step (fatal), descriptors (tolerated), then
/// per-entity validation (tolerated).
///
/// # Errors
/// - Returns `ConfigurationError::BaseSchema` when the base step fails.
pub fn build_schema(
    catalog: &DescriptorCatalog,
    ignore: &IgnoreList,
    base: &dyn Fn(&mut ModelBuilder) -> DataResult<()>,
    reporter: &dyn ErrorReporter,
) -> DataResult<SchemaModel> {
    let started_at = Instant::now();
    info!(
        "event=schema_build module=schema status=start descriptors={} ignored={}",
        catalog.len(),
        ignore.len()
    );

    let mut model = ModelBuilder::new();
    for (type_id, name) in &ignore.entries {
        model.ignore_type(*type_id, *name);
    }

    if let Err(err) = base(&mut model) {
        let err = DataError::Configuration(ConfigurationError::BaseSchema(err.to_string()));
        reporter.on_mapping_error(&err);
        error!(
            "event=schema_build module=schema status=error duration_ms={} error_code=base_schema_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        return Err(err);
    }

    let mut failures = Vec::new();
    for registration in &catalog.registrations {
        if model.is_type_ignored(registration.target) {
            debug!(
                "event=mapping_skip module=schema status=ok reason=ignored descriptor={} entity={}",
                registration.descriptor, registration.entity
            );
            continue;
        }

        match (registration.apply)(&mut model) {
            Ok(()) => debug!(
                "event=mapping_apply module=schema status=ok descriptor={} entity={}",
                registration.descriptor, registration.entity
            ),
            Err(err) => {
                warn!(
                    "event=mapping_apply module=schema status=error descriptor={} entity={} error={}",
                    registration.descriptor, registration.entity, err
                );
                failures.push(MappingFailure {
                    source: registration.descriptor.to_string(),
                    message: err.to_string(),
                });
                reporter.on_mapping_error(&DataError::Configuration(err));
            }
        }
    }

    let mut mappings = Vec::new();
    for (type_id, config) in model.into_configs() {
        match config.validate(type_id) {
            Ok(mapping) => mappings.push(mapping),
            Err(err) => {
                warn!(
                    "event=mapping_validate module=schema status=error entity={} error={}",
                    config.entity_name, err
                );
                failures.push(MappingFailure {
                    source: config.entity_name.to_string(),
                    message: err.to_string(),
                });
                reporter.on_mapping_error(&DataError::Configuration(err));
            }
        }
    }

    info!(
        "event=schema_build module=schema status=ok duration_ms={} entities={} failures={}",
        started_at.elapsed().as_millis(),
        mappings.len(),
        failures.len()
    );
    Ok(SchemaModel::new(mappings, failures))
}
