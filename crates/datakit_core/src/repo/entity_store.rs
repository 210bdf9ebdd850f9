//! Generic repository bound to one entity type and one session.
//!
//! # Responsibility
//! - Record inserts, updates, partial updates and deletes in the session's
//!   change tracker.
//! - Run typed queries against the mapped table.
//!
//! # Invariants
//! - Mutations are written only when a `UnitOfWork` commits.
//! - `select_by_key` results are never tracked.
//! - Under `TrackAll`, entity query results are attached as `Unchanged`
//!   unless their key is already tracked. Projections are never tracked.
//! - An absent filter means "no filter" for reads and "match none" for
//!   `delete_where`.

use crate::error::{DataError, DataResult};
use crate::model::entity::{Entity, EntityRow, Field};
use crate::model::filter::Filter;
use crate::repo::sql::SelectQuery;
use crate::schema::model::EntityMapping;
use crate::session::tracking::EntryId;
use crate::session::{entry_id, EntityState, Session, TrackingMode};
use log::debug;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed CRUD surface for entity type `E`.
pub struct EntityStore<'s, E: Entity> {
    session: &'s Session,
    mapping: Arc<EntityMapping>,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity> EntityStore<'s, E> {
    /// Binds a store to `session`.
    ///
    /// # Errors
    /// - Returns `ConfigurationError::MissingMapping` when the session's
    ///   schema model has no mapping for `E`.
    pub fn new(session: &'s Session) -> DataResult<Self> {
        let model = session.model()?;
        let mapping = model
            .mapping_for::<E>()
            .ok_or_else(|| DataError::missing_mapping(E::entity_name()))?;
        Ok(Self {
            session,
            mapping,
            _entity: PhantomData,
        })
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    pub fn insert(&self, entity: &E) {
        let values = entity.values();
        let id = self.id_of(&values);
        let non_key = self.non_key_fields();
        self.session
            .with_tracker(|tracker| tracker.add(id, E::entity_name(), values, &non_key));
    }

    pub fn insert_many(&self, entities: &[E]) {
        for entity in entities {
            self.insert(entity);
        }
    }

    /// Marks every non-key field of `entity` modified.
    pub fn update(&self, entity: &E) {
        let values = entity.values();
        let id = self.id_of(&values);
        let non_key = self.non_key_fields();
        self.session
            .with_tracker(|tracker| tracker.update(id, E::entity_name(), values, &non_key));
    }

    pub fn update_many(&self, entities: &[E]) {
        for entity in entities {
            self.update(entity);
        }
    }

    /// Marks exactly `fields` of `entity` modified, attaching it first when
    /// it is not tracked yet.
    ///
    /// # Errors
    /// - Returns `DataError::InvalidOperation` when `fields` contains a key
    ///   field, or when `entity` is already marked for deletion.
    pub fn update_fields(&self, entity: &E, fields: &[E::Field]) -> DataResult<()> {
        if let Some(field) = fields
            .iter()
            .find(|field| self.mapping.is_key_field(field.index()))
        {
            return Err(DataError::InvalidOperation(format!(
                "field `{}` is part of the `{}` key and cannot be updated",
                field.name(),
                E::entity_name()
            )));
        }

        let indexes: Vec<usize> = fields.iter().map(|field| field.index()).collect();
        let values = entity.values();
        let id = self.id_of(&values);
        self.session.with_tracker(|tracker| {
            if tracker.state(&id) == EntityState::Deleted {
                return Err(DataError::InvalidOperation(format!(
                    "`{}` {} is marked for deletion and cannot be partially updated",
                    E::entity_name(),
                    id.key
                )));
            }
            tracker.update_fields(id, E::entity_name(), values, &indexes);
            Ok(())
        })
    }

    pub fn delete(&self, entity: &E) {
        let values = entity.values();
        let id = self.id_of(&values);
        self.session
            .with_tracker(|tracker| tracker.delete(id, E::entity_name(), values));
    }

    pub fn delete_many(&self, entities: &[E]) {
        for entity in entities {
            self.delete(entity);
        }
    }

    /// Marks every row matching `filter` deleted. Returns how many were
    /// marked; `None` matches nothing.
    pub fn delete_where(&self, filter: Option<&Filter<E::Field>>) -> DataResult<usize> {
        let Some(filter) = filter else {
            debug!(
                "event=delete_where module=repo status=ok entity={} reason=no_filter matched=0",
                E::entity_name()
            );
            return Ok(0);
        };

        let matched = self.fetch(SelectQuery::new(&self.mapping).filter(Some(filter)))?;
        self.delete_many(&matched);
        debug!(
            "event=delete_where module=repo status=ok entity={} matched={}",
            E::entity_name(),
            matched.len()
        );
        Ok(matched.len())
    }

    /// Loads one entity by primary key, in key order. The result is never
    /// tracked.
    ///
    /// # Errors
    /// - Returns `DataError::KeyShape` when `key` does not have one value per
    ///   key field.
    pub fn select_by_key(&self, key: &[Value]) -> DataResult<Option<E>> {
        if key.len() != self.mapping.key.len() {
            return Err(DataError::KeyShape {
                entity: E::entity_name().to_string(),
                expected: self.mapping.key.len(),
                actual: key.len(),
            });
        }
        let mut found = self.fetch(SelectQuery::new(&self.mapping).by_key(key).limit(1))?;
        Ok(found.pop())
    }

    /// Every row, in engine order.
    pub fn select_all(&self) -> DataResult<Vec<E>> {
        let entities = self.fetch(SelectQuery::new(&self.mapping))?;
        self.attach_if_tracking(&entities);
        Ok(entities)
    }

    /// One page of rows ordered by primary key.
    ///
    /// Pages start at 1; a page below 1 reads the first page.
    pub fn select_all_by_page(&self, page: i64, page_size: u32) -> DataResult<Vec<E>> {
        let size = i64::from(page_size);
        let offset = page.saturating_sub(1).max(0).saturating_mul(size);
        let entities = self.fetch(
            SelectQuery::new(&self.mapping)
                .order_by_key()
                .limit(size)
                .offset(offset),
        )?;
        self.attach_if_tracking(&entities);
        Ok(entities)
    }

    /// First entity matching `filter`.
    pub fn select(&self, filter: Option<&Filter<E::Field>>) -> DataResult<Option<E>> {
        let mut found = self.fetch(SelectQuery::new(&self.mapping).filter(filter).limit(1))?;
        self.attach_if_tracking(&found);
        Ok(found.pop())
    }

    pub fn select_projected<T>(
        &self,
        filter: Option<&Filter<E::Field>>,
        projection: impl FnOnce(&E) -> T,
    ) -> DataResult<Option<T>> {
        let found = self.fetch(SelectQuery::new(&self.mapping).filter(filter).limit(1))?;
        Ok(found.first().map(projection))
    }

    /// Every entity matching `filter`, in engine order.
    pub fn select_list(&self, filter: Option<&Filter<E::Field>>) -> DataResult<Vec<E>> {
        let entities = self.fetch(SelectQuery::new(&self.mapping).filter(filter))?;
        self.attach_if_tracking(&entities);
        Ok(entities)
    }

    pub fn select_list_projected<T>(
        &self,
        filter: Option<&Filter<E::Field>>,
        projection: impl FnMut(&E) -> T,
    ) -> DataResult<Vec<T>> {
        let entities = self.fetch(SelectQuery::new(&self.mapping).filter(filter))?;
        Ok(entities.iter().map(projection).collect())
    }

    pub fn exists(&self, filter: &Filter<E::Field>) -> DataResult<bool> {
        let (sql, params) = SelectQuery::new(&self.mapping)
            .filter(Some(filter))
            .build_exists();
        let exists = self
            .session
            .connection()
            .query_row(&sql, params_from_iter(params), |row| row.get::<_, bool>(0))?;
        Ok(exists)
    }

    pub fn count(&self, filter: Option<&Filter<E::Field>>) -> DataResult<u64> {
        let (sql, params) = SelectQuery::new(&self.mapping).filter(filter).build_count();
        let count = self
            .session
            .connection()
            .query_row(&sql, params_from_iter(params), |row| row.get::<_, i64>(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Tracking state of `entity`, `Detached` when untracked.
    pub fn state_of(&self, entity: &E) -> EntityState {
        let id = self.id_of(&entity.values());
        self.session.with_tracker(|tracker| tracker.state(&id))
    }

    /// Fields currently flagged modified for `entity`.
    pub fn modified_fields(&self, entity: &E) -> Vec<E::Field> {
        let id = self.id_of(&entity.values());
        self.session.with_tracker(|tracker| {
            tracker
                .get(&id)
                .map(|entry| {
                    entry
                        .modified_fields()
                        .into_iter()
                        .map(|index| E::Field::ALL[index])
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Starts tracking `entity` as `Unchanged`, whatever the tracking mode.
    ///
    /// Returns `false` and leaves the existing entry alone when the key is
    /// already tracked.
    pub fn attach(&self, entity: &E) -> bool {
        let values = entity.values();
        let id = self.id_of(&values);
        self.session
            .with_tracker(|tracker| tracker.attach(id, E::entity_name(), values))
    }

    /// Stops tracking `entity`. Returns whether it was tracked.
    pub fn detach(&self, entity: &E) -> bool {
        let id = self.id_of(&entity.values());
        self.session.with_tracker(|tracker| tracker.detach(&id))
    }

    fn id_of(&self, values: &[Value]) -> EntryId {
        entry_id::<E>(&self.mapping, values)
    }

    fn non_key_fields(&self) -> Vec<usize> {
        (0..self.mapping.columns.len())
            .filter(|index| !self.mapping.is_key_field(*index))
            .collect()
    }

    fn fetch(&self, query: SelectQuery<'_>) -> DataResult<Vec<E>> {
        let (sql, params) = query.build();
        let mut stmt = self.session.connection().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(E::from_row(&EntityRow::new(row))?);
        }
        Ok(entities)
    }

    fn attach_if_tracking(&self, entities: &[E]) {
        if self.session.tracking() != TrackingMode::TrackAll || entities.is_empty() {
            return;
        }
        self.session.with_tracker(|tracker| {
            for entity in entities {
                let values = entity.values();
                tracker.attach(self.id_of(&values), E::entity_name(), values);
            }
        });
    }
}
