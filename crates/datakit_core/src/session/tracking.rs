//! Change tracking: per-session entity states and modified-field flags.
//!
//! # Responsibility
//! - Record which entities are Added, Modified, Deleted or Unchanged.
//! - Keep one modified flag per field for partial updates.
//! - Produce the pending change set in first-tracked order.
//!
//! # Invariants
//! - One entry per (entity type, key).
//! - `modified.len()` equals the entity's field count.
//! - After `detach_all` the tracker is empty.

use crate::model::entity::EntityKey;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;

/// Whether query results are retained for later mutation detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Query results are returned detached.
    #[default]
    NoTracking,
    /// Query results are attached as `Unchanged`.
    TrackAll,
}

impl TrackingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTracking => "no_tracking",
            Self::TrackAll => "track_all",
        }
    }
}

/// Change state of one tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    Detached,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Detached => "detached",
        }
    }

    /// Returns whether a commit must write this entry.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryId {
    pub(crate) type_id: TypeId,
    pub(crate) key: EntityKey,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub(crate) entity_name: &'static str,
    pub(crate) state: EntityState,
    pub(crate) values: Vec<Value>,
    pub(crate) modified: Vec<bool>,
    order: u64,
}

impl TrackedEntry {
    pub(crate) fn modified_fields(&self) -> Vec<usize> {
        self.modified
            .iter()
            .enumerate()
            .filter_map(|(index, flagged)| flagged.then_some(index))
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: HashMap<EntryId, TrackedEntry>,
    next_order: u64,
}

impl ChangeTracker {
    fn entry_or_insert(
        &mut self,
        id: EntryId,
        entity_name: &'static str,
        values: &[Value],
        state: EntityState,
    ) -> &mut TrackedEntry {
        let order = self.next_order;
        let entry = self.entries.entry(id).or_insert_with(|| TrackedEntry {
            entity_name,
            state,
            values: values.to_vec(),
            modified: vec![false; values.len()],
            order,
        });
        if entry.order == order {
            self.next_order += 1;
        }
        entry
    }

    /// Marks an entity Added. A Deleted entry with the same key becomes a
    /// full update instead.
    pub(crate) fn add(
        &mut self,
        id: EntryId,
        entity_name: &'static str,
        values: Vec<Value>,
        non_key: &[usize],
    ) {
        let entry = self.entry_or_insert(id, entity_name, &values, EntityState::Added);
        if entry.state == EntityState::Deleted {
            entry.state = EntityState::Modified;
            flag_all(entry, non_key);
        } else {
            entry.state = EntityState::Added;
            entry.modified.fill(false);
        }
        entry.values = values;
    }

    /// Marks every non-key field Modified. Added entries stay Added.
    pub(crate) fn update(
        &mut self,
        id: EntryId,
        entity_name: &'static str,
        values: Vec<Value>,
        non_key: &[usize],
    ) {
        let entry = self.entry_or_insert(id, entity_name, &values, EntityState::Modified);
        if entry.state != EntityState::Added {
            entry.state = EntityState::Modified;
            flag_all(entry, non_key);
        }
        entry.values = values;
    }

    /// Attaches the entity if untracked, then flags exactly `fields`.
    pub(crate) fn update_fields(
        &mut self,
        id: EntryId,
        entity_name: &'static str,
        values: Vec<Value>,
        fields: &[usize],
    ) {
        let entry = self.entry_or_insert(id, entity_name, &values, EntityState::Unchanged);
        if entry.state == EntityState::Added {
            entry.values = values;
            return;
        }
        // Each flag is independent; order of application does not matter.
        for index in fields {
            entry.values[*index] = values[*index].clone();
            entry.modified[*index] = true;
        }
        if !fields.is_empty() {
            entry.state = EntityState::Modified;
        }
    }

    /// Marks an entity Deleted. An Added entry is simply detached.
    pub(crate) fn delete(&mut self, id: EntryId, entity_name: &'static str, values: Vec<Value>) {
        if self
            .entries
            .get(&id)
            .is_some_and(|entry| entry.state == EntityState::Added)
        {
            self.entries.remove(&id);
            return;
        }
        let entry = self.entry_or_insert(id, entity_name, &values, EntityState::Deleted);
        entry.state = EntityState::Deleted;
        entry.modified.fill(false);
        entry.values = values;
    }

    /// Attaches an untracked entity as Unchanged. Returns `false` when the key
    /// is already tracked.
    pub(crate) fn attach(
        &mut self,
        id: EntryId,
        entity_name: &'static str,
        values: Vec<Value>,
    ) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entry_or_insert(id, entity_name, &values, EntityState::Unchanged);
        true
    }

    pub(crate) fn state(&self, id: &EntryId) -> EntityState {
        self.entries
            .get(id)
            .map_or(EntityState::Detached, |entry| entry.state)
    }

    pub(crate) fn get(&self, id: &EntryId) -> Option<&TrackedEntry> {
        self.entries.get(id)
    }

    /// Entries a commit must write, in first-tracked order.
    pub(crate) fn pending(&self) -> Vec<(EntryId, TrackedEntry)> {
        let mut pending: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state.is_pending())
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        pending.sort_by_key(|(_, entry)| entry.order);
        pending
    }

    pub(crate) fn detach(&mut self, id: &EntryId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Detaches every entry regardless of state. Returns how many were dropped.
    pub(crate) fn detach_all(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.entries.values().any(|entry| entry.state.is_pending())
    }
}

fn flag_all(entry: &mut TrackedEntry, non_key: &[usize]) {
    entry.modified.fill(false);
    for index in non_key {
        entry.modified[*index] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntityState, EntryId};
    use crate::model::entity::EntityKey;
    use rusqlite::types::Value;
    use std::any::TypeId;

    struct Row;

    fn id(key: i64) -> EntryId {
        EntryId {
            type_id: TypeId::of::<Row>(),
            key: EntityKey::from_values(&[Value::Integer(key)]),
        }
    }

    fn values(key: i64, name: &str) -> Vec<Value> {
        vec![Value::Integer(key), Value::Text(name.to_string())]
    }

    #[test]
    fn update_fields_flags_only_selected_fields() {
        let mut tracker = ChangeTracker::default();
        tracker.update_fields(id(1), "Row", values(1, "a"), &[1]);

        let entry = tracker.get(&id(1)).unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.modified_fields(), vec![1]);
    }

    #[test]
    fn update_fields_without_fields_only_attaches() {
        let mut tracker = ChangeTracker::default();
        tracker.update_fields(id(1), "Row", values(1, "a"), &[]);
        assert_eq!(tracker.state(&id(1)), EntityState::Unchanged);
        assert!(!tracker.has_changes());
    }

    #[test]
    fn deleting_an_added_entry_detaches_it() {
        let mut tracker = ChangeTracker::default();
        tracker.add(id(1), "Row", values(1, "a"), &[1]);
        tracker.delete(id(1), "Row", values(1, "a"));
        assert_eq!(tracker.state(&id(1)), EntityState::Detached);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn re_adding_a_deleted_entry_becomes_update() {
        let mut tracker = ChangeTracker::default();
        tracker.delete(id(1), "Row", values(1, "a"));
        tracker.add(id(1), "Row", values(1, "b"), &[1]);
        let entry = tracker.get(&id(1)).unwrap();
        assert_eq!(entry.state, EntityState::Modified);
        assert_eq!(entry.values[1], Value::Text("b".to_string()));
    }

    #[test]
    fn updating_an_added_entry_keeps_it_added() {
        let mut tracker = ChangeTracker::default();
        tracker.add(id(1), "Row", values(1, "a"), &[1]);
        tracker.update(id(1), "Row", values(1, "b"), &[1]);
        assert_eq!(tracker.state(&id(1)), EntityState::Added);
    }

    #[test]
    fn pending_preserves_first_tracked_order() {
        let mut tracker = ChangeTracker::default();
        tracker.add(id(3), "Row", values(3, "c"), &[1]);
        tracker.add(id(1), "Row", values(1, "a"), &[1]);
        tracker.attach(id(9), "Row", values(9, "z"));
        tracker.delete(id(2), "Row", values(2, "b"));

        let keys: Vec<_> = tracker
            .pending()
            .into_iter()
            .map(|(entry_id, _)| entry_id.key.to_string())
            .collect();
        assert_eq!(keys, vec!["(3)", "(1)", "(2)"]);
    }

    #[test]
    fn detach_all_is_idempotent() {
        let mut tracker = ChangeTracker::default();
        tracker.add(id(1), "Row", values(1, "a"), &[1]);
        tracker.attach(id(2), "Row", values(2, "b"));
        assert_eq!(tracker.detach_all(), 2);
        assert_eq!(tracker.detach_all(), 0);
        assert_eq!(tracker.len(), 0);
    }
}
