//! Write order for pending tracked entries.
//!
//! # Responsibility
//! - Order inserts and updates so a principal row exists before the rows
//!   that reference it.
//! - Order deletes so dependent rows go before the principal they reference.
//! - Let a deleted row release its unique values before another row of the
//!   same type claims them.
//!
//! # Invariants
//! - Entries with no dependency between them keep first-tracked order.
//! - A dependency cycle never stalls the flush: the earliest remaining entry
//!   is written next.

use crate::schema::model::{EntityMapping, ForeignKeyMapping};
use crate::session::tracking::{EntityState, EntryId, TrackedEntry};
use log::debug;
use rusqlite::types::Value;
use std::sync::Arc;

pub(crate) struct PendingWrite {
    pub(crate) id: EntryId,
    pub(crate) entry: TrackedEntry,
    pub(crate) mapping: Arc<EntityMapping>,
}

/// Returns indexes into `writes` (given in first-tracked order) in the order
/// they must be executed.
pub(crate) fn flush_order(writes: &[PendingWrite]) -> Vec<usize> {
    let count = writes.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut blockers = vec![0usize; count];
    for (first, before) in writes.iter().enumerate() {
        for (then, after) in writes.iter().enumerate() {
            if first != then && must_precede(before, after) {
                successors[first].push(then);
                blockers[then] += 1;
            }
        }
    }

    let mut written = vec![false; count];
    let mut order = Vec::with_capacity(count);
    while order.len() < count {
        let ready = (0..count).find(|index| !written[*index] && blockers[*index] == 0);
        let Some(next) = ready.or_else(|| (0..count).find(|index| !written[*index])) else {
            break;
        };
        if ready.is_none() {
            debug!(
                "event=flush_order module=session status=cycle entity={} key={}",
                writes[next].entry.entity_name, writes[next].id.key
            );
        }
        written[next] = true;
        order.push(next);
        for successor in &successors[next] {
            blockers[*successor] = blockers[*successor].saturating_sub(1);
        }
    }
    order
}

fn must_precede(before: &PendingWrite, after: &PendingWrite) -> bool {
    use EntityState::{Added, Deleted, Modified};
    match (before.entry.state, after.entry.state) {
        (Added | Modified, Added | Modified) => references(after, before),
        (Deleted, Deleted) => references(before, after),
        // The old reference of a modified row is unknown, so any row of a
        // referencing type moves away before the principal disappears.
        (Modified, Deleted) => references_table(before, after),
        (Deleted, Added | Modified) => shares_unique_value(before, after),
        _ => false,
    }
}

/// Whether `dependent`'s foreign key values point at `principal`'s row.
fn references(dependent: &PendingWrite, principal: &PendingWrite) -> bool {
    foreign_keys_to(dependent, principal).any(|foreign_key| {
        foreign_key
            .fields
            .iter()
            .zip(&foreign_key.principal_columns)
            .all(|(field, column)| {
                let value = &dependent.entry.values[*field];
                *value != Value::Null
                    && principal
                        .mapping
                        .columns
                        .iter()
                        .position(|candidate| candidate.column == *column)
                        .is_some_and(|index| principal.entry.values[index] == *value)
            })
    })
}

fn references_table(dependent: &PendingWrite, principal: &PendingWrite) -> bool {
    foreign_keys_to(dependent, principal).next().is_some()
}

fn foreign_keys_to<'a>(
    dependent: &'a PendingWrite,
    principal: &'a PendingWrite,
) -> impl Iterator<Item = &'a ForeignKeyMapping> {
    dependent
        .mapping
        .foreign_keys
        .iter()
        .filter(move |foreign_key| foreign_key.principal_table == principal.mapping.table)
}

fn shares_unique_value(deleted: &PendingWrite, claimant: &PendingWrite) -> bool {
    deleted.id.type_id == claimant.id.type_id
        && deleted.mapping.unique_indexes.iter().any(|unique| {
            unique.iter().all(|index| {
                let value = &deleted.entry.values[*index];
                *value != Value::Null && claimant.entry.values[*index] == *value
            })
        })
}
