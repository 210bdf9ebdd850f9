//! Storage sessions.
//!
//! # Responsibility
//! - Own one SQLite connection, its change tracker and its tracking policy.
//! - Resolve the context's schema model lazily on first use.
//! - Write pending tracked changes when a unit of work commits.
//!
//! # Invariants
//! - A session is single-threaded; interior state uses `Cell`/`RefCell`, so
//!   `Session` is not `Sync`.
//! - Tracking mode only changes once the context's schema model exists.
//! - `detach_all` leaves the tracker empty.

mod context;
mod flush_order;
mod options;
pub mod tracking;

pub use context::DataContext;
pub use options::SessionOptions;
pub use tracking::{EntityState, TrackingMode};

use crate::db::migrations::apply_migrations;
use crate::db::{is_constraint_violation, open_db, open_db_in_memory};
use crate::error::{DataError, DataResult, ErrorReporter};
use crate::model::entity::{Entity, EntityKey};
use crate::repo::entity_store::EntityStore;
use crate::repo::sql::{delete_sql, insert_sql, update_sql};
use crate::schema::cache::{is_built_type, schema_for};
use crate::schema::model::{EntityMapping, SchemaModel};
use flush_order::{flush_order, PendingWrite};
use log::{debug, info, warn};
use once_cell::unsync::OnceCell;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use tracking::{ChangeTracker, EntryId, TrackedEntry};
use uuid::Uuid;

struct ContextHandle {
    type_id: TypeId,
    name: &'static str,
    resolve: fn() -> DataResult<Arc<SchemaModel>>,
    reporter: Arc<dyn ErrorReporter>,
}

/// One unit of interaction with the database for a `DataContext`.
pub struct Session {
    id: Uuid,
    conn: Connection,
    context: ContextHandle,
    model: OnceCell<Arc<SchemaModel>>,
    tracking: Cell<TrackingMode>,
    tracker: RefCell<ChangeTracker>,
}

impl Session {
    /// Opens a session over an existing connection with default options.
    ///
    /// Applies `C::migrations()` before returning.
    pub fn open<C: DataContext>(conn: Connection) -> DataResult<Self> {
        Self::open_with_options::<C>(conn, &SessionOptions::default())
    }

    /// Opens a session over an existing connection.
    ///
    /// Connection pragmas are the caller's concern here; only
    /// `default_tracking` is taken from `options`.
    pub fn open_with_options<C: DataContext>(
        conn: Connection,
        options: &SessionOptions,
    ) -> DataResult<Self> {
        let applied = apply_migrations(&conn, C::migrations())?;
        let session = Self {
            id: Uuid::new_v4(),
            conn,
            context: ContextHandle {
                type_id: TypeId::of::<C>(),
                name: C::context_name(),
                resolve: schema_for::<C>,
                reporter: C::error_reporter(),
            },
            model: OnceCell::new(),
            tracking: Cell::new(options.default_tracking),
            tracker: RefCell::new(ChangeTracker::default()),
        };
        info!(
            "event=session_open module=session status=ok session_id={} context={} tracking={} migrations_applied={}",
            session.id,
            session.context.name,
            options.default_tracking.as_str(),
            applied
        );
        Ok(session)
    }

    /// Opens a SQLite file configured by `options` and wraps it in a session.
    pub fn open_path<C: DataContext>(
        path: impl AsRef<Path>,
        options: &SessionOptions,
    ) -> DataResult<Self> {
        let conn = open_db(path, options)?;
        Self::open_with_options::<C>(conn, options)
    }

    /// Opens an in-memory database configured by `options`.
    pub fn open_in_memory<C: DataContext>(options: &SessionOptions) -> DataResult<Self> {
        let conn = open_db_in_memory(options)?;
        Self::open_with_options::<C>(conn, options)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context_name(&self) -> &'static str {
        self.context.name
    }

    /// Returns the context's schema model, building it on first use.
    ///
    /// # Errors
    /// - Returns `ConfigurationError::BaseSchema` when the base step fails.
    pub fn model(&self) -> DataResult<Arc<SchemaModel>> {
        self.model
            .get_or_try_init(|| (self.context.resolve)())
            .map(Arc::clone)
    }

    /// Returns whether the context's schema model has been built.
    pub fn is_model_built(&self) -> bool {
        self.model.get().is_some() || is_built_type(self.context.type_id)
    }

    /// Switches the tracking policy for subsequent queries.
    ///
    /// Before the schema model exists the change is reported through the
    /// context's `ErrorReporter` and the current mode is kept.
    pub fn set_tracking(&self, mode: TrackingMode) {
        if !self.is_model_built() {
            let err = DataError::TrackingState(format!(
                "cannot set tracking to `{}` before the `{}` schema model is built",
                mode.as_str(),
                self.context.name
            ));
            warn!(
                "event=tracking_set module=session status=error session_id={} requested={} kept={}",
                self.id,
                mode.as_str(),
                self.tracking.get().as_str()
            );
            self.context.reporter.on_session_error(&err);
            return;
        }

        let previous = self.tracking.replace(mode);
        info!(
            "event=tracking_set module=session status=ok session_id={} from={} to={}",
            self.id,
            previous.as_str(),
            mode.as_str()
        );
    }

    pub fn tracking(&self) -> TrackingMode {
        self.tracking.get()
    }

    /// Creates every mapped table that is missing.
    pub fn ensure_created(&self) -> DataResult<usize> {
        let model = self.model()?;
        Ok(model.ensure_created(&self.conn)?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns a store for entity type `E` bound to this session.
    ///
    /// # Errors
    /// - Returns `ConfigurationError::MissingMapping` when `E` is not mapped.
    pub fn store<E: Entity>(&self) -> DataResult<EntityStore<'_, E>> {
        EntityStore::new(self)
    }

    /// Detaches every tracked entity. Returns how many entries were dropped.
    pub fn detach_all(&self) -> usize {
        let dropped = self.tracker.borrow_mut().detach_all();
        info!(
            "event=detach_all module=session status=ok session_id={} detached={}",
            self.id, dropped
        );
        dropped
    }

    /// Number of tracked entries, in any state.
    pub fn tracked_len(&self) -> usize {
        self.tracker.borrow().len()
    }

    /// Returns whether any tracked entry awaits a commit.
    pub fn has_changes(&self) -> bool {
        self.tracker.borrow().has_changes()
    }

    pub(crate) fn with_tracker<R>(&self, f: impl FnOnce(&mut ChangeTracker) -> R) -> R {
        f(&mut self.tracker.borrow_mut())
    }

    /// Writes every pending entry through `conn`.
    ///
    /// Inserts and updates reach a principal row before the rows that
    /// reference it, deletes reach dependents first; otherwise entries are
    /// written in first-tracked order. The caller owns the surrounding
    /// transaction. Returns the number of entries written; the tracker itself
    /// is not modified.
    pub(crate) fn flush(&self, conn: &Connection) -> DataResult<usize> {
        let pending = self.tracker.borrow().pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let model = self.model()?;
        let mut writes = Vec::with_capacity(pending.len());
        for (id, entry) in pending {
            let mapping = model.mapping_by_type(id.type_id).ok_or_else(|| {
                DataError::Unexpected {
                    message: format!("no mapping for tracked entity `{}`", entry.entity_name),
                    source: None,
                }
            })?;
            writes.push(PendingWrite { id, entry, mapping });
        }

        for index in flush_order(&writes) {
            let PendingWrite { id, entry, mapping } = &writes[index];
            write_entry(conn, mapping, id, entry)?;
            debug!(
                "event=flush_entry module=session status=ok session_id={} entity={} key={} state={}",
                self.id,
                entry.entity_name,
                id.key,
                entry.state.as_str()
            );
        }
        Ok(writes.len())
    }
}

pub(crate) fn entry_id<E: Entity>(mapping: &EntityMapping, values: &[Value]) -> EntryId {
    EntryId {
        type_id: TypeId::of::<E>(),
        key: EntityKey::from_values(mapping.key.iter().map(|index| &values[*index])),
    }
}

fn write_entry(
    conn: &Connection,
    mapping: &EntityMapping,
    id: &EntryId,
    entry: &TrackedEntry,
) -> DataResult<()> {
    let key_values = mapping.key.iter().map(|index| &entry.values[*index]);

    let (action, sql, params): (&str, String, Vec<&Value>) = match entry.state {
        EntityState::Added => ("insert", insert_sql(mapping), entry.values.iter().collect()),
        EntityState::Modified => {
            let mut fields: Vec<usize> = entry
                .modified_fields()
                .into_iter()
                .filter(|index| !mapping.is_key_field(*index))
                .collect();
            // Key-only entities: assign the key to itself so a missing row is
            // still detected.
            if fields.is_empty() {
                fields = mapping.key.clone();
            }
            let params = fields
                .iter()
                .map(|index| &entry.values[*index])
                .chain(key_values)
                .collect();
            ("update", update_sql(mapping, &fields), params)
        }
        EntityState::Deleted => ("delete", delete_sql(mapping), key_values.collect()),
        EntityState::Unchanged | EntityState::Detached => return Ok(()),
    };

    let message = format!("failed to {action} `{}` {}", entry.entity_name, id.key);
    let affected = conn
        .execute(&sql, params_from_iter(params))
        .map_err(|err| classify(message.clone(), err))?;

    if affected == 0 && entry.state != EntityState::Added {
        return Err(DataError::Persistence {
            message,
            source: Box::new(NoRowAffected {
                table: mapping.table.clone(),
            }),
        });
    }
    Ok(())
}

fn classify(message: String, err: rusqlite::Error) -> DataError {
    if is_constraint_violation(&err) {
        DataError::Persistence {
            message,
            source: Box::new(err),
        }
    } else {
        DataError::Unexpected {
            message,
            source: Some(Box::new(err)),
        }
    }
}

/// An UPDATE or DELETE matched no row: the entity changed or vanished since
/// it was read.
#[derive(Debug)]
struct NoRowAffected {
    table: String,
}

impl Display for NoRowAffected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "no row in `{}` matched the tracked key", self.table)
    }
}

impl Error for NoRowAffected {}
