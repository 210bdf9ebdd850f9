//! SQLite migration executor for context-supplied migrations.
//!
//! # Responsibility
//! - Validate that migrations are registered in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One versioned SQL migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: u32, sql: &'static str) -> Self {
        Self { version, sql }
    }
}

/// Returns the latest version in the given migration list.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Reads the schema version stored in `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies all pending migrations on the provided connection.
///
/// Returns the number of migrations applied.
pub fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> DbResult<usize> {
    ensure_ordered(migrations)?;

    let current = current_version(conn)?;
    let latest = latest_version(migrations);

    if current > latest && !migrations.is_empty() {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    if current >= latest {
        return Ok(0);
    }

    // `unchecked_transaction` because sessions only lend out `&Connection`.
    let tx = conn.unchecked_transaction()?;
    let mut applied = 0;
    for migration in migrations {
        if migration.version <= current {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        applied += 1;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} applied={}",
        current, latest, applied
    );
    Ok(applied)
}

fn ensure_ordered(migrations: &[Migration]) -> DbResult<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(DbError::InvalidMigrationOrder {
                previous: pair[0].version,
                next: pair[1].version,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, current_version, latest_version, Migration};
    use crate::db::DbError;
    use rusqlite::Connection;

    const STEPS: &[Migration] = &[
        Migration::new(1, "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
        Migration::new(2, "CREATE TABLE b (id INTEGER PRIMARY KEY);"),
    ];

    #[test]
    fn applies_pending_steps_once() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations(&conn, STEPS).unwrap(), 2);
        assert_eq!(current_version(&conn).unwrap(), latest_version(STEPS));
        assert_eq!(apply_migrations(&conn, STEPS).unwrap(), 0);
    }

    #[test]
    fn rejects_out_of_order_versions() {
        let conn = Connection::open_in_memory().unwrap();
        let steps = [Migration::new(2, "SELECT 1;"), Migration::new(1, "SELECT 1;")];
        let err = apply_migrations(&conn, &steps).unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidMigrationOrder {
                previous: 2,
                next: 1
            }
        ));
    }

    #[test]
    fn empty_list_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 7;").unwrap();
        assert_eq!(apply_migrations(&conn, &[]).unwrap(), 0);
    }
}
