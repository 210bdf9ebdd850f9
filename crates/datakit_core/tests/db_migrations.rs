mod common;

use common::{seed_customers, Customer, CustomerMapping};
use datakit_core::db::migrations::{current_version, latest_version, Migration};
use datakit_core::db::{open_db, DbError};
use datakit_core::{DataContext, DataError, DescriptorCatalog, Session, SessionOptions};
use rusqlite::types::Value;
use rusqlite::Connection;

const AUDIT_MIGRATIONS: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE audit_log (id INTEGER PRIMARY KEY, message TEXT NOT NULL);",
    ),
    Migration::new(2, "ALTER TABLE audit_log ADD COLUMN level TEXT;"),
];

struct AuditedContext;

impl DataContext for AuditedContext {
    fn register_descriptors(catalog: &mut DescriptorCatalog) {
        catalog.register::<CustomerMapping>();
    }

    fn migrations() -> &'static [Migration] {
        AUDIT_MIGRATIONS
    }
}

#[test]
fn opening_a_session_applies_context_migrations_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datakit.db");

    let first = Session::open_path::<AuditedContext>(&path, &SessionOptions::default()).unwrap();
    assert_eq!(
        current_version(first.connection()).unwrap(),
        latest_version(AUDIT_MIGRATIONS)
    );
    assert_table_exists(first.connection(), "audit_log");
    drop(first);

    let second = Session::open_path::<AuditedContext>(&path, &SessionOptions::default()).unwrap();
    assert_eq!(current_version(second.connection()).unwrap(), 2);
}

#[test]
fn committed_rows_survive_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datakit.db");

    let session = Session::open_path::<AuditedContext>(&path, &SessionOptions::default()).unwrap();
    session.ensure_created().unwrap();
    seed_customers(&session, &[Customer::new(1, "Ada")]);
    drop(session);

    let reopened =
        Session::open_path::<AuditedContext>(&path, &SessionOptions::default()).unwrap();
    let loaded = reopened
        .store::<Customer>()
        .unwrap()
        .select_by_key(&[Value::Integer(1)])
        .unwrap();
    assert_eq!(loaded, Some(Customer::new(1, "Ada")));
}

#[test]
fn newer_database_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 9;").unwrap();

    let err = Session::open::<AuditedContext>(conn).err().unwrap();
    match err {
        DataError::Db(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        }) => {
            assert_eq!(db_version, 9);
            assert_eq!(latest_supported, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn open_db_applies_connection_options() {
    let dir = tempfile::tempdir().unwrap();
    let options = SessionOptions {
        foreign_keys: false,
        ..SessionOptions::default()
    };

    let conn = open_db(dir.path().join("plain.db"), &options).unwrap();
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 0);

    let conn = open_db(dir.path().join("strict.db"), &SessionOptions::default()).unwrap();
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
