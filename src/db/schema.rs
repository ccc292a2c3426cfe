//! Versioned schema for the record database.
//!
//! The applied version lives in SQLite's `user_version` pragma. Each
//! migration runs in its own transaction together with the version bump.

use anyhow::{Context, Result};
use rusqlite::Connection;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: 2,
        name: "record_size",
        sql: include_str!("migrations/002_record_size.sql"),
    },
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut version = schema_version(conn)?;

    // Files written before versioning already hold the initial table.
    if version == 0 && has_records_table(conn)? {
        set_schema_version(conn, 1)?;
        version = 1;
        tracing::info!("Existing record database found, starting at schema version 1");
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        tracing::info!(
            "Applying record database migration {} ({})",
            migration.version,
            migration.name
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).with_context(|| {
            format!(
                "Failed to apply migration {} ({})",
                migration.version, migration.name
            )
        })?;
        set_schema_version(&tx, migration.version)?;
        tx.commit()?;
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn has_records_table(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert!(has_records_table(&conn).unwrap());
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn running_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn unversioned_database_is_upgraded_in_place() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE records (name TEXT PRIMARY KEY, payload BLOB NOT NULL, updated_at TEXT NOT NULL);
             INSERT INTO records VALUES ('database', x'7b7d', '2026-01-01T00:00:00Z');",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), 2);
        let size: i64 = conn
            .query_row("SELECT size FROM records WHERE name = 'database'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(size, 2);
    }
}
