//! SQLite-backed record store.
//!
//! Useful when a durable volume is mounted next to the volatile one: the
//! records table there plays the role of the remote store.

mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::sync::{RemoteError, RemoteStore};

/// Metadata about one stored record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    pub name: String,
    pub size: i64,
    pub updated_at: DateTime<Utc>,
}

pub struct RecordDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl RecordDatabase {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    pub fn put_record(&self, name: &str, payload: &[u8]) -> rusqlite::Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO records (name, payload, size, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                payload = excluded.payload,
                size = excluded.size,
                updated_at = excluded.updated_at",
            (name, payload, payload.len() as i64, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    pub fn get_record(&self, name: &str) -> rusqlite::Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.query_row(
            "SELECT payload FROM records WHERE name = ?",
            [name],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn list_records(&self) -> rusqlite::Result<Vec<RecordInfo>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT name, size, updated_at FROM records ORDER BY name")?;

        let records = stmt
            .query_map([], |row| {
                Ok(RecordInfo {
                    name: row.get(0)?,
                    size: row.get(1)?,
                    updated_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

impl Clone for RecordDatabase {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

// rusqlite blocks, so calls run on the blocking pool where a timeout around
// them can still fire.
#[async_trait]
impl RemoteStore for RecordDatabase {
    async fn upsert(&self, name: &str, payload: &[u8]) -> Result<(), RemoteError> {
        let db = self.clone();
        let (name, payload) = (name.to_string(), payload.to_vec());
        tokio::task::spawn_blocking(move || db.put_record(&name, &payload)).await??;
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let db = self.clone();
        let name = name.to_string();
        Ok(tokio::task::spawn_blocking(move || db.get_record(&name)).await??)
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
