//! Durable record of registered providers for crash recovery.
//!
//! Single SQLite table. The connection is shared behind `Arc<Mutex<..>>`
//! and every statement runs on `spawn_blocking` so the async runtime is
//! never blocked; the lock is held only for the duration of one query.
//! Fake providers are never written here.

use crate::error::{IarnetError, Result};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// One persisted provider row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ProviderRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone)]
pub struct ProviderStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProviderStore {
    /// Open (and migrate) the store at `path`.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            apply_migrations(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| IarnetError::Persistence(format!("spawn_blocking failed: {}", e)))?
        .map_err(IarnetError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (tests and ephemeral nodes).
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> rusqlite::Result<Connection> {
            let conn = Connection::open_in_memory()?;
            apply_migrations(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| IarnetError::Persistence(format!("spawn_blocking failed: {}", e)))?
        .map_err(IarnetError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| IarnetError::Persistence(format!("task execution failed: {}", e)))?
        .map_err(IarnetError::from)
    }

    /// All rows, ordered by id (deterministic recovery order).
    pub async fn load_all(&self) -> Result<Vec<ProviderRecord>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, host, port, created_at, updated_at \
                 FROM providers ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ProviderRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    host: row.get(2)?,
                    port: row.get::<_, i64>(3)? as u16,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Insert or refresh a row (refresh keeps `created_at`).
    pub async fn upsert(&self, record: ProviderRecord) -> Result<()> {
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO providers (id, name, host, port, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET \
                   name = excluded.name, host = excluded.host, \
                   port = excluded.port, updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.name,
                    record.host,
                    record.port as i64,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete a row. Deleting an absent id is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run_blocking(move |conn| {
            conn.execute("DELETE FROM providers WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS providers (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            host       TEXT NOT NULL,
            port       INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
}
