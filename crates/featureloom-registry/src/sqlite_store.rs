//! SQLite registry store with WAL mode
//!
//! The snapshot lives in a single-row table. WAL plus a busy timeout lets a
//! handful of processes share one database file.

use crate::backend::RegistryStore;
use anyhow::Context;
use async_trait::async_trait;
use featureloom_core::{recover_mutex, Error, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS registry_snapshots (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        snapshot BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

pub struct SqliteRegistryStore {
    db: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteRegistryStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let location = path.as_ref().display().to_string();
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| {
                    format!("Failed to create registry directory {}", parent.display())
                })?;
        }

        let db = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .context("Failed to open SQLite connection for registry")?;

        db.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        db.pragma_update(None, "busy_timeout", 5000)
            .context("Failed to set busy timeout")?;
        db.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous mode")?;
        db.execute(CREATE_TABLE, [])
            .context("Failed to create registry_snapshots table")?;

        info!(path = %location, "Initialized SQLite registry store with WAL mode");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            location,
        })
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let db =
            Connection::open_in_memory().context("Failed to create in-memory SQLite connection")?;
        db.execute(CREATE_TABLE, [])
            .context("Failed to create registry_snapshots table")?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            location: ":memory:".to_string(),
        })
    }
}

#[async_trait]
impl RegistryStore for SqliteRegistryStore {
    async fn load(&self) -> Result<Vec<u8>> {
        let db = recover_mutex(&self.db, "SqliteRegistryStore")?;
        let snapshot: Option<Vec<u8>> = db
            .query_row(
                "SELECT snapshot FROM registry_snapshots WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read registry snapshot")?;
        snapshot.ok_or_else(|| Error::SnapshotNotFound(self.location()))
    }

    async fn save(&self, snapshot: &[u8]) -> Result<()> {
        let db = recover_mutex(&self.db, "SqliteRegistryStore")?;
        db.execute(
            r#"
            INSERT INTO registry_snapshots (id, snapshot, updated_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            "#,
            params![snapshot, chrono::Utc::now().timestamp_millis()],
        )
        .context("Failed to save registry snapshot")?;
        debug!(bytes = snapshot.len(), "Saved registry snapshot to SQLite");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let db = recover_mutex(&self.db, "SqliteRegistryStore")?;
        db.execute("DELETE FROM registry_snapshots WHERE id = 1", [])
            .context("Failed to delete registry snapshot")?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("sqlite:{}", self.location)
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}
