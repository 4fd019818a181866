//! SQLite online store
//!
//! One table per `(project, feature view)`, one row per
//! `(entity key, feature)`. The event-time rule is pushed into the upsert
//! itself (`ON CONFLICT ... WHERE excluded.event_ts > event_ts`), so a stale
//! write is a no-op inside SQLite and needs no read-modify-write here.
//!
//! Values are stored as their JSON encoding so every [`Value`] variant
//! survives the round trip with its type. Timestamps are stored as
//! nanoseconds since the epoch, which covers the years 1677 to 2262.

use crate::observability;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use featureloom_core::{
    is_expired, recover_mutex, EntityKey, Error, OnlineReadRow, OnlineStore, OnlineTable,
    OnlineWriteRow, Result, StoredValue, Value, WriteSummary,
};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

pub struct SqliteOnlineStore {
    db: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteOnlineStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let location = path.as_ref().display().to_string();
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| {
                    format!("Failed to create online store directory {}", parent.display())
                })?;
        }

        let db = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .context("Failed to open SQLite connection for online store")?;
        db.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        db.pragma_update(None, "busy_timeout", 5000)
            .context("Failed to set busy timeout")?;

        info!(path = %location, "Initialized SQLite online store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            location,
        })
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .context("Failed to create in-memory SQLite connection")?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            location: ":memory:".to_string(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        recover_mutex(&self.db, "SqliteOnlineStore")
    }
}

/// Physical table name of a feature view
///
/// The project is length-prefixed so distinct `(project, view)` pairs never
/// share a table: `a_b`/`c` and `a`/`b_c` become `3_a_b_c` and `1_a_b_c`.
fn table_name(project: &str, view: &str) -> String {
    format!("{}_{}_{}", project.len(), project, view)
}

/// Quoted [`table_name`] for use in SQL text
fn table_ident(project: &str, view: &str) -> String {
    format!("\"{}\"", table_name(project, view).replace('"', "\"\""))
}

fn create_table(db: &Connection, ident: &str) -> Result<()> {
    db.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ident} (
            entity_key TEXT NOT NULL,
            feature_name TEXT NOT NULL,
            value TEXT NOT NULL,
            event_ts INTEGER NOT NULL,
            created_ts INTEGER,
            PRIMARY KEY (entity_key, feature_name)
        )
        "#
    ))
    .map_err(sqlite_error)
}

fn table_exists(db: &Connection, project: &str, view: &str) -> Result<bool> {
    let name: Option<String> = db
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table_name(project, view)],
            |row| row.get(0),
        )
        .optional()
        .map_err(sqlite_error)?;
    Ok(name.is_some())
}

/// Busy/locked databases are transient; everything else is a storage error
fn sqlite_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::Unavailable(format!("SQLite online store: {}", err))
        }
        _ => Error::StorageError(anyhow::Error::new(err).context("SQLite online store")),
    }
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

fn encode_timestamp(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        Error::invalid_input(format!(
            "timestamp {} is outside the range the SQLite online store can hold",
            ts
        ))
    })
}

fn decode_timestamp(nanos: i64) -> Result<DateTime<Utc>> {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, subsec)
        .ok_or_else(|| Error::internal(format!("event timestamp {} out of range", nanos)))
}

#[async_trait]
impl OnlineStore for SqliteOnlineStore {
    async fn online_write_batch(
        &self,
        project: &str,
        table: &OnlineTable,
        rows: Vec<OnlineWriteRow>,
    ) -> Result<WriteSummary> {
        let ident = table_ident(project, &table.name);
        let mut summary = WriteSummary::default();
        {
            let mut db = self.lock()?;
            create_table(&db, &ident)?;
            let tx = db.transaction().map_err(sqlite_error)?;
            {
                let mut stmt = tx
                    .prepare_cached(&format!(
                        r#"
                        INSERT INTO {ident} (entity_key, feature_name, value, event_ts, created_ts)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT (entity_key, feature_name) DO UPDATE SET
                            value = excluded.value,
                            event_ts = excluded.event_ts,
                            created_ts = excluded.created_ts
                        WHERE excluded.event_ts > event_ts
                        "#
                    ))
                    .map_err(sqlite_error)?;

                for row in &rows {
                    let entity_key = row.entity_key.storage_key();
                    let event_ts = encode_timestamp(row.event_timestamp)?;
                    let created_ts = row.created_timestamp.map(encode_timestamp).transpose()?;
                    for (feature, value) in &row.features {
                        let encoded = serde_json::to_string(value)?;
                        let changed = stmt
                            .execute(params![entity_key, feature, encoded, event_ts, created_ts])
                            .map_err(sqlite_error)?;
                        if changed > 0 {
                            summary.written += 1;
                        } else {
                            summary.skipped_stale += 1;
                        }
                    }
                }
            }
            tx.commit().map_err(sqlite_error)?;
        }

        debug!(
            feature_view = %table.name,
            written = summary.written,
            skipped = summary.skipped_stale,
            "SQLite online write complete"
        );
        observability::record_online_write(self.store_type(), &table.name, summary);
        Ok(summary)
    }

    async fn online_read(
        &self,
        project: &str,
        table: &OnlineTable,
        entity_keys: &[EntityKey],
        requested_features: &[String],
    ) -> Result<Vec<OnlineReadRow>> {
        let start = Instant::now();
        let now = Utc::now();
        let db = self.lock()?;
        if !table_exists(&db, project, &table.name)? {
            return Ok(vec![OnlineReadRow::new(); entity_keys.len()]);
        }

        let mut stmt = db
            .prepare_cached(&format!(
                "SELECT feature_name, value, event_ts FROM {} WHERE entity_key = ?1",
                table_ident(project, &table.name)
            ))
            .map_err(sqlite_error)?;

        let mut results = Vec::with_capacity(entity_keys.len());
        for entity_key in entity_keys {
            let cells = stmt
                .query_map(params![entity_key.storage_key()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(sqlite_error)?;

            let mut found = OnlineReadRow::new();
            for cell in cells {
                let (feature, encoded, event_ts) = cell.map_err(sqlite_error)?;
                if !requested_features.is_empty() && !requested_features.contains(&feature) {
                    continue;
                }
                let event_timestamp = decode_timestamp(event_ts)?;
                if is_expired(event_timestamp, table.ttl, now) {
                    continue;
                }
                let value: Value = serde_json::from_str(&encoded)?;
                found.insert(feature, StoredValue { value, event_timestamp });
            }
            results.push(found);
        }

        observability::record_online_read(self.store_type(), &table.name, start.elapsed());
        Ok(results)
    }

    async fn delete_table(&self, project: &str, table_name: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}",
            table_ident(project, table_name)
        ))
        .map_err(sqlite_error)?;
        info!(project, feature_view = table_name, "Dropped SQLite online table");
        Ok(())
    }

    async fn update(
        &self,
        project: &str,
        tables_to_keep: &[OnlineTable],
        tables_to_delete: &[OnlineTable],
    ) -> Result<()> {
        {
            let db = self.lock()?;
            for table in tables_to_keep {
                create_table(&db, &table_ident(project, &table.name))?;
            }
        }
        for table in tables_to_delete {
            self.delete_table(project, &table.name).await?;
        }
        info!(
            project,
            kept = tables_to_keep.len(),
            deleted = tables_to_delete.len(),
            "Updated SQLite online tables"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let db = self.lock()?;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}
