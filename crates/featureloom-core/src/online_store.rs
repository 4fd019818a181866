//! Online store trait for low-latency feature serving
//!
//! Online stores hold the latest value of every feature for every entity.
//! Rows arrive from materialization or direct pushes and are served to the
//! retrieval path.
//!
//! ## Contract
//!
//! 1. **Event-time ordering**: a write replaces a stored value only when its
//!    event timestamp is strictly newer. Older or equal writes are dropped
//!    silently (counted in [`WriteSummary::skipped_stale`]), so replays and
//!    out-of-order delivery are safe. The comparison is atomic per
//!    `(view, entity, feature)`.
//! 2. **TTL on read**: values older than the table's TTL read as absent.
//!    Expiry is lazy; nothing has to be purged at the cutoff.
//! 3. **Missing is not an error**: reads return one row per requested entity
//!    key, with absent features simply left out of the map.
//! 4. **Scoped deletion**: `delete_table` removes the named view's entries
//!    only, even when the backend colocates several views under one
//!    entity-derived key.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let table = OnlineTable::from(&driver_stats_view);
//! store.online_write_batch("ranking", &table, rows).await?;
//! let rows = store
//!     .online_read("ranking", &table, &[EntityKey::single("driver_id", 1001_i64)], &["conv_rate".into()])
//!     .await?;
//! ```

use crate::{EntityKey, FeatureView, Result, Value};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Physical table of one feature view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineTable {
    pub name: String,
    /// Serving TTL; `None` never expires
    pub ttl: Option<Duration>,
}

impl OnlineTable {
    pub fn new(name: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            ttl: ttl.filter(|t| !t.is_zero()),
        }
    }
}

impl From<&FeatureView> for OnlineTable {
    fn from(view: &FeatureView) -> Self {
        Self::new(view.name.clone(), view.effective_ttl())
    }
}

/// One entity's features at one event time
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineWriteRow {
    pub entity_key: EntityKey,
    pub features: BTreeMap<String, Value>,
    pub event_timestamp: DateTime<Utc>,
    pub created_timestamp: Option<DateTime<Utc>>,
}

impl OnlineWriteRow {
    pub fn new(entity_key: EntityKey, event_timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_key,
            features: BTreeMap::new(),
            event_timestamp,
            created_timestamp: None,
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.features.insert(name.into(), value.into());
        self
    }
}

/// A stored feature value and the event time it was true at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: Value,
    pub event_timestamp: DateTime<Utc>,
}

/// Features found for one entity key; absent features are not in the map
pub type OnlineReadRow = BTreeMap<String, StoredValue>;

/// Outcome of a batch write, counted per `(entity, feature)` cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub skipped_stale: usize,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.written += other.written;
        self.skipped_stale += other.skipped_stale;
    }
}

/// Trait for online feature stores (in-memory, SQLite, Redis, ...)
#[async_trait]
pub trait OnlineStore: Send + Sync {
    /// Write rows, keeping per cell the value with the greatest event time
    async fn online_write_batch(
        &self,
        project: &str,
        table: &OnlineTable,
        rows: Vec<OnlineWriteRow>,
    ) -> Result<WriteSummary>;

    /// Read the freshest non-expired values, one row per entity key, in order
    ///
    /// An empty `requested_features` reads every stored feature of the view.
    async fn online_read(
        &self,
        project: &str,
        table: &OnlineTable,
        entity_keys: &[EntityKey],
        requested_features: &[String],
    ) -> Result<Vec<OnlineReadRow>>;

    /// Remove every entry owned by `table_name`, and nothing else
    async fn delete_table(&self, project: &str, table_name: &str) -> Result<()>;

    /// Schema migration: prepare tables to keep, drop tables to delete
    ///
    /// Callers may retry this under eventual-consistency backends.
    async fn update(
        &self,
        project: &str,
        tables_to_keep: &[OnlineTable],
        tables_to_delete: &[OnlineTable],
    ) -> Result<()>;

    /// Drop everything this store holds for `project`
    async fn teardown(&self, project: &str, tables: &[OnlineTable]) -> Result<()> {
        for table in tables {
            self.delete_table(project, &table.name).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()>;

    /// Name of this online store type (for logging/metrics)
    fn store_type(&self) -> &'static str;
}

/// `age > ttl` is expired; no TTL never expires
pub fn is_expired(
    event_timestamp: DateTime<Utc>,
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    let Some(ttl) = ttl.filter(|t| !t.is_zero()) else {
        return false;
    };
    let age = now.signed_duration_since(event_timestamp);
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => age > ttl,
        // TTLs beyond chrono's range never elapse
        Err(_) => false,
    }
}
