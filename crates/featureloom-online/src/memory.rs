//! In-memory online store with colocated feature views
//!
//! Entries are keyed by `(project, entity key)` only, so every feature view
//! that shares an entity lands under the same physical key, the layout
//! key-value backends like Redis or Datastore use. Each cell is tagged with
//! its owning view; reads and `delete_table` filter on that tag.
//!
//! The event-time compare-and-set runs under the DashMap shard lock of the
//! entity entry, so concurrent writers to the same cell serialize while
//! writes to other entities proceed in parallel.

use crate::observability;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use featureloom_core::{
    is_expired, EntityKey, OnlineReadRow, OnlineStore, OnlineTable, OnlineWriteRow, Result,
    StoredValue, WriteSummary,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// `(feature view, feature name)` tag of one stored cell
type CellKey = (String, String);

#[derive(Default)]
pub struct InMemoryOnlineStore {
    entries: DashMap<(String, String), HashMap<CellKey, StoredValue>>,
}

impl InMemoryOnlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical entity keys (across all views and projects)
    pub fn entity_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl OnlineStore for InMemoryOnlineStore {
    async fn online_write_batch(
        &self,
        project: &str,
        table: &OnlineTable,
        rows: Vec<OnlineWriteRow>,
    ) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for row in rows {
            let key = (project.to_string(), row.entity_key.storage_key());
            let mut cells = self.entries.entry(key).or_default();

            for (feature, value) in row.features {
                let cell = (table.name.clone(), feature);
                let newer = cells
                    .get(&cell)
                    .map_or(true, |stored| row.event_timestamp > stored.event_timestamp);
                if newer {
                    cells.insert(
                        cell,
                        StoredValue {
                            value,
                            event_timestamp: row.event_timestamp,
                        },
                    );
                    summary.written += 1;
                } else {
                    summary.skipped_stale += 1;
                }
            }
        }

        if summary.skipped_stale > 0 {
            debug!(
                feature_view = %table.name,
                skipped = summary.skipped_stale,
                "Skipped writes not newer than stored values"
            );
        }
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

        let rows = entity_keys
            .iter()
            .map(|entity_key| {
                let key = (project.to_string(), entity_key.storage_key());
                let Some(cells) = self.entries.get(&key) else {
                    return OnlineReadRow::new();
                };
                cells
                    .iter()
                    .filter(|((view, feature), _)| {
                        let wanted =
                            requested_features.is_empty() || requested_features.contains(feature);
                        *view == table.name && wanted
                    })
                    .filter(|(_, stored)| !is_expired(stored.event_timestamp, table.ttl, now))
                    .map(|((_, feature), stored)| (feature.clone(), stored.clone()))
                    .collect()
            })
            .collect();

        observability::record_online_read(self.store_type(), &table.name, start.elapsed());
        Ok(rows)
    }

    async fn delete_table(&self, project: &str, table_name: &str) -> Result<()> {
        self.entries.retain(|(entry_project, _), cells| {
            if entry_project == project {
                cells.retain(|(view, _), _| view != table_name);
            }
            !cells.is_empty()
        });
        info!(project, feature_view = table_name, "Deleted in-memory online table");
        Ok(())
    }

    async fn update(
        &self,
        project: &str,
        _tables_to_keep: &[OnlineTable],
        tables_to_delete: &[OnlineTable],
    ) -> Result<()> {
        for table in tables_to_delete {
            self.delete_table(project, &table.name).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
