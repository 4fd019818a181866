//! Offline → online materialization
//!
//! ## Flow
//!
//! 1. Pull the rows of the view's batch source with
//!    `start <= event_timestamp < end` from an [`OfflineSource`]
//! 2. Convert them to typed [`OnlineWriteRow`]s using the view schema, the
//!    entity join keys and the source's timestamp field and field mapping
//! 3. Partition by entity key hash and write chunks concurrently
//!
//! Rows are not sorted or deduplicated here: the online store keeps the
//! newest value by event time, so replays and overlapping windows converge to
//! the same state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let target = MaterializationTarget::new(view, source, vec![JoinKey::typed("driver_id", ValueType::Int64)]);
//! let result = materialize(online, &offline, "ranking", &target, start, end, &MaterializeConfig::default()).await?;
//! println!("{} rows, {} cells written", result.rows_read, result.summary.written);
//! ```

use crate::observability;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use featureloom_core::{
    DataSource, EntityKey, Error, FeatureView, OnlineStore, OnlineTable, OnlineWriteRow, Result,
    SourceKind, Value, ValueType, WriteSummary,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// One untyped source row, column name to plain JSON value
pub type SourceRow = BTreeMap<String, serde_json::Value>;

/// Reader of historical rows from batch sources
#[async_trait]
pub trait OfflineSource: Send + Sync {
    /// Rows of `source` whose event timestamp lies in `[start, end)`
    async fn pull_rows(
        &self,
        source: &DataSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceRow>>;

    fn source_type(&self) -> &'static str;
}

/// Event timestamp of a raw row (RFC 3339 string or epoch seconds)
pub fn event_timestamp(source: &DataSource, row: &SourceRow) -> Result<DateTime<Utc>> {
    let raw = row.get(&source.timestamp_field).ok_or_else(|| {
        Error::invalid_input(format!(
            "row of data source '{}' has no timestamp column '{}'",
            source.name, source.timestamp_field
        ))
    })?;
    match Value::from_json(raw, ValueType::UnixTimestamp)? {
        Value::UnixTimestamp(ts) => Ok(ts),
        _ => Err(Error::invalid_input(format!(
            "row of data source '{}' has a null timestamp",
            source.name
        ))),
    }
}

fn keep_in_window(
    source: &DataSource,
    rows: impl IntoIterator<Item = SourceRow>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SourceRow>> {
    let mut kept = Vec::new();
    for row in rows {
        let ts = event_timestamp(source, &row)?;
        if start <= ts && ts < end {
            kept.push(row);
        }
    }
    Ok(kept)
}

/// Rows held in memory, keyed by data source name
#[derive(Default)]
pub struct InMemoryOfflineSource {
    tables: RwLock<HashMap<String, Vec<SourceRow>>>,
}

impl InMemoryOfflineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a source's table
    pub fn insert(&self, source_name: &str, rows: Vec<SourceRow>) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| Error::internal("InMemoryOfflineSource lock poisoned"))?;
        tables.entry(source_name.to_string()).or_default().extend(rows);
        Ok(())
    }
}

#[async_trait]
impl OfflineSource for InMemoryOfflineSource {
    async fn pull_rows(
        &self,
        source: &DataSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceRow>> {
        let rows = {
            let tables = self
                .tables
                .read()
                .map_err(|_| Error::internal("InMemoryOfflineSource lock poisoned"))?;
            tables.get(&source.name).cloned().unwrap_or_default()
        };
        keep_in_window(source, rows, start, end)
    }

    fn source_type(&self) -> &'static str {
        "memory"
    }
}

/// Reads `file` data sources stored as JSON lines (one object per line)
///
/// Relative source paths resolve against `base_path`.
pub struct JsonLinesFileSource {
    base_path: PathBuf,
}

impl JsonLinesFileSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl OfflineSource for JsonLinesFileSource {
    async fn pull_rows(
        &self,
        source: &DataSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SourceRow>> {
        let path = match &source.kind {
            SourceKind::File { path, format } if format == "jsonl" || format == "json" => path,
            SourceKind::File { format, .. } => {
                return Err(Error::invalid_input(format!(
                    "data source '{}' uses format '{}'; only jsonl files can be read",
                    source.name, format
                )))
            }
            other => {
                return Err(Error::invalid_input(format!(
                    "data source '{}' is a {} source; only file sources can be read",
                    source.name,
                    other.type_name()
                )))
            }
        };

        let path = self.resolve(path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read offline file {}", path.display()))?;

        let mut rows = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: SourceRow = serde_json::from_str(line).map_err(|e| {
                Error::invalid_input(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            rows.push(row);
        }
        debug!(path = %path.display(), rows = rows.len(), "Read offline file");
        keep_in_window(source, rows, start, end)
    }

    fn source_type(&self) -> &'static str {
        "file"
    }
}

/// A join key and, when the entity declares one, its value type
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKey {
    pub name: String,
    pub value_type: Option<ValueType>,
}

impl JoinKey {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type: Some(value_type),
        }
    }

    fn parse(&self, raw: &serde_json::Value) -> Result<Value> {
        match self.value_type {
            Some(ty) => Value::from_json(raw, ty),
            None => Ok(Value::infer_from_json(raw)),
        }
    }
}

/// Everything needed to turn source rows into online rows for one view
#[derive(Debug, Clone)]
pub struct MaterializationTarget {
    pub view: FeatureView,
    /// Batch source the rows come from
    pub source: DataSource,
    pub join_keys: Vec<JoinKey>,
}

impl MaterializationTarget {
    pub fn new(view: FeatureView, source: DataSource, join_keys: Vec<JoinKey>) -> Self {
        Self {
            view,
            source,
            join_keys,
        }
    }

    /// Convert raw rows, applying the source field mapping and the view schema
    ///
    /// Columns that are neither join keys, timestamps nor schema fields are
    /// ignored; schema fields missing from a row are left unset.
    pub fn to_online_rows(&self, rows: Vec<SourceRow>) -> Result<Vec<OnlineWriteRow>> {
        rows.into_iter().map(|row| self.to_online_row(row)).collect()
    }

    fn to_online_row(&self, row: SourceRow) -> Result<OnlineWriteRow> {
        let event_ts = event_timestamp(&self.source, &row)?;
        let created_ts = match &self.source.created_timestamp_column {
            Some(column) => match row.get(column) {
                Some(raw) => match Value::from_json(raw, ValueType::UnixTimestamp)? {
                    Value::UnixTimestamp(ts) => Some(ts),
                    _ => None,
                },
                None => None,
            },
            None => None,
        };

        let mapped: BTreeMap<&str, &serde_json::Value> = row
            .iter()
            .map(|(column, value)| (self.source.mapped_name(column), value))
            .collect();

        let pairs = self
            .join_keys
            .iter()
            .map(|key| {
                let raw = mapped.get(key.name.as_str()).ok_or_else(|| {
                    Error::invalid_input(format!(
                        "row for feature view '{}' is missing join key '{}'",
                        self.view.name, key.name
                    ))
                })?;
                Ok((key.name.clone(), key.parse(raw)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut online = OnlineWriteRow::new(EntityKey::new(pairs)?, event_ts);
        online.created_timestamp = created_ts;
        for field in &self.view.schema {
            if let Some(raw) = mapped.get(field.name.as_str()) {
                let value = Value::from_json(raw, field.dtype).map_err(|e| {
                    Error::invalid_input(format!(
                        "feature '{}' of '{}': {}",
                        field.name, self.view.name, e
                    ))
                })?;
                online.features.insert(field.name.clone(), value);
            }
        }
        Ok(online)
    }
}

/// Materialization tuning
#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    /// Rows per online write call
    pub chunk_size: usize,
    /// Concurrent writers over disjoint entity partitions
    pub parallelism: usize,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            parallelism: 4,
        }
    }
}

/// Materialization result with metrics
#[derive(Debug, Clone)]
pub struct MaterializeResult {
    pub feature_view: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Source rows inside the window
    pub rows_read: usize,
    pub summary: WriteSummary,
    pub duration: Duration,
}

/// Write source rows in `[start, end)` into the online store
pub async fn materialize(
    online: Arc<dyn OnlineStore>,
    offline: &dyn OfflineSource,
    project: &str,
    target: &MaterializationTarget,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &MaterializeConfig,
) -> Result<MaterializeResult> {
    if start >= end {
        return Err(Error::invalid_input(format!(
            "materialization window is empty: start {} is not before end {}",
            start, end
        )));
    }
    let began = Instant::now();
    info!(
        project,
        feature_view = %target.view.name,
        source = %target.source.name,
        offline = offline.source_type(),
        online = online.store_type(),
        %start,
        %end,
        "Starting materialization"
    );

    let raw = offline.pull_rows(&target.source, start, end).await?;
    let rows_read = raw.len();
    let rows = target.to_online_rows(raw)?;
    let table = OnlineTable::from(&target.view);
    let summary = write_partitioned(online, project, table, rows, config).await?;

    let duration = began.elapsed();
    observability::record_materialization(&target.view.name, rows_read, duration);
    info!(
        project,
        feature_view = %target.view.name,
        rows = rows_read,
        written = summary.written,
        skipped = summary.skipped_stale,
        duration_ms = duration.as_millis() as u64,
        "Materialization complete"
    );

    Ok(MaterializeResult {
        feature_view: target.view.name.clone(),
        start,
        end,
        rows_read,
        summary,
        duration,
    })
}

/// Split rows by entity hash and write each partition in chunks on its own task
///
/// Partitions are disjoint in entity keys, so no two tasks race on a cell.
pub async fn write_partitioned(
    online: Arc<dyn OnlineStore>,
    project: &str,
    table: OnlineTable,
    rows: Vec<OnlineWriteRow>,
    config: &MaterializeConfig,
) -> Result<WriteSummary> {
    let parallelism = config.parallelism.max(1);
    let chunk_size = config.chunk_size.max(1);

    let mut partitions: Vec<Vec<OnlineWriteRow>> = vec![Vec::new(); parallelism];
    for row in rows {
        let mut hasher = DefaultHasher::new();
        row.entity_key.storage_key().hash(&mut hasher);
        partitions[(hasher.finish() % parallelism as u64) as usize].push(row);
    }

    let mut tasks = JoinSet::new();
    for partition in partitions.into_iter().filter(|p| !p.is_empty()) {
        let online = Arc::clone(&online);
        let project = project.to_string();
        let table = table.clone();
        tasks.spawn(async move {
            let mut summary = WriteSummary::default();
            let mut rows = partition.into_iter().peekable();
            while rows.peek().is_some() {
                let chunk: Vec<_> = rows.by_ref().take(chunk_size).collect();
                summary.merge(online.online_write_batch(&project, &table, chunk).await?);
            }
            Ok::<_, Error>(summary)
        });
    }

    let mut total = WriteSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let summary = joined
            .map_err(|e| Error::internal(format!("materialization task failed: {}", e)))??;
        total.merge(summary);
    }
    Ok(total)
}
