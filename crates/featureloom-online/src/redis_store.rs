//! Redis online store
//!
//! ## Layout
//!
//! One hash per `(project, entity key)`, shared by every feature view keyed
//! on that entity:
//!
//! ```text
//! ranking:driver_id=int:1001
//!     driver_hourly_stats:conv_rate      -> {"Float32":0.5}
//!     _ts:driver_hourly_stats:conv_rate  -> 1718000000000000
//!     driver_daily_stats:trips           -> {"Int64":12}
//!     _ts:driver_daily_stats:trips       -> 1717990000000000
//! ```
//!
//! Fields are tagged with the owning view, so `delete_table` removes only that
//! view's fields (`HDEL`) and never the shared key.
//!
//! ## Event-time ordering
//!
//! Writes run a Lua script per entity that compares the stored `_ts:` field
//! with the incoming event time and sets both fields only when strictly newer.
//! Redis runs scripts atomically, which makes the comparison a
//! compare-and-set per cell. Event times are stored in microseconds because
//! Lua compares them as doubles; writes less than a microsecond apart tie.
//!
//! Every call is bounded by [`RedisConfig::timeout`].

use crate::observability;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use featureloom_core::{
    is_expired, EntityKey, Error, OnlineReadRow, OnlineStore, OnlineTable, OnlineWriteRow, Result,
    StoredValue, Value, WriteSummary,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const TS_PREFIX: &str = "_ts:";

/// ARGV holds `(field, value, event_ts)` triples; returns cells written
const COMPARE_AND_SET: &str = r#"
local written = 0
for i = 1, #ARGV, 3 do
    local field = ARGV[i]
    local ts = tonumber(ARGV[i + 2])
    local current = redis.call('HGET', KEYS[1], '_ts:' .. field)
    if (not current) or tonumber(current) < ts then
        redis.call('HSET', KEYS[1], field, ARGV[i + 1], '_ts:' .. field, ARGV[i + 2])
        written = written + 1
    end
end
return written
"#;

/// Redis online store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Physical expiry applied to entity hashes after each write
    ///
    /// Independent of the view TTL, which is enforced on read.
    #[serde(default)]
    pub key_ttl_seconds: Option<u64>,
    /// Deadline for every Redis round trip
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_ttl_seconds: None,
            timeout: default_timeout(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

pub struct RedisOnlineStore {
    conn: ConnectionManager,
    config: RedisConfig,
    script: Script,
}

impl RedisOnlineStore {
    /// Connect to Redis
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone()).map_err(redis_error)?;
        let conn = with_timeout(config.timeout, async {
            ConnectionManager::new(client).await.map_err(redis_error)
        })
        .await?;
        info!(url = %config.url, "Connected Redis online store");
        Ok(Self {
            conn,
            config,
            script: Script::new(COMPARE_AND_SET),
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        with_timeout(self.config.timeout, async { fut.await.map_err(redis_error) }).await
    }
}

fn entity_hash_key(project: &str, entity_key: &EntityKey) -> String {
    format!("{}:{}", project, entity_key.storage_key())
}

fn cell_field(view: &str, feature: &str) -> String {
    format!("{}:{}", view, feature)
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

/// Connection-level failures are transient; protocol and script errors are not
fn redis_error(err: redis::RedisError) -> Error {
    if err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_io_error()
    {
        Error::Unavailable(format!("Redis: {}", err))
    } else {
        Error::StorageError(anyhow::Error::new(err).context("Redis online store"))
    }
}

/// Pick one view's cells out of an entity hash
fn decode_cells(
    hash: HashMap<String, String>,
    view: &str,
    requested_features: &[String],
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<OnlineReadRow> {
    let prefix = format!("{}:", view);
    let mut row = OnlineReadRow::new();
    for (field, encoded) in &hash {
        let Some(feature) = field.strip_prefix(&prefix) else {
            continue;
        };
        if !requested_features.is_empty() && !requested_features.iter().any(|f| f == feature) {
            continue;
        }
        let Some(micros) = hash
            .get(&format!("{}{}", TS_PREFIX, field))
            .and_then(|ts| ts.parse::<i64>().ok())
        else {
            continue;
        };
        let event_timestamp = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| Error::internal(format!("event timestamp {} out of range", micros)))?;
        if is_expired(event_timestamp, ttl, now) {
            continue;
        }
        let value: Value = serde_json::from_str(encoded)?;
        row.insert(feature.to_string(), StoredValue { value, event_timestamp });
    }
    Ok(row)
}

#[async_trait]
impl OnlineStore for RedisOnlineStore {
    async fn online_write_batch(
        &self,
        project: &str,
        table: &OnlineTable,
        rows: Vec<OnlineWriteRow>,
    ) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        let mut conn = self.conn.clone();

        for row in rows {
            if row.features.is_empty() {
                continue;
            }
            let key = entity_hash_key(project, &row.entity_key);
            let event_ts = row.event_timestamp.timestamp_micros();
            let mut invocation = self.script.key(&key);
            for (feature, value) in &row.features {
                invocation
                    .arg(cell_field(&table.name, feature))
                    .arg(serde_json::to_string(value)?)
                    .arg(event_ts);
            }
            let written: usize = self.bounded(invocation.invoke_async(&mut conn)).await?;
            summary.written += written;
            summary.skipped_stale += row.features.len() - written;

            if let Some(ttl) = self.config.key_ttl_seconds {
                let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
                self.bounded(conn.expire::<_, ()>(&key, ttl)).await?;
            }
        }

        debug!(
            feature_view = %table.name,
            written = summary.written,
            skipped = summary.skipped_stale,
            "Redis write complete"
        );
        observability::record_online_write(self.store_type(), &table.name, summary);
        Ok(summary)
    }

    /// One pipelined `HGETALL` per call (single round-trip)
    async fn online_read(
        &self,
        project: &str,
        table: &OnlineTable,
        entity_keys: &[EntityKey],
        requested_features: &[String],
    ) -> Result<Vec<OnlineReadRow>> {
        if entity_keys.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        for entity_key in entity_keys {
            pipe.hgetall(entity_hash_key(project, entity_key));
        }
        let hashes: Vec<HashMap<String, String>> =
            self.bounded(pipe.query_async(&mut conn)).await?;

        let now = Utc::now();
        let rows = hashes
            .into_iter()
            .map(|hash| decode_cells(hash, &table.name, requested_features, table.ttl, now))
            .collect::<Result<Vec<_>>>()?;

        observability::record_online_read(self.store_type(), &table.name, start.elapsed());
        Ok(rows)
    }

    /// Remove this view's fields from every entity hash of the project
    async fn delete_table(&self, project: &str, table_name: &str) -> Result<()> {
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter: redis::AsyncIter<String> = self
                .bounded(conn.scan_match(format!("{}:*", project)))
                .await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let prefix = format!("{}:", table_name);
        let ts_prefix = format!("{}{}", TS_PREFIX, prefix);
        let mut conn = self.conn.clone();
        let mut removed = 0usize;
        for key in keys {
            let fields: Vec<String> = self.bounded(conn.hkeys(&key)).await?;
            let owned: Vec<String> = fields
                .into_iter()
                .filter(|f| f.starts_with(&prefix) || f.starts_with(&ts_prefix))
                .collect();
            if owned.is_empty() {
                continue;
            }
            removed += owned.len();
            self.bounded(conn.hdel::<_, _, ()>(&key, owned)).await?;
        }

        info!(project, feature_view = table_name, fields = removed, "Deleted Redis online table");
        Ok(())
    }

    /// Hashes are schemaless; only deletions need work
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
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;

        if pong != "PONG" {
            return Err(Error::Unavailable(format!(
                "Redis health check failed: expected PONG, got {}",
                pong
            )));
        }
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.key_ttl_seconds.is_none());
    }

    #[test]
    fn test_decode_cells_filters_by_view_and_ttl() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        let mut hash = HashMap::new();
        hash.insert("a:conv_rate".to_string(), r#"{"Float64":0.5}"#.to_string());
        hash.insert("_ts:a:conv_rate".to_string(), now.timestamp_micros().to_string());
        hash.insert("a:trips".to_string(), r#"{"Int64":3}"#.to_string());
        hash.insert("_ts:a:trips".to_string(), old.timestamp_micros().to_string());
        hash.insert("b:conv_rate".to_string(), r#"{"Float64":0.9}"#.to_string());
        hash.insert("_ts:b:conv_rate".to_string(), now.timestamp_micros().to_string());

        let row = decode_cells(hash.clone(), "a", &[], Some(Duration::from_secs(3600)), now).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row["conv_rate"].value, Value::Float64(0.5));

        let row = decode_cells(hash, "b", &["trips".into()], None, now).unwrap();
        assert!(row.is_empty());
    }

    #[tokio::test]
    #[ignore = "Requires Redis to be running"]
    async fn test_redis_colocated_delete() {
        let store = RedisOnlineStore::new(RedisConfig::new(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
        ))
        .await
        .unwrap();
        let a = OnlineTable::new("a", None);
        let b = OnlineTable::new("b", None);
        let key = EntityKey::single("driver_id", 1_i64);
        let now = Utc::now();
        for table in [&a, &b] {
            store
                .online_write_batch(
                    "redis_test",
                    table,
                    vec![OnlineWriteRow::new(key.clone(), now).with_feature("trips", 3_i64)],
                )
                .await
                .unwrap();
        }

        store.delete_table("redis_test", "a").await.unwrap();
        let rows = store.online_read("redis_test", &b, &[key.clone()], &[]).await.unwrap();
        assert_eq!(rows[0]["trips"].value, Value::Int64(3));
        let rows = store.online_read("redis_test", &a, &[key], &[]).await.unwrap();
        assert!(rows[0].is_empty());
        store.delete_table("redis_test", "b").await.unwrap();
    }
}
