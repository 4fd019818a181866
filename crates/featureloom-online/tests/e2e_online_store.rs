//! E2E tests for online stores
//!
//! The same contract runs against every backend. In-memory and SQLite run
//! everywhere; Redis tests need a server.
//!
//! To run ignored tests (requires running services):
//! `cargo test -p featureloom-online --features redis --test e2e_online_store -- --ignored`

use chrono::{Duration as ChronoDuration, Utc};
use featureloom_core::{EntityKey, OnlineStore, OnlineTable, OnlineWriteRow, Value};
use featureloom_online::{InMemoryOnlineStore, SqliteOnlineStore};
use std::time::Duration;
use tempfile::TempDir;

fn driver(id: i64) -> EntityKey {
    EntityKey::single("driver_id", id)
}

async fn read_one(
    store: &dyn OnlineStore,
    project: &str,
    table: &OnlineTable,
    id: i64,
    feature: &str,
) -> Value {
    let rows = store
        .online_read(project, table, &[driver(id)], &[feature.to_string()])
        .await
        .unwrap();
    rows[0]
        .get(feature)
        .map(|stored| stored.value.clone())
        .unwrap_or_default()
}

async fn ttl_expires_after_one_second(store: &dyn OnlineStore, project: &str) {
    // Given: a view with a one second TTL and a fresh value
    let table = OnlineTable::new("driver_ttl", Some(Duration::from_secs(1)));
    store
        .online_write_batch(
            project,
            &table,
            vec![OnlineWriteRow::new(driver(1), Utc::now()).with_feature("conv_rate", 0.5)],
        )
        .await
        .unwrap();

    // Then: it is served immediately
    assert_eq!(read_one(store, project, &table, 1, "conv_rate").await, Value::Float64(0.5));

    // And: it reads as null once older than the TTL
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(read_one(store, project, &table, 1, "conv_rate").await, Value::Null);
}

async fn latest_event_time_wins(store: &dyn OnlineStore, project: &str) {
    let table = OnlineTable::new("driver_order", None);
    let now = Utc::now();

    // When: writes arrive as T-1h, T, T+1s, then a late T-2h
    for (ts, rate, expected) in [
        (now - ChronoDuration::hours(1), 0.1, 0.1),
        (now, 0.2, 0.2),
        (now + ChronoDuration::seconds(1), 0.3, 0.3),
        (now - ChronoDuration::hours(2), 0.9, 0.3),
    ] {
        store
            .online_write_batch(
                project,
                &table,
                vec![OnlineWriteRow::new(driver(123), ts).with_feature("conv_rate", rate)],
            )
            .await
            .unwrap();

        // Then: the value with the greatest event time is served
        assert_eq!(
            read_one(store, project, &table, 123, "conv_rate").await,
            Value::Float64(expected)
        );
    }
}

async fn deleting_one_view_keeps_colocated_view(store: &dyn OnlineStore, project: &str) {
    // Given: two views sharing the driver entity
    let a = OnlineTable::new("driver_stats_a", None);
    let b = OnlineTable::new("driver_stats_b", None);
    store.update(project, &[a.clone(), b.clone()], &[]).await.unwrap();
    let now = Utc::now();
    for (table, base) in [(&a, 0_i64), (&b, 100_i64)] {
        let rows = (1..=3_i64)
            .map(|id| OnlineWriteRow::new(driver(id), now).with_feature("trips", base + id))
            .collect();
        store.online_write_batch(project, table, rows).await.unwrap();
    }

    // When: A is deleted
    store.update(project, &[b.clone()], &[a.clone()]).await.unwrap();

    // Then: B is untouched and A reads as null
    for id in 1..=3_i64 {
        assert_eq!(read_one(store, project, &b, id, "trips").await, Value::Int64(100 + id));
        assert_eq!(read_one(store, project, &a, id, "trips").await, Value::Null);
    }

    // When: B is deleted too
    store.delete_table(project, &b.name).await.unwrap();
    for id in 1..=3_i64 {
        assert_eq!(read_one(store, project, &b, id, "trips").await, Value::Null);
    }
}

async fn reads_preserve_request_order(store: &dyn OnlineStore, project: &str) {
    let table = OnlineTable::new("driver_order_preserved", None);
    let now = Utc::now();
    store
        .online_write_batch(
            project,
            &table,
            vec![
                OnlineWriteRow::new(driver(2), now).with_feature("trips", 2_i64),
                OnlineWriteRow::new(driver(1), now).with_feature("trips", 1_i64),
            ],
        )
        .await
        .unwrap();

    let rows = store
        .online_read(project, &table, &[driver(1), driver(99), driver(2)], &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["trips"].value, Value::Int64(1));
    assert!(rows[1].is_empty());
    assert_eq!(rows[2]["trips"].value, Value::Int64(2));
}

// =============================================================================
// In-memory
// =============================================================================

#[tokio::test]
async fn test_memory_ttl_expiry() {
    ttl_expires_after_one_second(&InMemoryOnlineStore::new(), "memory_ttl").await;
}

#[tokio::test]
async fn test_memory_latest_event_time_wins() {
    latest_event_time_wins(&InMemoryOnlineStore::new(), "memory_order").await;
}

#[tokio::test]
async fn test_memory_deletion_isolation() {
    deleting_one_view_keeps_colocated_view(&InMemoryOnlineStore::new(), "memory_delete").await;
}

#[tokio::test]
async fn test_memory_read_order() {
    reads_preserve_request_order(&InMemoryOnlineStore::new(), "memory_read").await;
}

// =============================================================================
// SQLite
// =============================================================================

fn sqlite_store(temp_dir: &TempDir) -> SqliteOnlineStore {
    SqliteOnlineStore::open(temp_dir.path().join("online.db")).unwrap()
}

#[tokio::test]
async fn test_sqlite_ttl_expiry() {
    let temp_dir = TempDir::new().unwrap();
    ttl_expires_after_one_second(&sqlite_store(&temp_dir), "sqlite_ttl").await;
}

#[tokio::test]
async fn test_sqlite_latest_event_time_wins() {
    let temp_dir = TempDir::new().unwrap();
    latest_event_time_wins(&sqlite_store(&temp_dir), "sqlite_order").await;
}

#[tokio::test]
async fn test_sqlite_deletion_isolation() {
    let temp_dir = TempDir::new().unwrap();
    deleting_one_view_keeps_colocated_view(&sqlite_store(&temp_dir), "sqlite_delete").await;
}

#[tokio::test]
async fn test_sqlite_read_order() {
    let temp_dir = TempDir::new().unwrap();
    reads_preserve_request_order(&sqlite_store(&temp_dir), "sqlite_read").await;
}

#[tokio::test]
async fn test_sqlite_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let table = OnlineTable::new("driver_stats", None);
    {
        let store = sqlite_store(&temp_dir);
        store
            .online_write_batch(
                "project",
                &table,
                vec![OnlineWriteRow::new(driver(7), Utc::now()).with_feature("trips", 7_i64)],
            )
            .await
            .unwrap();
    }
    let store = sqlite_store(&temp_dir);
    assert_eq!(read_one(&store, "project", &table, 7, "trips").await, Value::Int64(7));
}

// =============================================================================
// Redis Tests
// =============================================================================

#[cfg(feature = "redis")]
mod redis_tests {
    use super::*;
    use featureloom_online::{RedisConfig, RedisOnlineStore};

    async fn get_redis_store() -> RedisOnlineStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        RedisOnlineStore::new(RedisConfig::new(url))
            .await
            .expect("Redis connection required")
    }

    #[tokio::test]
    #[ignore = "Requires Redis to be running"]
    async fn test_redis_health_check() {
        assert!(get_redis_store().await.health_check().await.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires Redis to be running"]
    async fn test_redis_ttl_expiry() {
        ttl_expires_after_one_second(&get_redis_store().await, "redis_ttl").await;
    }

    #[tokio::test]
    #[ignore = "Requires Redis to be running"]
    async fn test_redis_latest_event_time_wins() {
        let project = format!("redis_order_{}", Utc::now().timestamp_micros());
        latest_event_time_wins(&get_redis_store().await, &project).await;
    }

    #[tokio::test]
    #[ignore = "Requires Redis to be running"]
    async fn test_redis_deletion_isolation() {
        deleting_one_view_keeps_colocated_view(&get_redis_store().await, "redis_delete").await;
    }
}
