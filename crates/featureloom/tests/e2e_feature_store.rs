//! End-to-end tests for the feature store
//!
//! Definitions are applied through `FeatureStore`, rows arrive through
//! materialization or direct writes, and features are read back through
//! online retrieval, including on-demand features.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use featureloom::prelude::*;
use featureloom::retrieval::EntityRow;
use featureloom_core::retry::RetryPolicy;
use featureloom_core::{
    EntityKey, ErrorClass, ObjectKind, OnlineReadRow, OnlineTable, OnlineWriteRow, RegistryObject,
    TransientKind, WriteSummary,
};
use featureloom_online::{InMemoryOfflineSource, InMemoryOnlineStore};
use featureloom_registry::{FileRegistryStore, Registry, RegistryStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const PROJECT: &str = "ranking";

struct Harness {
    store: FeatureStore,
    offline: Arc<InMemoryOfflineSource>,
    _dir: TempDir,
}

fn harness_with_online(online: Arc<dyn OnlineStore>) -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::new(
        Arc::new(FileRegistryStore::new(dir.path().join("registry.json"))),
        Duration::from_secs(60),
    ));
    let offline = Arc::new(InMemoryOfflineSource::new());
    let store = FeatureStore::new(PROJECT, registry, online, offline.clone());
    store
        .register_transformation("add_request_values", add_request_values)
        .unwrap();
    Harness {
        store,
        offline,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with_online(Arc::new(InMemoryOnlineStore::new()))
}

fn add_request_values(input: &RowBatch) -> Result<RowBatch> {
    let conv_rate = input.require("conv_rate")?;
    let plus = |other: &[Value]| -> Vec<Value> {
        conv_rate
            .iter()
            .zip(other)
            .map(|(c, v)| match (c.as_f64(), v.as_f64()) {
                (Some(c), Some(v)) => Value::Float64(c + v),
                _ => Value::Null,
            })
            .collect()
    };
    RowBatch::new(input.num_rows())
        .with_column("conv_rate_plus_val1", plus(input.require("val_to_add")?))?
        .with_column("conv_rate_plus_val2", plus(input.require("val_to_add_2")?))
}

fn driver_hourly_stats() -> FeatureView {
    FeatureView::new("driver_hourly_stats", "driver_hourly")
        .with_entity("driver")
        .with_field("conv_rate", ValueType::Float32)
        .with_field("acc_rate", ValueType::Float32)
        .with_field("avg_daily_trips", ValueType::Int64)
        .with_ttl(Duration::from_secs(86_400))
}

fn transformed_conv_rate() -> OnDemandFeatureView {
    OnDemandFeatureView::new("transformed_conv_rate", "add_request_values")
        .with_source(OnDemandSource::FeatureView(
            FeatureViewProjection::of("driver_hourly_stats").with_features(["conv_rate", "acc_rate"]),
        ))
        .with_source(OnDemandSource::Request(
            RequestSource::new("vals_to_add")
                .with_field("val_to_add", ValueType::Int64)
                .with_field("val_to_add_2", ValueType::Int64),
        ))
        .with_field("conv_rate_plus_val1", ValueType::Float64)
        .with_field("conv_rate_plus_val2", ValueType::Float64)
}

fn driver_objects() -> Vec<RegistryObject> {
    vec![
        Entity::new("driver", "driver_id")
            .with_value_type(ValueType::Int64)
            .into(),
        DataSource::file("driver_hourly", "driver_stats.jsonl")
            .with_timestamp_field("event_timestamp")
            .into(),
        driver_hourly_stats().into(),
        transformed_conv_rate().into(),
    ]
}

fn stats_row(driver_id: i64, ts: DateTime<Utc>, conv_rate: f64, trips: i64) -> SourceRow {
    serde_json::from_value(json!({
        "driver_id": driver_id,
        "event_timestamp": ts.to_rfc3339(),
        "conv_rate": conv_rate,
        "acc_rate": 0.5,
        "avg_daily_trips": trips,
    }))
    .unwrap()
}

fn driver_row(driver_id: i64) -> EntityRow {
    entity_row([("driver_id", driver_id)])
}

fn request_row(driver_id: i64, val_to_add: i64, val_to_add_2: i64) -> EntityRow {
    entity_row([
        ("driver_id", driver_id),
        ("val_to_add", val_to_add),
        ("val_to_add_2", val_to_add_2),
    ])
}

/// Apply the driver objects and materialize two hours of rows
async fn materialized(h: &Harness) -> DateTime<Utc> {
    h.store.apply(driver_objects(), vec![]).await.unwrap();
    let now = Utc::now();
    h.offline
        .insert(
            "driver_hourly",
            vec![
                stats_row(1001, now - ChronoDuration::minutes(90), 0.25, 10),
                stats_row(1001, now - ChronoDuration::minutes(30), 0.5, 12),
                stats_row(1002, now - ChronoDuration::minutes(60), 0.75, 20),
            ],
        )
        .unwrap();
    h.store
        .materialize(now - ChronoDuration::hours(2), now, None)
        .await
        .unwrap();
    now
}

// =============================================================================
// Materialization and retrieval
// =============================================================================

#[tokio::test]
async fn test_materialize_then_read_latest_values() {
    let h = harness();
    let now = materialized(&h).await;

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs([
                "driver_hourly_stats:conv_rate",
                "driver_hourly_stats:avg_daily_trips",
            ])
            .with_entity_rows([driver_row(1001), driver_row(1002), driver_row(9999)])
            .with_event_timestamps(true),
        )
        .await
        .unwrap();

    assert_eq!(
        response.field_names,
        vec![
            "driver_id",
            "conv_rate",
            "conv_rate__ts",
            "avg_daily_trips",
            "avg_daily_trips__ts"
        ]
    );
    assert_eq!(
        response.column("driver_id").unwrap(),
        &[Value::Int64(1001), Value::Int64(1002), Value::Int64(9999)]
    );
    assert_eq!(
        response.column("conv_rate").unwrap(),
        &[Value::Float32(0.5), Value::Float32(0.75), Value::Null]
    );
    assert_eq!(
        response.column("avg_daily_trips").unwrap(),
        &[Value::Int64(12), Value::Int64(20), Value::Null]
    );

    let ts = response.column("conv_rate__ts").unwrap();
    let expected = now - ChronoDuration::minutes(30);
    match &ts[0] {
        Value::UnixTimestamp(t) => assert_eq!(t.timestamp(), expected.timestamp()),
        other => panic!("expected a timestamp, got {:?}", other),
    }
    assert_eq!(ts[2], Value::Null);

    // The completed interval is recorded on the view
    let fv = h
        .store
        .registry()
        .get_feature_view("driver_hourly_stats", PROJECT, false)
        .await
        .unwrap();
    assert_eq!(fv.materialization_intervals.len(), 1);
    assert_eq!(fv.latest_materialized_end(), Some(now));
}

#[tokio::test]
async fn test_incremental_materialization_resumes_after_last_run() {
    let h = harness();
    h.store.apply(driver_objects(), vec![]).await.unwrap();
    let now = Utc::now();
    h.offline
        .insert(
            "driver_hourly",
            vec![stats_row(1001, now - ChronoDuration::minutes(30), 0.25, 1)],
        )
        .unwrap();

    // First run starts at end - ttl
    let results = h.store.materialize_incremental(now, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].start, now - ChronoDuration::days(1));
    assert_eq!(results[0].rows_read, 1);

    // Nothing new to do up to the same end
    assert!(h.store.materialize_incremental(now, None).await.unwrap().is_empty());

    // A later run only covers the new range
    let later = now + ChronoDuration::hours(1);
    h.offline
        .insert(
            "driver_hourly",
            vec![stats_row(1001, now + ChronoDuration::minutes(30), 0.5, 2)],
        )
        .unwrap();
    let results = h.store.materialize_incremental(later, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].start, now);
    assert_eq!(results[0].rows_read, 1);

    let fv = h
        .store
        .registry()
        .get_feature_view("driver_hourly_stats", PROJECT, false)
        .await
        .unwrap();
    assert_eq!(fv.materialization_intervals.len(), 2);
}

#[tokio::test]
async fn test_materialize_rejects_empty_window() {
    let h = harness();
    h.store.apply(driver_objects(), vec![]).await.unwrap();
    let now = Utc::now();
    let err = h.store.materialize(now, now, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

// =============================================================================
// On-demand features
// =============================================================================

#[tokio::test]
async fn test_on_demand_dependency_fetched_but_not_returned() {
    let h = harness();
    materialized(&h).await;

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["transformed_conv_rate:conv_rate_plus_val1"])
                .with_entity_rows([request_row(1001, 1, 2), request_row(1002, 10, 20)]),
        )
        .await
        .unwrap();

    // Only the requested output plus echoed entity row columns
    assert_eq!(
        response.field_names,
        vec!["driver_id", "val_to_add", "val_to_add_2", "conv_rate_plus_val1"]
    );
    assert!(response.column("conv_rate").is_none());
    assert_eq!(
        response.column("conv_rate_plus_val1").unwrap(),
        &[Value::Float64(1.5), Value::Float64(10.75)]
    );
}

fn double_conv_rate(input: &RowBatch) -> Result<RowBatch> {
    let doubled = input
        .require("conv_rate")?
        .iter()
        .map(|v| v.as_f64().map_or(Value::Null, |c| Value::Float64(c * 2.0)))
        .collect();
    RowBatch::new(input.num_rows()).with_column("conv_rate_doubled", doubled)
}

fn add_one(input: &RowBatch) -> Result<RowBatch> {
    let shifted = input
        .require("conv_rate_doubled")?
        .iter()
        .map(|v| v.as_f64().map_or(Value::Null, |c| Value::Float64(c + 1.0)))
        .collect();
    RowBatch::new(input.num_rows()).with_column("conv_rate_doubled_plus_one", shifted)
}

#[tokio::test]
async fn test_on_demand_view_chained_on_another() {
    let h = harness();
    materialized(&h).await;
    h.store.register_transformation("double_conv_rate", double_conv_rate).unwrap();
    h.store.register_transformation("add_one", add_one).unwrap();

    let mut objects = driver_objects();
    objects.push(
        OnDemandFeatureView::new("doubled_conv_rate", "double_conv_rate")
            .with_source(OnDemandSource::FeatureView(
                FeatureViewProjection::of("driver_hourly_stats").with_features(["conv_rate"]),
            ))
            .with_field("conv_rate_doubled", ValueType::Float64)
            .into(),
    );
    objects.push(
        OnDemandFeatureView::new("shifted_conv_rate", "add_one")
            .with_source(OnDemandSource::OnDemandFeatureView(
                FeatureViewProjection::of("doubled_conv_rate").with_features(["conv_rate_doubled"]),
            ))
            .with_field("conv_rate_doubled_plus_one", ValueType::Float64)
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();

    // Only the downstream view is requested; its upstream still runs first
    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["shifted_conv_rate:conv_rate_doubled_plus_one"])
                .with_entity_rows([driver_row(1001), driver_row(1002)]),
        )
        .await
        .unwrap();
    assert_eq!(response.field_names, vec!["driver_id", "conv_rate_doubled_plus_one"]);
    assert!(response.column("conv_rate_doubled").is_none());
    assert_eq!(
        response.column("conv_rate_doubled_plus_one").unwrap(),
        &[Value::Float64(2.0), Value::Float64(2.5)]
    );

    // Both requested, downstream first
    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs([
                "shifted_conv_rate:conv_rate_doubled_plus_one",
                "doubled_conv_rate:conv_rate_doubled",
            ])
            .with_entity_row(driver_row(1001)),
        )
        .await
        .unwrap();
    assert_eq!(
        response.field_names,
        vec!["driver_id", "conv_rate_doubled_plus_one", "conv_rate_doubled"]
    );
    assert_eq!(response.column("conv_rate_doubled").unwrap(), &[Value::Float64(1.0)]);
    assert_eq!(
        response.column("conv_rate_doubled_plus_one").unwrap(),
        &[Value::Float64(2.0)]
    );
}

#[tokio::test]
async fn test_requested_dependency_appears_once() {
    let h = harness();
    materialized(&h).await;

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs([
                "driver_hourly_stats:conv_rate",
                "transformed_conv_rate:conv_rate_plus_val2",
            ])
            .with_entity_row(request_row(1001, 1, 2)),
        )
        .await
        .unwrap();

    let conv_rate_columns = response
        .field_names
        .iter()
        .filter(|name| name.as_str() == "conv_rate")
        .count();
    assert_eq!(conv_rate_columns, 1);
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Float32(0.5)]);
    assert_eq!(
        response.column("conv_rate_plus_val2").unwrap(),
        &[Value::Float64(2.5)]
    );
}

#[tokio::test]
async fn test_missing_request_data_is_reported() {
    let h = harness();
    materialized(&h).await;

    let err = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["transformed_conv_rate:conv_rate_plus_val1"])
                .with_entity_row(entity_row([("driver_id", 1001_i64), ("val_to_add", 1_i64)])),
        )
        .await
        .unwrap_err();
    match err {
        Error::RequestDataNotFound(fields) => assert_eq!(fields, vec!["val_to_add_2".to_string()]),
        other => panic!("expected RequestDataNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unregistered_transformation_fails() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(
        OnDemandFeatureView::new("unregistered", "not_registered_here")
            .with_source(OnDemandSource::FeatureView(FeatureViewProjection::of(
                "driver_hourly_stats",
            )))
            .with_field("out", ValueType::Float64)
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();

    let err = h
        .store
        .get_online_features(&OnlineFeaturesRequest::refs(["unregistered:out"]).with_entity_row(driver_row(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransformationNotRegistered(_)));
}

// =============================================================================
// Naming and resolution
// =============================================================================

#[tokio::test]
async fn test_name_collision_needs_full_feature_names() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(
        FeatureView::new("driver_daily_stats", "driver_hourly")
            .with_entity("driver")
            .with_field("conv_rate", ValueType::Float32)
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();

    let refs = ["driver_hourly_stats:conv_rate", "driver_daily_stats:conv_rate"];
    let err = h
        .store
        .get_online_features(&OnlineFeaturesRequest::refs(refs).with_entity_row(driver_row(1001)))
        .await
        .unwrap_err();
    match err {
        Error::FeatureNameCollision(names) => assert_eq!(names, vec!["conv_rate".to_string()]),
        other => panic!("expected FeatureNameCollision, got {:?}", other),
    }

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(refs)
                .with_entity_row(driver_row(1001))
                .with_full_feature_names(true),
        )
        .await
        .unwrap();
    assert_eq!(
        response.field_names,
        vec![
            "driver_id",
            "driver_hourly_stats__conv_rate",
            "driver_daily_stats__conv_rate"
        ]
    );
}

#[tokio::test]
async fn test_entity_column_named_like_a_feature_collides() {
    let h = harness();
    materialized(&h).await;
    let row = entity_row([("driver_id", Value::Int64(1001)), ("conv_rate", Value::Float64(0.9))]);

    let err = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"]).with_entity_row(row.clone()),
        )
        .await
        .unwrap_err();
    match err {
        Error::FeatureNameCollision(names) => assert_eq!(names, vec!["conv_rate".to_string()]),
        other => panic!("expected FeatureNameCollision, got {:?}", other),
    }

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"])
                .with_entity_row(row)
                .with_full_feature_names(true),
        )
        .await
        .unwrap();
    assert_eq!(
        response.field_names,
        vec!["conv_rate", "driver_id", "driver_hourly_stats__conv_rate"]
    );
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Float64(0.9)]);
    assert_eq!(
        response.column("driver_hourly_stats__conv_rate").unwrap(),
        &[Value::Float32(0.5)]
    );
}

#[tokio::test]
async fn test_unknown_feature_or_view_fails() {
    let h = harness();
    h.store.apply(driver_objects(), vec![]).await.unwrap();

    let err = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_hourly_stats:no_such_feature"])
                .with_entity_row(driver_row(1001)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FeatureNotInView { ref feature, .. } if feature == "no_such_feature"));

    let err = h
        .store
        .get_online_features(&OnlineFeaturesRequest::refs(["no_such_view:x"]).with_entity_row(driver_row(1001)))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = h
        .store
        .get_online_features(&OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"]).with_entity_row(
            entity_row([("rider_id", 1_i64)]),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_feature_service_alias_and_join_key_mapping() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(
        FeatureService::new("trip_origin")
            .with_projection(
                FeatureViewProjection::of("driver_hourly_stats")
                    .with_features(["conv_rate"])
                    .with_alias("origin")
                    .with_join_key_map("driver_id", "origin_driver_id"),
            )
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();
    let now = Utc::now();
    h.offline
        .insert("driver_hourly", vec![stats_row(1001, now - ChronoDuration::minutes(5), 0.25, 3)])
        .unwrap();
    h.store
        .materialize(now - ChronoDuration::hours(1), now, None)
        .await
        .unwrap();

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::service("trip_origin")
                .with_entity_row(entity_row([("origin_driver_id", 1001_i64)]))
                .with_full_feature_names(true),
        )
        .await
        .unwrap();
    assert_eq!(response.field_names, vec!["origin_driver_id", "origin__conv_rate"]);
    assert_eq!(response.column("origin__conv_rate").unwrap(), &[Value::Float32(0.25)]);

    let err = h
        .store
        .get_online_features(&OnlineFeaturesRequest::service("no_such_service").with_entity_row(driver_row(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ObjectNotFound { kind: ObjectKind::FeatureService, .. }));
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_deleting_view_keeps_colocated_view() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(
        FeatureView::new("driver_daily_stats", "driver_hourly")
            .with_entity("driver")
            .with_field("avg_daily_trips", ValueType::Int64)
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();
    let now = Utc::now();
    h.offline
        .insert(
            "driver_hourly",
            (1..=3).map(|id| stats_row(id, now - ChronoDuration::minutes(1), 0.5, id * 10)).collect(),
        )
        .unwrap();
    h.store
        .materialize(now - ChronoDuration::hours(1), now, None)
        .await
        .unwrap();

    // When: the hourly view (and the on-demand view built on it) is deleted
    h.store
        .apply(
            vec![],
            vec![
                ObjectRef::new(ObjectKind::OnDemandFeatureView, "transformed_conv_rate"),
                ObjectRef::new(ObjectKind::FeatureView, "driver_hourly_stats"),
            ],
        )
        .await
        .unwrap();

    // Then: the daily view still serves every entity
    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_daily_stats:avg_daily_trips"])
                .with_entity_rows((1..=3).map(driver_row)),
        )
        .await
        .unwrap();
    assert_eq!(
        response.column("avg_daily_trips").unwrap(),
        &[Value::Int64(10), Value::Int64(20), Value::Int64(30)]
    );

    // And: the deleted view's rows are gone from the online store
    let rows = h
        .store
        .online_store()
        .online_read(
            PROJECT,
            &OnlineTable::new("driver_hourly_stats", None),
            &[EntityKey::single("driver_id", 1_i64)],
            &[],
        )
        .await
        .unwrap();
    assert!(rows[0].is_empty());
}

#[tokio::test]
async fn test_push_fans_out_to_stream_view() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(DataSource::push("driver_push", "driver_hourly").into());
    objects.push(
        StreamFeatureView::new(
            FeatureView::new("driver_live_stats", "driver_hourly")
                .with_entity("driver")
                .with_field("conv_rate", ValueType::Float32),
            "driver_push",
        )
        .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();

    let now = Utc::now();
    let summary = h
        .store
        .push("driver_push", vec![stats_row(1001, now, 0.75, 1)])
        .await
        .unwrap();
    assert_eq!(summary.written, 1);

    // An older push is ignored
    let summary = h
        .store
        .push("driver_push", vec![stats_row(1001, now - ChronoDuration::minutes(1), 0.25, 1)])
        .await
        .unwrap();
    assert_eq!(summary.skipped_stale, 1);

    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_live_stats:conv_rate"]).with_entity_row(driver_row(1001)),
        )
        .await
        .unwrap();
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Float32(0.75)]);

    let err = h.store.push("no_such_source", vec![]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_write_to_online_store_honours_ttl() {
    let h = harness();
    let mut objects = driver_objects();
    objects.push(
        FeatureView::new("driver_short_lived", "driver_hourly")
            .with_entity("driver")
            .with_field("conv_rate", ValueType::Float32)
            .with_ttl(Duration::from_secs(1))
            .into(),
    );
    objects.push(
        FeatureView::new("driver_offline_only", "driver_hourly")
            .with_entity("driver")
            .with_field("conv_rate", ValueType::Float32)
            .with_online(false)
            .into(),
    );
    h.store.apply(objects, vec![]).await.unwrap();

    h.store
        .write_to_online_store("driver_short_lived", vec![stats_row(7, Utc::now(), 0.5, 1)])
        .await
        .unwrap();
    let request = OnlineFeaturesRequest::refs(["driver_short_lived:conv_rate"]).with_entity_row(driver_row(7));
    let response = h.store.get_online_features(&request).await.unwrap();
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Float32(0.5)]);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let response = h.store.get_online_features(&request).await.unwrap();
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Null]);

    let err = h
        .store
        .write_to_online_store("driver_offline_only", vec![stats_row(7, Utc::now(), 0.5, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_untyped_join_key_matches_any_integer_width() {
    let h = harness();
    h.store
        .apply(
            vec![
                Entity::new("driver", "driver_id").into(),
                DataSource::file("driver_hourly", "driver_stats.jsonl")
                    .with_timestamp_field("event_timestamp")
                    .into(),
                driver_hourly_stats().into(),
            ],
            vec![],
        )
        .await
        .unwrap();
    h.store
        .write_to_online_store("driver_hourly_stats", vec![stats_row(1, Utc::now(), 0.5, 3)])
        .await
        .unwrap();

    let request = OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"])
        .with_entity_row(entity_row([("driver_id", 1_i64)]))
        .with_entity_row(entity_row([("driver_id", 1_i32)]));
    let response = h.store.get_online_features(&request).await.unwrap();
    assert_eq!(
        response.column("conv_rate").unwrap(),
        &[Value::Float32(0.5), Value::Float32(0.5)]
    );
}

// =============================================================================
// Schema migration
// =============================================================================

/// Online store whose `update` fails a set number of times
struct FlakyOnlineStore {
    inner: InMemoryOnlineStore,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    error: fn() -> Error,
}

impl FlakyOnlineStore {
    fn new(failures: usize, error: fn() -> Error) -> Self {
        Self {
            inner: InMemoryOnlineStore::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            error,
        }
    }
}

#[async_trait]
impl OnlineStore for FlakyOnlineStore {
    async fn online_write_batch(
        &self,
        project: &str,
        table: &OnlineTable,
        rows: Vec<OnlineWriteRow>,
    ) -> Result<WriteSummary> {
        self.inner.online_write_batch(project, table, rows).await
    }

    async fn online_read(
        &self,
        project: &str,
        table: &OnlineTable,
        keys: &[EntityKey],
        features: &[String],
    ) -> Result<Vec<OnlineReadRow>> {
        self.inner.online_read(project, table, keys, features).await
    }

    async fn delete_table(&self, project: &str, table_name: &str) -> Result<()> {
        self.inner.delete_table(project, table_name).await
    }

    async fn update(
        &self,
        project: &str,
        keep: &[OnlineTable],
        delete: &[OnlineTable],
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        self.inner.update(project, keep, delete).await
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "flaky"
    }
}

fn fast_policy(timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        timeout,
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn test_apply_retries_transient_migration_failures() {
    let online = Arc::new(FlakyOnlineStore::new(2, || Error::Conflict("table being dropped".into())));
    let mut h = harness_with_online(online.clone());
    h.store = h.store.with_migration_policy(fast_policy(Duration::from_secs(5)));

    h.store.apply(driver_objects(), vec![]).await.unwrap();
    assert_eq!(online.attempts.load(Ordering::SeqCst), 3);
    assert!(!h.store.registry().has_uncommitted_changes());
    assert!(h
        .store
        .registry()
        .get_feature_view("driver_hourly_stats", PROJECT, false)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_apply_discards_changes_when_migration_gives_up() {
    let online = Arc::new(FlakyOnlineStore::new(usize::MAX, || Error::Unavailable("cluster down".into())));
    let mut h = harness_with_online(online.clone());
    h.store = h.store.with_migration_policy(fast_policy(Duration::from_millis(50)));

    let err = h.store.apply(driver_objects(), vec![]).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient(TransientKind::Unavailable));
    assert!(online.attempts.load(Ordering::SeqCst) > 1);

    // Nothing was committed, and the staged change is gone
    assert!(!h.store.registry().has_uncommitted_changes());
    let err = h
        .store
        .registry()
        .get_feature_view("driver_hourly_stats", PROJECT, true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_apply_does_not_retry_permanent_failures() {
    let online = Arc::new(FlakyOnlineStore::new(1, || Error::invalid_input("bad table name")));
    let mut h = harness_with_online(online.clone());
    h.store = h.store.with_migration_policy(fast_policy(Duration::from_secs(5)));

    let err = h.store.apply(driver_objects(), vec![]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(online.attempts.load(Ordering::SeqCst), 1);
}

/// Registry store that loads normally but rejects every write
struct ReadOnlyRegistryStore {
    inner: FileRegistryStore,
}

#[async_trait]
impl RegistryStore for ReadOnlyRegistryStore {
    async fn load(&self) -> Result<Vec<u8>> {
        self.inner.load().await
    }

    async fn save(&self, _snapshot: &[u8]) -> Result<()> {
        Err(Error::Unavailable("registry bucket is read-only".into()))
    }

    async fn delete(&self) -> Result<()> {
        self.inner.delete().await
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn store_type(&self) -> &'static str {
        "read_only"
    }
}

#[tokio::test]
async fn test_apply_discards_changes_when_registry_commit_fails() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::new(
        Arc::new(ReadOnlyRegistryStore {
            inner: FileRegistryStore::new(dir.path().join("registry.json")),
        }),
        Duration::from_secs(60),
    ));
    let store = FeatureStore::new(
        PROJECT,
        registry,
        Arc::new(InMemoryOnlineStore::new()),
        Arc::new(InMemoryOfflineSource::new()),
    );

    let err = store.apply(driver_objects(), vec![]).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient(TransientKind::Unavailable));
    assert!(!store.registry().has_uncommitted_changes());
    assert!(store
        .registry()
        .get_feature_view("driver_hourly_stats", PROJECT, true)
        .await
        .unwrap_err()
        .is_not_found());
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_teardown_then_apply_starts_fresh() {
    let h = harness();
    materialized(&h).await;

    h.store.teardown().await.unwrap();
    let err = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"]).with_entity_row(driver_row(1001)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SnapshotNotFound(_)));

    let version = h.store.apply(driver_objects(), vec![]).await.unwrap();
    assert_eq!(version, 1);
    let response = h
        .store
        .get_online_features(
            &OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"]).with_entity_row(driver_row(1001)),
        )
        .await
        .unwrap();
    assert_eq!(response.column("conv_rate").unwrap(), &[Value::Null]);
}
