//! End-to-end integration tests for the feature registry
//!
//! These tests validate complete workflows across stores: apply, cached and
//! fresh reads, uncommitted changes, deletes and teardown.

use featureloom_core::{
    DataSource, Entity, Error, FeatureService, FeatureView, FeatureViewProjection, ObjectKind,
    ObjectRef, OnDemandFeatureView, OnDemandSource, RegistryObject, RequestSource, SourceKind,
    StreamFeatureView, ValueType,
};
use featureloom_registry::{
    FileRegistryStore, ObjectStoreRegistryStore, Registry, RegistryStore, SqliteRegistryStore,
};
use object_store::memory::InMemory;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const PROJECT: &str = "project";

fn driver_objects() -> Vec<RegistryObject> {
    vec![
        Entity::new("driver", "driver_id")
            .with_value_type(ValueType::Int64)
            .with_description("Driver of a ride")
            .into(),
        DataSource::file("driver_hourly", "data/driver_stats.jsonl")
            .with_timestamp_field("event_timestamp")
            .with_created_timestamp_column("created")
            .into(),
        FeatureView::new("driver_hourly_stats", "driver_hourly")
            .with_entity("driver")
            .with_field("conv_rate", ValueType::Float32)
            .with_field("acc_rate", ValueType::Float32)
            .with_field("avg_daily_trips", ValueType::Int64)
            .with_ttl(Duration::from_secs(86400))
            .with_tag("team", "matchmaking")
            .into(),
    ]
}

async fn assert_lifecycle(registry: &Registry) {
    // Given: a driver entity, its source and a feature view
    registry
        .apply(driver_objects(), vec![], PROJECT, true)
        .await
        .unwrap();

    // Then: every object can be read back, from cache and from the store
    for allow_cache in [true, false] {
        let entity = registry.get_entity("driver", PROJECT, allow_cache).await.unwrap();
        assert_eq!(entity.join_keys, vec!["driver_id".to_string()]);
        assert_eq!(entity.value_type, Some(ValueType::Int64));

        let fv = registry
            .get_feature_view("driver_hourly_stats", PROJECT, allow_cache)
            .await
            .unwrap();
        assert_eq!(fv.schema.len(), 3);
        assert_eq!(fv.ttl, Some(Duration::from_secs(86400)));
        assert_eq!(fv.tags.get("team").map(String::as_str), Some("matchmaking"));
    }
    assert_eq!(registry.list_feature_views(PROJECT, true).await.unwrap().len(), 1);

    // When: the feature view is deleted
    registry
        .delete_feature_view("driver_hourly_stats", PROJECT, true)
        .await
        .unwrap();

    // Then: lookups fail with a not-found error naming the project
    let err = registry
        .get_feature_view("driver_hourly_stats", PROJECT, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ObjectNotFound {
            kind: ObjectKind::FeatureView,
            ..
        }
    ));
    assert!(err.to_string().contains("project"));

    // When: the registry is torn down
    registry.teardown().await.unwrap();

    // Then: every read fails, cached or not
    for allow_cache in [true, false] {
        let err = registry
            .get_entity("driver", PROJECT, allow_cache)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound(_)));
    }
}

#[tokio::test]
async fn test_e2e_file_registry_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileRegistryStore::new(temp_dir.path().join("registry.json")));
    assert_lifecycle(&Registry::new(store, Duration::from_secs(600))).await;
}

#[tokio::test]
async fn test_e2e_sqlite_registry_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteRegistryStore::open(temp_dir.path().join("registry.db")).unwrap());
    assert_lifecycle(&Registry::new(store, Duration::from_secs(600))).await;
}

#[tokio::test]
async fn test_e2e_object_store_registry_lifecycle() {
    let store = Arc::new(ObjectStoreRegistryStore::new(
        Arc::new(InMemory::new()),
        "registry.json",
    ));
    assert_lifecycle(&Registry::new(store, Duration::from_secs(600))).await;
}

#[tokio::test]
async fn test_e2e_uncommitted_changes_invisible_to_other_managers() {
    // Given: two managers sharing one store
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn RegistryStore> =
        Arc::new(FileRegistryStore::new(temp_dir.path().join("registry.json")));
    let writer = Registry::new(Arc::clone(&store), Duration::from_secs(600));

    // When: applying without commit
    writer
        .apply(driver_objects(), vec![], PROJECT, false)
        .await
        .unwrap();

    // Then: the writer sees it, even on a forced refresh
    assert!(writer.get_entity("driver", PROJECT, true).await.is_ok());
    assert!(writer.get_entity("driver", PROJECT, false).await.is_ok());
    assert!(writer.has_uncommitted_changes());

    // And: a fresh manager sees an empty registry
    let reader = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    assert!(reader.list_entities(PROJECT, false).await.unwrap().is_empty());
    assert!(reader
        .get_entity("driver", PROJECT, false)
        .await
        .unwrap_err()
        .is_not_found());

    // When: committing
    writer.commit().await.unwrap();

    // Then: a fresh manager sees the objects
    let reader = Registry::new(store, Duration::from_secs(600));
    assert_eq!(
        reader.get_entity("driver", PROJECT, false).await.unwrap().name,
        "driver"
    );
    assert!(!writer.has_uncommitted_changes());
}

#[tokio::test]
async fn test_e2e_cache_staleness() {
    // Given: a reader with a long cache TTL that has already loaded the registry
    let store: Arc<dyn RegistryStore> = Arc::new(SqliteRegistryStore::in_memory().unwrap());
    let writer = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    let reader = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    assert!(reader.list_entities(PROJECT, true).await.unwrap().is_empty());

    // When: another manager commits
    writer
        .apply(driver_objects(), vec![], PROJECT, true)
        .await
        .unwrap();

    // Then: cached reads are stale, fresh reads are not
    assert!(reader.list_entities(PROJECT, true).await.unwrap().is_empty());
    assert_eq!(reader.list_entities(PROJECT, false).await.unwrap().len(), 1);
    assert_eq!(reader.list_entities(PROJECT, true).await.unwrap().len(), 1);

    // And: a short TTL picks changes up lazily
    let eager = Registry::new(store, Duration::from_millis(20));
    assert_eq!(eager.list_entities(PROJECT, true).await.unwrap().len(), 1);
    writer.delete_feature_view("driver_hourly_stats", PROJECT, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(eager.list_feature_views(PROJECT, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_e2e_data_source_changes_propagate_to_views() {
    // Given: two feature views sharing one file source
    let registry = Registry::new(
        Arc::new(SqliteRegistryStore::in_memory().unwrap()),
        Duration::from_secs(600),
    );
    let mut objects = driver_objects();
    objects.push(
        FeatureView::new("driver_daily_stats", "driver_hourly")
            .with_entity("driver")
            .with_field("trips_today", ValueType::Int32)
            .into(),
    );
    registry.apply(objects, vec![], PROJECT, true).await.unwrap();

    // When: only the source is re-applied with a new path
    let moved = DataSource::file("driver_hourly", "data/driver_stats_v2.jsonl")
        .with_timestamp_field("event_timestamp");
    registry
        .apply(vec![moved.into()], vec![], PROJECT, true)
        .await
        .unwrap();

    // Then: both views resolve to the new definition
    for view in ["driver_hourly_stats", "driver_daily_stats"] {
        let source = registry
            .get_feature_view_source(view, PROJECT, true)
            .await
            .unwrap();
        assert_eq!(
            source.kind,
            SourceKind::File {
                path: "data/driver_stats_v2.jsonl".into(),
                format: "jsonl".into()
            }
        );
    }
}

#[tokio::test]
async fn test_e2e_on_demand_view_with_request_source() {
    let registry = Registry::new(
        Arc::new(SqliteRegistryStore::in_memory().unwrap()),
        Duration::from_secs(600),
    );
    let odfv = OnDemandFeatureView::new("conv_rate_plus_100", "conv_rate_plus_100")
        .with_field("conv_rate_plus_100", ValueType::Float64)
        .with_field("conv_rate_plus_val_to_add", ValueType::Float64)
        .with_source(OnDemandSource::FeatureView(
            FeatureViewProjection::of("driver_hourly_stats").with_features(["conv_rate"]),
        ))
        .with_source(OnDemandSource::Request(
            RequestSource::new("vals_to_add").with_field("val_to_add", ValueType::Int64),
        ));
    let service = FeatureService::new("driver_activity")
        .with_projection(FeatureViewProjection::of("driver_hourly_stats"))
        .with_projection(FeatureViewProjection::of("conv_rate_plus_100"));

    // Given: the view and a service are applied together with their inputs
    let mut objects = driver_objects();
    objects.push(odfv.into());
    objects.push(service.into());
    registry.apply(objects, vec![], PROJECT, true).await.unwrap();

    // Then: they round-trip through the store
    let stored = registry
        .get_on_demand_feature_view("conv_rate_plus_100", PROJECT, false)
        .await
        .unwrap();
    assert_eq!(stored.features.len(), 2);
    assert_eq!(
        stored.request_data_schema().get("val_to_add"),
        Some(&ValueType::Int64)
    );
    let service = registry
        .get_feature_service("driver_activity", PROJECT, false)
        .await
        .unwrap();
    assert_eq!(service.projections.len(), 2);

    // When: the on-demand view is deleted while the service still uses it
    let err = registry
        .apply(
            vec![],
            vec![ObjectRef::new(ObjectKind::OnDemandFeatureView, "conv_rate_plus_100")],
            PROJECT,
            true,
        )
        .await
        .unwrap_err();

    // Then: the delete is rejected
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_e2e_stream_feature_view_sources() {
    let registry = Registry::new(
        Arc::new(SqliteRegistryStore::in_memory().unwrap()),
        Duration::from_secs(600),
    );
    let kafka = DataSource::new(
        "driver_kafka",
        SourceKind::Kafka {
            bootstrap_servers: "localhost:9092".into(),
            topic: "drivers".into(),
            message_format: "json".into(),
            batch_source: "driver_hourly".into(),
        },
    );
    let view = FeatureView::new("driver_stream_stats", "driver_hourly")
        .with_entity("driver")
        .with_field("trips", ValueType::Int64);

    // A stream view on a stream source is accepted
    let mut objects = driver_objects();
    objects.push(kafka.into());
    objects.push(StreamFeatureView::new(view.clone(), "driver_kafka").into());
    registry.apply(objects, vec![], PROJECT, true).await.unwrap();
    let sfv = registry
        .get_stream_feature_view("driver_stream_stats", PROJECT, false)
        .await
        .unwrap();
    assert_eq!(sfv.stream_source(), Some("driver_kafka"));

    // A stream view on a batch source is rejected
    let err = registry
        .apply(
            vec![StreamFeatureView::new(view, "driver_hourly").into()],
            vec![],
            PROJECT,
            true,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("requires a stream source"));
}

#[tokio::test]
async fn test_e2e_apply_after_teardown_starts_fresh() {
    let registry = Registry::new(
        Arc::new(SqliteRegistryStore::in_memory().unwrap()),
        Duration::from_secs(600),
    );
    registry.apply(driver_objects(), vec![], PROJECT, true).await.unwrap();
    registry.teardown().await.unwrap();
    assert!(registry.list_projects(true).await.is_err());

    let version = registry
        .apply(vec![Entity::new("customer", "customer_id").into()], vec![], PROJECT, true)
        .await
        .unwrap();
    assert_eq!(version, 1);
    assert!(registry.get_entity("driver", PROJECT, true).await.is_err());
    assert!(registry.get_entity("customer", PROJECT, true).await.is_ok());
}

#[tokio::test]
async fn test_e2e_teardown_visible_to_other_managers() {
    // Given: two managers on one store, both having read the registry
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn RegistryStore> =
        Arc::new(FileRegistryStore::new(temp_dir.path().join("registry.json")));
    let owner = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    let other = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    owner.apply(driver_objects(), vec![], PROJECT, true).await.unwrap();
    assert_eq!(other.list_entities(PROJECT, false).await.unwrap().len(), 1);

    // When: one of them tears the registry down
    owner.teardown().await.unwrap();

    // Then: the other fails on refresh, and on cached reads afterwards
    let err = other.list_entities(PROJECT, false).await.unwrap_err();
    assert!(matches!(err, Error::SnapshotNotFound(_)));
    assert!(matches!(
        other.list_entities(PROJECT, true).await,
        Err(Error::SnapshotNotFound(_))
    ));

    // And: a manager that never saw a snapshot reads an empty registry
    let fresh = Registry::new(Arc::clone(&store), Duration::from_secs(600));
    assert!(fresh.list_projects(false).await.unwrap().is_empty());

    // And: applying through the other manager starts over
    let version = other
        .apply(vec![Entity::new("customer", "customer_id").into()], vec![], PROJECT, true)
        .await
        .unwrap();
    assert_eq!(version, 1);
    assert!(other.get_entity("customer", PROJECT, true).await.is_ok());
}
