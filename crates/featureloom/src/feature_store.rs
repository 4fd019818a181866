//! The feature store facade
//!
//! [`FeatureStore`] ties one project's registry, online store, offline
//! source and transformations together. Applying definitions keeps the
//! online store's tables in step with the registry: the registry change is
//! staged, the online schema is migrated (with retries on transient
//! failures), and only then is the registry committed. A failed migration
//! discards the staged change.

use crate::config::RepoConfig;
use crate::retrieval::{OnlineFeaturesRequest, OnlineFeaturesResponse, Retrieval};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use featureloom_core::retry::{retry_async, RetryPolicy};
use featureloom_core::{
    Error, FeatureView, ObjectKind, ObjectRef, OnDemandTransform, OnlineStore, OnlineTable,
    RegistryObject, Result, TransformationRegistry, WriteSummary,
};
use featureloom_online::observability;
use featureloom_online::{
    materialize, write_partitioned, JoinKey, MaterializationTarget, MaterializeConfig,
    MaterializeResult, OfflineSource, SourceRow,
};
use featureloom_registry::{ProjectCatalog, Registry, RegistrySnapshot};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct FeatureStore {
    project: String,
    registry: Arc<Registry>,
    online: Arc<dyn OnlineStore>,
    offline: Arc<dyn OfflineSource>,
    transformations: Arc<TransformationRegistry>,
    materialize_config: MaterializeConfig,
    migration_policy: RetryPolicy,
}

impl FeatureStore {
    pub fn new(
        project: impl Into<String>,
        registry: Arc<Registry>,
        online: Arc<dyn OnlineStore>,
        offline: Arc<dyn OfflineSource>,
    ) -> Self {
        Self {
            project: project.into(),
            registry,
            online,
            offline,
            transformations: Arc::new(TransformationRegistry::default()),
            materialize_config: MaterializeConfig::default(),
            migration_policy: RetryPolicy::default(),
        }
    }

    pub async fn from_config(config: &RepoConfig) -> Result<Self> {
        let registry = Arc::new(Registry::from_config(&config.registry).await?);
        let online = config.online_store.build().await?;
        let offline = config.offline_store.build();
        info!(
            project = %config.project,
            registry = %registry.store().location(),
            online = online.store_type(),
            offline = offline.source_type(),
            "Opened feature store"
        );
        Ok(Self::new(config.project.clone(), registry, online, offline)
            .with_materialize_config((&config.materialization).into())
            .with_migration_policy((&config.schema_migration).into()))
    }

    /// Open the repository described by a `feature_store.yaml`
    pub async fn open(config_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&RepoConfig::load(config_path)?).await
    }

    pub fn with_materialize_config(mut self, config: MaterializeConfig) -> Self {
        self.materialize_config = config;
        self
    }

    pub fn with_migration_policy(mut self, policy: RetryPolicy) -> Self {
        self.migration_policy = policy;
        self
    }

    pub fn with_transformations(mut self, transformations: Arc<TransformationRegistry>) -> Self {
        self.transformations = transformations;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn online_store(&self) -> &Arc<dyn OnlineStore> {
        &self.online
    }

    pub fn transformations(&self) -> &Arc<TransformationRegistry> {
        &self.transformations
    }

    /// Make a transformation available to on-demand views naming it
    pub fn register_transformation<T>(&self, name: impl Into<String>, transform: T) -> Result<()>
    where
        T: OnDemandTransform + 'static,
    {
        self.transformations.register(name, transform)
    }

    // ---- definitions ----------------------------------------------------

    /// Apply definitions and keep the online store's tables in step
    ///
    /// Online tables are created for every online view after the change and
    /// dropped for every view that is gone or no longer online. Returns the
    /// new registry version.
    pub async fn apply(
        &self,
        objects: Vec<RegistryObject>,
        deletes: Vec<ObjectRef>,
    ) -> Result<u64> {
        let previous = match self.registry.snapshot(false).await {
            Ok(snapshot) => online_tables(&snapshot, &self.project),
            Err(Error::SnapshotNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let version = self
            .registry
            .apply(objects, deletes, &self.project, false)
            .await?;

        let current = match self.registry.snapshot(true).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.registry.rollback().await;
                return Err(e);
            }
        };
        let keep = online_tables(&current, &self.project);
        let delete: Vec<OnlineTable> = previous
            .into_iter()
            .filter(|old| !keep.iter().any(|kept| kept.name == old.name))
            .collect();

        let migrated = retry_async(&self.migration_policy, "online_store_update", || {
            self.online.update(&self.project, &keep, &delete)
        })
        .await;
        if let Err(e) = migrated {
            warn!(
                project = %self.project,
                version,
                error = %e,
                "Online schema migration failed, discarding registry changes"
            );
            self.registry.rollback().await;
            return Err(e);
        }

        if let Err(e) = self.registry.commit().await {
            warn!(
                project = %self.project,
                version,
                error = %e,
                "Registry commit failed after online schema migration, discarding registry changes"
            );
            self.registry.rollback().await;
            return Err(e);
        }
        info!(
            project = %self.project,
            version,
            online_tables = keep.len(),
            dropped_tables = delete.len(),
            "Applied feature definitions"
        );
        Ok(version)
    }

    pub async fn refresh_registry(&self) -> Result<()> {
        let snapshot = self.registry.refresh().await?;
        debug!(project = %self.project, version = snapshot.version, "Refreshed registry");
        Ok(())
    }

    /// Remove every online table of the project, then the registry itself
    pub async fn teardown(&self) -> Result<()> {
        let tables = match self.registry.snapshot(false).await {
            Ok(snapshot) => stored_tables(&snapshot, &self.project),
            Err(Error::SnapshotNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.online.teardown(&self.project, &tables).await?;
        self.registry.teardown().await?;
        info!(project = %self.project, tables = tables.len(), "Tore down feature store");
        Ok(())
    }

    // ---- writes ---------------------------------------------------------

    /// Write raw rows for one view straight into the online store
    ///
    /// Rows use the view's batch source layout: its timestamp field, field
    /// mapping and join key columns.
    pub async fn write_to_online_store(
        &self,
        view_name: &str,
        rows: Vec<SourceRow>,
    ) -> Result<WriteSummary> {
        let snapshot = self.registry.snapshot(true).await?;
        let catalog = self.catalog(&snapshot)?;
        let view = catalog
            .stored_view(view_name)
            .ok_or_else(|| Error::not_found(ObjectKind::FeatureView, view_name, &self.project))?;
        if !view.online {
            return Err(Error::invalid_input(format!(
                "feature view '{}' is not served online",
                view_name
            )));
        }
        self.write_rows(catalog, view, rows).await
    }

    /// Fan rows pushed to a source out to every online view fed by it
    pub async fn push(&self, source_name: &str, rows: Vec<SourceRow>) -> Result<WriteSummary> {
        let snapshot = self.registry.snapshot(true).await?;
        let catalog = self.catalog(&snapshot)?;
        if !catalog.data_sources.contains_key(source_name) {
            return Err(Error::not_found(ObjectKind::DataSource, source_name, &self.project));
        }

        let views: Vec<&FeatureView> = catalog
            .stored_views()
            .filter(|view| view.online)
            .filter(|view| {
                view.source == source_name || view.stream_source.as_deref() == Some(source_name)
            })
            .collect();
        if views.is_empty() {
            warn!(
                project = %self.project,
                source = source_name,
                "No online feature view reads from pushed source"
            );
            return Ok(WriteSummary::default());
        }

        let mut total = WriteSummary::default();
        for view in views {
            total.merge(self.write_rows(catalog, view, rows.clone()).await?);
        }
        debug!(
            project = %self.project,
            source = source_name,
            written = total.written,
            skipped = total.skipped_stale,
            "Pushed rows"
        );
        Ok(total)
    }

    async fn write_rows(
        &self,
        catalog: &ProjectCatalog,
        view: &FeatureView,
        rows: Vec<SourceRow>,
    ) -> Result<WriteSummary> {
        let target = self.target(catalog, view)?;
        let rows = target.to_online_rows(rows)?;
        write_partitioned(
            Arc::clone(&self.online),
            &self.project,
            OnlineTable::from(view),
            rows,
            &self.materialize_config,
        )
        .await
    }

    // ---- materialization ------------------------------------------------

    /// Load `[start, end)` from the offline source into the online store
    ///
    /// `views` limits the run; by default every online view is materialized.
    /// Each view's completed interval is recorded in the registry.
    pub async fn materialize(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        views: Option<&[String]>,
    ) -> Result<Vec<MaterializeResult>> {
        if start >= end {
            return Err(Error::invalid_input(format!(
                "materialization window is empty: start {} is not before end {}",
                start, end
            )));
        }
        let snapshot = self.registry.snapshot(false).await?;
        let catalog = self.catalog(&snapshot)?;

        let mut results = Vec::new();
        for view in select_views(catalog, views, &self.project)? {
            results.push(self.materialize_view(catalog, view, start, end).await?);
        }
        Ok(results)
    }

    /// Materialize each view from where its last run ended up to `end`
    ///
    /// A view never materialized starts at `end - ttl`, or at the epoch when
    /// it has no TTL. Views already up to date are skipped.
    pub async fn materialize_incremental(
        &self,
        end: DateTime<Utc>,
        views: Option<&[String]>,
    ) -> Result<Vec<MaterializeResult>> {
        let snapshot = self.registry.snapshot(false).await?;
        let catalog = self.catalog(&snapshot)?;

        let mut results = Vec::new();
        for view in select_views(catalog, views, &self.project)? {
            let start = incremental_start(view, end);
            if start >= end {
                debug!(
                    feature_view = %view.name,
                    %start,
                    %end,
                    "Feature view already materialized"
                );
                continue;
            }
            results.push(self.materialize_view(catalog, view, start, end).await?);
        }
        Ok(results)
    }

    async fn materialize_view(
        &self,
        catalog: &ProjectCatalog,
        view: &FeatureView,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MaterializeResult> {
        let target = self.target(catalog, view)?;
        let result = materialize(
            Arc::clone(&self.online),
            self.offline.as_ref(),
            &self.project,
            &target,
            start,
            end,
            &self.materialize_config,
        )
        .await?;
        self.registry
            .apply_materialization(&self.project, &view.name, start, end, true)
            .await?;
        Ok(result)
    }

    // ---- retrieval ------------------------------------------------------

    pub async fn get_online_features(
        &self,
        request: &OnlineFeaturesRequest,
    ) -> Result<OnlineFeaturesResponse> {
        let started = Instant::now();
        let result = self.retrieve(request).await;
        observability::record_retrieval(
            &self.project,
            request.entity_rows.len(),
            started.elapsed(),
            result.is_ok(),
        );
        result
    }

    async fn retrieve(&self, request: &OnlineFeaturesRequest) -> Result<OnlineFeaturesResponse> {
        let snapshot = self.registry.snapshot(true).await?;
        let empty = ProjectCatalog::default();
        let catalog = snapshot.project(&self.project).unwrap_or(&empty);
        Retrieval::new(&self.project, catalog, self.online.as_ref(), &self.transformations)
            .get_online_features(request)
            .await
    }

    // ---- helpers --------------------------------------------------------

    fn catalog<'s>(&self, snapshot: &'s RegistrySnapshot) -> Result<&'s ProjectCatalog> {
        snapshot.project(&self.project).ok_or_else(|| {
            Error::invalid_input(format!("project '{}' has no applied definitions", self.project))
        })
    }

    /// Resolve a view's batch source and typed join keys
    fn target(
        &self,
        catalog: &ProjectCatalog,
        view: &FeatureView,
    ) -> Result<MaterializationTarget> {
        let project = self.project.as_str();
        let source = catalog.data_sources.get(&view.source).ok_or_else(|| {
            Error::not_found(ObjectKind::DataSource, view.source.as_str(), project)
        })?;
        let source = match source.kind.batch_source() {
            Some(batch) => catalog
                .data_sources
                .get(batch)
                .ok_or_else(|| Error::not_found(ObjectKind::DataSource, batch, project))?,
            None => source,
        };

        let mut join_keys = Vec::new();
        for entity_name in &view.entities {
            let entity = catalog.entities.get(entity_name).ok_or_else(|| {
                Error::not_found(ObjectKind::Entity, entity_name.as_str(), project)
            })?;
            join_keys.extend(entity.join_keys.iter().map(|name| JoinKey {
                name: name.clone(),
                value_type: entity.value_type,
            }));
        }
        Ok(MaterializationTarget::new(view.clone(), source.clone(), join_keys))
    }
}

fn online_tables(snapshot: &RegistrySnapshot, project: &str) -> Vec<OnlineTable> {
    snapshot
        .project(project)
        .map(|catalog| {
            catalog
                .stored_views()
                .filter(|view| view.online)
                .map(OnlineTable::from)
                .collect()
        })
        .unwrap_or_default()
}

fn stored_tables(snapshot: &RegistrySnapshot, project: &str) -> Vec<OnlineTable> {
    snapshot
        .project(project)
        .map(|catalog| catalog.stored_views().map(OnlineTable::from).collect())
        .unwrap_or_default()
}

/// Named views (each must exist and be online), or every online view
fn select_views<'c>(
    catalog: &'c ProjectCatalog,
    names: Option<&[String]>,
    project: &str,
) -> Result<Vec<&'c FeatureView>> {
    match names {
        None => Ok(catalog.stored_views().filter(|view| view.online).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                let view = catalog.stored_view(name).ok_or_else(|| {
                    Error::not_found(ObjectKind::FeatureView, name.as_str(), project)
                })?;
                if !view.online {
                    return Err(Error::invalid_input(format!(
                        "feature view '{}' is not served online",
                        name
                    )));
                }
                Ok(view)
            })
            .collect(),
    }
}

fn incremental_start(view: &FeatureView, end: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(last) = view.latest_materialized_end() {
        return last;
    }
    view.effective_ttl()
        .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
        .and_then(|ttl| end.checked_sub_signed(ttl))
        .unwrap_or_else(epoch)
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default()
}
