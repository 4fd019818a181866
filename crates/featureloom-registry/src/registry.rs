//! Registry manager
//!
//! [`Registry`] owns the in-memory view of a registry store. Reads go through
//! an atomically swapped, immutable [`RegistrySnapshot`]: once loaded they
//! take no lock, and a refresh only swaps the pointer. The cache is refreshed
//! lazily on access once it is older than the configured TTL.
//!
//! Writes (`apply`, deletes, `commit`, `teardown`) are serialized within the
//! process by an async mutex. Across processes the store is last-writer-wins;
//! a stale cache in another process catches up on its next refresh.
//!
//! ## Uncommitted changes
//!
//! `apply(.., commit = false)` updates only the in-memory snapshot. Until
//! `commit()` runs that snapshot is authoritative for this manager: cache
//! refreshes do not replace it, and other managers on the same store do not
//! see it.
//!
//! ## Teardown
//!
//! Once a manager has seen a snapshot, an absent store means the registry
//! was torn down: later refreshes fail with `SnapshotNotFound`, also on
//! managers other than the one that called `teardown()`. Only a manager that
//! never saw a snapshot reads an absent store as an empty registry. Writes
//! always start fresh on an absent store.

use crate::backend::{RegistryStore, RegistryStoreConfig};
use crate::snapshot::{CatalogObject, ProjectCatalog, RegistrySnapshot};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use featureloom_core::{
    DataSource, Entity, Error, FeatureService, FeatureView, MaterializationInterval, ObjectKind,
    ObjectRef, OnDemandFeatureView, RegistryObject, Result, StreamFeatureView,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub store: RegistryStoreConfig,

    /// Maximum age of the cached snapshot; 0 never goes stale
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    600
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: RegistryStoreConfig::default(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

struct CachedSnapshot {
    snapshot: Arc<RegistrySnapshot>,
    refreshed_at: Instant,
}

pub struct Registry {
    store: Arc<dyn RegistryStore>,
    cache_ttl: Duration,
    cache: ArcSwapOption<CachedSnapshot>,
    write_lock: Mutex<()>,
    uncommitted: AtomicBool,
    torn_down: AtomicBool,
    seen_snapshot: AtomicBool,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache_ttl,
            cache: ArcSwapOption::from(None),
            write_lock: Mutex::new(()),
            uncommitted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            seen_snapshot: AtomicBool::new(false),
        }
    }

    pub async fn from_config(config: &RegistryConfig) -> Result<Self> {
        let store = config.store.build().await?;
        Ok(Self::new(store, Duration::from_secs(config.cache_ttl_seconds)))
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// True while `apply(.., commit = false)` changes await `commit()`
    pub fn has_uncommitted_changes(&self) -> bool {
        self.uncommitted.load(Ordering::Acquire)
    }

    // ---- snapshot access ------------------------------------------------

    /// Current snapshot, from the cache when allowed and fresh enough
    pub async fn snapshot(&self, allow_cache: bool) -> Result<Arc<RegistrySnapshot>> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(Error::SnapshotNotFound(self.store.location()));
        }
        if let Some(cached) = self.cache.load_full() {
            if self.has_uncommitted_changes() || (allow_cache && !self.is_stale(&cached)) {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }
        self.reload().await
    }

    /// Force a reload from the store (kept in-memory changes win)
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>> {
        self.snapshot(false).await
    }

    fn is_stale(&self, cached: &CachedSnapshot) -> bool {
        !self.cache_ttl.is_zero() && cached.refreshed_at.elapsed() > self.cache_ttl
    }

    async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        self.load_from_store(false).await
    }

    /// Load the store and install the result, unless the cache changed
    /// while loading; in that case the newer cached snapshot wins
    async fn load_from_store(&self, for_write: bool) -> Result<Arc<RegistrySnapshot>> {
        let before = self.cache.load_full();
        let snapshot = match self.store.load().await {
            Ok(bytes) => {
                let snapshot = RegistrySnapshot::decode(&bytes)?;
                self.seen_snapshot.store(true, Ordering::Release);
                snapshot
            }
            Err(Error::SnapshotNotFound(location))
                if !for_write && self.seen_snapshot.load(Ordering::Acquire) =>
            {
                // Torn down elsewhere; drop the cache so cached reads fail too
                let _ = self.cache.compare_and_swap(&before, None);
                debug!(location = %location, "Registry snapshot no longer exists");
                return Err(Error::SnapshotNotFound(location));
            }
            Err(Error::SnapshotNotFound(_)) => RegistrySnapshot::default(),
            Err(e) => return Err(e),
        };

        let snapshot = Arc::new(snapshot);
        let next = Arc::new(CachedSnapshot {
            snapshot: Arc::clone(&snapshot),
            refreshed_at: Instant::now(),
        });
        let previous = self.cache.compare_and_swap(&before, Some(next));
        let installed = match (&*previous, &before) {
            (Some(previous), Some(before)) => Arc::ptr_eq(previous, before),
            (None, None) => true,
            _ => false,
        };
        if !installed {
            // A concurrent apply, rollback or refresh got there first
            return Ok(match self.cache.load_full() {
                Some(cached) => Arc::clone(&cached.snapshot),
                None => snapshot,
            });
        }

        debug!(
            version = snapshot.version,
            location = %self.store.location(),
            "Refreshed registry cache"
        );
        Ok(snapshot)
    }

    fn install(&self, snapshot: Arc<RegistrySnapshot>) {
        self.cache.store(Some(Arc::new(CachedSnapshot {
            snapshot,
            refreshed_at: Instant::now(),
        })));
    }

    /// Snapshot a write starts from: pending in-memory state, else the store
    async fn base_for_write(&self) -> Result<Arc<RegistrySnapshot>> {
        if self.has_uncommitted_changes() {
            if let Some(cached) = self.cache.load_full() {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }
        self.load_from_store(true).await
    }

    // ---- writes ---------------------------------------------------------

    /// Validate and apply upserts, then deletes, as one new registry version
    ///
    /// Every object is checked on its own first, then the whole resulting
    /// project is checked for dangling references; nothing is written unless
    /// both pass. Returns the new version.
    pub async fn apply(
        &self,
        upserts: Vec<RegistryObject>,
        deletes: Vec<ObjectRef>,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        if project.is_empty() {
            return Err(Error::invalid_input("project name cannot be empty"));
        }
        let mut seen = BTreeSet::new();
        for object in &upserts {
            object.validate()?;
            if !seen.insert(object.object_ref()) {
                return Err(Error::invalid_input(format!(
                    "{} '{}' appears twice in one apply",
                    object.kind(),
                    object.name()
                )));
            }
        }

        let counts = (upserts.len(), deletes.len());
        let version = self
            .mutate(project, commit, move |catalog, now| {
                for object in upserts {
                    upsert_object(catalog, object, now);
                }
                for target in &deletes {
                    remove_object(catalog, target, project)?;
                }
                Ok(())
            })
            .await?;

        info!(
            project,
            version,
            upserts = counts.0,
            deletes = counts.1,
            committed = commit,
            "Applied registry changes"
        );
        Ok(version)
    }

    /// Record a materialized `[start, end)` range on a stored view
    pub async fn apply_materialization(
        &self,
        project: &str,
        view_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        commit: bool,
    ) -> Result<u64> {
        self.mutate(project, commit, |catalog, now| {
            let view = if let Some(fv) = catalog.feature_views.get_mut(view_name) {
                fv
            } else if let Some(sfv) = catalog.stream_feature_views.get_mut(view_name) {
                &mut sfv.view
            } else {
                return Err(Error::not_found(ObjectKind::FeatureView, view_name, project));
            };
            view.materialization_intervals
                .push(MaterializationInterval { start, end });
            view.meta.last_updated_at = Some(now);
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, project: &str, commit: bool, change: F) -> Result<u64>
    where
        F: FnOnce(&mut ProjectCatalog, DateTime<Utc>) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        let base = self.base_for_write().await?;

        let now = Utc::now();
        let mut next = (*base).clone();
        {
            let catalog = next.projects.entry(project.to_string()).or_default();
            change(catalog, now)?;
            catalog.check_integrity()?;
        }
        if next.projects.get(project).map_or(false, ProjectCatalog::is_empty) {
            next.projects.remove(project);
        }
        next.version += 1;
        next.last_updated = Some(now);

        let next = Arc::new(next);
        if commit {
            self.store.save(&next.encode()?).await?;
        }
        self.install(Arc::clone(&next));
        self.uncommitted.store(!commit, Ordering::Release);
        self.torn_down.store(false, Ordering::Release);
        if commit {
            self.seen_snapshot.store(true, Ordering::Release);
        }
        Ok(next.version)
    }

    /// Persist the in-memory snapshot
    pub async fn commit(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = match self.cache.load_full() {
            Some(cached) => Arc::clone(&cached.snapshot),
            None if self.torn_down.load(Ordering::Acquire) => {
                return Err(Error::SnapshotNotFound(self.store.location()))
            }
            None => self.reload().await?,
        };
        self.store.save(&snapshot.encode()?).await?;
        self.uncommitted.store(false, Ordering::Release);
        self.seen_snapshot.store(true, Ordering::Release);
        info!(version = snapshot.version, location = %self.store.location(), "Committed registry");
        Ok(())
    }

    /// Drop uncommitted changes; the next read reloads from the store
    pub async fn rollback(&self) {
        let _guard = self.write_lock.lock().await;
        if self.uncommitted.swap(false, Ordering::AcqRel) {
            self.cache.store(None);
            info!(location = %self.store.location(), "Discarded uncommitted registry changes");
        }
    }

    /// Delete the persisted snapshot; reads on this manager then fail
    pub async fn teardown(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.delete().await?;
        self.cache.store(None);
        self.uncommitted.store(false, Ordering::Release);
        self.torn_down.store(true, Ordering::Release);
        info!(location = %self.store.location(), "Tore down registry");
        Ok(())
    }

    // ---- typed access ---------------------------------------------------

    pub async fn get<T: CatalogObject>(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<T> {
        let snapshot = self.snapshot(allow_cache).await?;
        snapshot.get::<T>(name, project).cloned()
    }

    pub async fn list<T: CatalogObject>(&self, project: &str, allow_cache: bool) -> Result<Vec<T>> {
        Ok(self.snapshot(allow_cache).await?.list::<T>(project))
    }

    pub async fn delete<T: CatalogObject>(
        &self,
        name: &str,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        self.apply(Vec::new(), vec![ObjectRef::new(T::KIND, name)], project, commit)
            .await
    }

    pub async fn get_entity(&self, name: &str, project: &str, allow_cache: bool) -> Result<Entity> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_entities(&self, project: &str, allow_cache: bool) -> Result<Vec<Entity>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_entity(&self, name: &str, project: &str, commit: bool) -> Result<u64> {
        self.delete::<Entity>(name, project, commit).await
    }

    pub async fn get_data_source(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<DataSource> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_data_sources(
        &self,
        project: &str,
        allow_cache: bool,
    ) -> Result<Vec<DataSource>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_data_source(&self, name: &str, project: &str, commit: bool) -> Result<u64> {
        self.delete::<DataSource>(name, project, commit).await
    }

    pub async fn get_feature_view(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<FeatureView> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_feature_views(
        &self,
        project: &str,
        allow_cache: bool,
    ) -> Result<Vec<FeatureView>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_feature_view(
        &self,
        name: &str,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        self.delete::<FeatureView>(name, project, commit).await
    }

    pub async fn get_on_demand_feature_view(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<OnDemandFeatureView> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_on_demand_feature_views(
        &self,
        project: &str,
        allow_cache: bool,
    ) -> Result<Vec<OnDemandFeatureView>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_on_demand_feature_view(
        &self,
        name: &str,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        self.delete::<OnDemandFeatureView>(name, project, commit).await
    }

    pub async fn get_stream_feature_view(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<StreamFeatureView> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_stream_feature_views(
        &self,
        project: &str,
        allow_cache: bool,
    ) -> Result<Vec<StreamFeatureView>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_stream_feature_view(
        &self,
        name: &str,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        self.delete::<StreamFeatureView>(name, project, commit).await
    }

    pub async fn get_feature_service(
        &self,
        name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<FeatureService> {
        self.get(name, project, allow_cache).await
    }

    pub async fn list_feature_services(
        &self,
        project: &str,
        allow_cache: bool,
    ) -> Result<Vec<FeatureService>> {
        self.list(project, allow_cache).await
    }

    pub async fn delete_feature_service(
        &self,
        name: &str,
        project: &str,
        commit: bool,
    ) -> Result<u64> {
        self.delete::<FeatureService>(name, project, commit).await
    }

    /// The data source a (batch or stream) feature view currently reads from
    ///
    /// Resolved by name against the current snapshot, so a re-applied source
    /// is visible without re-applying the view.
    pub async fn get_feature_view_source(
        &self,
        view_name: &str,
        project: &str,
        allow_cache: bool,
    ) -> Result<DataSource> {
        let snapshot = self.snapshot(allow_cache).await?;
        let view = snapshot
            .project(project)
            .and_then(|catalog| catalog.stored_view(view_name))
            .ok_or_else(|| Error::not_found(ObjectKind::FeatureView, view_name, project))?;
        snapshot.get::<DataSource>(&view.source, project).cloned()
    }

    pub async fn list_projects(&self, allow_cache: bool) -> Result<Vec<String>> {
        Ok(self.snapshot(allow_cache).await?.projects.keys().cloned().collect())
    }
}

fn upsert_object(catalog: &mut ProjectCatalog, object: RegistryObject, now: DateTime<Utc>) {
    match object {
        RegistryObject::Entity(o) => upsert(catalog, o, now),
        RegistryObject::DataSource(o) => upsert(catalog, o, now),
        RegistryObject::FeatureView(mut o) => {
            if let Some(previous) = catalog.feature_views.get(&o.name) {
                inherit_intervals(&mut o, previous);
            }
            upsert(catalog, o, now)
        }
        RegistryObject::OnDemandFeatureView(o) => upsert(catalog, o, now),
        RegistryObject::StreamFeatureView(mut o) => {
            if let Some(previous) = catalog.stream_feature_views.get(o.name()) {
                inherit_intervals(&mut o.view, &previous.view);
            }
            upsert(catalog, o, now)
        }
        RegistryObject::FeatureService(o) => upsert(catalog, o, now),
    }
}

/// Re-applied definitions do not carry materialization history
fn inherit_intervals(view: &mut FeatureView, previous: &FeatureView) {
    if view.materialization_intervals.is_empty() {
        view.materialization_intervals = previous.materialization_intervals.clone();
    }
}

fn upsert<T: CatalogObject>(catalog: &mut ProjectCatalog, mut object: T, now: DateTime<Utc>) {
    let previous = T::map(catalog).get(object.name()).map(|p| p.meta().clone());
    object.meta_mut().touch(previous.as_ref(), now);
    T::map_mut(catalog).insert(object.name().to_string(), object);
}

fn remove_object(catalog: &mut ProjectCatalog, target: &ObjectRef, project: &str) -> Result<()> {
    let removed = match target.kind {
        ObjectKind::Entity => catalog.entities.remove(&target.name).is_some(),
        ObjectKind::DataSource => catalog.data_sources.remove(&target.name).is_some(),
        ObjectKind::FeatureView => catalog.feature_views.remove(&target.name).is_some(),
        ObjectKind::OnDemandFeatureView => {
            catalog.on_demand_feature_views.remove(&target.name).is_some()
        }
        ObjectKind::StreamFeatureView => {
            catalog.stream_feature_views.remove(&target.name).is_some()
        }
        ObjectKind::FeatureService => catalog.feature_services.remove(&target.name).is_some(),
    };
    if removed {
        Ok(())
    } else {
        Err(Error::not_found(target.kind, &target.name, project))
    }
}
