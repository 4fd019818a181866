//! In-memory registry snapshot and its codec
//!
//! A snapshot is the arena of every registry object, keyed by project, kind
//! and name. Cross-references (a feature view's entities and source, a
//! service's projections) are names resolved against the same snapshot, so
//! replacing a shared object is seen by every object referencing it.
//!
//! The wire format is JSON wrapped in a small envelope carrying a format
//! version, so the bytes handed to a [`crate::RegistryStore`] stay opaque.

use chrono::{DateTime, Utc};
use featureloom_core::{
    DataSource, Entity, Error, FeatureService, FeatureView, FeatureViewProjection, ObjectKind,
    ObjectMeta, OnDemandFeatureView, Result, StreamFeatureView,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Incremented on every apply
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub projects: BTreeMap<String, ProjectCatalog>,
}

/// All objects of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectCatalog {
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub data_sources: BTreeMap<String, DataSource>,
    #[serde(default)]
    pub feature_views: BTreeMap<String, FeatureView>,
    #[serde(default)]
    pub on_demand_feature_views: BTreeMap<String, OnDemandFeatureView>,
    #[serde(default)]
    pub stream_feature_views: BTreeMap<String, StreamFeatureView>,
    #[serde(default)]
    pub feature_services: BTreeMap<String, FeatureService>,
}

#[derive(Serialize, Deserialize)]
struct Envelope<S> {
    format_version: u32,
    snapshot: S,
}

impl RegistrySnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Envelope {
            format_version: FORMAT_VERSION,
            snapshot: self,
        })?)
    }

    /// Decode snapshot bytes; anything unreadable is a corrupt snapshot
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope<RegistrySnapshot> = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptSnapshot(e.to_string()))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported format version {}",
                envelope.format_version
            )));
        }
        Ok(envelope.snapshot)
    }

    pub fn project(&self, project: &str) -> Option<&ProjectCatalog> {
        self.projects.get(project)
    }

    /// Look up an object, failing with a not-found error naming the project
    pub fn get<T: CatalogObject>(&self, name: &str, project: &str) -> Result<&T> {
        self.project(project)
            .and_then(|catalog| T::map(catalog).get(name))
            .ok_or_else(|| Error::not_found(T::KIND, name, project))
    }

    pub fn list<T: CatalogObject>(&self, project: &str) -> Vec<T> {
        self.project(project)
            .map(|catalog| T::map(catalog).values().cloned().collect())
            .unwrap_or_default()
    }
}

impl ProjectCatalog {
    /// A servable stored view: a batch feature view or a stream feature view
    pub fn stored_view(&self, name: &str) -> Option<&FeatureView> {
        self.feature_views
            .get(name)
            .or_else(|| self.stream_feature_views.get(name).map(|s| &s.view))
    }

    pub fn stored_views(&self) -> impl Iterator<Item = &FeatureView> {
        self.feature_views
            .values()
            .chain(self.stream_feature_views.values().map(|s| &s.view))
    }

    pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
        match kind {
            ObjectKind::Entity => self.entities.contains_key(name),
            ObjectKind::DataSource => self.data_sources.contains_key(name),
            ObjectKind::FeatureView => self.feature_views.contains_key(name),
            ObjectKind::OnDemandFeatureView => self.on_demand_feature_views.contains_key(name),
            ObjectKind::StreamFeatureView => self.stream_feature_views.contains_key(name),
            ObjectKind::FeatureService => self.feature_services.contains_key(name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.data_sources.is_empty()
            && self.feature_views.is_empty()
            && self.on_demand_feature_views.is_empty()
            && self.stream_feature_views.is_empty()
            && self.feature_services.is_empty()
    }

    /// Check every cross-reference in the catalog
    ///
    /// Runs on the post-apply state, so objects declared in the same apply
    /// count as present and deletes that would leave dangling references
    /// are rejected.
    pub fn check_integrity(&self) -> Result<()> {
        self.check_view_name_clashes()?;

        for fv in self.feature_views.values() {
            self.check_stored_view(fv)?;
            if fv.stream_source.is_some() {
                return Err(Error::invalid_input(format!(
                    "Feature view '{}' has a stream source; declare it as a stream feature view",
                    fv.name
                )));
            }
        }

        for sfv in self.stream_feature_views.values() {
            self.check_stored_view(&sfv.view)?;
            let stream_name = sfv.stream_source().unwrap_or_default();
            let stream = self.data_source(stream_name, &sfv.view.name)?;
            if !stream.kind.is_stream() {
                return Err(Error::invalid_input(format!(
                    "Stream feature view '{}' requires a stream source (kafka, kinesis or push), \
                     but '{}' is a {} source",
                    sfv.view.name,
                    stream.name,
                    stream.kind.type_name()
                )));
            }
        }

        for source in self.data_sources.values() {
            if let Some(batch) = source.kind.batch_source() {
                let backfill = self.data_sources.get(batch).ok_or_else(|| {
                    Error::invalid_input(format!(
                        "Data source '{}' references unknown batch source '{}'",
                        source.name, batch
                    ))
                })?;
                if !backfill.kind.is_batch() {
                    return Err(Error::invalid_input(format!(
                        "Data source '{}' must use a batch source for backfill, '{}' is a {} source",
                        source.name,
                        batch,
                        backfill.kind.type_name()
                    )));
                }
            }
        }

        for odfv in self.on_demand_feature_views.values() {
            for projection in odfv.feature_view_sources() {
                self.check_projection(&odfv.name, projection, false)?;
            }
            for projection in odfv.on_demand_sources() {
                self.check_projection(&odfv.name, projection, true)?;
            }
        }
        self.check_on_demand_cycles()?;

        for service in self.feature_services.values() {
            for projection in &service.projections {
                let is_odfv = self.on_demand_feature_views.contains_key(&projection.view_name);
                self.check_projection(&service.name, projection, is_odfv)?;
            }
        }
        Ok(())
    }

    fn data_source(&self, name: &str, referrer: &str) -> Result<&DataSource> {
        self.data_sources.get(name).ok_or_else(|| {
            Error::invalid_input(format!(
                "'{}' references data source '{}', which is neither registered nor part of this apply",
                referrer, name
            ))
        })
    }

    fn check_stored_view(&self, fv: &FeatureView) -> Result<()> {
        for entity in &fv.entities {
            if !self.entities.contains_key(entity) {
                return Err(Error::invalid_input(format!(
                    "Feature view '{}' references entity '{}', which is neither registered nor part of this apply",
                    fv.name, entity
                )));
            }
        }
        let source = self.data_source(&fv.source, &fv.name)?;
        if !source.kind.is_batch() {
            return Err(Error::invalid_input(format!(
                "Feature view '{}' requires a batch source (file or table), but '{}' is a {} source",
                fv.name,
                source.name,
                source.kind.type_name()
            )));
        }
        Ok(())
    }

    fn check_view_name_clashes(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        let names = self
            .feature_views
            .keys()
            .chain(self.stream_feature_views.keys())
            .chain(self.on_demand_feature_views.keys());
        for name in names {
            if !seen.insert(name) {
                return Err(Error::invalid_input(format!(
                    "Feature view name '{}' is used by more than one kind of feature view",
                    name
                )));
            }
        }
        Ok(())
    }

    fn check_projection(
        &self,
        referrer: &str,
        projection: &FeatureViewProjection,
        on_demand: bool,
    ) -> Result<()> {
        let available: Vec<&str> = if on_demand {
            match self.on_demand_feature_views.get(&projection.view_name) {
                Some(odfv) => odfv.features.iter().map(|f| f.name.as_str()).collect(),
                None => {
                    return Err(Error::invalid_input(format!(
                        "'{}' references unknown on demand feature view '{}'",
                        referrer, projection.view_name
                    )))
                }
            }
        } else {
            match self.stored_view(&projection.view_name) {
                Some(fv) => fv.feature_names().collect(),
                None => {
                    return Err(Error::invalid_input(format!(
                        "'{}' references unknown feature view '{}'",
                        referrer, projection.view_name
                    )))
                }
            }
        };
        for feature in &projection.features {
            if !available.contains(&feature.as_str()) {
                return Err(Error::FeatureNotInView {
                    feature: feature.clone(),
                    view: projection.view_name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_on_demand_cycles(&self) -> Result<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state: BTreeMap<&str, u8> = BTreeMap::new();

        fn visit<'a>(
            catalog: &'a ProjectCatalog,
            name: &'a str,
            state: &mut BTreeMap<&'a str, u8>,
        ) -> Result<()> {
            match state.get(name).copied().unwrap_or(0) {
                1 => {
                    return Err(Error::invalid_input(format!(
                        "On demand feature view '{}' is part of a dependency cycle",
                        name
                    )))
                }
                2 => return Ok(()),
                _ => {}
            }
            state.insert(name, 1);
            if let Some(odfv) = catalog.on_demand_feature_views.get(name) {
                for upstream in odfv.on_demand_sources() {
                    visit(catalog, &upstream.view_name, state)?;
                }
            }
            state.insert(name, 2);
            Ok(())
        }

        for name in self.on_demand_feature_views.keys() {
            visit(self, name, &mut state)?;
        }
        Ok(())
    }
}

/// Uniform access to the per-kind maps of a [`ProjectCatalog`]
pub trait CatalogObject: Clone {
    const KIND: ObjectKind;

    fn map(catalog: &ProjectCatalog) -> &BTreeMap<String, Self>;
    fn map_mut(catalog: &mut ProjectCatalog) -> &mut BTreeMap<String, Self>;
    fn name(&self) -> &str;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! catalog_object {
    ($ty:ty, $kind:expr, $field:ident) => {
        impl CatalogObject for $ty {
            const KIND: ObjectKind = $kind;

            fn map(catalog: &ProjectCatalog) -> &BTreeMap<String, Self> {
                &catalog.$field
            }

            fn map_mut(catalog: &mut ProjectCatalog) -> &mut BTreeMap<String, Self> {
                &mut catalog.$field
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

catalog_object!(Entity, ObjectKind::Entity, entities);
catalog_object!(DataSource, ObjectKind::DataSource, data_sources);
catalog_object!(FeatureView, ObjectKind::FeatureView, feature_views);
catalog_object!(
    OnDemandFeatureView,
    ObjectKind::OnDemandFeatureView,
    on_demand_feature_views
);
catalog_object!(FeatureService, ObjectKind::FeatureService, feature_services);

impl CatalogObject for StreamFeatureView {
    const KIND: ObjectKind = ObjectKind::StreamFeatureView;

    fn map(catalog: &ProjectCatalog) -> &BTreeMap<String, Self> {
        &catalog.stream_feature_views
    }

    fn map_mut(catalog: &mut ProjectCatalog) -> &mut BTreeMap<String, Self> {
        &mut catalog.stream_feature_views
    }

    fn name(&self) -> &str {
        &self.view.name
    }

    fn meta(&self) -> &ObjectMeta {
        &self.view.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.view.meta
    }
}
