//! Registry object envelope
//!
//! `apply` takes a heterogeneous batch of definitions; [`RegistryObject`]
//! wraps each kind so the batch can be validated and applied in order.

use crate::{
    DataSource, Entity, FeatureService, FeatureView, ObjectKind, OnDemandFeatureView, Result,
    StreamFeatureView,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping timestamps maintained by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Stamp an upsert, keeping the creation time of the replaced object
    pub fn touch(&mut self, previous: Option<&ObjectMeta>, now: DateTime<Utc>) {
        self.created_at = previous.and_then(|p| p.created_at).or(Some(now));
        self.last_updated_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum RegistryObject {
    Entity(Entity),
    DataSource(DataSource),
    FeatureView(FeatureView),
    OnDemandFeatureView(OnDemandFeatureView),
    StreamFeatureView(StreamFeatureView),
    FeatureService(FeatureService),
}

impl RegistryObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Entity(_) => ObjectKind::Entity,
            Self::DataSource(_) => ObjectKind::DataSource,
            Self::FeatureView(_) => ObjectKind::FeatureView,
            Self::OnDemandFeatureView(_) => ObjectKind::OnDemandFeatureView,
            Self::StreamFeatureView(_) => ObjectKind::StreamFeatureView,
            Self::FeatureService(_) => ObjectKind::FeatureService,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Entity(o) => &o.name,
            Self::DataSource(o) => &o.name,
            Self::FeatureView(o) => &o.name,
            Self::OnDemandFeatureView(o) => &o.name,
            Self::StreamFeatureView(o) => o.name(),
            Self::FeatureService(o) => &o.name,
        }
    }

    /// Object-local validation, independent of the rest of the registry
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Entity(o) => o.validate(),
            Self::DataSource(o) => o.validate(),
            Self::FeatureView(o) => o.validate(),
            Self::OnDemandFeatureView(o) => o.validate(),
            Self::StreamFeatureView(o) => o.validate(),
            Self::FeatureService(o) => o.validate(),
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.kind(), self.name())
    }
}

impl From<Entity> for RegistryObject {
    fn from(o: Entity) -> Self {
        Self::Entity(o)
    }
}

impl From<DataSource> for RegistryObject {
    fn from(o: DataSource) -> Self {
        Self::DataSource(o)
    }
}

impl From<FeatureView> for RegistryObject {
    fn from(o: FeatureView) -> Self {
        Self::FeatureView(o)
    }
}

impl From<OnDemandFeatureView> for RegistryObject {
    fn from(o: OnDemandFeatureView) -> Self {
        Self::OnDemandFeatureView(o)
    }
}

impl From<StreamFeatureView> for RegistryObject {
    fn from(o: StreamFeatureView) -> Self {
        Self::StreamFeatureView(o)
    }
}

impl From<FeatureService> for RegistryObject {
    fn from(o: FeatureService) -> Self {
        Self::FeatureService(o)
    }
}

/// Kind + name of an object to delete
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}
