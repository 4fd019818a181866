//! On-demand feature views
//!
//! An on-demand view computes its features at request time by running a
//! registered transformation over stored features and request-only inputs.
//! Each source declares the minimal input set: a feature view projection
//! lists exactly the stored features the transformation reads, and those are
//! fetched whether or not the caller asked for them.

use crate::feature_service::FeatureViewProjection;
use crate::feature_view::Field;
use crate::object::ObjectMeta;
use crate::validation::{validate_fields, validate_name};
use crate::{Error, ObjectKind, Result, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request-time inputs that are never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSource {
    pub name: String,
    pub schema: Vec<Field>,
    #[serde(default)]
    pub description: String,
}

impl RequestSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, dtype: ValueType) -> Self {
        self.schema.push(Field::new(name, dtype));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnDemandSource {
    FeatureView(FeatureViewProjection),
    Request(RequestSource),
    /// Output of another on-demand view
    OnDemandFeatureView(FeatureViewProjection),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandFeatureView {
    pub name: String,

    /// Output fields produced by the transformation
    pub features: Vec<Field>,

    pub sources: Vec<OnDemandSource>,

    /// Name the transformation is registered under
    pub transformation: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub meta: ObjectMeta,
}

impl OnDemandFeatureView {
    pub fn new(name: impl Into<String>, transformation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            sources: Vec::new(),
            transformation: transformation.into(),
            description: String::new(),
            tags: BTreeMap::new(),
            owner: String::new(),
            meta: ObjectMeta::default(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, dtype: ValueType) -> Self {
        self.features.push(Field::new(name, dtype));
        self
    }

    pub fn with_source(mut self, source: OnDemandSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn feature(&self, name: &str) -> Option<&Field> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Request-time fields the transformation needs, by name
    pub fn request_data_schema(&self) -> BTreeMap<String, ValueType> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                OnDemandSource::Request(req) => Some(req),
                _ => None,
            })
            .flat_map(|req| req.schema.iter().map(|f| (f.name.clone(), f.dtype)))
            .collect()
    }

    /// Stored feature view projections this view reads
    pub fn feature_view_sources(&self) -> impl Iterator<Item = &FeatureViewProjection> {
        self.sources.iter().filter_map(|s| match s {
            OnDemandSource::FeatureView(p) => Some(p),
            _ => None,
        })
    }

    /// Upstream on-demand views this view reads
    pub fn on_demand_sources(&self) -> impl Iterator<Item = &FeatureViewProjection> {
        self.sources.iter().filter_map(|s| match s {
            OnDemandSource::OnDemandFeatureView(p) => Some(p),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::OnDemandFeatureView, &self.name)?;
        validate_fields(&self.name, &self.features)?;
        if self.features.is_empty() {
            return Err(Error::invalid_input(format!(
                "On demand feature view '{}' must declare at least one output feature",
                self.name
            )));
        }
        if self.sources.is_empty() {
            return Err(Error::invalid_input(format!(
                "On demand feature view '{}' must have at least one source",
                self.name
            )));
        }
        if self.transformation.is_empty() {
            return Err(Error::invalid_input(format!(
                "On demand feature view '{}' must name a transformation",
                self.name
            )));
        }
        if self.on_demand_sources().any(|p| p.view_name == self.name) {
            return Err(Error::invalid_input(format!(
                "On demand feature view '{}' cannot depend on itself",
                self.name
            )));
        }
        Ok(())
    }
}
