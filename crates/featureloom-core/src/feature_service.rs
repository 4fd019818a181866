//! Feature services and feature view projections
//!
//! A projection selects features from one view, optionally under an alias and
//! with its join keys read from differently named entity-row columns. Feature
//! services bundle projections; on-demand feature views use the same type to
//! declare which stored features they consume.

use crate::object::ObjectMeta;
use crate::validation::validate_name;
use crate::{Error, ObjectKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureViewProjection {
    /// Name of the projected view
    pub view_name: String,

    /// Name used in full feature names instead of the view name
    #[serde(default)]
    pub name_alias: Option<String>,

    /// Selected features; empty selects all features of the view
    #[serde(default)]
    pub features: Vec<String>,

    /// Join key -> entity row column remapping
    #[serde(default)]
    pub join_key_map: BTreeMap<String, String>,
}

impl FeatureViewProjection {
    /// Projection of every feature of `view_name`
    pub fn of(view_name: impl Into<String>) -> Self {
        Self {
            view_name: view_name.into(),
            name_alias: None,
            features: Vec::new(),
            join_key_map: BTreeMap::new(),
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.name_alias = Some(alias.into());
        self
    }

    pub fn with_join_key_map(
        mut self,
        join_key: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.join_key_map.insert(join_key.into(), column.into());
        self
    }

    /// Prefix used for full feature names
    pub fn name_to_use(&self) -> &str {
        self.name_alias.as_deref().unwrap_or(&self.view_name)
    }

    /// Entity row column holding the given join key
    pub fn entity_column<'a>(&'a self, join_key: &'a str) -> &'a str {
        self.join_key_map
            .get(join_key)
            .map(String::as_str)
            .unwrap_or(join_key)
    }

    pub fn selects_all(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureService {
    pub name: String,

    pub projections: Vec<FeatureViewProjection>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub meta: ObjectMeta,
}

impl FeatureService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            projections: Vec::new(),
            description: String::new(),
            tags: BTreeMap::new(),
            owner: String::new(),
            meta: ObjectMeta::default(),
        }
    }

    pub fn with_projection(mut self, projection: FeatureViewProjection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::FeatureService, &self.name)?;
        if self.projections.is_empty() {
            return Err(Error::invalid_input(format!(
                "Feature service '{}' must include at least one feature view",
                self.name
            )));
        }
        Ok(())
    }
}
