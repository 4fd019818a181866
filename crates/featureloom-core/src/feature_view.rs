//! Feature view definitions
//!
//! A feature view is a named schema of features keyed by one or more entities
//! and produced by a data source. The view stores the *name* of its source
//! (and of its entities); the registry resolves them on read, so editing a
//! shared data source is visible to every view that uses it without
//! re-applying the views.
//!
//! ## TTL
//!
//! `ttl` bounds how long a written value stays servable: a value whose age
//! (now minus event time) is greater than the TTL reads as absent. A missing
//! or zero TTL never expires.

use crate::object::ObjectMeta;
use crate::validation::{validate_fields, validate_name};
use crate::{Error, ObjectKind, Result, ValueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: ValueType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: ValueType) -> Self {
        Self {
            name: name.into(),
            dtype,
            tags: BTreeMap::new(),
        }
    }
}

/// A `[start, end)` range that has been materialized into the online store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureView {
    /// Unique name within the project (e.g., "driver_hourly_stats")
    pub name: String,

    /// Names of the entities this view is keyed by
    pub entities: Vec<String>,

    /// Feature columns, in declaration order
    pub schema: Vec<Field>,

    /// Maximum age of a servable value; `None` or zero never expires
    #[serde(default)]
    pub ttl: Option<Duration>,

    /// Name of the batch data source
    pub source: String,

    /// Name of the stream data source, for stream feature views
    #[serde(default)]
    pub stream_source: Option<String>,

    /// Serve this view from the online store
    #[serde(default = "default_true")]
    pub online: bool,

    /// Keep this view available for offline retrieval
    #[serde(default = "default_true")]
    pub offline: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub owner: String,

    /// Ranges already written to the online store
    #[serde(default)]
    pub materialization_intervals: Vec<MaterializationInterval>,

    #[serde(default)]
    pub meta: ObjectMeta,
}

fn default_true() -> bool {
    true
}

impl FeatureView {
    /// Creates an online+offline view reading from `source`
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
            schema: Vec::new(),
            ttl: None,
            source: source.into(),
            stream_source: None,
            online: true,
            offline: true,
            description: String::new(),
            tags: BTreeMap::new(),
            owner: String::new(),
            materialization_intervals: Vec::new(),
            meta: ObjectMeta::default(),
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, dtype: ValueType) -> Self {
        self.schema.push(Field::new(name, dtype));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn feature(&self, name: &str) -> Option<&Field> {
        self.schema.iter().find(|f| f.name == name)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.schema.iter().map(|f| f.name.as_str())
    }

    /// TTL normalized so that zero means "never expires"
    pub fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }

    /// End of the most recent materialized interval
    pub fn latest_materialized_end(&self) -> Option<DateTime<Utc>> {
        self.materialization_intervals.iter().map(|i| i.end).max()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::FeatureView, &self.name)?;
        validate_fields(&self.name, &self.schema)?;
        if self.source.is_empty() {
            return Err(Error::invalid_input(format!(
                "Feature view '{}' must reference a batch source",
                self.name
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.as_str()) {
                return Err(Error::invalid_input(format!(
                    "Feature view '{}' references entity '{}' twice",
                    self.name, entity
                )));
            }
        }
        for interval in &self.materialization_intervals {
            if interval.start > interval.end {
                return Err(Error::invalid_input(format!(
                    "Feature view '{}' has a materialization interval ending before it starts",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
