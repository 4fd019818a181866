//! Feature references
//!
//! Callers name features as `"<view_or_service>:<feature>"`. With full
//! feature names enabled the response column is `"<view>__<feature>"`.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Suffix of per-feature event timestamp columns
pub const TIMESTAMP_SUFFIX: &str = "__ts";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureRef {
    pub view: String,
    pub feature: String,
}

impl FeatureRef {
    pub fn new(view: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            feature: feature.into(),
        }
    }

    /// Parse `view:feature`
    pub fn parse(reference: &str) -> Result<Self> {
        let (view, feature) = reference.split_once(':').ok_or_else(|| {
            Error::invalid_input(format!(
                "Feature reference '{}' must have the form 'view:feature'",
                reference
            ))
        })?;
        if view.is_empty() || feature.is_empty() || feature.contains(':') {
            return Err(Error::invalid_input(format!(
                "Feature reference '{}' must have the form 'view:feature'",
                reference
            )));
        }
        Ok(Self::new(view, feature))
    }

    pub fn full_name(&self) -> String {
        full_feature_name(&self.view, &self.feature)
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.view, self.feature)
    }
}

impl FromStr for FeatureRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `view__feature`
pub fn full_feature_name(view: &str, feature: &str) -> String {
    format!("{}__{}", view, feature)
}

/// Name of the event timestamp column for an output feature
pub fn timestamp_column(output_name: &str) -> String {
    format!("{}{}", output_name, TIMESTAMP_SUFFIX)
}
