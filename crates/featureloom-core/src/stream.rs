//! Stream feature views
//!
//! A stream feature view is a feature view fed by a stream source (Kafka,
//! Kinesis or push). It carries a processing mode tag, an optional inline
//! transformation name and a list of time-windowed aggregations. The stream
//! processor itself runs outside this crate; the definitions are stored in
//! the registry and the view is served from the online store like any other.

use crate::feature_view::FeatureView;
use crate::validation::validate_name;
use crate::{Error, ObjectKind, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reducers supported for windowed aggregations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub function: AggregationFunction,
    pub time_window: Duration,
    /// Sliding windows advance by this much; `None` means tumbling
    #[serde(default)]
    pub slide_interval: Option<Duration>,
}

impl Aggregation {
    pub fn new(
        column: impl Into<String>,
        function: AggregationFunction,
        time_window: Duration,
    ) -> Self {
        Self {
            column: column.into(),
            function,
            time_window,
            slide_interval: None,
        }
    }

    pub fn sliding(mut self, slide_interval: Duration) -> Self {
        self.slide_interval = Some(slide_interval);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFeatureView {
    /// Shared feature view definition; `view.stream_source` names the stream
    pub view: FeatureView,

    /// Processing mode of the external stream engine (e.g., "spark")
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Registered transformation applied to each micro-batch
    #[serde(default)]
    pub transformation: Option<String>,

    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

fn default_mode() -> String {
    "spark".to_string()
}

impl StreamFeatureView {
    /// `view.source` stays the batch source used for backfill
    pub fn new(mut view: FeatureView, stream_source: impl Into<String>) -> Self {
        view.stream_source = Some(stream_source.into());
        Self {
            view,
            mode: default_mode(),
            transformation: None,
            aggregations: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_transformation(mut self, name: impl Into<String>) -> Self {
        self.transformation = Some(name.into());
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn name(&self) -> &str {
        &self.view.name
    }

    pub fn stream_source(&self) -> Option<&str> {
        self.view.stream_source.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::StreamFeatureView, &self.view.name)?;
        self.view.validate()?;
        if self.stream_source().map_or(true, str::is_empty) {
            return Err(Error::invalid_input(format!(
                "Stream feature view '{}' must reference a stream source",
                self.view.name
            )));
        }
        for agg in &self.aggregations {
            if agg.time_window.is_zero() {
                return Err(Error::invalid_input(format!(
                    "Aggregation over '{}' in stream feature view '{}' needs a non-zero window",
                    agg.column, self.view.name
                )));
            }
            if let Some(slide) = agg.slide_interval {
                if slide.is_zero() || slide > agg.time_window {
                    return Err(Error::invalid_input(format!(
                        "Aggregation over '{}' slides by {:?}, which must be within (0, {:?}]",
                        agg.column, slide, agg.time_window
                    )));
                }
            }
        }
        Ok(())
    }
}
