//! HTTP API handlers
//!
//! Tabular payloads (`entities`, `df`) are columnar: a map from column name
//! to a list of values, all lists the same length.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | POST | `/get-online-features` | [`get_online_features`] |
//! | POST | `/push` | [`push`] |
//! | POST | `/write-to-online-store` | [`write_to_online_store`] |
//! | POST | `/materialize` | [`materialize`] |
//! | POST | `/materialize-incremental` | [`materialize_incremental`] |

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use featureloom::online::{MaterializeResult, SourceRow};
use featureloom::{FeatureSelection, OnlineFeaturesRequest};
use featureloom_core::{Value, WriteSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Column name to values
pub type Columns = BTreeMap<String, Vec<serde_json::Value>>;

// ============================================================================
// Online Features
// ============================================================================

/// Either `features` or `feature_service` must be given
///
/// ```json
/// {
///   "features": ["driver_hourly_stats:conv_rate", "transformed_conv_rate:conv_rate_plus_val1"],
///   "entities": {"driver_id": [1001, 1002], "val_to_add": [1, 2], "val_to_add_2": [10, 20]},
///   "full_feature_names": false
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct GetOnlineFeaturesRequest {
    #[serde(default)]
    pub features: Option<Vec<String>>,

    #[serde(default)]
    pub feature_service: Option<String>,

    /// Join keys and request-time fields
    pub entities: Columns,

    #[serde(default)]
    pub full_feature_names: bool,

    #[serde(default)]
    pub include_event_timestamps: bool,
}

/// Columns in `metadata.feature_names` order
///
/// ```json
/// {
///   "metadata": {"feature_names": ["driver_id", "conv_rate"]},
///   "results": [{"values": [1001, 1002]}, {"values": [0.5, null]}]
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct GetOnlineFeaturesResponse {
    pub metadata: FeatureMetadata,
    pub results: Vec<FeatureColumn>,
}

#[derive(Debug, Serialize)]
pub struct FeatureMetadata {
    pub feature_names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FeatureColumn {
    pub values: Vec<serde_json::Value>,
}

impl GetOnlineFeaturesRequest {
    fn into_request(self) -> Result<OnlineFeaturesRequest> {
        let features = match (self.features, self.feature_service) {
            (Some(refs), None) => FeatureSelection::Refs(refs),
            (None, Some(service)) => FeatureSelection::Service(service),
            _ => {
                return Err(AppError::BadRequest(
                    "exactly one of 'features' or 'feature_service' is required".to_string(),
                ))
            }
        };
        let entity_rows = columns_to_rows(self.entities)?
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(column, json)| (column, Value::infer_from_json(&json)))
                    .collect()
            })
            .collect();
        Ok(OnlineFeaturesRequest {
            features,
            entity_rows,
            full_feature_names: self.full_feature_names,
            include_event_timestamps: self.include_event_timestamps,
        })
    }
}

/// `POST /get-online-features`
pub async fn get_online_features(
    State(state): State<AppState>,
    Json(body): Json<GetOnlineFeaturesRequest>,
) -> Result<Json<GetOnlineFeaturesResponse>> {
    let request = body.into_request()?;
    let response = state.store().get_online_features(&request).await?;

    let results = response
        .field_names
        .iter()
        .map(|name| FeatureColumn {
            values: response
                .column(name)
                .unwrap_or_default()
                .iter()
                .map(Value::to_json)
                .collect(),
        })
        .collect();
    Ok(Json(GetOnlineFeaturesResponse {
        metadata: FeatureMetadata {
            feature_names: response.field_names,
        },
        results,
    }))
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub push_source_name: String,
    pub df: Columns,
}

#[derive(Debug, Deserialize)]
pub struct WriteToOnlineStoreRequest {
    pub feature_view_name: String,
    pub df: Columns,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub written: usize,
    pub skipped_stale: usize,
}

impl From<WriteSummary> for WriteResponse {
    fn from(summary: WriteSummary) -> Self {
        Self {
            written: summary.written,
            skipped_stale: summary.skipped_stale,
        }
    }
}

/// `POST /push`
///
/// Rows use the batch source layout of the views reading the push source.
pub async fn push(
    State(state): State<AppState>,
    Json(body): Json<PushRequest>,
) -> Result<Json<WriteResponse>> {
    let rows = columns_to_rows(body.df)?;
    let count = rows.len();
    let summary = state.store().push(&body.push_source_name, rows).await?;
    info!(
        source = %body.push_source_name,
        rows = count,
        written = summary.written,
        "Handled push"
    );
    Ok(Json(summary.into()))
}

/// `POST /write-to-online-store`
pub async fn write_to_online_store(
    State(state): State<AppState>,
    Json(body): Json<WriteToOnlineStoreRequest>,
) -> Result<Json<WriteResponse>> {
    let rows = columns_to_rows(body.df)?;
    let summary = state
        .store()
        .write_to_online_store(&body.feature_view_name, rows)
        .await?;
    Ok(Json(summary.into()))
}

// ============================================================================
// Materialization
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MaterializeRequest {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    /// Defaults to every online feature view
    #[serde(default)]
    pub feature_views: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct MaterializeIncrementalRequest {
    pub end_ts: DateTime<Utc>,
    #[serde(default)]
    pub feature_views: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MaterializeResponse {
    pub results: Vec<MaterializedView>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MaterializedView {
    pub feature_view: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows_read: usize,
    pub written: usize,
    pub skipped_stale: usize,
}

impl From<MaterializeResult> for MaterializedView {
    fn from(result: MaterializeResult) -> Self {
        Self {
            feature_view: result.feature_view,
            start: result.start,
            end: result.end,
            rows_read: result.rows_read,
            written: result.summary.written,
            skipped_stale: result.summary.skipped_stale,
        }
    }
}

fn materialize_response(results: Vec<MaterializeResult>, started: Instant) -> MaterializeResponse {
    MaterializeResponse {
        results: results.into_iter().map(Into::into).collect(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// `POST /materialize`
pub async fn materialize(
    State(state): State<AppState>,
    Json(body): Json<MaterializeRequest>,
) -> Result<Json<MaterializeResponse>> {
    let started = Instant::now();
    let results = state
        .store()
        .materialize(body.start_ts, body.end_ts, body.feature_views.as_deref())
        .await?;
    Ok(Json(materialize_response(results, started)))
}

/// `POST /materialize-incremental`
pub async fn materialize_incremental(
    State(state): State<AppState>,
    Json(body): Json<MaterializeIncrementalRequest>,
) -> Result<Json<MaterializeResponse>> {
    let started = Instant::now();
    let results = state
        .store()
        .materialize_incremental(body.end_ts, body.feature_views.as_deref())
        .await?;
    Ok(Json(materialize_response(results, started)))
}

/// Transpose columns into rows; every column must have the same length
pub fn columns_to_rows(columns: Columns) -> Result<Vec<SourceRow>> {
    let num_rows = columns.values().next().map_or(0, Vec::len);
    if let Some((name, values)) = columns.iter().find(|(_, values)| values.len() != num_rows) {
        return Err(AppError::BadRequest(format!(
            "column '{}' has {} values, expected {}",
            name,
            values.len(),
            num_rows
        )));
    }

    let mut rows = vec![SourceRow::new(); num_rows];
    for (name, values) in columns {
        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(name.clone(), value);
        }
    }
    Ok(rows)
}
