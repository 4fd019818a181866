//! # featureloom
//!
//! A feature store: versioned feature definitions in a registry, the latest
//! feature values per entity in an online store, and low-latency retrieval
//! that can compute on-demand features from stored features and
//! request-time data.
//!
//! ## Example
//!
//! ```rust,ignore
//! use featureloom::prelude::*;
//!
//! let store = FeatureStore::open("feature_store.yaml").await?;
//! store.apply(vec![driver.into(), source.into(), stats.into()], vec![]).await?;
//! store.materialize(start, end, None).await?;
//!
//! let response = store
//!     .get_online_features(
//!         &OnlineFeaturesRequest::refs(["driver_hourly_stats:conv_rate"])
//!             .with_entity_row(entity_row([("driver_id", 1001_i64)])),
//!     )
//!     .await?;
//! ```

pub mod config;
mod feature_store;
pub mod retrieval;

pub use config::{OfflineStoreConfig, OnlineStoreConfig, RepoConfig};
pub use feature_store::FeatureStore;
pub use retrieval::{
    entity_row, EntityRow, FeatureSelection, OnlineFeaturesRequest, OnlineFeaturesResponse,
};

pub use featureloom_core as core;
pub use featureloom_online as online;
pub use featureloom_registry as registry;

/// Commonly used imports
pub mod prelude {
    pub use crate::retrieval::{entity_row, OnlineFeaturesRequest, OnlineFeaturesResponse};
    pub use crate::{FeatureStore, RepoConfig};
    pub use featureloom_core::prelude::*;
    pub use featureloom_core::ObjectRef;
    pub use featureloom_online::SourceRow;
}
