//! # featureloom core library
//!
//! Foundation types and traits shared by every featureloom crate: the feature
//! store data model, typed values and entity keys, the error taxonomy, and
//! the [`OnlineStore`] trait that serving backends implement.
//!
//! ## Key Components
//!
//! - **Definitions**: [`Entity`], [`DataSource`], [`FeatureView`],
//!   [`OnDemandFeatureView`], [`StreamFeatureView`], [`FeatureService`]
//! - **Values**: [`Value`], [`ValueType`], [`EntityKey`]
//! - **OnlineStore**: the trait all serving backends implement
//! - **Transformations**: [`TransformationRegistry`] of on-demand functions
//! - **Errors**: strongly-typed error handling with [`ErrorClass`]
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featureloom_core::prelude::*;
//!
//! let driver = Entity::new("driver", "driver_id").with_value_type(ValueType::Int64);
//! let stats = FeatureView::new("driver_hourly_stats", "driver_hourly")
//!     .with_entity("driver")
//!     .with_field("conv_rate", ValueType::Float32)
//!     .with_ttl(Duration::from_secs(86400));
//! ```

pub use data_source::{DataSource, SourceKind};
pub use entity::Entity;
pub use entity_key::EntityKey;
pub use error::{recover_mutex, Error, ErrorClass, ObjectKind, Result, TransientKind};
pub use feature_ref::{full_feature_name, timestamp_column, FeatureRef};
pub use feature_service::{FeatureService, FeatureViewProjection};
pub use feature_view::{FeatureView, Field, MaterializationInterval};
pub use object::{ObjectMeta, ObjectRef, RegistryObject};
pub use on_demand::{OnDemandFeatureView, OnDemandSource, RequestSource};
pub use online_store::{
    is_expired, OnlineReadRow, OnlineStore, OnlineTable, OnlineWriteRow, StoredValue, WriteSummary,
};
pub use stream::{Aggregation, AggregationFunction, StreamFeatureView};
pub use transformation::{OnDemandTransform, RowBatch, TransformationRegistry};
pub use value::{Value, ValueType};

mod data_source;
mod entity;
mod entity_key;
mod error;
mod feature_ref;
mod feature_service;
mod feature_view;
mod object;
mod on_demand;
pub mod online_store;
pub mod retry;
mod stream;
pub mod transformation;
pub mod validation;
mod value;

/// Commonly used imports
pub mod prelude {
    pub use crate::{
        DataSource, Entity, EntityKey, Error, FeatureRef, FeatureService, FeatureView,
        FeatureViewProjection, Field, OnDemandFeatureView, OnDemandSource, OnlineStore,
        RegistryObject, RequestSource, Result, RowBatch, StreamFeatureView, Value, ValueType,
    };
    pub use std::time::Duration;
}
