//! Feature registry for featureloom
//!
//! Versioned metadata for every entity, data source, feature view and
//! feature service, persisted as one snapshot through a pluggable store:
//! - **File** - local file with atomic replace
//! - **SQLite with WAL** - embedded, multi-process safe
//! - **Object storage** - `object_store` URLs
//! - **PostgreSQL** - production scale, connection pooling (`postgres` feature)
//!
//! # Examples
//!
//! ```rust,ignore
//! use featureloom_registry::{Registry, RegistryConfig, RegistryStoreConfig};
//!
//! let config = RegistryConfig {
//!     store: RegistryStoreConfig::sqlite("./registry.db"),
//!     cache_ttl_seconds: 60,
//! };
//! let registry = Registry::from_config(&config).await?;
//!
//! registry.apply(vec![driver.into(), source.into(), stats.into()], vec![], "ranking", true).await?;
//! let fv = registry.get_feature_view("driver_hourly_stats", "ranking", true).await?;
//! ```

pub mod backend;
mod file_store;
mod object_store_backend;
mod registry;
pub mod snapshot;
mod sqlite_store;

#[cfg(feature = "postgres")]
mod postgres_store;

pub use backend::{RegistryStore, RegistryStoreConfig};
pub use file_store::FileRegistryStore;
pub use object_store_backend::ObjectStoreRegistryStore;
pub use registry::{Registry, RegistryConfig};
pub use snapshot::{CatalogObject, ProjectCatalog, RegistrySnapshot};
pub use sqlite_store::SqliteRegistryStore;

#[cfg(feature = "postgres")]
pub use postgres_store::PostgresRegistryStore;
