//! Feature repository configuration
//!
//! Loaded from a YAML file (`feature_store.yaml`). Every section has serde
//! defaults, so an empty file (or no file at all) gives a working local
//! setup: file registry, in-memory online store, JSON-lines offline files.
//!
//! ## Example Configuration File
//!
//! ```yaml
//! project: ranking
//! registry:
//!   store:
//!     type: sqlite
//!     path: data/registry.db
//!   cache_ttl_seconds: 60
//! online_store:
//!   type: sqlite
//!   path: data/online.db
//! offline_store:
//!   type: file
//!   base_path: data
//! materialization:
//!   chunk_size: 5000
//!   parallelism: 8
//! schema_migration:
//!   timeout_seconds: 30
//!   retry_on: [conflict, unavailable, timeout]
//! ```

use featureloom_core::retry::RetryPolicy;
use featureloom_core::{Error, OnlineStore, Result, TransientKind};
use featureloom_online::{
    InMemoryOnlineStore, JsonLinesFileSource, MaterializeConfig, OfflineSource, SqliteOnlineStore,
};
use featureloom_registry::RegistryConfig;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub online_store: OnlineStoreConfig,

    #[serde(default)]
    pub offline_store: OfflineStoreConfig,

    #[serde(default)]
    pub materialization: MaterializationSettings,

    #[serde(default)]
    pub schema_migration: SchemaMigrationSettings,
}

/// Online store backend selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnlineStoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: String,
    },
    #[cfg(feature = "redis")]
    Redis(featureloom_online::RedisConfig),
}

impl OnlineStoreConfig {
    pub async fn build(&self) -> Result<Arc<dyn OnlineStore>> {
        let store: Arc<dyn OnlineStore> = match self {
            Self::Memory => Arc::new(InMemoryOnlineStore::new()),
            Self::Sqlite { path } => Arc::new(SqliteOnlineStore::open(path)?),
            #[cfg(feature = "redis")]
            Self::Redis(config) => {
                Arc::new(featureloom_online::RedisOnlineStore::new(config.clone()).await?)
            }
        };
        Ok(store)
    }
}

/// Where batch source rows are read from
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OfflineStoreConfig {
    /// JSON-lines files; relative source paths resolve against `base_path`
    File {
        #[serde(default = "default_base_path")]
        base_path: String,
    },
}

impl Default for OfflineStoreConfig {
    fn default() -> Self {
        Self::File {
            base_path: default_base_path(),
        }
    }
}

impl OfflineStoreConfig {
    pub fn build(&self) -> Arc<dyn OfflineSource> {
        match self {
            Self::File { base_path } => Arc::new(JsonLinesFileSource::new(base_path)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterializationSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl Default for MaterializationSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            parallelism: default_parallelism(),
        }
    }
}

impl From<&MaterializationSettings> for MaterializeConfig {
    fn from(settings: &MaterializationSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            parallelism: settings.parallelism,
        }
    }
}

/// Retry budget for online schema migration (`OnlineStore::update`)
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaMigrationSettings {
    #[serde(default = "default_migration_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Transient error kinds that are retried; anything else fails at once
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<TransientKind>,
}

impl Default for SchemaMigrationSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_migration_timeout(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retry_on: default_retry_on(),
        }
    }
}

impl From<&SchemaMigrationSettings> for RetryPolicy {
    fn from(settings: &SchemaMigrationSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            timeout: Duration::from_secs(settings.timeout_seconds),
            retry_on: settings.retry_on.clone(),
            ..RetryPolicy::default()
        }
    }
}

// Default value functions (used by serde)

fn default_project() -> String {
    "default".to_string()
}

fn default_base_path() -> String {
    ".".to_string()
}

fn default_chunk_size() -> usize {
    1_000
}

fn default_parallelism() -> usize {
    4
}

fn default_migration_timeout() -> u64 {
    60
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_retry_on() -> Vec<TransientKind> {
    RetryPolicy::default().retry_on
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            registry: RegistryConfig::default(),
            online_store: OnlineStoreConfig::default(),
            offline_store: OfflineStoreConfig::default(),
            materialization: MaterializationSettings::default(),
            schema_migration: SchemaMigrationSettings::default(),
        }
    }
}

impl RepoConfig {
    /// Load configuration from a YAML file; a missing file gives the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Configuration file '{}' not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&contents)?;
        tracing::info!(project = %config.project, "Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        if config.project.is_empty() {
            return Err(Error::config("project name cannot be empty"));
        }
        Ok(config)
    }
}
