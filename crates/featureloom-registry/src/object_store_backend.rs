//! Object storage registry store
//!
//! Stores the snapshot as a single object through the `object_store` crate,
//! so the same code serves local files (`file:///...`), in-process memory
//! (`memory:///...`) and, when the crate's cloud features are enabled, S3,
//! GCS and Azure URLs. Object puts are atomic, so no temp-file dance.

use crate::backend::RegistryStore;
use anyhow::Context;
use async_trait::async_trait;
use featureloom_core::{Error, Result};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct ObjectStoreRegistryStore {
    store: Arc<dyn ObjectStore>,
    path: Path,
    location: String,
}

impl ObjectStoreRegistryStore {
    /// Wrap an existing store, e.g. a shared `InMemory`
    pub fn new(store: Arc<dyn ObjectStore>, path: impl Into<Path>) -> Self {
        let path = path.into();
        Self {
            location: format!("{}/{}", store, path),
            store,
            path,
        }
    }

    /// Resolve a store from a URL such as `file:///srv/registry.json`
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::config(format!("invalid registry url '{}': {}", url, e)))?;
        let (store, path) = object_store::parse_url(&parsed)
            .with_context(|| format!("Unsupported registry url '{}'", url))?;
        if path.as_ref().is_empty() {
            return Err(Error::config(format!(
                "registry url '{}' must name an object, not a bucket root",
                url
            )));
        }
        Ok(Self {
            store: Arc::from(store),
            path,
            location: url.to_string(),
        })
    }
}

#[async_trait]
impl RegistryStore for ObjectStoreRegistryStore {
    async fn load(&self) -> Result<Vec<u8>> {
        let result = match self.store.get(&self.path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(Error::SnapshotNotFound(self.location()))
            }
            Err(e) => return Err(classify(e)),
        };
        let bytes = result.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }

    async fn save(&self, snapshot: &[u8]) -> Result<()> {
        self.store
            .put(&self.path, PutPayload::from(snapshot.to_vec()))
            .await
            .map_err(classify)?;
        debug!(location = %self.location, bytes = snapshot.len(), "Saved registry snapshot");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match self.store.delete(&self.path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn store_type(&self) -> &'static str {
        "object_store"
    }
}

/// Precondition/conflict failures are eventual-consistency races; the rest
/// are opaque storage errors
fn classify(err: object_store::Error) -> Error {
    match err {
        object_store::Error::Precondition { .. } | object_store::Error::AlreadyExists { .. } => {
            Error::Conflict(err.to_string())
        }
        other => Error::StorageError(anyhow::Error::new(other)),
    }
}
