//! Local file registry store
//!
//! The snapshot is written to a sibling temp file and renamed over the
//! target, so readers never observe a half-written snapshot.

use crate::backend::RegistryStore;
use anyhow::Context;
use async_trait::async_trait;
use featureloom_core::{Error, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

pub struct FileRegistryStore {
    path: PathBuf,
}

impl FileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp-{}", std::process::id()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::SnapshotNotFound(self.location()))
            }
            Err(e) => Err(Error::StorageError(anyhow::Error::new(e).context(format!(
                "Failed to read registry snapshot {}",
                self.path.display()
            )))),
        }
    }

    async fn save(&self, snapshot: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| {
                    format!("Failed to create registry directory {}", parent.display())
                })?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, snapshot)
            .await
            .with_context(|| format!("Failed to write registry snapshot {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| {
                format!("Failed to replace registry snapshot {}", self.path.display())
            })?;

        debug!(path = %self.path.display(), bytes = snapshot.len(), "Saved registry snapshot");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageError(anyhow::Error::new(e).context(format!(
                "Failed to delete registry snapshot {}",
                self.path.display()
            )))),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn store_type(&self) -> &'static str {
        "file"
    }
}
