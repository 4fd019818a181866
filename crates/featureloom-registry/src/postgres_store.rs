//! PostgreSQL registry store with connection pooling
//!
//! Suitable for deployments where several feature servers and writers share
//! one registry. Snapshots live in a single-row table; writes are plain
//! upserts (last writer wins).

use crate::backend::RegistryStore;
use anyhow::Context;
use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use featureloom_core::{Error, Result};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info};

pub struct PostgresRegistryStore {
    pool: Pool,
    location: String,
}

impl PostgresRegistryStore {
    /// Create the pool, check connectivity and create the snapshot table
    pub async fn new(
        connection_string: &str,
        pool_size: usize,
        timeout_seconds: u64,
    ) -> Result<Self> {
        info!(pool_size, timeout_seconds, "Initializing PostgreSQL registry store");

        let timeout = Duration::from_secs(timeout_seconds);
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: pool_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(timeout),
            },
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL connection pool")?;

        let client = pool
            .get()
            .await
            .map_err(|e| Error::Unavailable(format!("PostgreSQL registry: {}", e)))?;
        client
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS registry_snapshots (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    snapshot BYTEA NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#,
                &[],
            )
            .await
            .context("Failed to create registry_snapshots table")?;

        Ok(Self {
            pool,
            location: redact(connection_string),
        })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Unavailable(format!("PostgreSQL registry: {}", e)))
    }
}

#[async_trait]
impl RegistryStore for PostgresRegistryStore {
    async fn load(&self) -> Result<Vec<u8>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT snapshot FROM registry_snapshots WHERE id = 1", &[])
            .await
            .context("Failed to read registry snapshot")?;
        match row {
            Some(row) => Ok(row.get::<_, Vec<u8>>(0)),
            None => Err(Error::SnapshotNotFound(self.location())),
        }
    }

    async fn save(&self, snapshot: &[u8]) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                r#"
                INSERT INTO registry_snapshots (id, snapshot, updated_at) VALUES (1, $1, now())
                ON CONFLICT (id) DO UPDATE SET snapshot = EXCLUDED.snapshot, updated_at = now()
                "#,
                &[&snapshot],
            )
            .await
            .context("Failed to save registry snapshot")?;
        debug!(bytes = snapshot.len(), "Saved registry snapshot to PostgreSQL");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM registry_snapshots WHERE id = 1", &[])
            .await
            .context("Failed to delete registry snapshot")?;
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

/// Strip credentials from a connection string before it reaches logs
fn redact(connection_string: &str) -> String {
    match url::Url::parse(connection_string) {
        Ok(mut url) => {
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.to_string()
        }
        Err(_) => "postgresql://<redacted>".to_string(),
    }
}
