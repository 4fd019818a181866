//! Application state shared across all HTTP handlers

use featureloom::FeatureStore;
use std::sync::Arc;
use std::time::Instant;

/// Cheap to clone; handlers share one feature store
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: FeatureStore,
    start_time: Instant,
}

impl AppState {
    pub fn new(store: FeatureStore) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                start_time: Instant::now(),
            }),
        }
    }

    pub fn store(&self) -> &FeatureStore {
        &self.inner.store
    }

    /// Server uptime in seconds
    pub fn uptime(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
