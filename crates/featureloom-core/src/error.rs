//! Error types for featureloom
//!
//! Every fallible operation in the library crates returns [`Result`], backed by
//! the single [`Error`] enum below. Variants are grouped into the classes the
//! serving path cares about (see [`ErrorClass`]):
//!
//! - **NotFound**: metadata lookups and deleted registry snapshots
//! - **Validation**: rejected before any side effect
//! - **Collision**: ambiguous bare feature names at retrieval time
//! - **Transient**: backend hiccups, retried only by schema migration
//! - **Fatal**: corrupt snapshots and broken internal state
//!
//! Online reads never produce `NotFound`; a missing row is a null value.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias used across all featureloom crates
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of registry object, used in lookups and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Entity,
    DataSource,
    FeatureView,
    OnDemandFeatureView,
    StreamFeatureView,
    FeatureService,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entity => "Entity",
            Self::DataSource => "Data source",
            Self::FeatureView => "Feature view",
            Self::OnDemandFeatureView => "On demand feature view",
            Self::StreamFeatureView => "Stream feature view",
            Self::FeatureService => "Feature service",
        };
        f.write_str(name)
    }
}

/// Transient backend failure flavours
///
/// Schema migration retries are configured against this set, so the retried
/// errors are always explicit rather than "anything that failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Backend could not be reached or refused the connection
    Unavailable,
    /// Eventual-consistency conflict (e.g. create-after-delete of a table)
    Conflict,
    /// The backend did not answer within its own deadline
    Timeout,
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Validation,
    Collision,
    Transient(TransientKind),
    Storage,
    Fatal,
}

/// All possible errors that can occur in featureloom
#[derive(Error, Debug)]
pub enum Error {
    /// Registry object lookup failed
    #[error("{kind} '{name}' does not exist in project '{project}'")]
    ObjectNotFound {
        kind: ObjectKind,
        name: String,
        project: String,
    },

    /// The persisted registry snapshot is gone (never written or torn down)
    #[error("Registry snapshot not found at '{0}'")]
    SnapshotNotFound(String),

    /// Feature reference points at a feature the view does not define
    #[error("Feature '{feature}' not found in feature view '{view}'")]
    FeatureNotInView { feature: String, view: String },

    /// Two requested features, or a feature and an entity row column,
    /// render to the same output name
    #[error(
        "Duplicate feature names found: {}. Set full_feature_names=true to disambiguate",
        .0.join(", ")
    )]
    FeatureNameCollision(Vec<String>),

    /// Request-time fields required by on-demand transformations are missing
    #[error("Required request data fields not found in entity rows: {}", .0.join(", "))]
    RequestDataNotFound(Vec<String>),

    /// On-demand transformation has not been registered in this process
    #[error("Transformation '{0}' is not registered")]
    TransformationNotRegistered(String),

    /// Invalid definition or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend unreachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend reported an eventual-consistency conflict
    #[error("Backend conflict: {0}")]
    Conflict(String),

    /// Operation exceeded a deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Storage backend error that is not known to be transient
    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Snapshot bytes could not be decoded
    #[error("Corrupt registry snapshot: {0}")]
    CorruptSnapshot(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error - indicates a bug or poisoned state
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// Creates an ObjectNotFound error
    pub fn not_found(
        kind: ObjectKind,
        name: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self::ObjectNotFound {
            kind,
            name: name.into(),
            project: project.into(),
        }
    }

    /// Creates a StorageError from any displayable backend error
    pub fn storage<E: fmt::Display>(err: E) -> Self {
        Self::StorageError(anyhow::anyhow!("{}", err))
    }

    /// Creates a ConfigError from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates an InvalidInput error from a string
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an InternalError from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Classify this error for propagation and retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ObjectNotFound { .. } | Self::SnapshotNotFound(_) => ErrorClass::NotFound,
            Self::FeatureNotInView { .. }
            | Self::RequestDataNotFound(_)
            | Self::TransformationNotRegistered(_)
            | Self::InvalidInput(_)
            | Self::ConfigError(_) => ErrorClass::Validation,
            Self::FeatureNameCollision(_) => ErrorClass::Collision,
            Self::Unavailable(_) => ErrorClass::Transient(TransientKind::Unavailable),
            Self::Conflict(_) => ErrorClass::Transient(TransientKind::Conflict),
            Self::Timeout(_) => ErrorClass::Transient(TransientKind::Timeout),
            Self::StorageError(_) | Self::SerializationError(_) => ErrorClass::Storage,
            Self::CorruptSnapshot(_) | Self::InternalError(_) => ErrorClass::Fatal,
        }
    }

    /// Transient flavour, if this error is transient
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self.class() {
            ErrorClass::Transient(kind) => Some(kind),
            _ => None,
        }
    }

    /// True for metadata lookups and missing snapshots
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

/// Lock a std mutex, turning poisoning into an internal error instead of a panic
pub fn recover_mutex<'a, T>(
    mutex: &'a std::sync::Mutex<T>,
    what: &str,
) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::internal(format!("{} lock poisoned by a panicked writer", what)))
}
