//! featureloom online serving
//!
//! Online stores hold the latest value of every feature per entity and serve
//! it with low latency. Rows arrive from materialization (offline source →
//! online store) or from direct pushes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Online Feature Serving                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │   ┌─────────────┐      materialize()       ┌────────────────┐    │
//! │   │  Offline    │ ───────────────────────► │ Memory/SQLite/ │    │
//! │   │  source     │   [start, end) window    │ Redis (online) │    │
//! │   └─────────────┘                          └────────────────┘    │
//! │                                                    │              │
//! │                       newest event time wins       │ TTL on read  │
//! │                                                    ▼              │
//! │                                             ┌───────────┐         │
//! │                                             │ Retrieval │         │
//! │                                             └───────────┘         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featureloom_online::{materialize, InMemoryOfflineSource, InMemoryOnlineStore, MaterializeConfig};
//!
//! let online = Arc::new(InMemoryOnlineStore::new());
//! let result = materialize(online.clone(), &offline, "ranking", &target, start, end, &MaterializeConfig::default()).await?;
//! let rows = online.online_read("ranking", &table, &keys, &[]).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `redis`: Enable the Redis online store

pub use featureloom_core::{OnlineStore, OnlineTable, OnlineWriteRow, WriteSummary};

mod memory;
pub mod materialize;
pub mod observability;
mod sqlite;

pub use materialize::{
    materialize, write_partitioned, InMemoryOfflineSource, JoinKey, JsonLinesFileSource,
    MaterializationTarget, MaterializeConfig, MaterializeResult, OfflineSource, SourceRow,
};
pub use memory::InMemoryOnlineStore;
pub use sqlite::SqliteOnlineStore;

#[cfg(feature = "redis")]
pub mod redis_store;
#[cfg(feature = "redis")]
pub use redis_store::{RedisConfig, RedisOnlineStore};
