//! Data source definitions
//!
//! A data source points at the external system that produces feature rows.
//! Batch sources (files, warehouse tables) feed materialization; stream
//! sources (Kafka, Kinesis, push) feed stream feature views and always name
//! a batch source used for backfill.
//!
//! Identity is the name. Equality compares every connection attribute, so a
//! re-applied source with a new path is a different value under the same
//! identity, and every feature view referencing it sees the change.

use crate::object::ObjectMeta;
use crate::validation::validate_name;
use crate::{Error, ObjectKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connection details for each supported source type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// File or directory of files (JSON lines, parquet, ...)
    File {
        path: String,
        #[serde(default = "default_file_format")]
        format: String,
    },
    /// Warehouse table
    Table {
        table: String,
        #[serde(default)]
        database: Option<String>,
    },
    Kafka {
        bootstrap_servers: String,
        topic: String,
        message_format: String,
        batch_source: String,
    },
    Kinesis {
        region: String,
        stream_name: String,
        record_format: String,
        batch_source: String,
    },
    /// Rows pushed directly through the write path
    Push { batch_source: String },
}

fn default_file_format() -> String {
    "jsonl".to_string()
}

impl SourceKind {
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::File { .. } | Self::Table { .. })
    }

    pub fn is_stream(&self) -> bool {
        !self.is_batch()
    }

    /// Backfill source of a stream source
    pub fn batch_source(&self) -> Option<&str> {
        match self {
            Self::Kafka { batch_source, .. }
            | Self::Kinesis { batch_source, .. }
            | Self::Push { batch_source } => Some(batch_source),
            Self::File { .. } | Self::Table { .. } => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Table { .. } => "table",
            Self::Kafka { .. } => "kafka",
            Self::Kinesis { .. } => "kinesis",
            Self::Push { .. } => "push",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,

    pub kind: SourceKind,

    /// Column holding the event timestamp of each row
    #[serde(default)]
    pub timestamp_field: String,

    /// Column holding the row creation time
    #[serde(default)]
    pub created_timestamp_column: Option<String>,

    /// Source column -> feature name renames
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub meta: ObjectMeta,
}

impl DataSource {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timestamp_field: String::new(),
            created_timestamp_column: None,
            field_mapping: BTreeMap::new(),
            description: String::new(),
            tags: BTreeMap::new(),
            owner: String::new(),
            meta: ObjectMeta::default(),
        }
    }

    /// File source shorthand
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(
            name,
            SourceKind::File {
                path: path.into(),
                format: default_file_format(),
            },
        )
    }

    /// Push source backed by the named batch source
    pub fn push(name: impl Into<String>, batch_source: impl Into<String>) -> Self {
        Self::new(
            name,
            SourceKind::Push {
                batch_source: batch_source.into(),
            },
        )
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }

    pub fn with_created_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.created_timestamp_column = Some(column.into());
        self
    }

    pub fn with_field_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.field_mapping.insert(from.into(), to.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Feature name a raw source column maps to
    pub fn mapped_name<'a>(&'a self, column: &'a str) -> &'a str {
        self.field_mapping
            .get(column)
            .map(String::as_str)
            .unwrap_or(column)
    }

    /// True when the connection attributes (not the bookkeeping) are the same
    pub fn same_definition(&self, other: &DataSource) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.timestamp_field == other.timestamp_field
            && self.created_timestamp_column == other.created_timestamp_column
            && self.field_mapping == other.field_mapping
            && self.description == other.description
            && self.tags == other.tags
            && self.owner == other.owner
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::DataSource, &self.name)?;
        if self.kind.is_batch() && self.timestamp_field.is_empty() {
            return Err(Error::invalid_input(format!(
                "Data source '{}' must declare a timestamp field",
                self.name
            )));
        }
        if let Some(batch) = self.kind.batch_source() {
            if batch == self.name {
                return Err(Error::invalid_input(format!(
                    "Data source '{}' cannot use itself as its batch source",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
