//! Typed feature values
//!
//! Features and entity keys carry one of the scalar or list types below. The
//! enum is serialized externally tagged (`{"Int64": 4}`) so values round-trip
//! through online stores without losing their width; the HTTP layer uses
//! [`Value::to_json`]/[`Value::from_json`] for plain JSON instead.

use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Bool,
    UnixTimestamp,
    Int32List,
    Int64List,
    Float32List,
    Float64List,
    StringList,
    BytesList,
    BoolList,
    UnixTimestampList,
}

impl ValueType {
    /// True for the `*List` variants
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::Int32List
                | Self::Int64List
                | Self::Float32List
                | Self::Float64List
                | Self::StringList
                | Self::BytesList
                | Self::BoolList
                | Self::UnixTimestampList
        )
    }

    /// Types that may identify an entity
    pub fn is_valid_join_key(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::String | Self::Bytes)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        f.write_str(json.as_str().unwrap_or("unknown"))
    }
}

/// A single feature (or entity key) value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Missing, expired or explicitly null
    #[default]
    Null,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    UnixTimestamp(DateTime<Utc>),
    Int32List(Vec<i32>),
    Int64List(Vec<i64>),
    Float32List(Vec<f32>),
    Float64List(Vec<f64>),
    StringList(Vec<String>),
    BytesList(Vec<Vec<u8>>),
    BoolList(Vec<bool>),
    UnixTimestampList(Vec<DateTime<Utc>>),
}

impl Value {
    /// Type of this value, `None` for `Null`
    pub fn value_type(&self) -> Option<ValueType> {
        let ty = match self {
            Self::Null => return None,
            Self::Int32(_) => ValueType::Int32,
            Self::Int64(_) => ValueType::Int64,
            Self::Float32(_) => ValueType::Float32,
            Self::Float64(_) => ValueType::Float64,
            Self::String(_) => ValueType::String,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Bool(_) => ValueType::Bool,
            Self::UnixTimestamp(_) => ValueType::UnixTimestamp,
            Self::Int32List(_) => ValueType::Int32List,
            Self::Int64List(_) => ValueType::Int64List,
            Self::Float32List(_) => ValueType::Float32List,
            Self::Float64List(_) => ValueType::Float64List,
            Self::StringList(_) => ValueType::StringList,
            Self::BytesList(_) => ValueType::BytesList,
            Self::BoolList(_) => ValueType::BoolList,
            Self::UnixTimestampList(_) => ValueType::UnixTimestampList,
        };
        Some(ty)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of scalar numbers, used by transformations
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical text used to address an entity in a physical store
    ///
    /// The type tag is part of the rendering so `Int64(1)` and `String("1")`
    /// never address the same row. Integer width is not: `Int32(1)` and
    /// `Int64(1)` are the same key.
    pub fn key_repr(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Int32(v) => format!("int:{}", v),
            Self::Int64(v) => format!("int:{}", v),
            Self::String(v) => format!("s:{}", v),
            Self::Bytes(v) => format!(
                "b:{}",
                v.iter().map(|b| format!("{:02x}", b)).collect::<String>()
            ),
            Self::Bool(v) => format!("bool:{}", v),
            other => format!("json:{}", other.to_json()),
        }
    }

    /// Plain JSON rendering (untyped), used at the HTTP edge
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int32(v) => json!(v),
            Self::Int64(v) => json!(v),
            Self::Float32(v) => json!(v),
            Self::Float64(v) => json!(v),
            Self::String(v) => json!(v),
            Self::Bytes(v) => json!(v),
            Self::Bool(v) => json!(v),
            Self::UnixTimestamp(v) => json!(v.timestamp()),
            Self::Int32List(v) => json!(v),
            Self::Int64List(v) => json!(v),
            Self::Float32List(v) => json!(v),
            Self::Float64List(v) => json!(v),
            Self::StringList(v) => json!(v),
            Self::BytesList(v) => json!(v),
            Self::BoolList(v) => json!(v),
            Self::UnixTimestampList(v) => {
                json!(v.iter().map(DateTime::timestamp).collect::<Vec<_>>())
            }
        }
    }

    /// Parse plain JSON into a value of the declared type
    pub fn from_json(json: &serde_json::Value, ty: ValueType) -> Result<Self> {
        if json.is_null() {
            return Ok(Self::Null);
        }
        let mismatch = || Error::invalid_input(format!("expected {} value, got {}", ty, json));

        let value = match ty {
            ValueType::Int32 => {
                let v = json.as_i64().ok_or_else(mismatch)?;
                Self::Int32(i32::try_from(v).map_err(|_| mismatch())?)
            }
            ValueType::Int64 => Self::Int64(json.as_i64().ok_or_else(mismatch)?),
            ValueType::Float32 => Self::Float32(json.as_f64().ok_or_else(mismatch)? as f32),
            ValueType::Float64 => Self::Float64(json.as_f64().ok_or_else(mismatch)?),
            ValueType::String => Self::String(json.as_str().ok_or_else(mismatch)?.to_string()),
            ValueType::Bool => Self::Bool(json.as_bool().ok_or_else(mismatch)?),
            ValueType::Bytes => Self::Bytes(bytes_from_json(json).ok_or_else(mismatch)?),
            ValueType::UnixTimestamp => {
                Self::UnixTimestamp(timestamp_from_json(json).ok_or_else(mismatch)?)
            }
            list => {
                let items = json.as_array().ok_or_else(mismatch)?;
                list_from_json(items, list).ok_or_else(mismatch)?
            }
        };
        Ok(value)
    }

    /// Best-effort typing of untyped JSON (entity rows without a schema)
    pub fn infer_from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int64(i),
                None => Self::Float64(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }

    /// Coerce a value to the declared field type where the conversion is lossless
    ///
    /// Entity rows arrive loosely typed (an `Int64` literal for an `Int32`
    /// join key is common); this keeps them addressing the stored rows.
    pub fn coerce(self, ty: ValueType) -> Result<Self> {
        let value = match (self, ty) {
            (Self::Null, _) => Self::Null,
            (Self::Int64(v), ValueType::Int32) => Self::Int32(
                i32::try_from(v)
                    .map_err(|_| Error::invalid_input(format!("{} overflows int32", v)))?,
            ),
            (Self::Int32(v), ValueType::Int64) => Self::Int64(i64::from(v)),
            (Self::Float64(v), ValueType::Float32) => Self::Float32(v as f32),
            (Self::Float32(v), ValueType::Float64) => Self::Float64(f64::from(v)),
            (Self::Int64(v), ValueType::Float64) => Self::Float64(v as f64),
            (Self::Int32(v), ValueType::Float64) => Self::Float64(f64::from(v)),
            (Self::Int64(v), ValueType::UnixTimestamp) => Self::UnixTimestamp(
                Utc.timestamp_opt(v, 0)
                    .single()
                    .ok_or_else(|| Error::invalid_input(format!("invalid timestamp {}", v)))?,
            ),
            (v, ty) if v.value_type() == Some(ty) => v,
            (v, ty) => {
                return Err(Error::invalid_input(format!(
                    "value {:?} is not compatible with type {}",
                    v, ty
                )))
            }
        };
        Ok(value)
    }
}

fn bytes_from_json(json: &serde_json::Value) -> Option<Vec<u8>> {
    match json {
        serde_json::Value::String(s) => Some(s.as_bytes().to_vec()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|i| i.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        _ => None,
    }
}

fn timestamp_from_json(json: &serde_json::Value) -> Option<DateTime<Utc>> {
    match json {
        serde_json::Value::Number(n) => n.as_i64().and_then(|s| Utc.timestamp_opt(s, 0).single()),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn list_from_json(items: &[serde_json::Value], ty: ValueType) -> Option<Value> {
    let value = match ty {
        ValueType::Int32List => Value::Int32List(
            items
                .iter()
                .map(|i| i.as_i64().and_then(|v| i32::try_from(v).ok()))
                .collect::<Option<_>>()?,
        ),
        ValueType::Int64List => {
            Value::Int64List(items.iter().map(|i| i.as_i64()).collect::<Option<_>>()?)
        }
        ValueType::Float32List => Value::Float32List(
            items
                .iter()
                .map(|i| i.as_f64().map(|v| v as f32))
                .collect::<Option<_>>()?,
        ),
        ValueType::Float64List => {
            Value::Float64List(items.iter().map(|i| i.as_f64()).collect::<Option<_>>()?)
        }
        ValueType::StringList => Value::StringList(
            items
                .iter()
                .map(|i| i.as_str().map(str::to_string))
                .collect::<Option<_>>()?,
        ),
        ValueType::BytesList => {
            Value::BytesList(items.iter().map(bytes_from_json).collect::<Option<_>>()?)
        }
        ValueType::BoolList => {
            Value::BoolList(items.iter().map(|i| i.as_bool()).collect::<Option<_>>()?)
        }
        ValueType::UnixTimestampList => Value::UnixTimestampList(
            items
                .iter()
                .map(timestamp_from_json)
                .collect::<Option<_>>()?,
        ),
        _ => return None,
    };
    Some(value)
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::UnixTimestamp(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_of_values() {
        assert_eq!(Value::Int64(3).value_type(), Some(ValueType::Int64));
        assert_eq!(Value::Null.value_type(), None);
        assert!(ValueType::StringList.is_list());
        assert!(!ValueType::Float64.is_valid_join_key());
    }

    #[test]
    fn test_from_json_respects_declared_type() {
        assert_eq!(
            Value::from_json(&json!(4), ValueType::Int32).unwrap(),
            Value::Int32(4)
        );
        assert_eq!(
            Value::from_json(&json!(0.5), ValueType::Float32).unwrap(),
            Value::Float32(0.5)
        );
        assert_eq!(
            Value::from_json(&json!(["a", "b"]), ValueType::StringList).unwrap(),
            Value::StringList(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            Value::from_json(&json!(null), ValueType::Int64).unwrap(),
            Value::Null
        );
        assert!(Value::from_json(&json!("x"), ValueType::Int64).is_err());
        assert!(Value::from_json(&json!(5_000_000_000_i64), ValueType::Int32).is_err());
    }

    #[test]
    fn test_timestamp_from_json_accepts_seconds_and_rfc3339() {
        let from_secs = Value::from_json(&json!(1646263500), ValueType::UnixTimestamp).unwrap();
        let from_str =
            Value::from_json(&json!("2022-03-02T23:25:00Z"), ValueType::UnixTimestamp).unwrap();
        assert_eq!(from_secs, from_str);
        assert_eq!(from_secs.to_json(), json!(1646263500));
    }

    #[test]
    fn test_key_repr_includes_type() {
        assert_ne!(Value::Int64(1).key_repr(), Value::String("1".into()).key_repr());
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).key_repr(), "b:ab01");
    }

    #[test]
    fn test_coerce_widening_and_narrowing() {
        assert_eq!(Value::Int64(7).coerce(ValueType::Int32).unwrap(), Value::Int32(7));
        assert_eq!(Value::Int32(7).coerce(ValueType::Int64).unwrap(), Value::Int64(7));
        assert!(Value::String("7".into()).coerce(ValueType::Int64).is_err());
        assert_eq!(Value::Null.coerce(ValueType::Bool).unwrap(), Value::Null);
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let json = serde_json::to_string(&Value::Int32(4)).unwrap();
        assert_eq!(json, r#"{"Int32":4}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int32(4));
    }
}
