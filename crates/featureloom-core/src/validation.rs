//! Definition and row validation
//!
//! Checks that run before any side effect: object names, field lists, and
//! the values of rows written directly to the online store against the
//! declared schema.

use crate::feature_view::Field;
use crate::{Error, ObjectKind, Result, Value};
use std::collections::{BTreeMap, HashSet};

/// Reserved separator of full feature names
const FULL_NAME_SEPARATOR: &str = "__";

/// Names must be non-empty identifiers: ASCII letters, digits, `_`, `-` or `.`
pub fn validate_name(kind: ObjectKind, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_input(format!("{} name cannot be empty", kind)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(Error::invalid_input(format!(
            "{} name '{}' contains invalid character '{}'",
            kind, name, c
        )));
    }
    Ok(())
}

/// Field names must be valid and unique, and must not collide with the
/// `view__feature` rendering
pub fn validate_fields(owner: &str, fields: &[Field]) -> Result<()> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if field.name.is_empty() {
            return Err(Error::invalid_input(format!(
                "'{}' has a field with an empty name",
                owner
            )));
        }
        if field.name.contains(':') || field.name.ends_with(FULL_NAME_SEPARATOR) {
            return Err(Error::invalid_input(format!(
                "Field '{}' in '{}' uses a reserved separator",
                field.name, owner
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::invalid_input(format!(
                "Field '{}' is declared twice in '{}'",
                field.name, owner
            )));
        }
    }
    Ok(())
}

/// Coerce each value of a feature row to its declared field type
///
/// Unknown columns are rejected; missing columns are left out and read back
/// as null.
pub fn conform_row(
    owner: &str,
    schema: &[Field],
    features: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    features
        .into_iter()
        .map(|(name, value)| {
            let field = schema.iter().find(|f| f.name == name).ok_or_else(|| {
                Error::FeatureNotInView {
                    feature: name.clone(),
                    view: owner.to_string(),
                }
            })?;
            let value = value.coerce(field.dtype).map_err(|e| {
                Error::invalid_input(format!("feature '{}' of '{}': {}", name, owner, e))
            })?;
            Ok((name, value))
        })
        .collect()
}
