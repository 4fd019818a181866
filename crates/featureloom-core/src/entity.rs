//! Entity definitions
//!
//! An entity is the grain a feature view is keyed by: drivers are keyed by
//! `driver_id`, customers by `customer_id`. Feature views reference entities by
//! name and the registry resolves the join keys at serving time.

use crate::object::ObjectMeta;
use crate::validation::validate_name;
use crate::{ObjectKind, Result, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique name within a project (e.g., "driver")
    pub name: String,

    /// Columns identifying an instance of this entity (e.g., ["driver_id"])
    pub join_keys: Vec<String>,

    /// Declared type of the join key values, used to coerce entity rows
    #[serde(default)]
    pub value_type: Option<ValueType>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub meta: ObjectMeta,
}

impl Entity {
    /// Creates an entity with a single join key
    pub fn new(name: impl Into<String>, join_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join_keys: vec![join_key.into()],
            value_type: None,
            description: String::new(),
            tags: BTreeMap::new(),
            owner: String::new(),
            meta: ObjectMeta::default(),
        }
    }

    pub fn with_join_keys(mut self, join_keys: Vec<String>) -> Self {
        self.join_keys = join_keys;
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
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

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(ObjectKind::Entity, &self.name)?;
        if self.join_keys.is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "Entity '{}' must declare at least one join key",
                self.name
            )));
        }
        for key in &self.join_keys {
            validate_name(ObjectKind::Entity, key)?;
        }
        if let Some(ty) = self.value_type {
            if !ty.is_valid_join_key() {
                return Err(crate::Error::invalid_input(format!(
                    "Entity '{}' join key type {} cannot identify an entity",
                    self.name, ty
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let driver = Entity::new("driver", "driver_id")
            .with_value_type(ValueType::Int64)
            .with_description("Driver of a ride")
            .with_tag("team", "ranking");

        assert_eq!(driver.join_keys, vec!["driver_id".to_string()]);
        assert_eq!(driver.tags.get("team").map(String::as_str), Some("ranking"));
        assert!(driver.validate().is_ok());
    }

    #[test]
    fn test_entity_validation() {
        assert!(Entity::new("", "id").validate().is_err());
        assert!(Entity::new("driver", "id")
            .with_join_keys(vec![])
            .validate()
            .is_err());
        assert!(Entity::new("driver", "id")
            .with_value_type(ValueType::Float64)
            .validate()
            .is_err());
    }
}
