//! On-demand transformations
//!
//! A transformation is an opaque pure function from an input [`RowBatch`]
//! (stored features plus request data) to an output batch holding the
//! on-demand view's features. Transformations are registered by name at
//! startup; on-demand views refer to them by that name.
//!
//! ```rust,ignore
//! let transformations = TransformationRegistry::default();
//! transformations.register("conv_rate_plus", |input: &RowBatch| {
//!     let conv = input.require("conv_rate")?;
//!     let add = input.require("val_to_add")?;
//!     let out = conv.iter().zip(add).map(|(c, a)| match (c.as_f64(), a.as_f64()) {
//!         (Some(c), Some(a)) => Value::Float64(c + a),
//!         _ => Value::Null,
//!     });
//!     Ok(RowBatch::new(input.num_rows()).with_column("conv_rate_plus_val1", out.collect())?)
//! })?;
//! ```

use crate::{Error, Result, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Columnar batch of rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    num_rows: usize,
    columns: BTreeMap<String, Vec<Value>>,
}

impl RowBatch {
    pub fn new(num_rows: usize) -> Self {
        Self {
            num_rows,
            columns: BTreeMap::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Add or replace a column; its length must match the batch
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        if values.len() != self.num_rows {
            return Err(Error::invalid_input(format!(
                "column '{}' has {} values, batch has {} rows",
                name,
                values.len(),
                self.num_rows
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column lookup that fails with a descriptive error
    pub fn require(&self, name: &str) -> Result<&[Value]> {
        self.column(name)
            .ok_or_else(|| Error::invalid_input(format!("input column '{}' is missing", name)))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn into_columns(self) -> BTreeMap<String, Vec<Value>> {
        self.columns
    }
}

/// A pure function over a row batch
pub trait OnDemandTransform: Send + Sync {
    fn transform(&self, input: &RowBatch) -> Result<RowBatch>;
}

impl<F> OnDemandTransform for F
where
    F: Fn(&RowBatch) -> Result<RowBatch> + Send + Sync,
{
    fn transform(&self, input: &RowBatch) -> Result<RowBatch> {
        self(input)
    }
}

/// Name -> transformation lookup shared by the retrieval path
#[derive(Default)]
pub struct TransformationRegistry {
    inner: RwLock<HashMap<String, Arc<dyn OnDemandTransform>>>,
}

impl fmt::Debug for TransformationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .inner
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("TransformationRegistry")
            .field("names", &names)
            .finish()
    }
}

impl TransformationRegistry {
    /// Register (or replace) a transformation
    pub fn register<T>(&self, name: impl Into<String>, transform: T) -> Result<()>
    where
        T: OnDemandTransform + 'static,
    {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::internal("transformation registry lock poisoned"))?;
        guard.insert(name.into(), Arc::new(transform));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OnDemandTransform>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::internal("transformation registry lock poisoned"))?;
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TransformationNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plus_one(input: &RowBatch) -> Result<RowBatch> {
        let values = input
            .require("x")?
            .iter()
            .map(|v| v.as_i64().map(|i| Value::Int64(i + 1)).unwrap_or(Value::Null))
            .collect();
        RowBatch::new(input.num_rows()).with_column("x_plus_one", values)
    }

    #[test]
    fn test_row_batch_length_checked() {
        let mut batch = RowBatch::new(2);
        assert!(batch.insert_column("x", vec![Value::Int64(1)]).is_err());
        assert!(batch
            .insert_column("x", vec![Value::Int64(1), Value::Null])
            .is_ok());
        assert_eq!(batch.column_names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_registry_runs_registered_function() {
        let registry = TransformationRegistry::default();
        registry.register("plus_one", plus_one).unwrap();

        let input = RowBatch::new(2)
            .with_column("x", vec![Value::Int64(1), Value::Null])
            .unwrap();
        let out = registry.get("plus_one").unwrap().transform(&input).unwrap();
        assert_eq!(
            out.column("x_plus_one").unwrap(),
            &[Value::Int64(2), Value::Null]
        );
        assert!(registry.contains("plus_one"));
    }

    #[test]
    fn test_unregistered_transformation() {
        let registry = TransformationRegistry::default();
        assert!(matches!(
            registry.get("missing"),
            Err(Error::TransformationNotRegistered(_))
        ));
    }
}
