//! Entity keys
//!
//! An entity key is the tuple of `(join_key, value)` pairs identifying one row
//! of a feature view. Pairs are kept sorted by join key so two tuples that
//! differ only in order address the same entity, and so the canonical
//! [`EntityKey::storage_key`] rendering is stable across processes.

use crate::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityKey {
    pairs: Vec<(String, Value)>,
}

impl EntityKey {
    /// Build a key from `(join_key, value)` pairs in any order
    ///
    /// Fails if the tuple is empty or names a join key twice.
    pub fn new<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if pairs.is_empty() {
            return Err(Error::invalid_input("entity key must have at least one join key"));
        }
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(dup) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::invalid_input(format!(
                "join key '{}' appears twice in entity key",
                dup[0].0
            )));
        }
        Ok(Self { pairs })
    }

    /// Single join key shorthand
    pub fn single(join_key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            pairs: vec![(join_key.into(), value.into())],
        }
    }

    pub fn join_keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn pairs(&self) -> &[(String, Value)] {
        &self.pairs
    }

    pub fn get(&self, join_key: &str) -> Option<&Value> {
        self.pairs
            .binary_search_by(|(k, _)| k.as_str().cmp(join_key))
            .ok()
            .map(|i| &self.pairs[i].1)
    }

    /// Canonical text form used as the physical key in online backends
    ///
    /// `key=value` pairs joined by `&`; `%`, `=` and `&` inside names or values
    /// are percent-escaped so the rendering is injective.
    pub fn storage_key(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(&v.key_repr())))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '=' => out.push_str("%3D"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    out
}
