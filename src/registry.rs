//! Column registry
//!
//! Maps channel names to row positions in a series' value matrix. The
//! registry is rebuilt from scratch every time the channel list changes, so
//! `index[names[i]] == i` always holds.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name ↔ row-index bijection for one series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ColumnRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnRegistry {
    /// Build a registry over `names`.
    ///
    /// Duplicate names are a caller bug and fail with `DuplicateName`.
    pub fn build<S: AsRef<str>>(names: &[S]) -> Result<Self, StreamError> {
        let mut index = HashMap::with_capacity(names.len());
        let mut owned = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if index.insert(name.to_string(), i).is_some() {
                return Err(StreamError::DuplicateName(name.to_string()));
            }
            owned.push(name.to_string());
        }
        Ok(Self { names: owned, index })
    }

    /// Resolve several channel names to their row indices, in request order.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, StreamError> {
        names.iter().map(|n| self.resolve_one(n.as_ref())).collect()
    }

    /// Resolve a single channel name.
    pub fn resolve_one(&self, name: &str) -> Result<usize, StreamError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StreamError::UnknownChannel {
                name: name.to_string(),
                known: self.names.clone(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl TryFrom<Vec<String>> for ColumnRegistry {
    type Error = StreamError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::build(&names)
    }
}

impl From<ColumnRegistry> for Vec<String> {
    fn from(registry: ColumnRegistry) -> Self {
        registry.names
    }
}
