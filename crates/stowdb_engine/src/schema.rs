//! Object store and index descriptors.

use crate::error::EngineResult;
use crate::key::validate_key_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Field used as the in-line key. `None` means keys are out-of-line.
    pub key_path: Option<String>,
    /// Whether the store generates integer keys.
    pub auto_increment: bool,
}

impl StoreOptions {
    /// Creates options for an out-of-line store without a key generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-line key path.
    #[must_use]
    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Sets whether keys are generated.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// An index over a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name, unique within its store.
    pub name: String,
    /// Field indexed.
    pub key_path: String,
    /// Whether two records may share an index key.
    pub unique: bool,
}

impl IndexSchema {
    /// Creates a non-unique index description.
    #[must_use]
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Sets whether the index is unique.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub(crate) fn validate(&self) -> EngineResult<()> {
        validate_key_path(&self.key_path)
    }
}

/// The schema of one object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    /// Store name.
    pub name: String,
    /// In-line key path, if any.
    pub key_path: Option<String>,
    /// Whether keys are generated.
    pub auto_increment: bool,
    /// Indexes by name.
    pub indexes: BTreeMap<String, IndexSchema>,
}

impl StoreSchema {
    pub(crate) fn from_options(name: &str, options: StoreOptions) -> EngineResult<Self> {
        if let Some(path) = &options.key_path {
            validate_key_path(path)?;
        }
        Ok(Self {
            name: name.to_string(),
            key_path: options.key_path,
            auto_increment: options.auto_increment,
            indexes: BTreeMap::new(),
        })
    }

    /// Returns the names of this store's indexes.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }
}
