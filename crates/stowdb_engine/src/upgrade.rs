//! The version-change transaction handed to upgrade hooks.

use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use crate::schema::{IndexSchema, StoreOptions, StoreSchema};
use crate::state::{DatabaseState, StoreData, StoreOverlay, StoreView};
use serde_json::Value;
use tracing::debug;

/// Schema and data access while a database moves between versions.
///
/// Everything done through an upgrade transaction happens on a working copy
/// of the database. The copy replaces the committed state only when the
/// hook returns `Ok`; any error discards it.
pub struct UpgradeTransaction<'a> {
    state: &'a mut DatabaseState,
    old_version: u64,
    new_version: u64,
}

impl<'a> UpgradeTransaction<'a> {
    pub(crate) fn new(state: &'a mut DatabaseState, old_version: u64, new_version: u64) -> Self {
        Self {
            state,
            old_version,
            new_version,
        }
    }

    /// Returns the name of the database being upgraded.
    #[must_use]
    pub fn database_name(&self) -> &str {
        self.state.name()
    }

    /// Returns the stored version before this upgrade; 0 for a new database.
    #[must_use]
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// Returns the version being upgraded to.
    #[must_use]
    pub fn new_version(&self) -> u64 {
        self.new_version
    }

    /// Returns the current object store names.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.state.store_names()
    }

    /// Returns whether an object store exists.
    #[must_use]
    pub fn has_store(&self, name: &str) -> bool {
        self.state.stores.contains_key(name)
    }

    /// Returns the schema of an object store.
    #[must_use]
    pub fn store_schema(&self, name: &str) -> Option<&StoreSchema> {
        self.state.stores.get(name).map(|s| &s.schema)
    }

    /// Creates an object store.
    ///
    /// Fails with a constraint error if the store already exists.
    pub fn create_object_store(&mut self, name: &str, options: StoreOptions) -> EngineResult<()> {
        if self.has_store(name) {
            return Err(EngineError::constraint(format!(
                "object store {name:?} already exists"
            )));
        }
        let schema = StoreSchema::from_options(name, options)?;
        debug!(db = self.state.name(), store = name, "created object store");
        self.state
            .stores
            .insert(name.to_string(), StoreData::new(schema));
        Ok(())
    }

    /// Deletes an object store and all of its records.
    pub fn delete_object_store(&mut self, name: &str) -> EngineResult<()> {
        if self.state.stores.remove(name).is_none() {
            return Err(EngineError::not_found(format!("object store {name:?}")));
        }
        debug!(db = self.state.name(), store = name, "deleted object store");
        Ok(())
    }

    /// Creates an index on an existing store.
    ///
    /// A unique index fails if existing records already collide.
    pub fn create_index(&mut self, store: &str, index: IndexSchema) -> EngineResult<()> {
        let name = index.name.clone();
        self.state.store_mut(store)?.add_index(index)?;
        debug!(db = self.state.name(), store, index = %name, "created index");
        Ok(())
    }

    /// Deletes an index.
    pub fn delete_index(&mut self, store: &str, index: &str) -> EngineResult<()> {
        let data = self.state.store_mut(store)?;
        if data.schema.indexes.remove(index).is_none() {
            return Err(EngineError::not_found(format!(
                "index {index:?} on {store:?}"
            )));
        }
        Ok(())
    }

    /// Reads a record.
    pub fn get(&self, store: &str, key: &Key) -> EngineResult<Option<Value>> {
        Ok(self.state.store(store)?.records.get(key).cloned())
    }

    /// Returns all records of a store in key order.
    pub fn entries(&self, store: &str) -> EngineResult<Vec<(Key, Value)>> {
        Ok(self
            .state
            .store(store)?
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Writes a record, following the same key rules as a transaction `put`.
    pub fn put(&mut self, store: &str, value: Value, key: Option<Key>) -> EngineResult<Key> {
        let data = self.state.store_mut(store)?;
        let mut overlay = StoreOverlay::default();
        let key = StoreView::new(data, &mut overlay).put(value, key, true)?;
        data.apply(overlay)?;
        Ok(key)
    }

    /// Removes a record. Removing a missing key succeeds.
    pub fn delete(&mut self, store: &str, key: &Key) -> EngineResult<()> {
        self.state.store_mut(store)?.records.remove(key);
        Ok(())
    }
}
