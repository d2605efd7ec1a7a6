//! Committed database state and transaction overlays.

use crate::error::{EngineError, EngineResult};
use crate::key::{extract_key, inject_key, Key};
use crate::schema::{IndexSchema, StoreSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// The committed state of one database: its version, schema and records.
///
/// This is also the unit persisted by a [`crate::SnapshotBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseState {
    pub(crate) name: String,
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

impl DatabaseState {
    /// Creates the state of a database that has never been upgraded.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            stores: BTreeMap::new(),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the schema version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the object store names in order.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Returns the number of records in a store.
    #[must_use]
    pub fn record_count(&self, store: &str) -> Option<usize> {
        self.stores.get(store).map(|s| s.records.len())
    }

    pub(crate) fn store(&self, name: &str) -> EngineResult<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("object store {name:?}")))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> EngineResult<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| EngineError::not_found(format!("object store {name:?}")))
    }
}

/// Records and schema of one object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreData {
    pub(crate) schema: StoreSchema,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) next_key: i64,
}

impl StoreData {
    pub(crate) fn new(schema: StoreSchema) -> Self {
        Self {
            schema,
            records: BTreeMap::new(),
            next_key: 1,
        }
    }

    /// Folds a finished overlay into the committed records.
    ///
    /// The overlay was staged against an older snapshot, so inserts and
    /// unique indexes are checked again against the records as they are
    /// now. On error `self` may be partly updated and must be discarded.
    pub(crate) fn apply(&mut self, overlay: StoreOverlay) -> EngineResult<()> {
        if !overlay.cleared {
            if let Some(key) = overlay
                .inserted
                .iter()
                .find(|key| self.records.contains_key(*key))
            {
                return Err(EngineError::constraint(format!(
                    "key {key} was added to {:?} by another transaction",
                    self.schema.name
                )));
            }
        }

        let wrote = !overlay.writes.is_empty();
        if overlay.cleared {
            self.records.clear();
        }
        for (key, write) in overlay.writes {
            match write {
                Some(value) => {
                    self.records.insert(key, value);
                }
                None => {
                    self.records.remove(&key);
                }
            }
        }
        if wrote {
            self.verify_unique_indexes()?;
        }
        Ok(())
    }

    fn verify_unique_indexes(&self) -> EngineResult<()> {
        for index in self.schema.indexes.values().filter(|index| index.unique) {
            let mut seen = BTreeMap::new();
            for (key, value) in &self.records {
                if let Some(index_key) = extract_key(value, &index.key_path) {
                    if let Some(other) = seen.insert(index_key.clone(), key) {
                        return Err(EngineError::constraint(format!(
                            "unique index {:?}: records {other} and {key} share {index_key}",
                            index.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Hands out the next generated key. Overlapping transactions draw from
    /// this one generator; keys drawn by an aborted transaction are skipped.
    fn generate_key(&mut self) -> EngineResult<Key> {
        if self.next_key == i64::MAX {
            return Err(EngineError::constraint("key generator exhausted"));
        }
        let key = Key::Int(self.next_key);
        self.next_key += 1;
        Ok(key)
    }

    /// Adds an index after checking existing records against it.
    pub(crate) fn add_index(&mut self, index: IndexSchema) -> EngineResult<()> {
        index.validate()?;
        if self.schema.indexes.contains_key(&index.name) {
            return Err(EngineError::constraint(format!(
                "index {:?} already exists on {:?}",
                index.name, self.schema.name
            )));
        }
        let name = index.name.clone();
        self.schema.indexes.insert(name.clone(), index);
        if let Err(err) = self.verify_unique_indexes() {
            self.schema.indexes.remove(&name);
            return Err(err);
        }
        Ok(())
    }
}

/// Writes staged by a transaction that has not committed yet.
#[derive(Debug, Default)]
pub(crate) struct StoreOverlay {
    cleared: bool,
    writes: BTreeMap<Key, Option<Value>>,
    /// Keys `add`ed while absent from the committed records.
    inserted: BTreeSet<Key>,
}

impl StoreOverlay {
    pub(crate) fn is_empty(&self) -> bool {
        !self.cleared && self.writes.is_empty()
    }
}

/// A store as seen from inside a transaction: committed records with the
/// transaction's staged writes on top.
///
/// Only the key generator of the committed store is touched; records change
/// when the overlay is applied.
pub(crate) struct StoreView<'a> {
    data: &'a mut StoreData,
    overlay: &'a mut StoreOverlay,
}

impl<'a> StoreView<'a> {
    pub(crate) fn new(data: &'a mut StoreData, overlay: &'a mut StoreOverlay) -> Self {
        Self { data, overlay }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        if let Some(write) = self.overlay.writes.get(key) {
            return write.clone();
        }
        if self.overlay.cleared {
            return None;
        }
        self.data.records.get(key).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<(Key, Value)> {
        let mut merged: BTreeMap<&Key, &Value> = BTreeMap::new();
        if !self.overlay.cleared {
            merged.extend(self.data.records.iter());
        }
        for (key, write) in &self.overlay.writes {
            match write {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
            .into_iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn keys(&self) -> Vec<Key> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    pub(crate) fn count(&self) -> u64 {
        self.entries().len() as u64
    }

    /// Stores `value`, returning its effective key.
    ///
    /// With `overwrite == false` an existing record under the same key is a
    /// constraint violation.
    pub(crate) fn put(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> EngineResult<Key> {
        let name = self.data.schema.name.clone();
        let key_path = self.data.schema.key_path.clone();
        let auto_increment = self.data.schema.auto_increment;
        let key = match (key, &key_path) {
            (Some(_), Some(path)) => {
                return Err(EngineError::data(format!(
                    "store {name:?} uses in-line keys at {path:?}; an explicit key is not allowed"
                )));
            }
            (Some(key), None) => key,
            (None, Some(path)) => match extract_key(&value, path) {
                Some(key) => key,
                None if auto_increment => {
                    let key = self.data.generate_key()?;
                    inject_key(&mut value, path, &key)?;
                    key
                }
                None => {
                    return Err(EngineError::data(format!(
                        "record has no valid key at {path:?}"
                    )));
                }
            },
            (None, None) if auto_increment => self.data.generate_key()?,
            (None, None) => {
                return Err(EngineError::data(format!(
                    "store {name:?} requires an explicit key"
                )));
            }
        };

        if !overwrite && self.get(&key).is_some() {
            return Err(EngineError::constraint(format!(
                "key {key} already exists in {name:?}"
            )));
        }

        self.check_unique_indexes(&key, &value)?;

        if auto_increment {
            if let Key::Int(n) = key {
                if n >= self.data.next_key {
                    self.data.next_key = n.saturating_add(1);
                }
            }
        }
        if !overwrite && !self.overlay.cleared && !self.overlay.writes.contains_key(&key) {
            self.overlay.inserted.insert(key.clone());
        }
        self.overlay.writes.insert(key.clone(), Some(value));
        Ok(key)
    }

    pub(crate) fn delete(&mut self, key: &Key) {
        self.overlay.writes.insert(key.clone(), None);
    }

    pub(crate) fn clear(&mut self) {
        self.overlay.cleared = true;
        self.overlay.writes.clear();
        self.overlay.inserted.clear();
    }

    fn check_unique_indexes(&self, key: &Key, value: &Value) -> EngineResult<()> {
        let unique: Vec<&IndexSchema> = self
            .data
            .schema
            .indexes
            .values()
            .filter(|index| index.unique)
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        let entries = self.entries();
        for index in unique {
            let Some(index_key) = extract_key(value, &index.key_path) else {
                continue;
            };
            let clash = entries.iter().any(|(other_key, other)| {
                other_key != key && extract_key(other, &index.key_path).as_ref() == Some(&index_key)
            });
            if clash {
                return Err(EngineError::constraint(format!(
                    "unique index {:?} already contains {index_key}",
                    index.name
                )));
            }
        }
        Ok(())
    }
}
