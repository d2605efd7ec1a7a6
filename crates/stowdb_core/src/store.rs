//! The object store facade.

use crate::bridge;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use stowdb_engine::{Key, Request, StoreRequests, TransactionMode};
use tracing::{debug, trace};

/// Accessor for one object store of an open [`Database`].
///
/// Every call runs in its own short-lived transaction with the narrowest
/// mode it needs, and resolves only after that transaction has committed.
/// Use [`Database::transaction`] to group several operations atomically.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    db: Database,
    name: String,
}

impl ObjectStore {
    pub(crate) fn new(db: Database, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the database this store belongs to.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Reads a record. A missing key resolves to `None`, not an error.
    pub async fn get(&self, key: impl Into<Key>) -> CoreResult<Option<Value>> {
        let key = key.into();
        self.run(TransactionMode::ReadOnly, move |store| store.get(key))
            .await
    }

    /// Inserts or replaces a record and returns its effective key.
    ///
    /// The key is `key` if given; otherwise it is read from the store's key
    /// path or generated by the store.
    pub async fn put(&self, value: Value, key: Option<Key>) -> CoreResult<Key> {
        self.run(TransactionMode::ReadWrite, move |store| store.put(value, key))
            .await
    }

    /// Inserts a record, failing if its key already exists.
    pub async fn add(&self, value: Value, key: Option<Key>) -> CoreResult<Key> {
        self.run(TransactionMode::ReadWrite, move |store| store.add(value, key))
            .await
    }

    /// Removes a record. Removing a missing key succeeds.
    pub async fn delete(&self, key: impl Into<Key>) -> CoreResult<()> {
        let key = key.into();
        self.run(TransactionMode::ReadWrite, move |store| store.delete(key))
            .await
    }

    /// Removes every record.
    pub async fn clear(&self) -> CoreResult<()> {
        self.run(TransactionMode::ReadWrite, StoreRequests::clear)
            .await
    }

    /// Counts the records.
    pub async fn count(&self) -> CoreResult<u64> {
        self.run(TransactionMode::ReadOnly, StoreRequests::count)
            .await
    }

    /// Reads every record in key order.
    pub async fn get_all(&self) -> CoreResult<Vec<Value>> {
        self.run(TransactionMode::ReadOnly, StoreRequests::get_all)
            .await
    }

    /// Reads every key in order.
    pub async fn keys(&self) -> CoreResult<Vec<Key>> {
        self.run(TransactionMode::ReadOnly, StoreRequests::keys)
            .await
    }

    async fn run<T, F>(&self, mode: TransactionMode, issue: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreRequests) -> Request<T>,
    {
        let txn = self.db.begin(&[self.name.as_str()], mode)?;
        let requests = txn
            .object_store(&self.name)
            .map_err(|err| CoreError::from_request(&self.name, err))?;

        let store = self.name.clone();
        let value = bridge::request(&issue(&requests), move |err| {
            CoreError::from_request(&store, err)
        });
        let committed = bridge::transaction(&txn);
        if let Err(err) = txn.commit() {
            // A request already aborted it; both deferreds carry the cause.
            debug!(store = %self.name, error = %err, "commit after abort");
        }
        drop(txn);

        trace!(db = self.db.name(), store = %self.name, ?mode, "request issued");
        let value = value.await?;
        committed.await?;
        Ok(value)
    }
}
