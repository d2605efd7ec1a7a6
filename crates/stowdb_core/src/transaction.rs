//! Multi-operation transactions.

use crate::bridge;
use crate::deferred::Deferred;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use stowdb_engine::{Key, Request, StoreRequests, TransactionMode, TransactionStatus};
use tracing::debug;

/// A group of operations that commit or abort together.
///
/// Operations are issued immediately, in program order, and each returns a
/// [`Deferred`]. If any operation fails the whole transaction aborts, and
/// [`commit`](Self::commit) resolves to [`CoreError::TransactionFailure`]
/// carrying that operation's error. Dropping a transaction without calling
/// `commit` or `abort` commits it.
#[derive(Debug)]
pub struct Transaction {
    txn: stowdb_engine::Transaction,
}

impl Transaction {
    pub(crate) fn new(txn: stowdb_engine::Transaction) -> Self {
        Self { txn }
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.txn.mode()
    }

    /// Returns the stores in scope.
    #[must_use]
    pub fn scope(&self) -> &[String] {
        self.txn.scope()
    }

    /// Returns whether operations are still accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.txn.status() == TransactionStatus::Active
    }

    /// Returns an accessor for a store in scope.
    pub fn store(&self, name: &str) -> CoreResult<TransactionStore> {
        let requests = self
            .txn
            .object_store(name)
            .map_err(|err| CoreError::request_failure(name, err))?;
        Ok(TransactionStore { requests })
    }

    /// Commits once every operation issued so far has run.
    ///
    /// Resolves after the commit is durable, or fails with the cause of the
    /// abort.
    pub fn commit(self) -> Deferred<()> {
        let committed = bridge::transaction(&self.txn);
        if let Err(err) = self.txn.commit() {
            // Already aborted; `committed` carries the cause.
            debug!(error = %err, "commit after abort");
        }
        committed
    }

    /// Aborts the transaction, discarding every write.
    pub fn abort(self) -> CoreResult<()> {
        self.txn.abort().map_err(CoreError::from_transaction)
    }
}

/// Issues operations against one store inside a [`Transaction`].
#[derive(Debug, Clone)]
pub struct TransactionStore {
    requests: StoreRequests,
}

impl TransactionStore {
    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.requests.name()
    }

    /// Reads a record; a missing key resolves to `None`.
    pub fn get(&self, key: impl Into<Key>) -> Deferred<Option<Value>> {
        self.bridge(self.requests.get(key.into()))
    }

    /// Inserts or replaces a record and resolves to its effective key.
    pub fn put(&self, value: Value, key: Option<Key>) -> Deferred<Key> {
        self.bridge(self.requests.put(value, key))
    }

    /// Inserts a record, failing if its key already exists.
    pub fn add(&self, value: Value, key: Option<Key>) -> Deferred<Key> {
        self.bridge(self.requests.add(value, key))
    }

    /// Removes a record.
    pub fn delete(&self, key: impl Into<Key>) -> Deferred<()> {
        self.bridge(self.requests.delete(key.into()))
    }

    /// Removes every record.
    pub fn clear(&self) -> Deferred<()> {
        self.bridge(self.requests.clear())
    }

    /// Counts the records, including this transaction's pending writes.
    pub fn count(&self) -> Deferred<u64> {
        self.bridge(self.requests.count())
    }

    /// Reads every record in key order.
    pub fn get_all(&self) -> Deferred<Vec<Value>> {
        self.bridge(self.requests.get_all())
    }

    /// Reads every key in order.
    pub fn keys(&self) -> Deferred<Vec<Key>> {
        self.bridge(self.requests.keys())
    }

    fn bridge<T: Send + 'static>(&self, request: Request<T>) -> Deferred<T> {
        let store = self.requests.name().to_string();
        bridge::request(&request, move |err| CoreError::from_request(&store, err))
    }
}
