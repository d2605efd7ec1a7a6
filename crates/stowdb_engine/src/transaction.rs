//! Transactions and per-store requests.
//!
//! A transaction stages writes in per-store overlays on top of the committed
//! state. Requests run on the engine worker in the order they were issued.
//! The first failing request aborts the whole transaction: its overlays are
//! discarded and the transaction's error channel fires with the same cause.
//! `commit` queues behind every request issued before it; when it runs the
//! overlays are folded into a copy of the committed state, a snapshot is
//! written, and the copy becomes the committed state.
//!
//! A transaction that is dropped while still active commits.

use crate::connection::Connection;
use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use crate::request::{Completion, ErrorHandler, Request, SuccessHandler};
use crate::state::{StoreOverlay, StoreView};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; writes fail with [`EngineError::ReadOnly`].
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting requests.
    Active,
    /// `commit` was called; the commit is queued.
    Committing,
    /// Changes are committed.
    Committed,
    /// Changes were discarded.
    Aborted,
}

struct TxState {
    status: TransactionStatus,
    overlays: BTreeMap<String, StoreOverlay>,
}

pub(crate) struct TxInner {
    id: u64,
    connection: Connection,
    mode: TransactionMode,
    scope: Vec<String>,
    state: Mutex<TxState>,
    signals: Request<()>,
}

impl TxInner {
    fn is_active(&self) -> bool {
        self.state.lock().status == TransactionStatus::Active
    }

    fn issue<T, F>(self: &Arc<Self>, store: &str, write: bool, op: F) -> Request<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreView<'_>) -> EngineResult<T> + Send + 'static,
    {
        let request = Request::new();
        let accepted = self.is_active();
        let signal = request.clone();
        let tx = Arc::clone(self);
        let store = store.to_string();

        self.connection.shared().submit(Box::new(move || {
            match tx.execute(accepted, &store, write, op) {
                Ok(value) => signal.resolve(value),
                Err(EngineError::TransactionInactive) => {
                    signal.reject(EngineError::TransactionInactive);
                }
                Err(err) => {
                    debug!(txn = tx.id, store = %store, error = %err, "request failed");
                    signal.reject(err.clone());
                    tx.abort_with(err);
                }
            }
        }));
        request
    }

    fn execute<T, F>(&self, accepted: bool, store: &str, write: bool, op: F) -> EngineResult<T>
    where
        F: FnOnce(&mut StoreView<'_>) -> EngineResult<T>,
    {
        if !accepted {
            return Err(EngineError::TransactionInactive);
        }
        if self.connection.is_closed() {
            return Err(EngineError::ConnectionClosing);
        }
        if write && self.mode == TransactionMode::ReadOnly {
            return Err(EngineError::ReadOnly);
        }

        let mut state = self.state.lock();
        if matches!(
            state.status,
            TransactionStatus::Aborted | TransactionStatus::Committed
        ) {
            return Err(EngineError::TransactionInactive);
        }

        let shared = self.connection.shared();
        let mut databases = shared.databases.lock();
        let data = databases
            .get_mut(self.connection.name())
            .ok_or_else(|| EngineError::not_found(format!("database {:?}", self.connection.name())))?
            .state
            .store_mut(store)?;
        let overlay = state.overlays.entry(store.to_string()).or_default();
        op(&mut StoreView::new(data, overlay))
    }

    /// Aborts because of `err`, unless the transaction already finished.
    fn abort_with(&self, err: EngineError) {
        {
            let mut state = self.state.lock();
            if matches!(
                state.status,
                TransactionStatus::Aborted | TransactionStatus::Committed
            ) {
                return;
            }
            state.status = TransactionStatus::Aborted;
            state.overlays.clear();
        }
        debug!(txn = self.id, db = %self.connection.name(), error = %err, "transaction aborted");
        self.signals.reject(err);
    }

    fn run_commit(&self) {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Committing {
            return;
        }
        if self.connection.is_closed() {
            drop(state);
            self.abort_with(EngineError::ConnectionClosing);
            return;
        }

        let dirty = self.mode == TransactionMode::ReadWrite
            && state.overlays.values().any(|overlay| !overlay.is_empty());
        let overlays = std::mem::take(&mut state.overlays);
        if dirty {
            if let Err(err) = self.apply(overlays) {
                drop(state);
                self.abort_with(err);
                return;
            }
        }

        state.status = TransactionStatus::Committed;
        drop(state);
        debug!(txn = self.id, db = %self.connection.name(), dirty, "transaction committed");
        self.signals.resolve(());
    }

    fn apply(&self, overlays: BTreeMap<String, StoreOverlay>) -> EngineResult<()> {
        let shared = self.connection.shared();
        let mut databases = shared.databases.lock();
        let entry = databases
            .get_mut(self.connection.name())
            .ok_or_else(|| EngineError::not_found(format!("database {:?}", self.connection.name())))?;

        let mut next = entry.state.clone();
        for (store, overlay) in overlays {
            next.store_mut(&store)?.apply(overlay)?;
        }
        shared.snapshots.save(&next)?;
        entry.state = next;
        Ok(())
    }
}

/// A unit of work over one or more object stores.
///
/// The transaction is itself a [`Completion`]: its success channel fires
/// once after commit, its error channel once on abort.
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    pub(crate) fn new(connection: Connection, scope: Vec<String>, mode: TransactionMode) -> Self {
        let id = connection.shared().next_id();
        debug!(txn = id, db = %connection.name(), ?mode, ?scope, "transaction started");
        Self {
            inner: Arc::new(TxInner {
                id,
                connection,
                mode,
                scope,
                state: Mutex::new(TxState {
                    status: TransactionStatus::Active,
                    overlays: BTreeMap::new(),
                }),
                signals: Request::new(),
            }),
        }
    }

    /// Returns the engine-wide transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Returns the store names in scope, sorted.
    #[must_use]
    pub fn scope(&self) -> &[String] {
        &self.inner.scope
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    /// Returns the connection the transaction runs on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns a request issuer for a store in scope.
    pub fn object_store(&self, name: &str) -> EngineResult<StoreRequests> {
        if !self.inner.scope.iter().any(|s| s == name) {
            return Err(EngineError::not_found(format!(
                "object store {name:?} is not in the transaction scope"
            )));
        }
        Ok(StoreRequests {
            tx: Arc::clone(&self.inner),
            store: name.to_string(),
        })
    }

    /// Queues the commit behind every request issued so far.
    ///
    /// Fails if the transaction is no longer active.
    pub fn commit(&self) -> EngineResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(EngineError::invalid_state(format!(
                    "cannot commit a transaction that is {:?}",
                    state.status
                )));
            }
            state.status = TransactionStatus::Committing;
        }
        let tx = Arc::clone(&self.inner);
        self.inner
            .connection
            .shared()
            .submit(Box::new(move || tx.run_commit()));
        Ok(())
    }

    /// Discards every staged write.
    ///
    /// The error channel fires with [`EngineError::Aborted`]. Requests still
    /// queued fail with [`EngineError::TransactionInactive`].
    pub fn abort(&self) -> EngineResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(EngineError::invalid_state(format!(
                    "cannot abort a transaction that is {:?}",
                    state.status
                )));
            }
            state.status = TransactionStatus::Aborted;
            state.overlays.clear();
        }
        debug!(txn = self.inner.id, "transaction aborted by caller");
        let signals = self.inner.signals.clone();
        self.inner
            .connection
            .shared()
            .submit(Box::new(move || signals.reject(EngineError::Aborted)));
        Ok(())
    }
}

impl Completion<()> for Transaction {
    fn on_success(&self, handler: SuccessHandler<()>) {
        self.inner.signals.on_success(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.inner.signals.on_error(handler);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_active() {
            if let Err(err) = self.commit() {
                debug!(txn = self.inner.id, error = %err, "auto-commit on drop skipped");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("scope", &self.inner.scope)
            .field("status", &self.status())
            .finish()
    }
}

/// Issues requests against one object store of a transaction.
///
/// Each method returns immediately with a [`Request`]; the work runs on the
/// engine worker after everything issued before it.
#[derive(Clone)]
pub struct StoreRequests {
    tx: Arc<TxInner>,
    store: String,
}

impl StoreRequests {
    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.store
    }

    /// Reads the record under `key`.
    pub fn get(&self, key: Key) -> Request<Option<Value>> {
        self.tx.issue(&self.store, false, move |view| Ok(view.get(&key)))
    }

    /// Reads all records in key order.
    pub fn get_all(&self) -> Request<Vec<Value>> {
        self.tx.issue(&self.store, false, |view| {
            Ok(view.entries().into_iter().map(|(_, v)| v).collect())
        })
    }

    /// Reads all keys in order.
    pub fn keys(&self) -> Request<Vec<Key>> {
        self.tx.issue(&self.store, false, |view| Ok(view.keys()))
    }

    /// Counts the records.
    pub fn count(&self) -> Request<u64> {
        self.tx.issue(&self.store, false, |view| Ok(view.count()))
    }

    /// Inserts or replaces a record, resolving to its effective key.
    pub fn put(&self, value: Value, key: Option<Key>) -> Request<Key> {
        self.tx
            .issue(&self.store, true, move |view| view.put(value, key, true))
    }

    /// Inserts a record; fails with a constraint error if the key exists.
    pub fn add(&self, value: Value, key: Option<Key>) -> Request<Key> {
        self.tx
            .issue(&self.store, true, move |view| view.put(value, key, false))
    }

    /// Removes the record under `key`. Removing a missing key succeeds.
    pub fn delete(&self, key: Key) -> Request<()> {
        self.tx.issue(&self.store, true, move |view| {
            view.delete(&key);
            Ok(())
        })
    }

    /// Removes every record.
    pub fn clear(&self) -> Request<()> {
        self.tx.issue(&self.store, true, |view| {
            view.clear();
            Ok(())
        })
    }
}

impl fmt::Debug for StoreRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRequests")
            .field("txn", &self.tx.id)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::schema::StoreOptions;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait<T: Send + 'static>(request: &impl Completion<T>) -> EngineResult<T> {
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        request.on_success(Box::new(move |v| {
            tx.send(Ok(v)).ok();
        }));
        request.on_error(Box::new(move |e| {
            err_tx.send(Err(e)).ok();
        }));
        rx.recv_timeout(WAIT).unwrap()
    }

    fn connect(engine: &Engine) -> Connection {
        let request = engine.open(
            "db",
            1,
            Box::new(|upgrade| {
                upgrade.create_object_store("kv", StoreOptions::new())?;
                upgrade.create_object_store("people", StoreOptions::new().key_path("id"))?;
                Ok(())
            }),
        );
        wait(&request).unwrap()
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let tx = connection
            .transaction(&["kv"], TransactionMode::ReadWrite)
            .unwrap();
        let kv = tx.object_store("kv").unwrap();
        let key = wait(&kv.put(json!("one"), Some(Key::Int(1)))).unwrap();
        assert_eq!(key, Key::Int(1));
        // Reads see the transaction's own writes.
        assert_eq!(wait(&kv.get(Key::Int(1))).unwrap(), Some(json!("one")));
        tx.commit().unwrap();
        wait(&tx).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);

        let read = connection
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap();
        let kv = read.object_store("kv").unwrap();
        assert_eq!(wait(&kv.get_all()).unwrap(), vec![json!("one")]);
        assert_eq!(wait(&kv.count()).unwrap(), 1);
    }

    #[test]
    fn failing_request_aborts_transaction() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let tx = connection
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        let people = tx.object_store("people").unwrap();
        let first = people.put(json!({"id": "ada"}), None);
        let bad = people.add(json!({"id": "ada"}), None);
        let after = people.put(json!({"id": "bob"}), None);

        assert!(wait(&first).is_ok());
        assert!(matches!(wait(&bad), Err(EngineError::Constraint(_))));
        assert!(matches!(wait(&after), Err(EngineError::TransactionInactive)));
        assert!(matches!(wait(&tx), Err(EngineError::Constraint(_))));
        assert_eq!(tx.status(), TransactionStatus::Aborted);

        let read = connection
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap();
        let people = read.object_store("people").unwrap();
        assert_eq!(wait(&people.count()).unwrap(), 0);
    }

    #[test]
    fn explicit_abort_discards_writes() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let tx = connection
            .transaction(&["kv"], TransactionMode::ReadWrite)
            .unwrap();
        let kv = tx.object_store("kv").unwrap();
        wait(&kv.put(json!(1), Some(Key::from("a")))).unwrap();
        tx.abort().unwrap();
        assert!(matches!(wait(&tx), Err(EngineError::Aborted)));
        assert!(tx.commit().is_err());
        assert!(matches!(
            wait(&kv.get(Key::from("a"))),
            Err(EngineError::TransactionInactive)
        ));

        let read = connection
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap();
        let kv = read.object_store("kv").unwrap();
        assert_eq!(wait(&kv.keys()).unwrap(), Vec::<Key>::new());
    }

    #[test]
    fn read_only_rejects_writes() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let tx = connection
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap();
        let kv = tx.object_store("kv").unwrap();
        assert!(matches!(
            wait(&kv.put(json!(1), Some(Key::Int(1)))),
            Err(EngineError::ReadOnly)
        ));
        assert!(matches!(wait(&tx), Err(EngineError::ReadOnly)));
    }

    #[test]
    fn store_outside_scope_is_rejected() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);
        let tx = connection
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap();
        assert!(matches!(
            tx.object_store("people"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn dropped_transaction_commits() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let put = {
            let tx = connection
                .transaction(&["kv"], TransactionMode::ReadWrite)
                .unwrap();
            tx.object_store("kv")
                .unwrap()
                .put(json!("kept"), Some(Key::Int(7)))
        };
        wait(&put).unwrap();

        let read = connection
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap();
        let kv = read.object_store("kv").unwrap();
        assert_eq!(wait(&kv.get(Key::Int(7))).unwrap(), Some(json!("kept")));
    }

    #[test]
    fn closing_connection_fails_outstanding_work() {
        let engine = Engine::in_memory().unwrap();
        let connection = connect(&engine);

        let tx = connection
            .transaction(&["kv"], TransactionMode::ReadWrite)
            .unwrap();
        let kv = tx.object_store("kv").unwrap();
        connection.close();
        let put = kv.put(json!(1), Some(Key::Int(1)));

        assert!(matches!(wait(&put), Err(EngineError::ConnectionClosing)));
        assert!(matches!(wait(&tx), Err(EngineError::ConnectionClosing)));
    }
}
