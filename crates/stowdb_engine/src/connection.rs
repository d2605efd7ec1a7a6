//! Open database connections.

use crate::engine::Shared;
use crate::error::{EngineError, EngineResult};
use crate::schema::StoreSchema;
use crate::transaction::{Transaction, TransactionMode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use stowdb_events::{Emitter, Event};
use tracing::debug;

/// Events delivered to a connection's listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Another caller wants to change the version (or delete the database).
    ///
    /// Listeners should close the connection; otherwise the other caller
    /// is blocked.
    VersionChange {
        /// Version of this connection's database.
        old: u64,
        /// Requested version, or `None` when the database is being deleted.
        new: Option<u64>,
    },
    /// The connection was closed.
    Close,
}

/// Kinds of [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    /// [`ConnectionEvent::VersionChange`].
    VersionChange,
    /// [`ConnectionEvent::Close`].
    Close,
}

impl Event for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            Self::VersionChange { .. } => ConnectionEventKind::VersionChange,
            Self::Close => ConnectionEventKind::Close,
        }
    }
}

/// The engine's record of an open connection.
pub(crate) struct LiveConnection {
    pub(crate) id: u64,
    pub(crate) events: Arc<Emitter<ConnectionEvent>>,
}

pub(crate) struct ConnectionInner {
    id: u64,
    name: String,
    version: u64,
    shared: Arc<Shared>,
    closed: AtomicBool,
    events: Arc<Emitter<ConnectionEvent>>,
}

impl ConnectionInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(entry) = self.shared.databases.lock().get_mut(&self.name) {
            entry.connections.retain(|c| c.id != self.id);
        }
        debug!(db = %self.name, connection = self.id, "connection closed");
        self.events.emit(&ConnectionEvent::Close);
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open connection to one database at one version.
///
/// Clones refer to the same connection. The connection closes when
/// [`close`](Self::close) is called or when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn register(shared: &Arc<Shared>, name: &str, version: u64) -> EngineResult<Self> {
        let id = shared.next_id();
        let events = Arc::new(Emitter::new());
        {
            let mut databases = shared.databases.lock();
            shared.entry(&mut databases, name)?.connections.push(LiveConnection {
                id,
                events: Arc::clone(&events),
            });
        }
        debug!(db = name, version, connection = id, "connection opened");

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                name: name.to_string(),
                version,
                shared: Arc::clone(shared),
                closed: AtomicBool::new(false),
                events,
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Returns the engine-wide connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the version this connection was opened at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    /// Returns whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the connection's event emitter.
    #[must_use]
    pub fn events(&self) -> &Emitter<ConnectionEvent> {
        &self.inner.events
    }

    /// Returns the committed object store names.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.shared()
            .databases
            .lock()
            .get(self.name())
            .map(|entry| entry.state.store_names())
            .unwrap_or_default()
    }

    /// Returns the committed schema of an object store.
    #[must_use]
    pub fn store_schema(&self, store: &str) -> Option<StoreSchema> {
        self.shared()
            .databases
            .lock()
            .get(self.name())
            .and_then(|entry| entry.state.stores.get(store))
            .map(|data| data.schema.clone())
    }

    /// Starts a transaction over `stores`.
    ///
    /// Fails immediately if the connection is closed, the scope is empty or
    /// a store does not exist.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> EngineResult<Transaction> {
        if self.is_closed() {
            return Err(EngineError::invalid_state("connection is closed"));
        }
        if stores.is_empty() {
            return Err(EngineError::invalid_state("transaction scope is empty"));
        }
        {
            let databases = self.shared().databases.lock();
            let entry = databases
                .get(self.name())
                .ok_or_else(|| EngineError::not_found(format!("database {:?}", self.name())))?;
            for store in stores {
                entry.state.store(store)?;
            }
        }

        let mut scope: Vec<String> = stores.iter().map(ToString::to_string).collect();
        scope.sort();
        scope.dedup();
        Ok(Transaction::new(self.clone(), scope, mode))
    }

    /// Closes the connection. Closing twice is a no-op.
    ///
    /// Requests and commits still queued for this connection fail with
    /// [`EngineError::ConnectionClosing`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns a handle that does not keep the connection open.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A non-owning connection handle, for use inside event listeners.
///
/// A listener that captured a full [`Connection`] would keep it open for
/// as long as the listener is registered.
#[derive(Clone, Debug)]
pub struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    /// Returns the connection if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::request::Completion;
    use crate::schema::StoreOptions;
    use std::sync::mpsc;
    use std::time::Duration;

    fn open(engine: &Engine, name: &str, version: u64) -> Result<Connection, EngineError> {
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        let request = engine.open(
            name,
            version,
            Box::new(|upgrade| {
                if !upgrade.has_store("items") {
                    upgrade.create_object_store("items", StoreOptions::new())?;
                }
                Ok(())
            }),
        );
        request.on_success(Box::new(move |c| {
            tx.send(Ok(c)).ok();
        }));
        request.on_error(Box::new(move |e| {
            err_tx.send(Err(e)).ok();
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn event_kinds() {
        assert_eq!(
            ConnectionEvent::VersionChange { old: 1, new: None }.kind(),
            ConnectionEventKind::VersionChange
        );
        assert_eq!(ConnectionEvent::Close.kind(), ConnectionEventKind::Close);
    }

    #[test]
    fn close_is_idempotent_and_emits_once() {
        let engine = Engine::in_memory().unwrap();
        let connection = open(&engine, "db", 1).unwrap();
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        connection.events().on(ConnectionEventKind::Close, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        connection.close();
        connection.close();
        assert!(connection.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transaction_scope_is_checked() {
        let engine = Engine::in_memory().unwrap();
        let connection = open(&engine, "db", 1).unwrap();

        assert!(matches!(
            connection.transaction(&[], TransactionMode::ReadOnly),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            connection.transaction(&["missing"], TransactionMode::ReadOnly),
            Err(EngineError::NotFound(_))
        ));
        let tx = connection
            .transaction(&["items", "items"], TransactionMode::ReadOnly)
            .unwrap();
        assert_eq!(tx.scope(), ["items".to_string()]);

        connection.close();
        assert!(matches!(
            connection.transaction(&["items"], TransactionMode::ReadOnly),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn weak_handle_does_not_keep_connection_open() {
        let engine = Engine::in_memory().unwrap();
        let connection = open(&engine, "db", 1).unwrap();
        let weak = connection.downgrade();
        assert!(weak.upgrade().is_some());

        drop(connection);
        assert!(weak.upgrade().is_none());
        // The dropped connection no longer blocks an upgrade.
        assert_eq!(open(&engine, "db", 2).unwrap().version(), 2);
    }
}
