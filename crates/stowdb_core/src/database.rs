//! The open database handle.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::store::ObjectStore;
use crate::transaction::Transaction;
use crate::typed::TypedStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stowdb_engine::{
    Connection, ConnectionEvent, ConnectionEventKind, EngineError, TransactionMode,
};
use stowdb_events::SubscriptionId;
use tracing::info;

/// An open, versioned database.
///
/// The handle belongs to whoever opened it and must be closed by them.
/// Clones share the same connection; closing one closes all of them.
/// After [`close`](Self::close) every operation fails with
/// [`CoreError::InvalidHandle`] without reaching the engine.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Connection,
    config: Config,
}

impl Database {
    pub(crate) fn new(connection: Connection, config: Config) -> Self {
        if config.close_on_version_change {
            let weak = connection.downgrade();
            connection
                .events()
                .on(ConnectionEventKind::VersionChange, move |event| {
                    if let Some(connection) = weak.upgrade() {
                        info!(db = connection.name(), ?event, "closing for version change");
                        connection.close();
                    }
                });
        }
        Self { connection, config }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.connection.name()
    }

    /// Returns the version the handle was opened at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.connection.version()
    }

    /// Returns whether the handle is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Returns the configuration the handle was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the object store names.
    pub fn store_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.connection.store_names())
    }

    /// Returns an accessor for one object store.
    ///
    /// The store is not looked up until an operation runs; a missing store
    /// surfaces as a [`CoreError::RequestFailure`].
    #[must_use]
    pub fn store(&self, name: &str) -> ObjectStore {
        ObjectStore::new(self.clone(), name)
    }

    /// Returns a serde-typed accessor for one object store.
    #[must_use]
    pub fn typed<T>(&self, name: &str) -> TypedStore<T>
    where
        T: Serialize + DeserializeOwned,
    {
        TypedStore::new(self.store(name))
    }

    /// Starts a multi-operation transaction.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        self.begin(stores, mode).map(Transaction::new)
    }

    /// Calls `handler` with `(old, new)` whenever another caller asks to
    /// upgrade (`new` is `Some`) or delete (`new` is `None`) this database.
    ///
    /// The other caller stays blocked unless the handle is closed, usually
    /// from inside the handler.
    pub fn on_version_change<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.connection
            .events()
            .on(ConnectionEventKind::VersionChange, move |event| {
                if let ConnectionEvent::VersionChange { old, new } = event {
                    handler(*old, *new);
                }
            })
    }

    /// Removes a version change handler.
    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.connection.events().off(id)
    }

    /// Closes the handle. Closing is synchronous, idempotent and never fails.
    pub fn close(&self) {
        if self.is_open() {
            info!(db = self.name(), version = self.version(), "closing database");
        }
        self.connection.close();
    }

    /// Returns the underlying engine connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::InvalidHandle {
                name: self.name().to_string(),
            })
        }
    }

    /// Starts an engine transaction over `stores`.
    pub(crate) fn begin(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> CoreResult<stowdb_engine::Transaction> {
        self.ensure_open()?;
        self.connection
            .transaction(stores, mode)
            .map_err(|err| self.begin_error(stores, err))
    }

    fn begin_error(&self, stores: &[&str], err: EngineError) -> CoreError {
        // The handle may have closed after `ensure_open` passed.
        if let Err(closed) = self.ensure_open() {
            return closed;
        }
        let store = stores
            .iter()
            .find(|store| self.connection.store_schema(store).is_none())
            .or_else(|| stores.first())
            .copied()
            .unwrap_or_default();
        CoreError::from_request(store, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MigrationRegistry, Opener};
    use std::sync::Arc;
    use stowdb_engine::{Engine, StoreOptions};

    async fn kv_db() -> Database {
        let mut registry = MigrationRegistry::new();
        registry
            .step(0, "create_kv", |upgrade| {
                upgrade.create_object_store("kv", StoreOptions::new())?;
                Ok(())
            })
            .unwrap();
        Opener::new(Engine::in_memory().unwrap())
            .open_with_registry("db", 1, Arc::new(registry))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn begin_names_the_missing_store() {
        let db = kv_db().await;
        match db.transaction(&["kv", "nope"], TransactionMode::ReadOnly) {
            Err(CoreError::RequestFailure { store, source }) => {
                assert_eq!(store, "nope");
                assert!(matches!(source, EngineError::NotFound(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn begin_error_after_close_is_invalid_handle() {
        let db = kv_db().await;
        db.close();
        // What the engine reports when a close lands between the handle
        // check and the engine call.
        let err = db.begin_error(&["kv"], EngineError::invalid_state("connection is closed"));
        assert!(matches!(err, CoreError::InvalidHandle { ref name } if name == "db"));
    }
}
