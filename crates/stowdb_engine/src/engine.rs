//! The engine handle and its shared state.

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionEvent, LiveConnection};
use crate::error::{BoxError, EngineError, EngineResult};
use crate::request::Request;
use crate::snapshot::{DirectorySnapshots, MemorySnapshots, SnapshotBackend};
use crate::state::DatabaseState;
use crate::upgrade::UpgradeTransaction;
use crate::worker::{Job, Worker};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback run inside the upgrade transaction when a database is opened
/// at a version higher than the stored one.
///
/// Returning an error discards every change the hook made.
pub type UpgradeHook =
    Box<dyn FnOnce(&mut UpgradeTransaction<'_>) -> Result<(), BoxError> + Send + 'static>;

/// Name and version of a stored database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored schema version.
    pub version: u64,
}

pub(crate) struct DatabaseEntry {
    pub(crate) state: DatabaseState,
    pub(crate) connections: Vec<LiveConnection>,
}

pub(crate) struct Shared {
    config: EngineConfig,
    pub(crate) snapshots: Box<dyn SnapshotBackend>,
    pub(crate) databases: Mutex<HashMap<String, DatabaseEntry>>,
    worker: Worker,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn submit(&self, job: Job) {
        self.worker.submit(job);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached entry for `name`, loading its snapshot on first use.
    pub(crate) fn entry<'a>(
        &self,
        databases: &'a mut HashMap<String, DatabaseEntry>,
        name: &str,
    ) -> EngineResult<&'a mut DatabaseEntry> {
        match databases.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(slot) => {
                let state = match self.snapshots.load(name)? {
                    Some(state) => {
                        debug!(db = name, version = state.version(), "loaded snapshot");
                        state
                    }
                    None => DatabaseState::new(name),
                };
                Ok(slot.insert(DatabaseEntry {
                    state,
                    connections: Vec::new(),
                }))
            }
        }
    }

    /// Tells every open connection to `name` that a version change is
    /// pending, then fails with `Blocked` if any of them stayed open.
    fn notify_version_change(&self, name: &str, old: u64, new: Option<u64>) -> EngineResult<()> {
        let listeners: Vec<_> = {
            let mut databases = self.databases.lock();
            self.entry(&mut databases, name)?
                .connections
                .iter()
                .map(|c| Arc::clone(&c.events))
                .collect()
        };
        if listeners.is_empty() {
            return Ok(());
        }

        let event = ConnectionEvent::VersionChange { old, new };
        for events in &listeners {
            events.emit(&event);
        }

        let open_connections = self
            .databases
            .lock()
            .get(name)
            .map_or(0, |entry| entry.connections.len());
        if open_connections > 0 {
            warn!(db = name, open_connections, "version change blocked");
            return Err(EngineError::Blocked {
                name: name.to_string(),
                open_connections,
            });
        }
        Ok(())
    }

    fn run_open(
        self: &Arc<Self>,
        name: &str,
        version: u64,
        hook: UpgradeHook,
    ) -> EngineResult<Connection> {
        if version == 0 {
            return Err(EngineError::InvalidVersion { version });
        }

        let stored = {
            let mut databases = self.databases.lock();
            self.entry(&mut databases, name)?.state.version()
        };
        if version < stored {
            return Err(EngineError::VersionError {
                name: name.to_string(),
                requested: version,
                stored,
            });
        }
        if version > stored {
            self.notify_version_change(name, stored, Some(version))?;
            self.run_upgrade(name, stored, version, hook)?;
        }

        Connection::register(self, name, version)
    }

    fn run_upgrade(&self, name: &str, stored: u64, version: u64, hook: UpgradeHook) -> EngineResult<()> {
        let mut working = {
            let mut databases = self.databases.lock();
            self.entry(&mut databases, name)?.state.clone()
        };

        info!(db = name, from = stored, to = version, "upgrading database");
        let mut upgrade = UpgradeTransaction::new(&mut working, stored, version);
        if let Err(source) = hook(&mut upgrade) {
            warn!(db = name, from = stored, to = version, error = %source, "upgrade aborted");
            return Err(EngineError::upgrade_aborted(name, source));
        }

        working.version = version;
        self.snapshots.save(&working)?;

        let mut databases = self.databases.lock();
        self.entry(&mut databases, name)?.state = working;
        Ok(())
    }

    fn run_delete(&self, name: &str) -> EngineResult<()> {
        let stored = {
            let mut databases = self.databases.lock();
            self.entry(&mut databases, name)?.state.version()
        };
        self.notify_version_change(name, stored, None)?;

        self.databases.lock().remove(name);
        self.snapshots.remove(name)?;
        info!(db = name, version = stored, "deleted database");
        Ok(())
    }

    fn run_list(&self) -> EngineResult<Vec<DatabaseInfo>> {
        let mut names: BTreeSet<String> = self.snapshots.names()?.into_iter().collect();
        let mut databases = self.databases.lock();
        names.extend(databases.keys().cloned());

        let mut infos = Vec::new();
        for name in names {
            let version = self.entry(&mut databases, &name)?.state.version();
            if version > 0 {
                infos.push(DatabaseInfo { name, version });
            }
        }
        Ok(infos)
    }
}

/// A running storage engine.
///
/// The engine owns one worker thread that executes every request in
/// submission order. `Engine` is cheap to clone; clones share the worker
/// and all databases.
///
/// # Example
///
/// ```rust
/// use stowdb_engine::{Completion, Engine, StoreOptions};
///
/// let engine = Engine::in_memory().unwrap();
/// let request = engine.open("app", 1, Box::new(|upgrade| {
///     upgrade.create_object_store("notes", StoreOptions::new().auto_increment(true))?;
///     Ok(())
/// }));
/// let (tx, rx) = std::sync::mpsc::channel();
/// request.on_success(Box::new(move |connection| {
///     tx.send(connection).ok();
/// }));
/// let connection = rx.recv().unwrap();
/// assert_eq!(connection.store_names(), vec!["notes".to_string()]);
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Starts an engine that keeps all databases in memory.
    pub fn in_memory() -> EngineResult<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Starts an engine persisting snapshots under `dir`.
    pub fn open_dir(dir: &Path) -> EngineResult<Self> {
        Self::with_config(EngineConfig::new().data_dir(dir))
    }

    /// Starts an engine from a configuration.
    pub fn with_config(config: EngineConfig) -> EngineResult<Self> {
        let snapshots: Box<dyn SnapshotBackend> = match &config.data_dir {
            Some(dir) => Box::new(DirectorySnapshots::open(
                dir,
                config.create_if_missing,
                config.sync_on_commit,
            )?),
            None => Box::new(MemorySnapshots::new()),
        };
        Self::with_backend(config, snapshots)
    }

    /// Starts an engine over a custom snapshot backend.
    pub fn with_backend(
        config: EngineConfig,
        snapshots: Box<dyn SnapshotBackend>,
    ) -> EngineResult<Self> {
        let worker = Worker::spawn(&config.worker_name)?;
        debug!(worker = %config.worker_name, "engine started");
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                snapshots,
                databases: Mutex::new(HashMap::new()),
                worker,
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Requests a connection to `name` at `version`.
    ///
    /// When `version` is higher than the stored version, `on_upgrade` runs
    /// inside the upgrade transaction before the request succeeds. The hook
    /// is a parameter of this call, so it is always in place before the
    /// engine can need it.
    ///
    /// The request fails with:
    /// - [`EngineError::InvalidVersion`] for version 0
    /// - [`EngineError::VersionError`] if `version` is below the stored one
    /// - [`EngineError::Blocked`] if other connections stay open during an upgrade
    /// - [`EngineError::UpgradeAborted`] if the hook fails
    pub fn open(&self, name: &str, version: u64, on_upgrade: UpgradeHook) -> Request<Connection> {
        let request = Request::new();
        let signal = request.clone();
        let shared = Arc::clone(&self.shared);
        let name = name.to_string();

        self.shared.submit(Box::new(move || {
            match shared.run_open(&name, version, on_upgrade) {
                Ok(connection) => signal.resolve(connection),
                Err(err) => {
                    debug!(db = %name, version, error = %err, "open failed");
                    signal.reject(err);
                }
            }
        }));
        request
    }

    /// Requests deletion of a database and its snapshot.
    ///
    /// Open connections receive a version change event with `new: None`;
    /// the request fails with [`EngineError::Blocked`] if any stay open.
    /// Deleting a database that does not exist succeeds.
    pub fn delete_database(&self, name: &str) -> Request<()> {
        let request = Request::new();
        let signal = request.clone();
        let shared = Arc::clone(&self.shared);
        let name = name.to_string();

        self.shared.submit(Box::new(move || match shared.run_delete(&name) {
            Ok(()) => signal.resolve(()),
            Err(err) => signal.reject(err),
        }));
        request
    }

    /// Requests the list of databases that have reached version 1 or later.
    pub fn databases(&self) -> Request<Vec<DatabaseInfo>> {
        let request = Request::new();
        let signal = request.clone();
        let shared = Arc::clone(&self.shared);

        self.shared.submit(Box::new(move || match shared.run_list() {
            Ok(infos) => signal.resolve(infos),
            Err(err) => signal.reject(err),
        }));
        request
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEventKind;
    use crate::key::Key;
    use crate::request::Completion;
    use crate::schema::StoreOptions;
    use crate::transaction::TransactionMode;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn wait<T: Send + 'static>(request: &impl Completion<T>) -> EngineResult<T> {
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        request.on_success(Box::new(move |v| {
            tx.send(Ok(v)).ok();
        }));
        request.on_error(Box::new(move |e| {
            err_tx.send(Err(e)).ok();
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn with_items() -> UpgradeHook {
        Box::new(|upgrade| {
            if !upgrade.has_store("items") {
                upgrade.create_object_store("items", StoreOptions::new().auto_increment(true))?;
            }
            Ok(())
        })
    }

    fn no_upgrade() -> UpgradeHook {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn version_zero_is_invalid() {
        let engine = Engine::in_memory().unwrap();
        assert!(matches!(
            wait(&engine.open("db", 0, no_upgrade())),
            Err(EngineError::InvalidVersion { version: 0 })
        ));
    }

    #[test]
    fn hook_sees_versions_and_runs_only_on_upgrade() {
        let engine = Engine::in_memory().unwrap();
        let (seen_tx, seen_rx) = mpsc::channel();

        let tx = seen_tx.clone();
        let first = wait(&engine.open(
            "db",
            2,
            Box::new(move |upgrade| {
                tx.send((upgrade.old_version(), upgrade.new_version())).ok();
                Ok(())
            }),
        ))
        .unwrap();
        assert_eq!(seen_rx.try_recv().unwrap(), (0, 2));
        first.close();

        let again = wait(&engine.open(
            "db",
            2,
            Box::new(move |_| {
                seen_tx.send((9, 9)).ok();
                Ok(())
            }),
        ))
        .unwrap();
        assert_eq!(again.version(), 2);
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn lower_version_is_rejected() {
        let engine = Engine::in_memory().unwrap();
        wait(&engine.open("db", 3, no_upgrade())).unwrap().close();

        match wait(&engine.open("db", 2, no_upgrade())) {
            Err(EngineError::VersionError {
                requested, stored, ..
            }) => assert_eq!((requested, stored), (2, 3)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn failed_hook_discards_upgrade() {
        let engine = Engine::in_memory().unwrap();
        wait(&engine.open("db", 1, with_items())).unwrap().close();

        let result = wait(&engine.open(
            "db",
            2,
            Box::new(|upgrade| {
                upgrade.create_object_store("extra", StoreOptions::new())?;
                Err("step failed".into())
            }),
        ));
        assert!(matches!(result, Err(EngineError::UpgradeAborted { .. })));

        let connection = wait(&engine.open("db", 1, no_upgrade())).unwrap();
        assert_eq!(connection.store_names(), vec!["items".to_string()]);
    }

    #[test]
    fn open_connection_gets_version_change_and_can_unblock() {
        let engine = Engine::in_memory().unwrap();
        let old = wait(&engine.open("db", 1, with_items())).unwrap();
        let weak = old.downgrade();
        old.events().on(ConnectionEventKind::VersionChange, move |_| {
            if let Some(connection) = weak.upgrade() {
                connection.close();
            }
        });

        let new = wait(&engine.open("db", 2, with_items())).unwrap();
        assert!(old.is_closed());
        assert_eq!(new.version(), 2);
    }

    #[test]
    fn open_connection_that_stays_open_blocks() {
        let engine = Engine::in_memory().unwrap();
        let old = wait(&engine.open("db", 1, with_items())).unwrap();

        assert!(matches!(
            wait(&engine.open("db", 2, with_items())),
            Err(EngineError::Blocked {
                open_connections: 1,
                ..
            })
        ));
        assert!(matches!(
            wait(&engine.delete_database("db")),
            Err(EngineError::Blocked { .. })
        ));

        old.close();
        wait(&engine.delete_database("db")).unwrap();
        assert!(wait(&engine.databases()).unwrap().is_empty());
    }

    #[test]
    fn databases_lists_upgraded_databases() {
        let engine = Engine::in_memory().unwrap();
        wait(&engine.open("b", 2, no_upgrade())).unwrap();
        wait(&engine.open("a", 1, no_upgrade())).unwrap();
        let _ = wait(&engine.open("failed", 1, Box::new(|_| Err("no".into()))));

        assert_eq!(
            wait(&engine.databases()).unwrap(),
            vec![
                DatabaseInfo {
                    name: "a".into(),
                    version: 1
                },
                DatabaseInfo {
                    name: "b".into(),
                    version: 2
                },
            ]
        );
    }

    #[test]
    fn committed_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open_dir(dir.path()).unwrap();
            let connection = wait(&engine.open("db", 1, with_items())).unwrap();
            let tx = connection
                .transaction(&["items"], TransactionMode::ReadWrite)
                .unwrap();
            let items = tx.object_store("items").unwrap();
            items.put(json!({"n": 1}), None);
            items.put(json!({"n": 2}), None);
            tx.commit().unwrap();
            wait(&tx).unwrap();
        }

        let engine = Engine::open_dir(dir.path()).unwrap();
        let connection = wait(&engine.open("db", 1, no_upgrade())).unwrap();
        let tx = connection
            .transaction(&["items"], TransactionMode::ReadWrite)
            .unwrap();
        let items = tx.object_store("items").unwrap();
        assert_eq!(
            wait(&items.get(Key::Int(2))).unwrap(),
            Some(json!({"n": 2}))
        );
        // The key generator continues where it stopped.
        assert_eq!(wait(&items.put(json!({"n": 3}), None)).unwrap(), Key::Int(3));
    }

    #[test]
    fn shared_memory_snapshots_act_as_restart() {
        let snapshots = MemorySnapshots::new();
        {
            let engine =
                Engine::with_backend(EngineConfig::default(), Box::new(snapshots.clone())).unwrap();
            wait(&engine.open("db", 4, no_upgrade())).unwrap();
        }
        let engine = Engine::with_backend(EngineConfig::default(), Box::new(snapshots)).unwrap();
        assert_eq!(
            wait(&engine.databases()).unwrap(),
            vec![DatabaseInfo {
                name: "db".into(),
                version: 4
            }]
        );
    }
}
