//! Opening databases.
//!
//! The opener asks the engine to open a database and hands it the upgrade
//! function as part of that same call, so the hook is in place before the
//! engine can signal that an upgrade is needed. The resulting request goes
//! through the bridge and comes back as a [`Database`] or a [`CoreError`].

use crate::bridge;
use crate::config::Config;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::migration::{MigrationError, MigrationRegistry};
use std::sync::Arc;
use stowdb_engine::{BoxError, Engine, UpgradeHook, UpgradeTransaction};
use tracing::{debug, info};

/// An upgrade function: receives the upgrade transaction, the stored
/// version and the target version.
pub type UpgradeFn = Box<
    dyn FnOnce(&mut UpgradeTransaction<'_>, u64, u64) -> Result<(), MigrationError> + Send + 'static,
>;

/// Opens databases on one engine with one migration table.
///
/// # Example
///
/// ```rust
/// use stowdb_core::{MigrationRegistry, Opener};
/// use stowdb_engine::{Engine, StoreOptions};
///
/// # async fn demo() -> stowdb_core::CoreResult<()> {
/// let mut registry = MigrationRegistry::new();
/// registry.step(0, "create_notes", |upgrade| {
///     upgrade.create_object_store("notes", StoreOptions::new().auto_increment(true))?;
///     Ok(())
/// })?;
///
/// let opener = Opener::new(Engine::in_memory()?).with_registry(registry);
/// let db = opener.open("notes", 1).await?;
/// let key = db.store("notes").put(serde_json::json!({"text": "hi"}), None).await?;
/// db.close();
/// # let _ = key;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Opener {
    engine: Engine,
    config: Config,
    registry: Arc<MigrationRegistry>,
}

impl Opener {
    /// Creates an opener with an empty migration table.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            config: Config::default(),
            registry: Arc::new(MigrationRegistry::new()),
        }
    }

    /// Sets the handle configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the migration table used by [`open`](Self::open).
    #[must_use]
    pub fn with_registry(mut self, registry: MigrationRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the migration table.
    #[must_use]
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Opens `name` at `version`, running this opener's migrations.
    pub async fn open(&self, name: &str, version: u64) -> CoreResult<Database> {
        self.open_with_registry(name, version, Arc::clone(&self.registry))
            .await
    }

    /// Opens `name` at `version`, running the steps of `registry`.
    pub async fn open_with_registry(
        &self,
        name: &str,
        version: u64,
        registry: Arc<MigrationRegistry>,
    ) -> CoreResult<Database> {
        if self.config.validate_migrations {
            registry.validate()?;
        }
        self.open_with(name, version, move |upgrade, stored, target| {
            registry.upgrade(upgrade, stored, target)
        })
        .await
    }

    /// Opens `name` at `version` with a custom upgrade function.
    ///
    /// `upgrade` runs only when `version` is above the stored version. If it
    /// fails, the open fails with [`CoreError::MigrationFailure`] and the
    /// database keeps its previous version.
    pub async fn open_with<F>(&self, name: &str, version: u64, upgrade: F) -> CoreResult<Database>
    where
        F: FnOnce(&mut UpgradeTransaction<'_>, u64, u64) -> Result<(), MigrationError>
            + Send
            + 'static,
    {
        let hook: UpgradeHook = Box::new(move |txn: &mut UpgradeTransaction<'_>| {
            let (stored, target) = (txn.old_version(), txn.new_version());
            upgrade(txn, stored, target).map_err(|err| Box::new(err) as BoxError)
        });

        debug!(db = name, version, "opening database");
        let request = self.engine.open(name, version, hook);
        let connection = bridge::request(&request, CoreError::from_open).await?;
        info!(db = name, version, "database open");
        Ok(Database::new(connection, self.config.clone()))
    }

    /// Deletes a database.
    ///
    /// Open handles get a version change event with `new == None`; if any
    /// stay open the deletion fails with [`CoreError::Blocked`].
    pub async fn delete(&self, name: &str) -> CoreResult<()> {
        let request = self.engine.delete_database(name);
        bridge::request(&request, CoreError::from_open).await?;
        info!(db = name, "database deleted");
        Ok(())
    }
}

/// Opens `name` at `version` on `engine` with no migrations.
///
/// Useful for reopening a database that is already at `version`.
pub async fn open(engine: &Engine, name: &str, version: u64) -> CoreResult<Database> {
    Opener::new(engine.clone()).open(name, version).await
}
