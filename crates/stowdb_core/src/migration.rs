//! Ordered schema migrations.
//!
//! A migration step is keyed by the version it upgrades *from*: the step
//! registered at version `n` moves a database from `n` to `n + 1`. Opening
//! at `target` over a stored version `stored` runs every step with
//! `stored <= from < target`, in ascending order, exactly once. The set is
//! computed once from the original stored version, before any step runs.
//!
//! All steps run inside the engine's single upgrade transaction. A failing
//! step stops the run and the engine discards everything the earlier steps
//! did, so the database stays at `stored`. The registry never rolls back by
//! itself.
//!
//! ## Usage
//!
//! ```rust
//! use stowdb_core::migration::MigrationRegistry;
//! use stowdb_engine::{IndexSchema, StoreOptions};
//!
//! let mut registry = MigrationRegistry::new();
//! registry
//!     .step(0, "create_identities", |upgrade| {
//!         upgrade.create_object_store("identities", StoreOptions::new().key_path("id"))?;
//!         Ok(())
//!     })
//!     .unwrap()
//!     .step(1, "index_email", |upgrade| {
//!         upgrade.create_index("identities", IndexSchema::new("by_email", "email"))?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! assert_eq!(registry.pending(1, 2).len(), 1);
//! assert!(registry.validate().is_ok());
//! ```

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use std::fmt;
use stowdb_engine::{BoxError, UpgradeTransaction};
use thiserror::Error;
use tracing::{debug, info};

/// Version number a migration upgrades from.
pub type MigrationVersion = u64;

/// A failed migration step.
#[derive(Debug, Error)]
#[error("migration {version} ({name}) failed: {source}")]
pub struct MigrationError {
    /// Version the step upgrades from.
    pub version: MigrationVersion,
    /// Step name.
    pub name: String,
    /// The error the step returned.
    #[source]
    pub source: BoxError,
}

/// Information about a registered migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version the step upgrades from.
    pub from_version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// A schema migration step.
pub trait Migration: Send + Sync {
    /// Returns the version this step upgrades from.
    fn from_version(&self) -> MigrationVersion;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Applies the step.
    ///
    /// Steps usually change the schema but may also rewrite records.
    fn up(&self, upgrade: &mut UpgradeTransaction<'_>) -> Result<(), BoxError>;
}

type StepFn = dyn Fn(&mut UpgradeTransaction<'_>) -> Result<(), BoxError> + Send + Sync;

struct FnMigration {
    from_version: MigrationVersion,
    name: String,
    up: Box<StepFn>,
}

impl Migration for FnMigration {
    fn from_version(&self) -> MigrationVersion {
        self.from_version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, upgrade: &mut UpgradeTransaction<'_>) -> Result<(), BoxError> {
        (self.up)(upgrade)
    }
}

/// The table of migration steps.
#[derive(Default)]
pub struct MigrationRegistry {
    steps: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure as the step upgrading from `from_version`.
    ///
    /// Returns an error if a step for `from_version` already exists.
    pub fn step<F>(
        &mut self,
        from_version: MigrationVersion,
        name: &str,
        up: F,
    ) -> CoreResult<&mut Self>
    where
        F: Fn(&mut UpgradeTransaction<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(Box::new(FnMigration {
            from_version,
            name: name.to_string(),
            up: Box::new(up),
        }))
    }

    /// Registers a migration.
    ///
    /// Returns an error if a step for the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<&mut Self> {
        let version = migration.from_version();
        if let Some(existing) = self.steps.get(&version) {
            return Err(CoreError::invalid_migration(format!(
                "a step from version {version} is already registered ({})",
                existing.name()
            )));
        }
        self.steps.insert(version, migration);
        Ok(self)
    }

    /// Returns the number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns whether no steps are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the version a fully migrated database ends up at.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.steps.keys().next_back().map_or(0, |v| v + 1)
    }

    /// Returns all registered steps in order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.steps.values().map(|m| info(m.as_ref())).collect()
    }

    /// Returns the steps an upgrade from `stored` to `target` would run.
    #[must_use]
    pub fn pending(&self, stored: MigrationVersion, target: MigrationVersion) -> Vec<MigrationInfo> {
        self.applicable(stored, target)
            .map(|(_, m)| info(m))
            .collect()
    }

    /// Validates that steps start at 0 and have no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for (expected, version) in (0u64..).zip(self.steps.keys()) {
            if *version != expected {
                return Err(CoreError::invalid_migration(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    /// Runs every step with `stored <= from < target` in ascending order.
    ///
    /// Stops at the first failing step. Does nothing when `stored >= target`.
    pub fn upgrade(
        &self,
        upgrade: &mut UpgradeTransaction<'_>,
        stored: MigrationVersion,
        target: MigrationVersion,
    ) -> Result<(), MigrationError> {
        let steps: Vec<_> = self.applicable(stored, target).collect();
        debug!(db = upgrade.database_name(), stored, target, steps = steps.len(), "running migrations");

        for (version, migration) in steps {
            info!(db = upgrade.database_name(), version, step = migration.name(), "applying migration");
            migration.up(upgrade).map_err(|source| MigrationError {
                version,
                name: migration.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn applicable(
        &self,
        stored: MigrationVersion,
        target: MigrationVersion,
    ) -> impl Iterator<Item = (MigrationVersion, &dyn Migration)> + '_ {
        // `BTreeMap::range` panics on an inverted range.
        let range = if stored < target { stored..target } else { 0..0 };
        self.steps.range(range).map(|(v, m)| (*v, m.as_ref()))
    }
}

fn info(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        from_version: migration.from_version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Described;

    impl Migration for Described {
        fn from_version(&self) -> MigrationVersion {
            1
        }

        fn name(&self) -> &str {
            "described"
        }

        fn description(&self) -> Option<&str> {
            Some("adds nothing")
        }

        fn up(&self, _upgrade: &mut UpgradeTransaction<'_>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn noop(_: &mut UpgradeTransaction<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    fn registry(versions: &[u64]) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for v in versions {
            registry.step(*v, &format!("step{v}"), noop).unwrap();
        }
        registry
    }

    #[test]
    fn register_and_list_migrations() {
        let mut registry = registry(&[0]);
        registry.register(Box::new(Described)).unwrap();

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].from_version, 0);
        assert_eq!(list[0].name, "step0");
        assert_eq!(list[1].description.as_deref(), Some("adds nothing"));
        assert_eq!(registry.latest_version(), 2);
    }

    #[test]
    fn duplicate_version_rejected() {
        let mut registry = registry(&[0]);
        assert!(matches!(
            registry.step(0, "again", noop),
            Err(CoreError::InvalidMigration { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn pending_is_half_open_range() {
        let registry = registry(&[0, 1, 2, 3]);

        let names = |stored, target| -> Vec<u64> {
            registry
                .pending(stored, target)
                .into_iter()
                .map(|m| m.from_version)
                .collect()
        };
        assert_eq!(names(0, 4), vec![0, 1, 2, 3]);
        assert_eq!(names(1, 2), vec![1]);
        assert_eq!(names(3, 4), vec![3]);
        assert!(names(2, 2).is_empty());
        assert!(names(4, 2).is_empty());
    }

    #[test]
    fn validate_detects_gaps() {
        assert!(registry(&[0, 1, 2]).validate().is_ok());
        assert!(registry(&[0, 2]).validate().is_err());
        assert!(registry(&[1]).validate().is_err());
    }

    #[test]
    fn empty_registry() {
        let registry = MigrationRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
        assert!(registry.pending(0, 10).is_empty());
        assert!(registry.validate().is_ok());
        assert_eq!(registry.latest_version(), 0);
    }

    #[test]
    fn migration_error_display() {
        let err = MigrationError {
            version: 2,
            name: "index".into(),
            source: "duplicate".into(),
        };
        assert_eq!(err.to_string(), "migration 2 (index) failed: duplicate");
        assert!(std::error::Error::source(&err).is_some());
    }
}
