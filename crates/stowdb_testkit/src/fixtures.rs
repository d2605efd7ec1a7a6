//! Test fixtures and engine helpers.
//!
//! Fixtures panic on setup failures; they are only meant for tests.

use std::path::Path;
use std::sync::Once;
use stowdb_core::{MigrationRegistry, Opener};
use stowdb_engine::{Engine, EngineConfig, IndexSchema, MemorySnapshots, StoreOptions};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Database name used by the shared scenarios.
pub const TEST_DB: &str = "TEST_DB";

/// Store created by [`identities_registry`].
pub const IDENTITIES: &str = "identities";

enum Backing {
    Memory(MemorySnapshots),
    Disk(TempDir),
}

/// An engine whose snapshots outlive it, so tests can restart it.
pub struct TestEngine {
    engine: Engine,
    backing: Backing,
}

impl TestEngine {
    /// Creates an engine over shared in-memory snapshots.
    pub fn in_memory() -> Self {
        let snapshots = MemorySnapshots::new();
        Self {
            engine: memory_engine(&snapshots),
            backing: Backing::Memory(snapshots),
        }
    }

    /// Creates an engine persisting to a temporary directory.
    pub fn on_disk() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            engine: disk_engine(dir.path()),
            backing: Backing::Disk(dir),
        }
    }

    /// Returns the current engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns the snapshot directory for disk-backed engines.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk(dir) => Some(dir.path()),
        }
    }

    /// Replaces the engine with a fresh one over the same snapshots.
    ///
    /// Handles opened on the old engine keep working against it; only
    /// committed state carries over.
    pub fn restart(&mut self) {
        self.engine = match &self.backing {
            Backing::Memory(snapshots) => memory_engine(snapshots),
            Backing::Disk(dir) => disk_engine(dir.path()),
        };
    }

    /// Returns an opener on the current engine with `registry`.
    pub fn opener(&self, registry: MigrationRegistry) -> Opener {
        Opener::new(self.engine.clone()).with_registry(registry)
    }
}

fn memory_engine(snapshots: &MemorySnapshots) -> Engine {
    Engine::with_backend(
        EngineConfig::new().worker_name("stowdb-test"),
        Box::new(snapshots.clone()),
    )
    .expect("Failed to start engine")
}

fn disk_engine(dir: &Path) -> Engine {
    Engine::with_config(
        EngineConfig::new()
            .data_dir(dir)
            .sync_on_commit(false)
            .worker_name("stowdb-test"),
    )
    .expect("Failed to start engine")
}

/// Migration step 0: creates the `identities` store keyed by `id`.
pub fn identities_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry
        .step(0, "create_identities", |upgrade| {
            upgrade.create_object_store(IDENTITIES, StoreOptions::new().key_path("id"))?;
            Ok(())
        })
        .expect("Failed to register migration");
    registry
}

/// [`identities_registry`] plus step 1: a unique `by_email` index.
pub fn identities_registry_v2() -> MigrationRegistry {
    let mut registry = identities_registry();
    registry
        .step(1, "index_identity_email", |upgrade| {
            upgrade.create_index(IDENTITIES, IndexSchema::new("by_email", "email").unique(true))?;
            Ok(())
        })
        .expect("Failed to register migration");
    registry
}

/// Installs a `tracing` subscriber driven by `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_contiguous() {
        assert!(identities_registry().validate().is_ok());
        let v2 = identities_registry_v2();
        assert!(v2.validate().is_ok());
        assert_eq!(v2.latest_version(), 2);
    }

    #[test]
    fn disk_engine_has_a_path() {
        let engine = TestEngine::on_disk();
        assert!(engine.path().is_some_and(Path::exists));
        assert!(TestEngine::in_memory().path().is_none());
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
