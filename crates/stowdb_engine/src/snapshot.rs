//! Snapshot persistence backends.
//!
//! A snapshot is the full committed [`DatabaseState`] of one database,
//! encoded as CBOR. The engine saves a snapshot after every successful
//! upgrade and read-write commit, and loads it the first time a database
//! is touched.

use crate::error::{EngineError, EngineResult};
use crate::state::DatabaseState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "stow";

/// Where committed database states live between engine runs.
///
/// # Invariants
///
/// - `save` replaces the previous snapshot of the same database atomically
/// - `load` returns exactly what the last successful `save` stored
/// - Backends must be `Send + Sync`; the engine calls them from its worker
pub trait SnapshotBackend: Send + Sync {
    /// Loads the snapshot of `name`, if one exists.
    fn load(&self, name: &str) -> EngineResult<Option<DatabaseState>>;

    /// Stores a snapshot, replacing any previous one.
    fn save(&self, state: &DatabaseState) -> EngineResult<()>;

    /// Removes the snapshot of `name`. Removing a missing snapshot succeeds.
    fn remove(&self, name: &str) -> EngineResult<()>;

    /// Lists the names of all stored databases.
    fn names(&self) -> EngineResult<Vec<String>>;
}

pub(crate) fn encode(state: &DatabaseState) -> EngineResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(state, &mut bytes)
        .map_err(|e| EngineError::Codec(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode(bytes: &[u8]) -> EngineResult<DatabaseState> {
    ciborium::de::from_reader(bytes).map_err(|e| EngineError::Codec(e.to_string()))
}

/// Snapshots kept in process memory.
///
/// Clones share the same storage, so a clone handed to a second engine
/// sees everything the first one committed. This is how tests simulate a
/// restart without touching the disk.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshots {
    snapshots: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemorySnapshots {
    /// Creates an empty snapshot store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded size of a snapshot, if present.
    #[must_use]
    pub fn snapshot_len(&self, name: &str) -> Option<usize> {
        self.snapshots.read().get(name).map(Vec::len)
    }
}

impl SnapshotBackend for MemorySnapshots {
    fn load(&self, name: &str) -> EngineResult<Option<DatabaseState>> {
        self.snapshots
            .read()
            .get(name)
            .map(|bytes| decode(bytes))
            .transpose()
    }

    fn save(&self, state: &DatabaseState) -> EngineResult<()> {
        let bytes = encode(state)?;
        self.snapshots.write().insert(state.name().to_string(), bytes);
        Ok(())
    }

    fn remove(&self, name: &str) -> EngineResult<()> {
        self.snapshots.write().remove(name);
        Ok(())
    }

    fn names(&self) -> EngineResult<Vec<String>> {
        let mut names: Vec<String> = self.snapshots.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Snapshots stored as one file per database inside a directory.
///
/// File names are the hex encoding of the database name, so any name is
/// safe on any filesystem. Writes go to a temporary file that is renamed
/// over the previous snapshot.
#[derive(Debug)]
pub struct DirectorySnapshots {
    dir: PathBuf,
    sync: bool,
}

impl DirectorySnapshots {
    /// Opens a snapshot directory, creating it if `create` is set.
    ///
    /// With `sync` set every snapshot is `fsync`ed before it replaces the
    /// previous one.
    pub fn open(dir: &Path, create: bool, sync: bool) -> EngineResult<Self> {
        if create {
            fs::create_dir_all(dir)?;
        } else if !dir.is_dir() {
            return Err(EngineError::not_found(format!(
                "snapshot directory {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            sync,
        })
    }

    /// Returns the snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{SNAPSHOT_EXTENSION}", hex_name(name)))
    }
}

impl SnapshotBackend for DirectorySnapshots {
    fn load(&self, name: &str) -> EngineResult<Option<DatabaseState>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        decode(&bytes).map(Some)
    }

    fn save(&self, state: &DatabaseState) -> EngineResult<()> {
        let bytes = encode(state)?;
        let path = self.path_for(state.name());
        let tmp = path.with_extension(format!("{SNAPSHOT_EXTENSION}.tmp"));

        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> EngineResult<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn names(&self) -> EngineResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(unhex_name)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn hex_name(name: &str) -> String {
    name.bytes().map(|b| format!("{b:02x}")).collect()
}

fn unhex_name(hex: &str) -> Option<String> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
