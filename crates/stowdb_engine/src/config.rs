//! Engine configuration.

use std::path::PathBuf;

/// Configuration for starting an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding database snapshots. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,

    /// Whether to create `data_dir` if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync every snapshot (safer but slower).
    pub sync_on_commit: bool,

    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            create_if_missing: true,
            sync_on_commit: true,
            worker_name: "stowdb-engine".to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists snapshots under `dir`.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync every snapshot.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert!(config.data_dir.is_none());
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.worker_name, "stowdb-engine");
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .data_dir("/tmp/stow")
            .create_if_missing(false)
            .sync_on_commit(false)
            .worker_name("test-worker");

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/stow")));
        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.worker_name, "test-worker");
    }
}
