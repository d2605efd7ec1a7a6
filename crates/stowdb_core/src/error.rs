//! Error types for stowdb core.

use crate::migration::MigrationError;
use std::sync::Arc;
use stowdb_engine::EngineError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced to callers of the core API.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested version is lower than the stored version.
    #[error("version conflict on {name}: requested {requested}, stored {stored}")]
    VersionConflict {
        /// Database name.
        name: String,
        /// Version requested by the caller.
        requested: u64,
        /// Version currently stored.
        stored: u64,
    },

    /// Another open connection blocked an upgrade or deletion.
    #[error("{name} is blocked by {open_connections} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Connections that stayed open.
        open_connections: usize,
    },

    /// A migration step failed; the database kept its previous version.
    #[error("upgrade of {name} failed: {source}")]
    MigrationFailure {
        /// Database name.
        name: String,
        /// Version the failing step upgrades from.
        version: u64,
        /// Name of the failing step.
        step: String,
        /// The step's error.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A single request failed.
    #[error("request on store {store} failed: {source}")]
    RequestFailure {
        /// Store the request targeted.
        store: String,
        /// Engine cause.
        #[source]
        source: EngineError,
    },

    /// A transaction aborted; none of its writes were committed.
    #[error("transaction failed: {source}")]
    TransactionFailure {
        /// The error that caused the abort.
        #[source]
        source: EngineError,
    },

    /// The handle is closed.
    #[error("invalid handle: database {name} is closed")]
    InvalidHandle {
        /// Database name.
        name: String,
    },

    /// The connection closed while the operation was outstanding.
    #[error("connection closing")]
    ConnectionClosing,

    /// A migration table is malformed.
    #[error("invalid migration: {message}")]
    InvalidMigration {
        /// Description of the problem.
        message: String,
    },

    /// A typed record could not be converted.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The engine dropped an operation without signalling it.
    #[error("operation dropped before completion")]
    Dropped,
}

impl CoreError {
    /// Creates a request failure error.
    pub fn request_failure(store: impl Into<String>, source: EngineError) -> Self {
        Self::RequestFailure {
            store: store.into(),
            source,
        }
    }

    /// Creates an invalid migration error.
    pub fn invalid_migration(message: impl Into<String>) -> Self {
        Self::InvalidMigration {
            message: message.into(),
        }
    }

    /// Returns whether the error means the database could not move to the
    /// requested version: a lower version was requested or an open
    /// connection blocked the upgrade.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Blocked { .. })
    }

    pub(crate) fn from_open(err: EngineError) -> Self {
        match err {
            EngineError::VersionError {
                name,
                requested,
                stored,
            } => Self::VersionConflict {
                name,
                requested,
                stored,
            },
            EngineError::Blocked {
                name,
                open_connections,
            } => Self::Blocked {
                name,
                open_connections,
            },
            EngineError::UpgradeAborted { name, source } => {
                let failed = source
                    .downcast_ref::<MigrationError>()
                    .map(|m| (m.version, m.name.clone()));
                match failed {
                    Some((version, step)) => Self::MigrationFailure {
                        name,
                        version,
                        step,
                        source,
                    },
                    None => Self::Engine(EngineError::UpgradeAborted { name, source }),
                }
            }
            EngineError::ConnectionClosing => Self::ConnectionClosing,
            other => Self::Engine(other),
        }
    }

    pub(crate) fn from_request(store: &str, err: EngineError) -> Self {
        match err {
            EngineError::ConnectionClosing => Self::ConnectionClosing,
            other => Self::request_failure(store, other),
        }
    }

    pub(crate) fn from_transaction(err: EngineError) -> Self {
        match err {
            EngineError::ConnectionClosing => Self::ConnectionClosing,
            source => Self::TransactionFailure { source },
        }
    }
}
