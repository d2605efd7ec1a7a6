//! Error types for engine operations.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A boxed error raised by an upgrade hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors signalled by the engine.
///
/// Errors are cloneable because a single cause is delivered both to the
/// failing request and to the transaction it aborts.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Version numbers must be positive.
    #[error("invalid version {version}: versions start at 1")]
    InvalidVersion {
        /// The rejected version.
        version: u64,
    },

    /// The requested version is lower than the stored one.
    #[error("database {name} is at version {stored}, cannot open at version {requested}")]
    VersionError {
        /// Database name.
        name: String,
        /// Version requested by the caller.
        requested: u64,
        /// Version currently stored.
        stored: u64,
    },

    /// Other connections stayed open while a version change was requested.
    #[error("database {name} is blocked by {open_connections} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Number of connections still open.
        open_connections: usize,
    },

    /// The upgrade hook failed; the upgrade was discarded.
    #[error("upgrade of {name} aborted: {source}")]
    UpgradeAborted {
        /// Database name.
        name: String,
        /// The error raised by the hook.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A named object store or index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write violated a key or index constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A key or record could not be used as requested.
    #[error("data error: {0}")]
    Data(String),

    /// A write was issued inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A request was issued against a finished transaction.
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// The transaction was aborted explicitly.
    #[error("transaction aborted")]
    Aborted,

    /// The operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The connection was closed while work was outstanding.
    #[error("connection is closing")]
    ConnectionClosing,

    /// Snapshot I/O failed.
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        /// Kind of the underlying I/O error.
        kind: io::ErrorKind,
        /// Rendered I/O error.
        message: String,
    },

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl EngineError {
    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Wraps an upgrade hook error.
    pub fn upgrade_aborted(name: impl Into<String>, source: BoxError) -> Self {
        Self::UpgradeAborted {
            name: name.into(),
            source: Arc::from(source),
        }
    }
}
