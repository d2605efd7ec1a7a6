//! # stowdb Engine
//!
//! A callback-driven, transactional object-store engine.
//!
//! This crate is the native layer underneath `stowdb_core`. Its API is
//! deliberately callback-shaped: every operation returns a [`Request`]
//! immediately and later signals success or failure on the engine's worker
//! thread. The `stowdb_core` crate turns these signals into futures.
//!
//! ## Model
//!
//! - An [`Engine`] holds any number of named databases
//! - A database has a positive integer version and a set of object stores
//! - Opening at a higher version runs an upgrade hook inside an
//!   [`UpgradeTransaction`]; a failing hook discards the upgrade
//! - Reads and writes happen in [`Transaction`]s that commit or abort as a unit
//! - Committed state is persisted through a [`SnapshotBackend`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::mpsc;
//! use serde_json::json;
//! use stowdb_engine::{Completion, Engine, StoreOptions, TransactionMode};
//!
//! let engine = Engine::in_memory().unwrap();
//! let (tx, rx) = mpsc::channel();
//! engine
//!     .open("app", 1, Box::new(|upgrade| {
//!         upgrade.create_object_store("people", StoreOptions::new().key_path("id"))?;
//!         Ok(())
//!     }))
//!     .on_success(Box::new(move |connection| {
//!         tx.send(connection).ok();
//!     }));
//! let connection = rx.recv().unwrap();
//!
//! let txn = connection.transaction(&["people"], TransactionMode::ReadWrite).unwrap();
//! let (done_tx, done_rx) = mpsc::channel();
//! txn.object_store("people")
//!     .unwrap()
//!     .put(json!({"id": "ada"}), None)
//!     .on_success(Box::new(move |key| {
//!         done_tx.send(key).ok();
//!     }));
//! assert_eq!(done_rx.recv().unwrap().to_string(), "\"ada\"");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod engine;
mod error;
mod key;
mod request;
mod schema;
mod snapshot;
mod state;
mod transaction;
mod upgrade;
mod worker;

pub use config::EngineConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionEventKind, WeakConnection};
pub use engine::{DatabaseInfo, Engine, UpgradeHook};
pub use error::{BoxError, EngineError, EngineResult};
pub use key::{extract_key, inject_key, validate_key_path, Key};
pub use request::{Completion, ErrorHandler, ReadyState, Request, SuccessHandler};
pub use schema::{IndexSchema, StoreOptions, StoreSchema};
pub use snapshot::{DirectorySnapshots, MemorySnapshots, SnapshotBackend, SNAPSHOT_EXTENSION};
pub use state::DatabaseState;
pub use transaction::{StoreRequests, Transaction, TransactionMode, TransactionStatus};
pub use upgrade::UpgradeTransaction;
