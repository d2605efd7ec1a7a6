//! # stowdb Core
//!
//! Versioned key-value persistence over the callback-driven
//! [`stowdb_engine`].
//!
//! This crate provides:
//! - [`Deferred`] results bridged from engine callbacks, resolving exactly once
//! - A [`MigrationRegistry`] of ordered upgrade steps
//! - An [`Opener`] that opens a database at a version and runs pending steps
//!   inside the engine's atomic upgrade transaction
//! - The [`Database`] handle with [`ObjectStore`], [`TypedStore`] and
//!   multi-operation [`Transaction`] access
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use stowdb_core::{MigrationRegistry, Opener};
//! use stowdb_engine::{Engine, Key, StoreOptions};
//!
//! # async fn demo() -> stowdb_core::CoreResult<()> {
//! let mut registry = MigrationRegistry::new();
//! registry.step(0, "create_identities", |upgrade| {
//!     upgrade.create_object_store("identities", StoreOptions::new().key_path("id"))?;
//!     Ok(())
//! })?;
//!
//! let db = Opener::new(Engine::in_memory()?)
//!     .with_registry(registry)
//!     .open("TEST_DB", 1)
//!     .await?;
//!
//! let identities = db.store("identities");
//! let key = identities.put(json!({"id": "test"}), None).await?;
//! assert_eq!(key, Key::from("test"));
//! assert_eq!(identities.get("test").await?, Some(json!({"id": "test"})));
//! assert_eq!(identities.get("missing").await?, None);
//!
//! db.close();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
mod config;
mod database;
mod deferred;
mod error;
pub mod migration;
mod opener;
mod store;
mod transaction;
mod typed;

pub use config::Config;
pub use database::Database;
pub use deferred::Deferred;
pub use error::{CoreError, CoreResult};
pub use migration::{Migration, MigrationError, MigrationInfo, MigrationRegistry, MigrationVersion};
pub use opener::{open, Opener, UpgradeFn};
pub use store::ObjectStore;
pub use transaction::{Transaction, TransactionStore};
pub use typed::TypedStore;

pub use stowdb_engine::{Key, TransactionMode};
