//! # stowdb Testkit
//!
//! Test utilities for stowdb.
//!
//! This crate provides:
//! - Engine fixtures over memory or a temporary directory, with restart
//! - Ready-made migration tables for the identities schema
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stowdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reopen_after_restart() {
//!     let mut engine = TestEngine::on_disk();
//!     let db = engine.opener(identities_registry()).open(TEST_DB, 1).await.unwrap();
//!     db.close();
//!     engine.restart();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
