//! # NodeStore Testkit
//!
//! Test utilities for NodeStore.
//!
//! This crate provides:
//! - Manager fixtures over the in-memory and file stores
//! - Instrumented store and datasource doubles
//! - Property-based test generators using proptest
//! - Concurrent load helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nodestore_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_manager() {
//!     with_manager(|nmgr| {
//!         let mut tx = nmgr.transactor();
//!         tx.begin("test").unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doubles;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::doubles::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use doubles::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
