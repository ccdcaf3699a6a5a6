//! # graphtx testkit
//!
//! Test utilities for the graphtx kernel.
//!
//! This crate provides:
//! - Kernel fixtures driven by a fake clock
//! - Recording monitors and appliers for asserting on kernel callbacks
//! - Property-based test generators using proptest
//! - Concurrent stress drivers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphtx_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_kernel() {
//!     with_kernel(|kernel| {
//!         let nodes = populate(kernel, 3);
//!         assert_eq!(nodes.len(), 3);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_logging;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;

/// Installs a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
