//! Integration test infrastructure for the netcf driver layer
//!
//! Provides:
//! - An in-memory configuration store with an operation log and failure knobs
//! - A scripted transform engine whose stylesheets call the real extension
//!   functions
//! - A canned route source standing in for the kernel
//! - Data-directory fixtures and a ready-made [`TestBed`]
//! - Document verification helpers

pub mod fixtures;
pub mod mock_engine;
pub mod mock_kernel;
pub mod mock_store;
mod verification;

pub use fixtures::*;
pub use mock_engine::MockEngine;
pub use mock_kernel::CannedRoutes;
pub use mock_store::{MemoryStore, StoreOp};
pub use verification::*;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a test-writer `tracing` subscriber once per process, filtered
/// by `RUST_LOG` (default `warn`).
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // Another harness may already have installed a subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
