//! Tally Tests - Deterministic Simulation Testing for Tally.
//!
//! This crate contains the DST (Deterministic Simulation Testing) and
//! integration tests for Tally. Tests are organized by type:
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): Deterministic simulation with fault injection
//! - `ack_dst`: Random confirmation orders, flaky stores and restarts, checked
//!   against the tracker invariants after every step
//!
//! **Integration Tests** (`*_tests.rs`): Multi-component integration
//! - `ack_tests`: Tracker properties across the factory, sources and stores
//! - `source_tests`: Resume-after-restart through `TrackedSource` with file
//!   and simulated stores
//!
//! **Support Modules**:
//! - `scenarios`: Seeds and reusable in-memory resources
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod scenarios;

// DST test modules (deterministic simulation with fault injection).
#[cfg(test)]
mod ack_dst;

// Integration test modules (multi-component tests).
#[cfg(test)]
mod ack_tests;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs a test-friendly tracing subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `warn`. Safe to call from
/// every test: only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .finish();
    // Already installed by an earlier test.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
