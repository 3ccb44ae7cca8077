//! Shared test utilities for the cluster-sdam crates.
//!
//! - [`assert_eventually`] - Poll a condition from async code until it's true or timeout
//! - [`assert_eventually_blocking`] - The same from a plain thread
//! - [`init_test_tracing`] - Route `tracing` output through the test harness

#![deny(unsafe_code)]

mod assertions;
pub use assertions::{assert_eventually, assert_eventually_blocking};

mod tracing;
pub use self::tracing::init_test_tracing;
