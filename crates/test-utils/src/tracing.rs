//! Log output for tests.

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter is read from `RUST_LOG` and defaults to `warn`. Output goes
/// through the test harness's captured writer, so it only shows for failing
/// tests. Later calls are no-ops.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
