//! Polling assertions for state that a background task or thread updates.
//!
//! Topology changes arrive from monitor threads and spawned publishers, so
//! tests wait on a predicate instead of sleeping for a fixed period.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// How often a pending condition is re-evaluated.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Waits until `condition` holds or `timeout` passes.
///
/// Sleeps on the tokio clock between polls, so under `start_paused` the wait
/// advances virtual time rather than wall time. The condition is evaluated
/// one last time at the deadline.
///
/// Returns whether the condition was observed to hold.
///
/// ```no_run
/// use std::sync::{
///     Arc,
///     atomic::{AtomicUsize, Ordering},
/// };
/// use std::time::Duration;
///
/// use cluster_sdam_test_utils::assert_eventually;
///
/// #[tokio::test]
/// async fn heartbeat_is_requested() {
///     let requests = Arc::new(AtomicUsize::new(0));
///     let monitor = Arc::clone(&requests);
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(20)).await;
///         monitor.fetch_add(1, Ordering::SeqCst);
///     });
///
///     assert!(
///         assert_eventually(Duration::from_secs(1), || requests.load(Ordering::SeqCst) > 0)
///             .await
///     );
/// }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Thread-blocking form of [`assert_eventually`], for tests that observe a
/// monitor thread without an async runtime of their own.
pub fn assert_eventually_blocking<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    condition()
}
