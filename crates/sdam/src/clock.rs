//! Cluster-wide logical time.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{MissingClusterTimeSnafu, Result};

/// A cluster time token gossiped between the client and servers.
///
/// Ordering is defined solely by the embedded logical `timestamp`; the
/// signature is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterTime {
    timestamp: u64,
    signature: Vec<u8>,
}

impl ClusterTime {
    /// Creates a cluster time token.
    #[must_use]
    pub fn new(timestamp: u64, signature: impl Into<Vec<u8>>) -> Self {
        Self { timestamp, signature: signature.into() }
    }

    /// Returns the logical timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the opaque signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

impl fmt::Display for ClusterTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ clusterTime : {} }}", self.timestamp)
    }
}

/// Returns whichever operand carries the greater timestamp.
///
/// An absent value is less than any present value. Ties return `x`.
#[must_use]
pub fn greater_cluster_time<'a>(
    x: Option<&'a ClusterTime>,
    y: Option<&'a ClusterTime>,
) -> Option<&'a ClusterTime> {
    match (x, y) {
        (None, y) => y,
        (x, None) => x,
        (Some(a), Some(b)) => {
            if b.timestamp > a.timestamp {
                Some(b)
            } else {
                Some(a)
            }
        },
    }
}

/// Holds the latest cluster time observed by this client.
pub trait ClusterClock: Send + Sync + fmt::Debug {
    /// Returns the current cluster time, if any has been observed.
    fn cluster_time(&self) -> Option<ClusterTime>;

    /// Advances the held cluster time to `new` if it is greater.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::MissingClusterTime`](crate::SdamError::MissingClusterTime)
    /// if `new` is `None`.
    fn advance_cluster_time(&self, new: Option<&ClusterTime>) -> Result<()>;
}

/// Thread-safe monotonic cluster clock.
#[derive(Debug, Default)]
pub struct SharedClusterClock {
    current: Mutex<Option<ClusterTime>>,
}

impl SharedClusterClock {
    /// Creates a clock that has not observed any cluster time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterClock for SharedClusterClock {
    fn cluster_time(&self) -> Option<ClusterTime> {
        self.current.lock().clone()
    }

    fn advance_cluster_time(&self, new: Option<&ClusterTime>) -> Result<()> {
        let new = new.ok_or_else(|| MissingClusterTimeSnafu.build())?;
        let mut current = self.current.lock();
        if current.as_ref().is_none_or(|held| new.timestamp > held.timestamp) {
            *current = Some(new.clone());
        }
        Ok(())
    }
}

/// A clock that never holds a value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpClusterClock;

impl ClusterClock for NoOpClusterClock {
    fn cluster_time(&self) -> Option<ClusterTime> {
        None
    }

    fn advance_cluster_time(&self, new: Option<&ClusterTime>) -> Result<()> {
        new.map(|_| ()).ok_or_else(|| MissingClusterTimeSnafu.build())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::SdamError;

    fn ct(ts: u64) -> ClusterTime {
        ClusterTime::new(ts, vec![ts as u8])
    }

    #[test]
    fn test_greater_cluster_time_absent_is_minimal() {
        let a = ct(5);
        assert_eq!(greater_cluster_time(None, Some(&a)), Some(&a));
        assert_eq!(greater_cluster_time(Some(&a), None), Some(&a));
        assert_eq!(greater_cluster_time(None, None), None);
    }

    #[test]
    fn test_greater_cluster_time_same_operand() {
        let a = ct(7);
        assert!(std::ptr::eq(greater_cluster_time(Some(&a), Some(&a)).unwrap(), &a));
    }

    #[test]
    fn test_advance_rejects_absent() {
        let clock = SharedClusterClock::new();
        let err = clock.advance_cluster_time(None).unwrap_err();
        assert!(matches!(err, SdamError::MissingClusterTime));
        assert!(NoOpClusterClock.advance_cluster_time(None).is_err());
    }

    #[test]
    fn test_advance_keeps_greater() {
        let clock = SharedClusterClock::new();
        clock.advance_cluster_time(Some(&ct(10))).unwrap();
        clock.advance_cluster_time(Some(&ct(3))).unwrap();
        assert_eq!(clock.cluster_time().unwrap().timestamp(), 10);
        clock.advance_cluster_time(Some(&ct(11))).unwrap();
        assert_eq!(clock.cluster_time().unwrap().timestamp(), 11);
    }

    #[test]
    fn test_noop_clock_never_advances() {
        let clock = NoOpClusterClock;
        clock.advance_cluster_time(Some(&ct(10))).unwrap();
        assert!(clock.cluster_time().is_none());
    }

    proptest! {
        #[test]
        fn prop_greater_cluster_time_picks_max(a in any::<u64>(), b in any::<u64>()) {
            let (x, y) = (ct(a), ct(b));
            let picked = greater_cluster_time(Some(&x), Some(&y)).unwrap();
            prop_assert_eq!(picked.timestamp(), a.max(b));
        }

        #[test]
        fn prop_advance_is_monotonic(stamps in proptest::collection::vec(any::<u64>(), 1..32)) {
            let clock = SharedClusterClock::new();
            let mut high = 0u64;
            for ts in stamps {
                clock.advance_cluster_time(Some(&ct(ts))).unwrap();
                let held = clock.cluster_time().unwrap().timestamp();
                prop_assert!(held >= high);
                high = held;
            }
        }
    }
}
