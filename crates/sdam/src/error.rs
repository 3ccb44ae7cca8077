//! Engine error types.
//!
//! Only a handful of categories ever reach a caller of
//! [`Cluster::select_server`](crate::Cluster::select_server) or
//! [`Cluster::initialize`](crate::Cluster::initialize):
//! - **Configuration**: invalid settings combinations, raised at construction
//! - **Selection timeout**: nothing matched before the deadline
//! - **Incompatibility**: a server speaks a wire protocol outside the supported range
//! - **DNS failure**: recorded on the description, surfaced through timeouts
//!
//! Stale or superseded primaries are never surfaced; the engine handles them by
//! invalidating the offending server.

use snafu::{Location, Snafu};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SdamError>;

/// Errors produced by the topology engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SdamError {
    /// Invalid combination of settings.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// No matching server became available before the deadline.
    #[snafu(display("{message}"))]
    ServerSelectionTimeout {
        /// Rendered message including the last known topology.
        message: String,
    },

    /// A server's wire version range does not overlap the supported range.
    #[snafu(display("{message}"))]
    IncompatibleServer {
        /// Rendered message including the offending server and topology.
        message: String,
    },

    /// The caller cancelled the operation.
    #[snafu(display("Operation was cancelled"))]
    Cancelled,

    /// The engine has been disposed.
    #[snafu(display("Cluster has been disposed"))]
    Disposed,

    /// The engine has not been initialized yet.
    #[snafu(display("Cluster has not been initialized"))]
    NotInitialized,

    /// Too many selections are already waiting for a suitable server.
    #[snafu(display("The server selection wait queue is full (max size {max_size})"))]
    WaitQueueFull {
        /// Configured maximum number of waiters.
        max_size: usize,
    },

    /// SRV record resolution failed.
    #[snafu(display("DNS resolution failed for {service}: {message}"))]
    DnsResolution {
        /// SRV service name that was queried.
        service: String,
        /// Resolver error text.
        message: String,
    },

    /// A load-balanced deployment has not resolved any SRV records yet.
    #[snafu(display("No srv records were resolved."))]
    NoSrvRecords,

    /// The DNS lookup domain cannot be used as an SRV seed.
    #[snafu(display("Invalid DNS lookup domain '{domain}': {reason}"))]
    InvalidLookupDomain {
        /// The rejected domain.
        domain: String,
        /// Why the domain was rejected.
        reason: String,
    },

    /// A cluster time advance was requested without a cluster time.
    #[snafu(display("Cluster time must be present to advance the cluster clock"))]
    MissingClusterTime,

    /// A blocking call was made from a thread already driving a tokio runtime.
    #[snafu(display("{operation} cannot block inside an async runtime; use the async variant"))]
    BlockingInRuntime {
        /// The blocking operation that was called.
        operation: &'static str,
    },

    /// Building an internal runtime or thread failed.
    #[snafu(display("Runtime error at {location}: {source}"))]
    Runtime {
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl SdamError {
    /// Returns `true` if retrying the operation later may succeed.
    ///
    /// Timeouts, DNS failures and a load-balanced deployment that has not yet
    /// resolved its record are transient. Configuration, incompatibility,
    /// cancellation and disposal are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerSelectionTimeout { .. }
                | Self::DnsResolution { .. }
                | Self::NoSrvRecords
                | Self::WaitQueueFull { .. }
        )
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns `true` for selection timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ServerSelectionTimeout { .. })
    }

    /// Returns `true` for wire version incompatibility.
    #[must_use]
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Self::IncompatibleServer { .. })
    }

    /// Builds a configuration error from a message.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        ConfigSnafu { message: message.into() }.build()
    }
}
