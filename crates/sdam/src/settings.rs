//! Engine configuration.
//!
//! [`ClusterSettings`] is built through a validating builder; an invalid
//! combination of connection mode, endpoint count, replica set name or SRV
//! options is rejected at construction time.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cluster_sdam::{ClusterSettings, ConnectionMode, EndPoint};
//!
//! let settings = ClusterSettings::builder()
//!     .endpoints(vec![EndPoint::new("db1.example.com", 27017)])
//!     .connection_mode(ConnectionMode::ReplicaSet)
//!     .replica_set_name("rs0")
//!     .server_selection_timeout(Duration::from_secs(5))
//!     .build()
//!     .expect("valid settings");
//! ```

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    description::ClusterType,
    dns_monitor::validate_lookup_domain,
    endpoint::EndPoint,
    error::{Result, SdamError},
    selector::ServerSelector,
};

/// Default server selection timeout (30 seconds).
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of concurrently waiting selections.
pub const DEFAULT_MAX_SERVER_SELECTION_WAIT_QUEUE_SIZE: usize = 500;

/// Default minimum interval between heartbeat requests (500 ms).
pub const DEFAULT_MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default lower bound for the DNS rescan delay (60 seconds).
pub const DEFAULT_DNS_MIN_RESCAN_DELAY: Duration = Duration::from_secs(60);

/// Default delay before retrying a DNS scan that produced no hosts (60 seconds).
pub const DEFAULT_DNS_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default SRV service name.
pub const DEFAULT_SRV_SERVICE_NAME: &str = "mongodb";

/// How the engine should treat its seed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionMode {
    /// Discover the topology type from server reports.
    #[default]
    Automatic,
    /// Talk to exactly one server regardless of its role.
    Direct,
    /// Expect a replica set.
    ReplicaSet,
    /// Expect a sharded deployment.
    Sharded,
    /// Expect one standalone server.
    Standalone,
    /// Talk to a single load balancer.
    LoadBalanced,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How seed endpoints are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionScheme {
    /// Endpoints are server addresses.
    #[default]
    Standard,
    /// The single endpoint's host is a DNS domain to query for SRV records.
    Srv,
}

/// Which engine variant a set of settings calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// One fixed endpoint.
    Single,
    /// Replica set or sharded discovery.
    Multi,
    /// One load balancer.
    LoadBalanced,
}

/// Validated engine configuration.
#[derive(Clone)]
pub struct ClusterSettings {
    endpoints: Vec<EndPoint>,
    connection_mode: ConnectionMode,
    scheme: ConnectionScheme,
    replica_set_name: Option<String>,
    srv_service_name: String,
    srv_max_hosts: usize,
    server_selection_timeout: Duration,
    max_server_selection_wait_queue_size: usize,
    min_heartbeat_interval: Duration,
    dns_min_rescan_delay: Duration,
    dns_retry_delay: Duration,
    pre_server_selector: Option<Arc<dyn ServerSelector>>,
    post_server_selector: Option<Arc<dyn ServerSelector>>,
}

#[bon::bon]
impl ClusterSettings {
    /// Creates validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Config`] for any invalid combination.
    #[builder]
    pub fn new(
        endpoints: Vec<EndPoint>,
        #[builder(default)] connection_mode: ConnectionMode,
        #[builder(default)] scheme: ConnectionScheme,
        #[builder(into)] replica_set_name: Option<String>,
        #[builder(into, default = DEFAULT_SRV_SERVICE_NAME.to_string())] srv_service_name: String,
        #[builder(default)] srv_max_hosts: usize,
        #[builder(default = DEFAULT_SERVER_SELECTION_TIMEOUT)] server_selection_timeout: Duration,
        #[builder(default = DEFAULT_MAX_SERVER_SELECTION_WAIT_QUEUE_SIZE)]
        max_server_selection_wait_queue_size: usize,
        #[builder(default = DEFAULT_MIN_HEARTBEAT_INTERVAL)] min_heartbeat_interval: Duration,
        #[builder(default = DEFAULT_DNS_MIN_RESCAN_DELAY)] dns_min_rescan_delay: Duration,
        #[builder(default = DEFAULT_DNS_RETRY_DELAY)] dns_retry_delay: Duration,
        pre_server_selector: Option<Arc<dyn ServerSelector>>,
        post_server_selector: Option<Arc<dyn ServerSelector>>,
    ) -> Result<Self> {
        let settings = Self {
            endpoints,
            connection_mode,
            scheme,
            replica_set_name,
            srv_service_name,
            srv_max_hosts,
            server_selection_timeout,
            max_server_selection_wait_queue_size,
            min_heartbeat_interval,
            dns_min_rescan_delay,
            dns_retry_delay,
            pre_server_selector,
            post_server_selector,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl ClusterSettings {
    /// Validates the combination of settings.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(SdamError::config("At least one endpoint must be specified."));
        }
        if self.replica_set_name.as_deref() == Some("") {
            return Err(SdamError::config("Replica set name cannot be empty."));
        }
        if self.server_selection_timeout.is_zero() {
            return Err(SdamError::config("server_selection_timeout must be > 0."));
        }
        if self.max_server_selection_wait_queue_size == 0 {
            return Err(SdamError::config("max_server_selection_wait_queue_size must be > 0."));
        }
        if self.srv_service_name.is_empty() {
            return Err(SdamError::config("srv_service_name cannot be empty."));
        }

        let single_endpoint = self.endpoints.len() == 1;
        match self.connection_mode {
            ConnectionMode::Direct | ConnectionMode::Standalone if !single_endpoint => {
                return Err(SdamError::config(format!(
                    "{} connection mode requires exactly one endpoint.",
                    self.connection_mode
                )));
            },
            ConnectionMode::LoadBalanced => {
                if !single_endpoint {
                    return Err(SdamError::config(
                        "Load balanced mode cannot be used with multiple host names.",
                    ));
                }
                if self.replica_set_name.is_some() {
                    return Err(SdamError::config(
                        "Load balanced mode cannot be used with a replica set name.",
                    ));
                }
                if self.srv_max_hosts > 0 {
                    return Err(SdamError::config(
                        "Load balanced mode cannot be used with srv_max_hosts.",
                    ));
                }
            },
            _ => {},
        }

        if self.scheme == ConnectionScheme::Srv {
            if !single_endpoint {
                return Err(SdamError::config("The SRV scheme requires exactly one host name."));
            }
            match self.connection_mode {
                ConnectionMode::Direct => {
                    return Err(SdamError::config(
                        "The SRV scheme cannot be used with a direct connection.",
                    ));
                },
                ConnectionMode::Standalone => {
                    return Err(SdamError::config(
                        "The SRV scheme cannot be used with standalone mode.",
                    ));
                },
                _ => {},
            }
            validate_lookup_domain(self.endpoints[0].host())?;
        } else if self.srv_max_hosts > 0 {
            return Err(SdamError::config("srv_max_hosts requires the SRV scheme."));
        }

        if self.srv_max_hosts > 0 && self.replica_set_name.is_some() {
            return Err(SdamError::config("srv_max_hosts cannot be used with a replica set name."));
        }
        Ok(())
    }

    /// Returns the seed endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &[EndPoint] {
        &self.endpoints
    }

    /// Returns the connection mode.
    #[must_use]
    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    /// Returns the connection scheme.
    #[must_use]
    pub fn scheme(&self) -> ConnectionScheme {
        self.scheme
    }

    /// Returns the configured replica set name.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_name.as_deref()
    }

    /// Returns the SRV service name.
    #[must_use]
    pub fn srv_service_name(&self) -> &str {
        &self.srv_service_name
    }

    /// Returns the maximum number of SRV-discovered hosts (0 = unlimited).
    #[must_use]
    pub fn srv_max_hosts(&self) -> usize {
        self.srv_max_hosts
    }

    /// Returns the server selection timeout.
    #[must_use]
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Returns the maximum number of waiting selections.
    #[must_use]
    pub fn max_server_selection_wait_queue_size(&self) -> usize {
        self.max_server_selection_wait_queue_size
    }

    /// Returns the minimum heartbeat request interval.
    #[must_use]
    pub fn min_heartbeat_interval(&self) -> Duration {
        self.min_heartbeat_interval
    }

    /// Returns the lower bound for the DNS rescan delay.
    #[must_use]
    pub fn dns_min_rescan_delay(&self) -> Duration {
        self.dns_min_rescan_delay
    }

    /// Returns the delay used after a scan that produced no valid hosts.
    #[must_use]
    pub fn dns_retry_delay(&self) -> Duration {
        self.dns_retry_delay
    }

    /// Returns the selector applied before the operation selector.
    #[must_use]
    pub fn pre_server_selector(&self) -> Option<&Arc<dyn ServerSelector>> {
        self.pre_server_selector.as_ref()
    }

    /// Returns the selector applied after the operation selector.
    #[must_use]
    pub fn post_server_selector(&self) -> Option<&Arc<dyn ServerSelector>> {
        self.post_server_selector.as_ref()
    }

    /// Returns the DNS domain to query when using the SRV scheme.
    #[must_use]
    pub fn srv_lookup_domain(&self) -> Option<&str> {
        match self.scheme {
            ConnectionScheme::Srv => self.endpoints.first().map(EndPoint::host),
            ConnectionScheme::Standard => None,
        }
    }

    /// Returns the topology type the engine starts with.
    #[must_use]
    pub fn initial_cluster_type(&self) -> ClusterType {
        match self.connection_mode {
            ConnectionMode::LoadBalanced => ClusterType::LoadBalanced,
            ConnectionMode::ReplicaSet => ClusterType::ReplicaSet,
            ConnectionMode::Sharded => ClusterType::Sharded,
            ConnectionMode::Automatic if self.replica_set_name.is_some() => ClusterType::ReplicaSet,
            _ => ClusterType::Unknown,
        }
    }

    /// Returns which engine variant these settings call for.
    #[must_use]
    pub fn cluster_kind(&self) -> ClusterKind {
        match self.connection_mode {
            ConnectionMode::LoadBalanced => ClusterKind::LoadBalanced,
            ConnectionMode::Direct | ConnectionMode::Standalone => ClusterKind::Single,
            ConnectionMode::Automatic | ConnectionMode::ReplicaSet | ConnectionMode::Sharded => {
                ClusterKind::Multi
            },
        }
    }
}

impl fmt::Debug for ClusterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSettings")
            .field("endpoints", &self.endpoints)
            .field("connection_mode", &self.connection_mode)
            .field("scheme", &self.scheme)
            .field("replica_set_name", &self.replica_set_name)
            .field("srv_service_name", &self.srv_service_name)
            .field("srv_max_hosts", &self.srv_max_hosts)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .field("max_server_selection_wait_queue_size", &self.max_server_selection_wait_queue_size)
            .field("min_heartbeat_interval", &self.min_heartbeat_interval)
            .field("pre_server_selector", &self.pre_server_selector.as_ref().map(|s| s.to_string()))
            .field("post_server_selector", &self.post_server_selector.as_ref().map(|s| s.to_string()))
            .finish_non_exhaustive()
    }
}
