//! Immutable topology snapshots.
//!
//! Every topology mutation produces a brand-new [`ClusterDescription`]; the
//! previous snapshot is left untouched for any reader still holding it.
//!
//! ```text
//!   ClusterDescription
//!   ├── cluster_id, connection_mode, type
//!   ├── servers: [ServerDescription]   (sorted by endpoint, one per endpoint)
//!   ├── dns_monitor_error: Option<String>
//!   └── revision                        (ignored by Eq/Hash)
//!
//!   derived: state = Connected iff any server is Connected
//!            logical_session_timeout = min over connected data-bearing servers
//! ```

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{
    endpoint::EndPoint,
    server_description::{ServerDescription, ServerType},
    settings::ConnectionMode,
};

static NEXT_CLUSTER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identifier of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(u64);

impl ClusterId {
    /// Allocates the next cluster id.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_CLUSTER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of the whole deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClusterType {
    /// Not yet determined.
    #[default]
    Unknown,
    /// A single standalone server.
    Standalone,
    /// A replica set.
    ReplicaSet,
    /// A sharded deployment reached through routers.
    Sharded,
    /// A deployment behind a load balancer.
    LoadBalanced,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Aggregate connection state of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// No server is connected.
    Disconnected,
    /// At least one server is connected.
    Connected,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Immutable snapshot of every known server plus derived topology state.
#[derive(Debug, Clone)]
pub struct ClusterDescription {
    cluster_id: ClusterId,
    connection_mode: ConnectionMode,
    cluster_type: ClusterType,
    servers: Vec<ServerDescription>,
    dns_monitor_error: Option<String>,
    revision: u64,
}

impl ClusterDescription {
    /// Creates a description.
    ///
    /// Servers are ordered by endpoint; if several descriptions share an
    /// endpoint the last one wins.
    #[must_use]
    pub fn new(
        cluster_id: ClusterId,
        connection_mode: ConnectionMode,
        cluster_type: ClusterType,
        servers: impl IntoIterator<Item = ServerDescription>,
        dns_monitor_error: Option<String>,
    ) -> Self {
        let mut sorted: Vec<ServerDescription> = Vec::new();
        for server in servers {
            match sorted.binary_search_by(|s| s.endpoint().cmp(server.endpoint())) {
                Ok(i) => sorted[i] = server,
                Err(i) => sorted.insert(i, server),
            }
        }
        Self {
            cluster_id,
            connection_mode,
            cluster_type,
            servers: sorted,
            dns_monitor_error,
            revision: NEXT_REVISION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Creates the empty description an engine starts with.
    #[must_use]
    pub fn initial(cluster_id: ClusterId, connection_mode: ConnectionMode) -> Self {
        Self::new(cluster_id, connection_mode, ClusterType::Unknown, [], None)
    }

    /// Returns the cluster id.
    #[must_use]
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Returns the connection mode.
    #[must_use]
    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    /// Returns the topology type.
    #[must_use]
    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    /// Returns the servers, ordered by endpoint.
    #[must_use]
    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    /// Returns the description for `endpoint`, if known.
    #[must_use]
    pub fn server(&self, endpoint: &EndPoint) -> Option<&ServerDescription> {
        self.servers
            .binary_search_by(|s| s.endpoint().cmp(endpoint))
            .ok()
            .map(|i| &self.servers[i])
    }

    /// Returns the last DNS monitor error text, if one is pending.
    #[must_use]
    pub fn dns_monitor_error(&self) -> Option<&str> {
        self.dns_monitor_error.as_deref()
    }

    /// Returns the internal revision counter.
    ///
    /// Revisions only order snapshots produced by one process; they take no
    /// part in equality.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns [`ClusterState::Connected`] iff any server is connected.
    #[must_use]
    pub fn state(&self) -> ClusterState {
        if self.servers.iter().any(ServerDescription::is_connected) {
            ClusterState::Connected
        } else {
            ClusterState::Disconnected
        }
    }

    /// Returns the minimum logical session timeout over connected
    /// data-bearing servers.
    ///
    /// `None` if no such server exists or any of them lacks a timeout.
    #[must_use]
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        let mut min: Option<Duration> = None;
        for server in self.servers.iter().filter(|s| s.is_connected() && is_data_bearing(s)) {
            let timeout = server.logical_session_timeout()?;
            min = Some(min.map_or(timeout, |m| m.min(timeout)));
        }
        min
    }

    /// Returns the first connected server, in endpoint order, whose wire range
    /// does not overlap the supported range.
    ///
    /// Servers not yet contacted count as compatible.
    #[must_use]
    pub fn incompatible_server(&self) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| !s.is_compatible_with_driver())
    }

    /// Returns a copy with `server` added or replacing the entry for its endpoint.
    #[must_use]
    pub fn with_server_description(&self, server: ServerDescription) -> Self {
        let mut servers = self.servers.clone();
        servers.push(server);
        Self::new(
            self.cluster_id,
            self.connection_mode,
            self.cluster_type,
            servers,
            self.dns_monitor_error.clone(),
        )
    }

    /// Returns a copy without the entry for `endpoint`.
    #[must_use]
    pub fn without_server_description(&self, endpoint: &EndPoint) -> Self {
        Self::new(
            self.cluster_id,
            self.connection_mode,
            self.cluster_type,
            self.servers.iter().filter(|s| s.endpoint() != endpoint).cloned(),
            self.dns_monitor_error.clone(),
        )
    }

    /// Returns a copy with a different topology type.
    #[must_use]
    pub fn with_type(&self, cluster_type: ClusterType) -> Self {
        Self::new(
            self.cluster_id,
            self.connection_mode,
            cluster_type,
            self.servers.clone(),
            self.dns_monitor_error.clone(),
        )
    }

    /// Returns a copy with the DNS monitor error replaced.
    #[must_use]
    pub fn with_dns_monitor_error(&self, error: Option<String>) -> Self {
        Self::new(self.cluster_id, self.connection_mode, self.cluster_type, self.servers.clone(), error)
    }
}

fn is_data_bearing(server: &ServerDescription) -> bool {
    matches!(
        server.server_type(),
        ServerType::Standalone
            | ServerType::ReplicaSetPrimary
            | ServerType::ReplicaSetSecondary
            | ServerType::ShardRouter
            | ServerType::LoadBalanced
    )
}

impl PartialEq for ClusterDescription {
    fn eq(&self, other: &Self) -> bool {
        self.cluster_id == other.cluster_id
            && self.connection_mode == other.connection_mode
            && self.cluster_type == other.cluster_type
            && self.servers == other.servers
            && self.dns_monitor_error == other.dns_monitor_error
    }
}

impl Eq for ClusterDescription {}

impl Hash for ClusterDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cluster_id.hash(state);
        self.connection_mode.hash(state);
        self.cluster_type.hash(state);
        self.servers.hash(state);
        self.dns_monitor_error.hash(state);
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ClusterId : \"{}\", ConnectionMode : \"{}\", Type : \"{}\", State : \"{}\", Servers : [",
            self.cluster_id,
            self.connection_mode,
            self.cluster_type,
            self.state()
        )?;
        for (i, server) in self.servers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{server}")?;
        }
        f.write_str("]")?;
        if let Some(error) = &self.dns_monitor_error {
            write!(f, ", DnsMonitorException : \"{error}\"")?;
        }
        f.write_str(" }")
    }
}
