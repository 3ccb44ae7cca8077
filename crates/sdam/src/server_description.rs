//! Per-server status snapshots.
//!
//! A [`ServerDescription`] is produced by a server's own monitor and is only
//! ever read here. The engine swaps which description it holds per endpoint;
//! it never mutates one in place.

use std::{fmt, ops::RangeInclusive, time::Duration};

use crate::{
    description::{ClusterId, ClusterType},
    election::{ElectionId, ReplicaSetConfig},
    endpoint::EndPoint,
};

/// Wire protocol versions this engine can talk to.
pub const SUPPORTED_WIRE_VERSION_RANGE: RangeInclusive<i32> = 8..=25;

/// Identity of a server within one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId {
    cluster_id: ClusterId,
    endpoint: EndPoint,
}

impl ServerId {
    /// Creates a server id.
    #[must_use]
    pub fn new(cluster_id: ClusterId, endpoint: EndPoint) -> Self {
        Self { cluster_id, endpoint }
    }

    /// Returns the owning cluster id.
    #[must_use]
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ClusterId : {}, EndPoint : \"{}\" }}", self.cluster_id, self.endpoint)
    }
}

/// Connection state of a server as seen by its monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    /// No connection.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The last heartbeat succeeded.
    Connected,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
        };
        f.write_str(s)
    }
}

/// Role a server reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerType {
    /// Unknown role (not yet contacted, or failed).
    #[default]
    Unknown,
    /// A standalone server.
    Standalone,
    /// A sharded cluster router.
    ShardRouter,
    /// Replica set primary.
    ReplicaSetPrimary,
    /// Replica set secondary.
    ReplicaSetSecondary,
    /// Replica set arbiter.
    ReplicaSetArbiter,
    /// Replica set member in another state (hidden, recovering, ...).
    ReplicaSetOther,
    /// Replica set member that has not joined a configuration.
    ReplicaSetGhost,
    /// A load balancer fronting the deployment.
    LoadBalanced,
}

impl ServerType {
    /// Returns `true` for every replica set role, including ghosts.
    #[must_use]
    pub fn is_replica_set_member(self) -> bool {
        matches!(
            self,
            Self::ReplicaSetPrimary
                | Self::ReplicaSetSecondary
                | Self::ReplicaSetArbiter
                | Self::ReplicaSetOther
                | Self::ReplicaSetGhost
        )
    }

    /// Returns `true` if the server accepts writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReplicaSetPrimary | Self::ShardRouter | Self::Standalone | Self::LoadBalanced)
    }

    /// Returns the topology type implied by this role.
    #[must_use]
    pub fn to_cluster_type(self) -> ClusterType {
        match self {
            Self::Standalone => ClusterType::Standalone,
            Self::ShardRouter => ClusterType::Sharded,
            Self::LoadBalanced => ClusterType::LoadBalanced,
            t if t.is_replica_set_member() => ClusterType::ReplicaSet,
            _ => ClusterType::Unknown,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inclusive range of wire protocol versions a server advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireVersionRange {
    min: i32,
    max: i32,
}

impl WireVersionRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Returns the minimum version.
    #[must_use]
    pub fn min(&self) -> i32 {
        self.min
    }

    /// Returns the maximum version.
    #[must_use]
    pub fn max(&self) -> i32 {
        self.max
    }

    /// Returns `true` if the range overlaps `other`.
    #[must_use]
    pub fn overlaps(&self, other: &RangeInclusive<i32>) -> bool {
        self.min <= *other.end() && *other.start() <= self.max
    }
}

impl fmt::Display for WireVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Status snapshot of one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, bon::Builder)]
pub struct ServerDescription {
    /// Server identity.
    server_id: ServerId,
    /// Endpoint the server was reached at.
    endpoint: EndPoint,
    /// Connection state.
    #[builder(default)]
    state: ServerState,
    /// Self-reported role.
    #[builder(default)]
    server_type: ServerType,
    /// Replica set configuration, for replica set members.
    replica_set_config: Option<ReplicaSetConfig>,
    /// Election id, reported by primaries.
    election_id: Option<ElectionId>,
    /// Advertised wire protocol range; absent until first contact.
    wire_version_range: Option<WireVersionRange>,
    /// Average heartbeat round-trip time.
    #[builder(default)]
    average_round_trip_time: Duration,
    /// Logical session timeout advertised by the server.
    logical_session_timeout: Option<Duration>,
    /// The endpoint the server calls itself (`me`).
    canonical_endpoint: Option<EndPoint>,
    /// Why the server is in this state, for synthetic descriptions.
    #[builder(into)]
    reason: Option<String>,
}

impl ServerDescription {
    /// Creates a disconnected description of unknown type.
    #[must_use]
    pub fn unknown(server_id: ServerId, reason: Option<String>) -> Self {
        let endpoint = server_id.endpoint().clone();
        Self::builder().server_id(server_id).endpoint(endpoint).maybe_reason(reason).build()
    }

    /// Returns the server id.
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    /// Returns the connection state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the server role.
    #[must_use]
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Returns the replica set configuration.
    #[must_use]
    pub fn replica_set_config(&self) -> Option<&ReplicaSetConfig> {
        self.replica_set_config.as_ref()
    }

    /// Returns the election id.
    #[must_use]
    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// Returns the advertised wire version range.
    #[must_use]
    pub fn wire_version_range(&self) -> Option<WireVersionRange> {
        self.wire_version_range
    }

    /// Returns the maximum advertised wire version, or 0 if unknown.
    #[must_use]
    pub fn max_wire_version(&self) -> i32 {
        self.wire_version_range.map_or(0, |r| r.max())
    }

    /// Returns the average round-trip time.
    #[must_use]
    pub fn average_round_trip_time(&self) -> Duration {
        self.average_round_trip_time
    }

    /// Returns the logical session timeout.
    #[must_use]
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        self.logical_session_timeout
    }

    /// Returns the self-reported canonical endpoint.
    #[must_use]
    pub fn canonical_endpoint(&self) -> Option<&EndPoint> {
        self.canonical_endpoint.as_ref()
    }

    /// Returns the reason attached to a synthetic description.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns the reported replica set name.
    #[must_use]
    pub fn replica_set_name(&self) -> Option<&str> {
        self.replica_set_config.as_ref().and_then(ReplicaSetConfig::name)
    }

    /// Returns `true` if the state is [`ServerState::Connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }

    /// Returns `true` unless a connected server advertises a wire range
    /// disjoint from [`SUPPORTED_WIRE_VERSION_RANGE`].
    #[must_use]
    pub fn is_compatible_with_driver(&self) -> bool {
        match (self.state, self.wire_version_range) {
            (ServerState::Connected, Some(range)) => range.overlaps(&SUPPORTED_WIRE_VERSION_RANGE),
            _ => true,
        }
    }

    /// Returns a copy with a different connection state.
    #[must_use]
    pub fn with_state(&self, state: ServerState) -> Self {
        Self { state, ..self.clone() }
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ ServerId : {}, EndPoint : \"{}\", State : \"{}\", Type : \"{}\"",
            self.server_id, self.endpoint, self.state, self.server_type
        )?;
        if let Some(name) = self.replica_set_name() {
            write!(f, ", ReplicaSetName : \"{name}\"")?;
        }
        if let Some(range) = self.wire_version_range {
            write!(f, ", WireVersionRange : \"{range}\"")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ", Reason : \"{reason}\"")?;
        }
        f.write_str(" }")
    }
}
