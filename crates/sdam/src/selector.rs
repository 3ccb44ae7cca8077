//! Composable server selectors.
//!
//! A selector narrows an unordered list of candidate servers to those
//! eligible for an operation. Selection runs a pipeline of
//! pre-selector → operation selector → post-selector over the connected
//! servers of one snapshot; the engine then takes the first candidate it can
//! resolve to a live server handle.

use std::{fmt, sync::Arc};

use crate::{
    description::{ClusterDescription, ClusterType},
    endpoint::EndPoint,
    server_description::{ServerDescription, ServerType},
};

/// Filters candidate servers for an operation.
pub trait ServerSelector: Send + Sync + fmt::Debug + fmt::Display {
    /// Returns the subset of `servers` eligible under this selector.
    fn select_servers(
        &self,
        cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription>;
}

/// Applies several selectors in sequence, each narrowing the previous output.
#[derive(Debug, Clone)]
pub struct CompositeServerSelector {
    selectors: Vec<Arc<dyn ServerSelector>>,
}

impl CompositeServerSelector {
    /// Creates a composite from selectors applied in order.
    #[must_use]
    pub fn new(selectors: impl IntoIterator<Item = Arc<dyn ServerSelector>>) -> Self {
        Self { selectors: selectors.into_iter().collect() }
    }
}

impl ServerSelector for CompositeServerSelector {
    fn select_servers(
        &self,
        cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        let mut current = servers.to_vec();
        for selector in &self.selectors {
            if current.is_empty() {
                break;
            }
            current = selector.select_servers(cluster, &current);
        }
        current
    }
}

impl fmt::Display for CompositeServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompositeServerSelector{ Selectors = ")?;
        for (i, selector) in self.selectors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{selector}")?;
        }
        f.write_str(" }")
    }
}

/// Selects the server at one endpoint.
#[derive(Debug, Clone)]
pub struct EndPointServerSelector {
    endpoint: EndPoint,
}

impl EndPointServerSelector {
    /// Creates a selector matching `endpoint`.
    #[must_use]
    pub fn new(endpoint: EndPoint) -> Self {
        Self { endpoint }
    }
}

impl ServerSelector for EndPointServerSelector {
    fn select_servers(
        &self,
        _cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        servers.iter().filter(|s| s.endpoint() == &self.endpoint).cloned().collect()
    }
}

impl fmt::Display for EndPointServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndPointServerSelector{{ EndPoint = {} }}", self.endpoint)
    }
}

/// Selects servers that accept writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableServerSelector;

impl ServerSelector for WritableServerSelector {
    fn select_servers(
        &self,
        cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        if cluster.cluster_type() == ClusterType::LoadBalanced {
            return servers.to_vec();
        }
        servers.iter().filter(|s| s.server_type().is_writable()).cloned().collect()
    }
}

impl fmt::Display for WritableServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WritableServerSelector")
    }
}

/// Read preference modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreferenceMode {
    /// Only the primary.
    #[default]
    Primary,
    /// The primary if available, otherwise secondaries.
    PrimaryPreferred,
    /// Only secondaries.
    Secondary,
    /// Secondaries if available, otherwise the primary.
    SecondaryPreferred,
    /// Any data-bearing member.
    Nearest,
}

/// Selects servers by read preference mode.
///
/// Outside a replica set every server of a compatible type is eligible.
/// No latency window is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadPreferenceServerSelector {
    mode: ReadPreferenceMode,
}

impl ReadPreferenceServerSelector {
    /// Creates a selector for `mode`.
    #[must_use]
    pub fn new(mode: ReadPreferenceMode) -> Self {
        Self { mode }
    }

    /// Selects only the primary.
    #[must_use]
    pub fn primary() -> Self {
        Self::new(ReadPreferenceMode::Primary)
    }
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select_servers(
        &self,
        cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        let of_type = |t: ServerType| -> Vec<ServerDescription> {
            servers.iter().filter(|s| s.server_type() == t).cloned().collect()
        };

        match cluster.cluster_type() {
            ClusterType::ReplicaSet => {
                let primaries = of_type(ServerType::ReplicaSetPrimary);
                let secondaries = of_type(ServerType::ReplicaSetSecondary);
                match self.mode {
                    ReadPreferenceMode::Primary => primaries,
                    ReadPreferenceMode::Secondary => secondaries,
                    ReadPreferenceMode::PrimaryPreferred if !primaries.is_empty() => primaries,
                    ReadPreferenceMode::PrimaryPreferred => secondaries,
                    ReadPreferenceMode::SecondaryPreferred if !secondaries.is_empty() => {
                        secondaries
                    },
                    ReadPreferenceMode::SecondaryPreferred => primaries,
                    ReadPreferenceMode::Nearest => primaries.into_iter().chain(secondaries).collect(),
                }
            },
            ClusterType::Unknown => Vec::new(),
            ClusterType::Standalone | ClusterType::Sharded | ClusterType::LoadBalanced => servers
                .iter()
                .filter(|s| {
                    matches!(
                        s.server_type(),
                        ServerType::Standalone | ServerType::ShardRouter | ServerType::LoadBalanced
                    )
                })
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for ReadPreferenceServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadPreferenceServerSelector{{ ReadPreference = {{ Mode : {:?} }} }}", self.mode)
    }
}

type SelectFn = dyn Fn(&ClusterDescription, &[ServerDescription]) -> Vec<ServerDescription>
    + Send
    + Sync;

/// Selects servers with an arbitrary closure.
#[derive(Clone)]
pub struct DelegateServerSelector {
    name: String,
    select: Arc<SelectFn>,
}

impl DelegateServerSelector {
    /// Creates a selector named `name` that delegates to `select`.
    pub fn new<F>(name: impl Into<String>, select: F) -> Self
    where
        F: Fn(&ClusterDescription, &[ServerDescription]) -> Vec<ServerDescription>
            + Send
            + Sync
            + 'static,
    {
        Self { name: name.into(), select: Arc::new(select) }
    }
}

impl ServerSelector for DelegateServerSelector {
    fn select_servers(
        &self,
        cluster: &ClusterDescription,
        servers: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        (self.select)(cluster, servers)
    }
}

impl fmt::Debug for DelegateServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateServerSelector").field("name", &self.name).finish_non_exhaustive()
    }
}

impl fmt::Display for DelegateServerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DelegateServerSelector{{ {} }}", self.name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        description::ClusterId,
        server_description::{ServerId, ServerState},
        settings::ConnectionMode,
    };

    fn desc(id: ClusterId, host: &str, t: ServerType) -> ServerDescription {
        let ep = EndPoint::new(host, 27017);
        ServerDescription::builder()
            .server_id(ServerId::new(id, ep.clone()))
            .endpoint(ep)
            .state(ServerState::Connected)
            .server_type(t)
            .build()
    }

    fn replica_set() -> (ClusterDescription, Vec<ServerDescription>) {
        let id = ClusterId::new();
        let servers = vec![
            desc(id, "a", ServerType::ReplicaSetPrimary),
            desc(id, "b", ServerType::ReplicaSetSecondary),
            desc(id, "c", ServerType::ReplicaSetArbiter),
        ];
        let cluster = ClusterDescription::new(
            id,
            ConnectionMode::Automatic,
            ClusterType::ReplicaSet,
            servers.clone(),
            None,
        );
        (cluster, servers)
    }

    fn hosts(servers: &[ServerDescription]) -> Vec<&str> {
        servers.iter().map(|s| s.endpoint().host()).collect()
    }

    #[test]
    fn test_writable_selects_primary() {
        let (cluster, servers) = replica_set();
        assert_eq!(hosts(&WritableServerSelector.select_servers(&cluster, &servers)), ["a"]);
    }

    #[test]
    fn test_read_preference_modes() {
        let (cluster, servers) = replica_set();
        let pick = |mode| hosts(&ReadPreferenceServerSelector::new(mode).select_servers(&cluster, &servers)).join(",");
        assert_eq!(pick(ReadPreferenceMode::Primary), "a");
        assert_eq!(pick(ReadPreferenceMode::Secondary), "b");
        assert_eq!(pick(ReadPreferenceMode::SecondaryPreferred), "b");
        assert_eq!(pick(ReadPreferenceMode::Nearest), "a,b");

        let no_secondary: Vec<_> = servers.iter().filter(|s| s.endpoint().host() != "b").cloned().collect();
        let s = ReadPreferenceServerSelector::new(ReadPreferenceMode::SecondaryPreferred)
            .select_servers(&cluster, &no_secondary);
        assert_eq!(hosts(&s), ["a"]);
    }

    #[test]
    fn test_read_preference_unknown_topology_selects_nothing() {
        let id = ClusterId::new();
        let servers = vec![desc(id, "a", ServerType::Unknown)];
        let cluster = ClusterDescription::initial(id, ConnectionMode::Automatic);
        assert!(ReadPreferenceServerSelector::primary().select_servers(&cluster, &servers).is_empty());
    }

    #[test]
    fn test_endpoint_selector() {
        let (cluster, servers) = replica_set();
        let s = EndPointServerSelector::new(EndPoint::new("c", 27017));
        assert_eq!(hosts(&s.select_servers(&cluster, &servers)), ["c"]);
    }

    #[test]
    fn test_composite_narrows_in_order() {
        let (cluster, servers) = replica_set();
        let composite = CompositeServerSelector::new([
            Arc::new(ReadPreferenceServerSelector::new(ReadPreferenceMode::Nearest)) as Arc<dyn ServerSelector>,
            Arc::new(EndPointServerSelector::new(EndPoint::new("b", 27017))),
        ]);
        assert_eq!(hosts(&composite.select_servers(&cluster, &servers)), ["b"]);
        assert!(composite.to_string().starts_with("CompositeServerSelector{"));
    }

    #[test]
    fn test_delegate_selector() {
        let (cluster, servers) = replica_set();
        let s = DelegateServerSelector::new("last", |_, servers: &[ServerDescription]| {
            servers.last().cloned().into_iter().collect()
        });
        assert_eq!(hosts(&s.select_servers(&cluster, &servers)), ["c"]);
        assert_eq!(s.to_string(), "DelegateServerSelector{ last }");
    }
}
