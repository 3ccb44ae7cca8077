//! Replica set and sharded discovery.
//!
//! Membership starts from the seed list (or DNS) and is then driven by what
//! servers report: primaries dictate the host list, the first replica set
//! name seen is adopted, and competing primaries are ordered by
//! `(setVersion, electionId)`.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;

use crate::{
    description::{ClusterDescription, ClusterType},
    election::ElectionInfo,
    endpoint::EndPoint,
    error::Result,
    server_description::{ServerDescription, ServerState, ServerType},
    settings::{ClusterSettings, ConnectionScheme},
};

use super::writer::Writer;

const REPORTED_PRIMARY_IS_STALE: &str = "ReportedPrimaryIsStale";
const NO_LONGER_PRIMARY: &str = "NoLongerPrimary";

pub(super) struct MultiTopology {
    seeds: Vec<EndPoint>,
    initial_type: ClusterType,
    srv: bool,
    srv_max_hosts: usize,
    replica_set_name: Option<String>,
    max_election_info: ElectionInfo,
    dns_results_applied: bool,
}

impl MultiTopology {
    pub(super) fn new(settings: &ClusterSettings) -> Self {
        Self {
            seeds: settings.endpoints().to_vec(),
            initial_type: settings.initial_cluster_type(),
            srv: settings.scheme() == ConnectionScheme::Srv,
            srv_max_hosts: settings.srv_max_hosts(),
            replica_set_name: settings.replica_set_name().map(str::to_string),
            max_election_info: ElectionInfo::default(),
            dns_results_applied: false,
        }
    }

    pub(super) fn initialize(&mut self, writer: &mut Writer<'_>) {
        let mut description = writer.current().with_type(self.initial_type);
        if !self.srv {
            for endpoint in &self.seeds {
                description = writer.ensure_server(description, endpoint);
            }
        }
        writer.publish(description);
    }

    pub(super) fn server_description_changed(
        &mut self,
        writer: &mut Writer<'_>,
        new: ServerDescription,
    ) {
        let current = writer.current();
        let mut description = ClusterDescription::clone(&current);

        if new.state() == ServerState::Disconnected || new.server_type() == ServerType::Unknown {
            description = description.with_server_description(new);
        } else if self.is_server_valid_for_cluster(
            description.cluster_type(),
            new.server_type(),
            writer.server_count(),
        ) {
            if description.cluster_type() == ClusterType::Unknown
                && new.server_type() != ServerType::ReplicaSetGhost
            {
                description = description.with_type(new.server_type().to_cluster_type());
            }
            description = match description.cluster_type() {
                ClusterType::Standalone => Self::standalone_changed(writer, description, new),
                ClusterType::ReplicaSet | ClusterType::Unknown => {
                    self.replica_set_changed(writer, description, new)
                },
                ClusterType::Sharded => Self::sharded_changed(writer, description, new),
                ClusterType::LoadBalanced => description.with_server_description(new),
            };
        } else {
            let reason = format!(
                "The server {} with type {} is not valid for cluster type {}.",
                new.endpoint(),
                new.server_type(),
                description.cluster_type()
            );
            description = writer.remove_server(description, new.endpoint(), &reason);
        }

        if description.cluster_type() == ClusterType::Standalone && description.servers().is_empty()
        {
            description = description.with_type(ClusterType::Unknown);
        }
        writer.publish(description);
    }

    fn is_server_valid_for_cluster(
        &self,
        cluster_type: ClusterType,
        server_type: ServerType,
        server_count: usize,
    ) -> bool {
        match cluster_type {
            ClusterType::Standalone => server_type == ServerType::Standalone,
            ClusterType::ReplicaSet => server_type.is_replica_set_member(),
            ClusterType::Sharded => server_type == ServerType::ShardRouter,
            ClusterType::Unknown => match server_type {
                ServerType::Standalone => server_count == 1 || self.srv,
                t => t.is_replica_set_member() || t == ServerType::ShardRouter,
            },
            ClusterType::LoadBalanced => false,
        }
    }

    fn standalone_changed(
        writer: &mut Writer<'_>,
        mut description: ClusterDescription,
        new: ServerDescription,
    ) -> ClusterDescription {
        match new.server_type() {
            ServerType::Unknown => {},
            ServerType::Standalone => {
                let others: Vec<EndPoint> = description
                    .servers()
                    .iter()
                    .map(|s| s.endpoint().clone())
                    .filter(|ep| ep != new.endpoint())
                    .collect();
                for endpoint in &others {
                    description = writer.remove_server(
                        description,
                        endpoint,
                        "Removing all other end points once a standalone is discovered.",
                    );
                }
            },
            _ => {
                return writer.remove_server(
                    description,
                    new.endpoint(),
                    "Server is not a standalone server.",
                );
            },
        }
        description.with_server_description(new)
    }

    fn sharded_changed(
        writer: &mut Writer<'_>,
        description: ClusterDescription,
        new: ServerDescription,
    ) -> ClusterDescription {
        match new.server_type() {
            ServerType::Unknown | ServerType::ShardRouter => description.with_server_description(new),
            _ => writer.remove_server(description, new.endpoint(), "Server is not a shard router."),
        }
    }

    fn replica_set_changed(
        &mut self,
        writer: &mut Writer<'_>,
        mut description: ClusterDescription,
        new: ServerDescription,
    ) -> ClusterDescription {
        let endpoint = new.endpoint().clone();
        if !new.server_type().is_replica_set_member() {
            let reason = format!("Server is a {}, not a replica set member.", new.server_type());
            return writer.remove_server(description, &endpoint, &reason);
        }
        if new.server_type() == ServerType::ReplicaSetGhost {
            return description.with_server_description(new);
        }

        if self.replica_set_name.is_none() {
            self.replica_set_name = new.replica_set_name().map(str::to_string);
        }
        if self.replica_set_name.as_deref() != new.replica_set_name() {
            let reason = format!(
                "Server was a member of the '{}' replica set, but should be '{}'.",
                new.replica_set_name().unwrap_or_default(),
                self.replica_set_name.as_deref().unwrap_or_default()
            );
            writer.information(reason.clone());
            return writer.remove_server(description, &endpoint, &reason);
        }

        let is_primary = new.server_type() == ServerType::ReplicaSetPrimary;
        if is_primary && !self.accept_primary(writer, &new) {
            let stale =
                ServerDescription::unknown(new.server_id().clone(), Some(REPORTED_PRIMARY_IS_STALE.into()));
            return description.with_server_description(stale);
        }

        description = description.with_server_description(new.clone());
        description = self.ensure_members(writer, description, &new);
        if is_primary {
            description = Self::demote_other_primaries(writer, description, &endpoint);
        }

        if let Some(canonical) = new.canonical_endpoint().filter(|c| **c != endpoint) {
            if !is_primary {
                let reason = format!(
                    "The server's canonical end point {canonical} differs from the end point it was reached at."
                );
                return writer.remove_server(description, &endpoint, &reason);
            }
            let canonical = canonical.clone();
            description = writer.ensure_server(description, &canonical);
            let reason = format!("The primary reports its canonical end point as {canonical}.");
            return writer.remove_server(description, &endpoint, &reason);
        }
        description
    }

    /// Checks a primary's `(setVersion, electionId)` against the tracked
    /// maximum, invalidating the server if its claim is stale.
    fn accept_primary(&mut self, writer: &mut Writer<'_>, new: &ServerDescription) -> bool {
        let set_version = new.replica_set_config().and_then(|c| c.version());
        let election_id = new.election_id();
        if set_version.is_none() && election_id.is_none() {
            return true;
        }

        let Some(next) =
            self.max_election_info.compare(set_version, election_id, new.max_wire_version())
        else {
            let reported = ElectionInfo::new(set_version, election_id);
            if let Some(server) = writer.find_server(new.endpoint()) {
                server.invalidate(REPORTED_PRIMARY_IS_STALE, None);
            }
            tracing::info!(
                endpoint = %new.endpoint(),
                reported = %reported,
                max = %self.max_election_info,
                "Invalidating stale primary"
            );
            writer.information(format!(
                "Invalidating server: setting {} to Unknown because its (setVersion, electionId) {reported} is less than the largest seen {}.",
                new.endpoint(),
                self.max_election_info
            ));
            return false;
        };

        if next != self.max_election_info {
            let message = if self.max_election_info.is_empty() {
                format!("Initializing (maxSetVersion, maxElectionId) to {next}.")
            } else {
                format!(
                    "Updating stale (maxSetVersion, maxElectionId) from {} to {next}.",
                    self.max_election_info
                )
            };
            tracing::debug!(endpoint = %new.endpoint(), max = %next, "Tracked election maximum advanced");
            writer.information(message);
            self.max_election_info = next;
        }
        true
    }

    /// Adds hosts listed by `new` and, for a primary, removes hosts it does
    /// not list.
    fn ensure_members(
        &self,
        writer: &mut Writer<'_>,
        mut description: ClusterDescription,
        new: &ServerDescription,
    ) -> ClusterDescription {
        let Some(config) = new.replica_set_config() else {
            return description;
        };
        let is_primary = new.server_type() == ServerType::ReplicaSetPrimary;
        let primary_known = description
            .servers()
            .iter()
            .any(|s| s.server_type() == ServerType::ReplicaSetPrimary && s.endpoint() != new.endpoint());

        if is_primary || !primary_known {
            for member in config.members() {
                description = writer.ensure_server(description, member);
            }
        }

        if is_primary {
            let unlisted: Vec<EndPoint> = description
                .servers()
                .iter()
                .map(|s| s.endpoint().clone())
                .filter(|ep| !config.members().contains(ep))
                .collect();
            for endpoint in &unlisted {
                description = writer.remove_server(
                    description,
                    endpoint,
                    "Server is not in the host list of the primary.",
                );
            }
        }
        description
    }

    fn demote_other_primaries(
        writer: &mut Writer<'_>,
        mut description: ClusterDescription,
        primary: &EndPoint,
    ) -> ClusterDescription {
        let others: Vec<ServerDescription> = description
            .servers()
            .iter()
            .filter(|s| s.server_type() == ServerType::ReplicaSetPrimary && s.endpoint() != primary)
            .cloned()
            .collect();
        for other in others {
            tracing::info!(endpoint = %other.endpoint(), new_primary = %primary, "Demoting superseded primary");
            if let Some(server) = writer.find_server(other.endpoint()) {
                server.invalidate(NO_LONGER_PRIMARY, None);
            }
            description = description.with_server_description(ServerDescription::unknown(
                other.server_id().clone(),
                Some(NO_LONGER_PRIMARY.into()),
            ));
        }
        description
    }

    pub(super) fn process_dns_results(
        &mut self,
        writer: &mut Writer<'_>,
        endpoints: Vec<EndPoint>,
    ) -> Result<()> {
        if endpoints.is_empty() {
            return Ok(());
        }
        let mut description = ClusterDescription::clone(&writer.current());
        let dns_owned = !self.dns_results_applied
            || matches!(description.cluster_type(), ClusterType::Unknown | ClusterType::Sharded);

        if dns_owned {
            let resolved: BTreeSet<EndPoint> = endpoints.into_iter().collect();
            let known: Vec<EndPoint> =
                description.servers().iter().map(|s| s.endpoint().clone()).collect();

            let mut removed = 0;
            for endpoint in known.iter().filter(|ep| !resolved.contains(*ep)) {
                description = writer.remove_server(
                    description,
                    endpoint,
                    "Server no longer appears in the DNS SRV records.",
                );
                removed += 1;
            }

            let mut added: Vec<EndPoint> =
                resolved.into_iter().filter(|ep| !known.contains(ep)).collect();
            if self.srv_max_hosts > 0 {
                added.shuffle(&mut rand::rng());
                let remaining = known.len() - removed;
                added.truncate(self.srv_max_hosts.saturating_sub(remaining));
            }
            for endpoint in &added {
                description = writer.ensure_server(description, endpoint);
            }
            self.dns_results_applied = true;
        }

        writer.publish(description.with_dns_monitor_error(None));
        Ok(())
    }
}
