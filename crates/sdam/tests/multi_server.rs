//! Replica set and sharded discovery tests.
//!
//! Every test drives the engine by publishing descriptions from mock servers
//! and inspecting the resulting cluster description, server registry and
//! events.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use cluster_sdam::{
    ClusterType, ConnectionMode, ElectionId, ReplicaSetConfig, Server, ServerDescription,
    ServerState, ServerType, mock,
};
use proptest::prelude::*;

use crate::common::{TestCluster, ep, settings, srv_settings};

// =============================================================================
// Replica set discovery
// =============================================================================

#[test]
fn test_seeds_create_one_server_each() {
    let harness = TestCluster::start(settings(&["a", "b", "c"], ConnectionMode::Automatic));

    assert_eq!(harness.factory.created_count(), 3);
    assert_eq!(harness.hosts(), vec!["a", "b", "c"]);
    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Unknown);
    for server in harness.factory.servers() {
        assert_eq!(server.initialize_calls(), 1);
    }
}

#[test]
fn test_primary_host_list_removes_unlisted_seed() {
    let harness = TestCluster::start(settings(&["a", "b", "c"], ConnectionMode::Automatic));
    let c = harness.server("c");

    harness.report_primary("a", "rs0", &["a", "b"], Some(1), Some(1));

    let description = harness.cluster.description();
    assert_eq!(description.cluster_type(), ClusterType::ReplicaSet);
    assert_eq!(harness.hosts(), vec!["a", "b"]);
    assert!(harness.cluster.server(&ep("c")).is_none());
    assert_eq!(c.dispose_calls(), 1);
    assert_eq!(
        harness.events.removal_reasons(),
        vec!["Server is not in the host list of the primary.".to_string()]
    );
}

#[test]
fn test_secondary_adds_members_when_no_primary_known() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Automatic));

    harness.report_secondary("a", "rs0", &["a", "b", "c"]);

    assert_eq!(harness.hosts(), vec!["a", "b", "c"]);
    assert_eq!(harness.factory.created_count(), 3);
    assert_eq!(harness.server("b").initialize_calls(), 1);
}

#[test]
fn test_newer_primary_demotes_previous_one() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report_primary("a", "rs0", &["a", "b"], Some(1), Some(1));
    harness.report_primary("b", "rs0", &["a", "b"], Some(2), Some(1));

    assert_eq!(harness.server("a").invalidations(), vec!["NoLongerPrimary".to_string()]);
    assert_eq!(harness.server_type("a"), Some(ServerType::Unknown));
    assert_eq!(harness.server_type("b"), Some(ServerType::ReplicaSetPrimary));
}

#[test]
fn test_primary_at_non_canonical_endpoint_demotes_previous_one() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));
    harness.report_primary("a", "rs0", &["a", "b", "b2"], Some(1), Some(1));

    let b = harness.server("b");
    let config = ReplicaSetConfig::new(
        mock::endpoints(&["a", "b", "b2"]),
        Some("rs0".to_string()),
        None,
        Some(1),
    );
    b.publish(
        ServerDescription::builder()
            .server_id(b.server_id().clone())
            .endpoint(ep("b"))
            .state(ServerState::Connected)
            .server_type(ServerType::ReplicaSetPrimary)
            .replica_set_config(config)
            .election_id(ElectionId::from_counter(5))
            .wire_version_range(mock::MOCK_WIRE_VERSION_RANGE)
            .canonical_endpoint(ep("b2"))
            .build(),
    );

    assert_eq!(harness.server("a").invalidations(), vec!["NoLongerPrimary".to_string()]);
    assert_eq!(harness.server_type("a"), Some(ServerType::Unknown));
    assert_eq!(harness.hosts(), vec!["a", "b2"]);
    assert!(harness.cluster.description().servers().iter().all(|s| !s.server_type().is_writable()));
}

#[test]
fn test_stale_primary_is_invalidated() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report_primary("a", "rs0", &["a", "b"], Some(1), Some(2));
    harness.report_primary("b", "rs0", &["a", "b"], Some(1), Some(1));

    let b = harness.server("b");
    assert_eq!(b.invalidations(), vec!["ReportedPrimaryIsStale".to_string()]);
    assert!(harness.server("a").invalidations().is_empty());
    assert_eq!(harness.server_type("a"), Some(ServerType::ReplicaSetPrimary));
    assert_eq!(harness.server_type("b"), Some(ServerType::Unknown));
    let description = harness.cluster.description();
    assert_eq!(description.server(&ep("b")).unwrap().reason(), Some("ReportedPrimaryIsStale"));
    assert!(
        harness.events.information().iter().any(|m| m.starts_with("Invalidating server: setting b:27017 to Unknown")),
        "expected a stale primary diagnostic, got {:?}",
        harness.events.information()
    );
}

#[test]
fn test_primary_without_election_info_always_wins() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report_primary("a", "rs0", &["a", "b"], None, None);
    harness.report_primary("b", "rs0", &["a", "b"], None, None);

    assert_eq!(harness.server_type("a"), Some(ServerType::Unknown));
    assert_eq!(harness.server_type("b"), Some(ServerType::ReplicaSetPrimary));
}

#[test]
fn test_replica_set_name_mismatch_removes_server() {
    let settings = cluster_sdam::ClusterSettings::builder()
        .endpoints(mock::endpoints(&["a", "b"]))
        .replica_set_name("rs0")
        .build()
        .unwrap();
    let harness = TestCluster::start(settings);
    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::ReplicaSet);

    harness.report_secondary("a", "other", &["a", "b"]);

    let expected = "Server was a member of the 'other' replica set, but should be 'rs0'.";
    assert_eq!(harness.hosts(), vec!["b"]);
    assert_eq!(harness.events.removal_reasons(), vec![expected.to_string()]);
    assert!(harness.events.information().contains(&expected.to_string()));
}

#[test]
fn test_first_set_name_seen_is_adopted() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report_secondary("a", "rs0", &["a", "b"]);
    harness.report_secondary("b", "rs1", &["a", "b"]);

    assert_eq!(harness.hosts(), vec!["a"]);
}

#[test]
fn test_ghost_does_not_decide_cluster_type() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report("a", ServerType::ReplicaSetGhost);

    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Unknown);
    assert_eq!(harness.server_type("a"), Some(ServerType::ReplicaSetGhost));
}

#[test]
fn test_non_member_in_replica_set_is_removed() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::ReplicaSet));

    harness.report("b", ServerType::ShardRouter);

    assert_eq!(harness.hosts(), vec!["a"]);
    assert_eq!(
        harness.events.removal_reasons(),
        vec!["The server b:27017 with type ShardRouter is not valid for cluster type ReplicaSet.".to_string()]
    );
}

#[test]
fn test_disconnected_report_keeps_membership() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));
    harness.report_primary("a", "rs0", &["a", "b"], Some(1), Some(1));

    let a = harness.server("a");
    a.publish(cluster_sdam::ServerDescription::unknown(a.server_id().clone(), None));

    assert_eq!(harness.hosts(), vec!["a", "b"]);
    assert_eq!(harness.server_type("a"), Some(ServerType::Unknown));
    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::ReplicaSet);
}

// =============================================================================
// Standalone and sharded discovery
// =============================================================================

#[test]
fn test_single_seed_standalone() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Automatic));

    harness.report("a", ServerType::Standalone);

    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Standalone);
    assert_eq!(harness.server_type("a"), Some(ServerType::Standalone));
}

#[test]
fn test_standalone_among_several_seeds_is_removed() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report("a", ServerType::Standalone);

    assert_eq!(harness.hosts(), vec!["b"]);
    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Unknown);
    assert_eq!(harness.server("a").dispose_calls(), 1);
}

#[test]
fn test_shard_routers_form_sharded_cluster() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    harness.report("a", ServerType::ShardRouter);
    harness.report("b", ServerType::ReplicaSetSecondary);

    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Sharded);
    assert_eq!(harness.hosts(), vec!["a"]);
    assert_eq!(
        harness.events.removal_reasons(),
        vec!["The server b:27017 with type ReplicaSetSecondary is not valid for cluster type Sharded.".to_string()]
    );
}

#[test]
fn test_removed_server_reports_are_ignored() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Sharded));
    harness.report("b", ServerType::Standalone);
    let b = harness.server("b");
    assert_eq!(b.dispose_calls(), 1);
    let revision = harness.cluster.description().revision();

    b.publish(mock::connected_description(b.server_id(), ServerType::ShardRouter));

    assert_eq!(harness.hosts(), vec!["a"]);
    assert_eq!(harness.cluster.description().revision(), revision);
}

// =============================================================================
// DNS-seeded membership
// =============================================================================

fn srv_hosts(names: &[&str]) -> Vec<cluster_sdam::EndPoint> {
    names.iter().map(|n| ep(&format!("{n}.example.com"))).collect()
}

#[test]
fn test_dns_results_reconcile_membership() {
    let harness = TestCluster::start(srv_settings("cluster0.example.com", ConnectionMode::Automatic));
    assert_eq!(harness.factory.created_count(), 0);

    harness.cluster.process_dns_results(srv_hosts(&["h1", "h2"])).unwrap();
    assert_eq!(harness.hosts(), vec!["h1.example.com", "h2.example.com"]);

    harness.cluster.process_dns_results(srv_hosts(&["h2", "h3"])).unwrap();
    assert_eq!(harness.hosts(), vec!["h2.example.com", "h3.example.com"]);
    assert_eq!(harness.server("h1.example.com").dispose_calls(), 1);
    assert_eq!(
        harness.events.removal_reasons(),
        vec!["Server no longer appears in the DNS SRV records.".to_string()]
    );

    harness.cluster.dispose();
}

#[test]
fn test_dns_results_respect_srv_max_hosts() {
    let settings = cluster_sdam::ClusterSettings::builder()
        .endpoints(vec![ep("cluster0.example.com")])
        .scheme(cluster_sdam::ConnectionScheme::Srv)
        .srv_max_hosts(2)
        .build()
        .unwrap();
    let harness = TestCluster::start(settings);

    harness.cluster.process_dns_results(srv_hosts(&["h1", "h2", "h3", "h4"])).unwrap();
    assert_eq!(harness.cluster.description().servers().len(), 2);

    // One host disappears: exactly one replacement is drawn.
    let kept: Vec<_> = harness.cluster.description().servers().iter().map(|s| s.endpoint().clone()).collect();
    let mut next = vec![kept[0].clone()];
    next.extend(srv_hosts(&["h1", "h2", "h3", "h4"]).into_iter().filter(|e| !kept.contains(e)));
    harness.cluster.process_dns_results(next).unwrap();

    let description = harness.cluster.description();
    assert_eq!(description.servers().len(), 2);
    assert!(description.server(&kept[0]).is_some());
    assert!(description.server(&kept[1]).is_none());

    harness.cluster.dispose();
}

#[test]
fn test_dns_results_ignored_once_replica_set_discovered() {
    let harness = TestCluster::start(srv_settings("cluster0.example.com", ConnectionMode::Automatic));
    harness.cluster.process_dns_results(srv_hosts(&["h1", "h2"])).unwrap();
    assert!(!harness.cluster.should_dns_monitor_stop());

    harness.report_primary("h1.example.com", "rs0", &["h1.example.com", "h2.example.com"], Some(1), Some(1));
    assert!(harness.cluster.should_dns_monitor_stop());

    harness.cluster.process_dns_results(srv_hosts(&["h9"])).unwrap();
    assert_eq!(harness.hosts(), vec!["h1.example.com", "h2.example.com"]);

    harness.cluster.dispose();
}

#[test]
fn test_dns_error_is_recorded_until_next_results() {
    let harness = TestCluster::start(srv_settings("cluster0.example.com", ConnectionMode::Automatic));

    harness.cluster.process_dns_error("lookup timed out");
    assert_eq!(harness.cluster.description().dns_monitor_error(), Some("lookup timed out"));

    harness.cluster.process_dns_results(srv_hosts(&["h1"])).unwrap();
    assert_eq!(harness.cluster.description().dns_monitor_error(), None);

    harness.cluster.dispose();
}

#[test]
fn test_empty_dns_results_are_ignored() {
    let harness = TestCluster::start(srv_settings("cluster0.example.com", ConnectionMode::Automatic));
    harness.cluster.process_dns_results(srv_hosts(&["h1"])).unwrap();

    harness.cluster.process_dns_results(Vec::new()).unwrap();

    assert_eq!(harness.hosts(), vec!["h1.example.com"]);
    harness.cluster.dispose();
}

// =============================================================================
// Invariants
// =============================================================================

const HOSTS: [&str; 3] = ["a", "b", "c"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// However primary claims interleave, at most one server is primary.
    #[test]
    fn prop_at_most_one_primary(
        claims in proptest::collection::vec((0usize..3, 1i32..4, 1u64..4), 1..20)
    ) {
        let harness = TestCluster::start(settings(&HOSTS, ConnectionMode::Automatic));
        for (host, set_version, election) in claims {
            harness.report_primary(HOSTS[host], "rs0", &HOSTS, Some(set_version), Some(election));
            let primaries = harness
                .cluster
                .description()
                .servers()
                .iter()
                .filter(|s| s.server_type() == ServerType::ReplicaSetPrimary)
                .count();
            prop_assert!(primaries <= 1, "found {} primaries", primaries);
        }
    }

    /// Every published server has a live registry entry and vice versa.
    #[test]
    fn prop_description_matches_registry(
        reports in proptest::collection::vec((0usize..3, 0usize..4), 1..20)
    ) {
        let harness = TestCluster::start(settings(&HOSTS, ConnectionMode::Automatic));
        for (host, kind) in reports {
            let Some(server) = harness.factory.server(&ep(HOSTS[host])) else { continue };
            let server_type = [
                ServerType::ReplicaSetSecondary,
                ServerType::ShardRouter,
                ServerType::Standalone,
                ServerType::ReplicaSetGhost,
            ][kind];
            server.publish(mock::connected_description(server.server_id(), server_type));

            let description = harness.cluster.description();
            for host in HOSTS {
                prop_assert_eq!(
                    description.server(&ep(host)).is_some(),
                    harness.cluster.server(&ep(host)).is_some()
                );
            }
        }
    }
}
