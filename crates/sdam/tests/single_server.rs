//! Single-endpoint (direct and standalone) mode tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use cluster_sdam::{
    ClusterSettings, ClusterType, ConnectionMode, Server, ServerDescription, ServerType, mock,
};

use crate::common::{TestCluster, ep, settings};

#[test]
fn test_direct_mode_adopts_any_reported_role() {
    for (server_type, expected) in [
        (ServerType::Standalone, ClusterType::Standalone),
        (ServerType::ShardRouter, ClusterType::Sharded),
        (ServerType::ReplicaSetSecondary, ClusterType::ReplicaSet),
        (ServerType::ReplicaSetArbiter, ClusterType::ReplicaSet),
    ] {
        let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));
        harness.report("a", server_type);

        assert_eq!(harness.cluster.description().cluster_type(), expected, "{server_type}");
        assert_eq!(harness.server_type("a"), Some(server_type));
    }
}

#[test]
fn test_standalone_mode_hides_mismatched_server() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Standalone));

    harness.report("a", ServerType::ShardRouter);

    let description = harness.cluster.description();
    assert_eq!(description.cluster_type(), ClusterType::Unknown);
    assert!(description.servers().is_empty());
    // The server stays registered so a later report can bring it back.
    assert!(harness.cluster.server(&ep("a")).is_some());
    assert_eq!(harness.server("a").dispose_calls(), 0);

    harness.report("a", ServerType::Standalone);
    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Standalone);
    assert_eq!(harness.hosts(), vec!["a"]);
}

#[test]
fn test_replica_set_name_mismatch_makes_type_unknown() {
    let settings = ClusterSettings::builder()
        .endpoints(mock::endpoints(&["a"]))
        .connection_mode(ConnectionMode::Direct)
        .replica_set_name("rs0")
        .build()
        .unwrap();
    let harness = TestCluster::start(settings);

    harness.report_secondary("a", "other", &["a"]);

    assert_eq!(harness.cluster.description().cluster_type(), ClusterType::Unknown);
    assert_eq!(harness.factory.created_count(), 1);
}

#[test]
fn test_disconnect_restores_initial_type() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));
    harness.report("a", ServerType::Standalone);

    let a = harness.server("a");
    a.publish(ServerDescription::unknown(a.server_id().clone(), Some("connection refused".into())));

    let description = harness.cluster.description();
    assert_eq!(description.cluster_type(), ClusterType::Unknown);
    assert_eq!(description.server(&ep("a")).unwrap().reason(), Some("connection refused"));
}

#[test]
fn test_direct_mode_never_adds_listed_members() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));

    harness.report_primary("a", "rs0", &["a", "b", "c"], Some(1), Some(1));

    assert_eq!(harness.factory.created_count(), 1);
    assert_eq!(harness.hosts(), vec!["a"]);
    assert!(harness.cluster.should_dns_monitor_stop());
    assert!(harness.cluster.dns_monitor_state().is_none());
}
