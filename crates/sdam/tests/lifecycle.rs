//! Engine lifecycle, change notification and session tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use cluster_sdam::{
    ClusterClock, ClusterEvent, ClusterState, ClusterType, ConnectionMode, Server,
    ServerDescription, ServerState, ServerType, SessionOptions, mock,
};
use parking_lot::Mutex;

use crate::common::{TestCluster, ep, settings};

#[test]
fn test_initialize_emits_server_events_between_opening_and_opened() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));

    let names = harness.events.names();
    assert_eq!(names.first(), Some(&"opening"));
    assert_eq!(names.last(), Some(&"opened"));
    assert_eq!(harness.events.count("adding_server"), 2);
    assert_eq!(harness.events.count("added_server"), 2);
    assert_eq!(harness.events.count("description_changed"), 1);
}

#[test]
fn test_description_listener_sees_each_change_once() {
    let harness = TestCluster::build(settings(&["a"], ConnectionMode::Automatic));
    let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    harness.cluster.add_description_changed_listener(move |old, new| {
        recorder.lock().push((old.revision(), new.revision()));
    });

    harness.cluster.initialize().unwrap();
    harness.report("a", ServerType::Standalone);
    // Same content again: nothing is published.
    harness.report("a", ServerType::Standalone);

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, seen[1].0);
    assert_eq!(harness.events.count("description_changed"), 2);
    assert_eq!(harness.cluster.description().revision(), seen[1].1);
}

#[test]
fn test_description_changed_event_carries_old_and_new() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Automatic));
    harness.events.clear();

    harness.report("a", ServerType::Standalone);

    let events = harness.events.events();
    let [ClusterEvent::DescriptionChanged { old, new }] = events.as_slice() else {
        panic!("expected one description change, got {events:?}");
    };
    assert_eq!(old.cluster_type(), ClusterType::Unknown);
    assert_eq!(old.state(), ClusterState::Disconnected);
    assert_eq!(new.cluster_type(), ClusterType::Standalone);
    assert_eq!(new.state(), ClusterState::Connected);
}

#[tokio::test]
async fn test_subscriber_observes_latest_description() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));
    let mut rx = harness.cluster.subscribe();
    let _ = rx.borrow_and_update();

    harness.report("a", ServerType::Standalone);

    tokio::time::timeout(Duration::from_secs(1), rx.changed()).await.unwrap().unwrap();
    assert_eq!(rx.borrow().cluster_type(), ClusterType::Standalone);
}

#[test]
fn test_dropping_last_handle_disposes_servers() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Automatic));
    let servers = harness.factory.servers();
    let TestCluster { cluster, .. } = harness;

    drop(cluster);

    for server in servers {
        assert_eq!(server.dispose_calls(), 1);
    }
}

#[test]
fn test_servers_share_engine_clock() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Automatic));
    let time = cluster_sdam::ClusterTime::new(42, vec![1, 2, 3]);

    harness.cluster.clock().advance_cluster_time(Some(&time)).unwrap();

    assert_eq!(harness.cluster.clock().cluster_time().map(|t| t.timestamp()), Some(42));
}

#[test]
fn test_logical_session_timeout_is_minimum_over_data_bearing_servers() {
    let harness = TestCluster::start(settings(&["a", "b"], ConnectionMode::Sharded));
    for (host, minutes) in [("a", 30), ("b", 20)] {
        let server = harness.server(host);
        server.publish(
            ServerDescription::builder()
                .server_id(server.server_id().clone())
                .endpoint(ep(host))
                .state(ServerState::Connected)
                .server_type(ServerType::ShardRouter)
                .wire_version_range(mock::MOCK_WIRE_VERSION_RANGE)
                .logical_session_timeout(Duration::from_secs(minutes * 60))
                .build(),
        );
    }

    assert_eq!(
        harness.cluster.description().logical_session_timeout(),
        Some(Duration::from_secs(20 * 60))
    );
}

// =============================================================================
// Sessions
// =============================================================================

fn cluster_with_session_support() -> TestCluster {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));
    let a = harness.server("a");
    a.publish(
        ServerDescription::builder()
            .server_id(a.server_id().clone())
            .endpoint(ep("a"))
            .state(ServerState::Connected)
            .server_type(ServerType::Standalone)
            .wire_version_range(mock::MOCK_WIRE_VERSION_RANGE)
            .logical_session_timeout(Duration::from_secs(30 * 60))
            .build(),
    );
    harness
}

#[test]
fn test_used_session_is_reused() {
    let harness = cluster_with_session_support();

    let mut session = harness.cluster.start_session(SessionOptions::default());
    assert!(!session.has_server_session());
    let id = session.server_session().id();
    session.server_session().mark_used();
    drop(session);

    assert_eq!(harness.cluster.acquire_server_session().id(), id);
}

#[test]
fn test_dirty_session_is_discarded() {
    let harness = cluster_with_session_support();

    let mut session = harness.cluster.start_session(SessionOptions::builder().causal_consistency(true).build());
    assert!(session.options().causal_consistency);
    let id = session.server_session().id();
    session.server_session().mark_used();
    session.server_session().mark_dirty();
    drop(session);

    assert_ne!(harness.cluster.acquire_server_session().id(), id);
}

#[test]
fn test_sessions_are_not_pooled_without_timeout() {
    let harness = TestCluster::start(settings(&["a"], ConnectionMode::Direct));
    harness.report("a", ServerType::Standalone);

    let mut session = harness.cluster.start_session(SessionOptions::default());
    let id = session.server_session().id();
    session.server_session().mark_used();
    drop(session);

    assert_ne!(harness.cluster.acquire_server_session().id(), id);
}

#[test]
fn test_listener_count_matches_events_under_concurrent_reports() {
    let harness = TestCluster::start(settings(&["a", "b", "c", "d"], ConnectionMode::Sharded));
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&changes);
    harness.cluster.add_description_changed_listener(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    harness.events.clear();

    let threads: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|host| {
            let server = harness.server(host);
            std::thread::spawn(move || {
                for round in 0..50u64 {
                    let rtt = Duration::from_micros(round);
                    server.publish(
                        ServerDescription::builder()
                            .server_id(server.server_id().clone())
                            .endpoint(server.server_id().endpoint().clone())
                            .state(ServerState::Connected)
                            .server_type(ServerType::ShardRouter)
                            .wire_version_range(mock::MOCK_WIRE_VERSION_RANGE)
                            .average_round_trip_time(rtt)
                            .build(),
                    );
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let description = harness.cluster.description();
    assert_eq!(description.servers().len(), 4);
    for server in description.servers() {
        assert_eq!(server.average_round_trip_time(), Duration::from_micros(49));
    }
    assert_eq!(changes.load(Ordering::SeqCst), harness.events.count("description_changed"));
}
