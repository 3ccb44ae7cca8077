//! Test harness for engine integration tests.
//!
//! Builds a [`Cluster`] wired to mock collaborators so tests can play the
//! part of every monitored server.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use cluster_sdam::{
    Cluster, ClusterSettings, ConnectionMode, ConnectionScheme, ElectionId, EndPoint, Server,
    ServerType,
    mock::{self, MockDnsResolver, MockServer, MockServerFactory, RecordingEventSink},
};

/// An engine together with the mocks it was built from.
pub struct TestCluster {
    /// The engine under test.
    pub cluster: Cluster,
    /// Factory holding every server the engine created.
    pub factory: Arc<MockServerFactory>,
    /// Every event the engine published.
    pub events: Arc<RecordingEventSink>,
    /// Resolver used for DNS-seeded settings.
    pub resolver: Arc<MockDnsResolver>,
}

impl TestCluster {
    /// Builds an engine without initializing it.
    pub fn build(settings: ClusterSettings) -> Self {
        cluster_sdam_test_utils::init_test_tracing();
        let factory = Arc::new(MockServerFactory::new());
        let events = Arc::new(RecordingEventSink::new());
        let resolver = Arc::new(MockDnsResolver::new());
        let cluster = Cluster::builder()
            .settings(settings)
            .server_factory(factory.clone())
            .dns_resolver(resolver.clone())
            .event_sink(events.clone())
            .build();
        Self { cluster, factory, events, resolver }
    }

    /// Builds and initializes an engine.
    pub fn start(settings: ClusterSettings) -> Self {
        let harness = Self::build(settings);
        harness.cluster.initialize().expect("initialize");
        harness
    }

    /// Returns the latest mock server created for `host`.
    pub fn server(&self, host: &str) -> Arc<MockServer> {
        self.factory.server(&ep(host)).unwrap_or_else(|| panic!("no server for {host}"))
    }

    /// Publishes a connected description of `server_type` from `host`.
    pub fn report(&self, host: &str, server_type: ServerType) {
        let server = self.server(host);
        server.publish(mock::connected_description(server.server_id(), server_type));
    }

    /// Publishes a replica set primary description from `host`.
    pub fn report_primary(
        &self,
        host: &str,
        set_name: &str,
        members: &[&str],
        set_version: Option<i32>,
        election: Option<u64>,
    ) {
        let server = self.server(host);
        server.publish(mock::replica_set_description(
            server.server_id(),
            ServerType::ReplicaSetPrimary,
            set_name,
            &mock::endpoints(members),
            set_version,
            election.map(ElectionId::from_counter),
        ));
    }

    /// Publishes a replica set secondary description from `host`.
    pub fn report_secondary(&self, host: &str, set_name: &str, members: &[&str]) {
        let server = self.server(host);
        server.publish(mock::replica_set_description(
            server.server_id(),
            ServerType::ReplicaSetSecondary,
            set_name,
            &mock::endpoints(members),
            None,
            None,
        ));
    }

    /// Returns the hosts in the published description.
    pub fn hosts(&self) -> Vec<String> {
        self.cluster.description().servers().iter().map(|s| s.endpoint().host().to_string()).collect()
    }

    /// Returns the type `host` has in the published description.
    pub fn server_type(&self, host: &str) -> Option<ServerType> {
        self.cluster.description().server(&ep(host)).map(|s| s.server_type())
    }
}

/// Endpoint on the default port.
pub fn ep(host: &str) -> EndPoint {
    EndPoint::new(host, cluster_sdam::DEFAULT_PORT)
}

/// Settings for static seeds in `mode`.
pub fn settings(hosts: &[&str], mode: ConnectionMode) -> ClusterSettings {
    ClusterSettings::builder()
        .endpoints(mock::endpoints(hosts))
        .connection_mode(mode)
        .build()
        .expect("valid settings")
}

/// Settings for an SRV-seeded deployment looked up at `domain`.
pub fn srv_settings(domain: &str, mode: ConnectionMode) -> ClusterSettings {
    ClusterSettings::builder()
        .endpoints(vec![ep(domain)])
        .connection_mode(mode)
        .scheme(ConnectionScheme::Srv)
        .build()
        .expect("valid settings")
}
