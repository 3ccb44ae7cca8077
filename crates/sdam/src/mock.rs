//! Controllable collaborators for testing the engine without a network.
//!
//! - [`MockServerFactory`] creates [`MockServer`]s and keeps them so tests
//!   can publish descriptions on a server's behalf and inspect the calls the
//!   engine made (initialize, dispose, invalidate, heartbeat requests).
//! - [`MockDnsResolver`] answers SRV queries from a script.
//! - [`RecordingEventSink`] keeps every published [`ClusterEvent`].
//! - [`MockDnsMonitoringCluster`] stands in for the engine when testing the
//!   DNS monitor on its own.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cluster_sdam::mock::{self, MockServerFactory};
//! use cluster_sdam::{Cluster, ClusterSettings, EndPoint, Server, ServerType};
//!
//! let factory = Arc::new(MockServerFactory::new());
//! let settings = ClusterSettings::builder()
//!     .endpoints(vec![EndPoint::new("a", 27017)])
//!     .build()
//!     .unwrap();
//! let cluster = Cluster::builder().settings(settings).server_factory(factory.clone()).build();
//! cluster.initialize().unwrap();
//!
//! let server = factory.server(&EndPoint::new("a", 27017)).unwrap();
//! server.publish(mock::connected_description(server.server_id(), ServerType::Standalone));
//! ```

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{ClusterClock, ClusterTime},
    description::ClusterId,
    dns::{DnsResolver, SrvRecord},
    dns_monitor::DnsMonitoringCluster,
    election::{ElectionId, ReplicaSetConfig},
    endpoint::EndPoint,
    error::{CancelledSnafu, DnsResolutionSnafu, Result, SdamError},
    events::{ClusterEvent, EventSink},
    server::{Server, ServerFactory, ServerListener},
    server_description::{ServerDescription, ServerId, ServerState, ServerType, WireVersionRange},
};

/// Wire version range advertised by mock descriptions.
pub const MOCK_WIRE_VERSION_RANGE: WireVersionRange = WireVersionRange::new(8, 21);

/// Returns a connected description of `server_type` for `server_id`.
#[must_use]
pub fn connected_description(server_id: &ServerId, server_type: ServerType) -> ServerDescription {
    ServerDescription::builder()
        .server_id(server_id.clone())
        .endpoint(server_id.endpoint().clone())
        .state(ServerState::Connected)
        .server_type(server_type)
        .wire_version_range(MOCK_WIRE_VERSION_RANGE)
        .build()
}

/// Returns a connected replica set member description.
#[must_use]
pub fn replica_set_description(
    server_id: &ServerId,
    server_type: ServerType,
    set_name: &str,
    members: &[EndPoint],
    set_version: Option<i32>,
    election_id: Option<ElectionId>,
) -> ServerDescription {
    let config = ReplicaSetConfig::new(members.iter().cloned(), Some(set_name.to_string()), None, set_version);
    ServerDescription::builder()
        .server_id(server_id.clone())
        .endpoint(server_id.endpoint().clone())
        .state(ServerState::Connected)
        .server_type(server_type)
        .replica_set_config(config)
        .maybe_election_id(election_id)
        .wire_version_range(MOCK_WIRE_VERSION_RANGE)
        .build()
}

/// A server whose descriptions are published by the test.
pub struct MockServer {
    server_id: ServerId,
    clock: Arc<dyn ClusterClock>,
    listener: Arc<dyn ServerListener>,
    description: Mutex<ServerDescription>,
    initialized: AtomicBool,
    initialize_calls: AtomicUsize,
    dispose_calls: AtomicUsize,
    heartbeat_requests: AtomicUsize,
    invalidations: Mutex<Vec<String>>,
}

impl MockServer {
    fn new(server_id: ServerId, clock: Arc<dyn ClusterClock>, listener: Arc<dyn ServerListener>) -> Self {
        let description = ServerDescription::unknown(server_id.clone(), None);
        Self {
            server_id,
            clock,
            listener,
            description: Mutex::new(description),
            initialized: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
            dispose_calls: AtomicUsize::new(0),
            heartbeat_requests: AtomicUsize::new(0),
            invalidations: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the description and notifies the engine.
    pub fn publish(&self, new: ServerDescription) {
        let old = std::mem::replace(&mut *self.description.lock(), new.clone());
        self.listener.description_changed(&old, &new);
    }

    /// Returns how many times [`Server::initialize`] was called.
    #[must_use]
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times [`Server::dispose`] was called.
    #[must_use]
    pub fn dispose_calls(&self) -> usize {
        self.dispose_calls.load(Ordering::SeqCst)
    }

    /// Returns how many heartbeats the engine requested.
    #[must_use]
    pub fn heartbeat_requests(&self) -> usize {
        self.heartbeat_requests.load(Ordering::SeqCst)
    }

    /// Returns the reasons passed to [`Server::invalidate`], in order.
    #[must_use]
    pub fn invalidations(&self) -> Vec<String> {
        self.invalidations.lock().clone()
    }
}

impl Server for MockServer {
    fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    fn description(&self) -> ServerDescription {
        self.description.lock().clone()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn initialize(&self) {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    fn request_heartbeat(&self) {
        self.heartbeat_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate(&self, reason: &str, cluster_time: Option<&ClusterTime>) {
        self.invalidations.lock().push(reason.to_string());
        if cluster_time.is_some() {
            let _ = self.clock.advance_cluster_time(cluster_time);
        }
        self.publish(ServerDescription::unknown(self.server_id.clone(), Some(reason.to_string())));
    }

    fn dispose(&self) {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("server_id", &self.server_id)
            .field("initialize_calls", &self.initialize_calls())
            .field("dispose_calls", &self.dispose_calls())
            .finish_non_exhaustive()
    }
}

/// Factory that creates and remembers [`MockServer`]s.
#[derive(Debug, Default)]
pub struct MockServerFactory {
    servers: Mutex<Vec<Arc<MockServer>>>,
}

impl MockServerFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recently created server for `endpoint`.
    #[must_use]
    pub fn server(&self, endpoint: &EndPoint) -> Option<Arc<MockServer>> {
        self.servers.lock().iter().rev().find(|s| s.endpoint() == endpoint).cloned()
    }

    /// Returns every server created so far, in creation order.
    #[must_use]
    pub fn servers(&self) -> Vec<Arc<MockServer>> {
        self.servers.lock().clone()
    }

    /// Returns how many servers have been created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.servers.lock().len()
    }
}

impl ServerFactory for MockServerFactory {
    fn create_server(
        &self,
        cluster_id: ClusterId,
        clock: Arc<dyn ClusterClock>,
        endpoint: &EndPoint,
        listener: Arc<dyn ServerListener>,
    ) -> Arc<dyn Server> {
        let server = Arc::new(MockServer::new(ServerId::new(cluster_id, endpoint.clone()), clock, listener));
        self.servers.lock().push(Arc::clone(&server));
        server
    }
}

/// One scripted answer of a [`MockDnsResolver`].
#[derive(Debug, Clone)]
pub enum MockDnsResponse {
    /// Resolve to these records.
    Records(Vec<SrvRecord>),
    /// Fail with this message.
    Error(String),
    /// Never answer; only cancellation ends the lookup.
    Hang,
}

/// Resolver answering from a script, then hanging until cancelled.
#[derive(Debug, Default)]
pub struct MockDnsResolver {
    script: Mutex<VecDeque<MockDnsResponse>>,
    queried: Mutex<Vec<String>>,
}

impl MockDnsResolver {
    /// Creates a resolver with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response to the script.
    pub fn push(&self, response: MockDnsResponse) {
        self.script.lock().push_back(response);
    }

    /// Appends a successful resolution.
    pub fn push_records(&self, records: Vec<SrvRecord>) {
        self.push(MockDnsResponse::Records(records));
    }

    /// Appends a failed resolution.
    pub fn push_error(&self, message: impl Into<String>) {
        self.push(MockDnsResponse::Error(message.into()));
    }

    /// Returns how many lookups were made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.queried.lock().len()
    }

    /// Returns the service names queried, in order.
    #[must_use]
    pub fn queried_services(&self) -> Vec<String> {
        self.queried.lock().clone()
    }
}

#[async_trait]
impl DnsResolver for MockDnsResolver {
    async fn resolve_srv_records(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SrvRecord>> {
        self.queried.lock().push(service.to_string());
        let next = self.script.lock().pop_front();
        match next.unwrap_or(MockDnsResponse::Hang) {
            MockDnsResponse::Records(records) => Ok(records),
            MockDnsResponse::Error(message) => DnsResolutionSnafu { service, message }.fail(),
            MockDnsResponse::Hang => {
                cancel.cancelled().await;
                CancelledSnafu.fail()
            },
        }
    }
}

/// Sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ClusterEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }

    /// Returns the names of every event so far.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ClusterEvent::name).collect()
    }

    /// Returns how many events named `name` were published.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Returns the text of every information event.
    #[must_use]
    pub fn information(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::Information { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the reasons of every removal.
    #[must_use]
    pub fn removal_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::RemovedServer { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &ClusterEvent) {
        self.events.lock().push(event.clone());
    }
}

type StopPredicate = dyn Fn(usize) -> bool + Send + Sync;

/// Stand-in for the engine side of the DNS monitor.
pub struct MockDnsMonitoringCluster {
    should_stop: Box<StopPredicate>,
    stop_checks: AtomicUsize,
    results: Mutex<Vec<Vec<EndPoint>>>,
    errors: Mutex<Vec<String>>,
    fail_results_with: Mutex<Option<String>>,
}

impl MockDnsMonitoringCluster {
    /// Creates a cluster that never asks the monitor to stop.
    #[must_use]
    pub fn new() -> Self {
        Self::with_should_stop(|_| false)
    }

    /// Creates a cluster that asks the monitor to stop on the `n`th check
    /// (counting from 1).
    #[must_use]
    pub fn stopping_after(n: usize) -> Self {
        Self::with_should_stop(move |check| check + 1 >= n)
    }

    /// Creates a cluster whose stop answer is computed from the zero-based
    /// index of the check.
    #[must_use]
    pub fn with_should_stop(f: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
        Self {
            should_stop: Box::new(f),
            stop_checks: AtomicUsize::new(0),
            results: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            fail_results_with: Mutex::new(None),
        }
    }

    /// Makes every later `process_dns_results` call fail with a
    /// configuration error carrying `message`.
    pub fn fail_results_with(&self, message: impl Into<String>) {
        *self.fail_results_with.lock() = Some(message.into());
    }

    /// Returns every endpoint list received.
    #[must_use]
    pub fn results(&self) -> Vec<Vec<EndPoint>> {
        self.results.lock().clone()
    }

    /// Returns every error text received.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Returns how many times the monitor asked whether to stop.
    #[must_use]
    pub fn stop_checks(&self) -> usize {
        self.stop_checks.load(Ordering::SeqCst)
    }
}

impl Default for MockDnsMonitoringCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsMonitoringCluster for MockDnsMonitoringCluster {
    fn should_dns_monitor_stop(&self) -> bool {
        let check = self.stop_checks.fetch_add(1, Ordering::SeqCst);
        (self.should_stop)(check)
    }

    fn process_dns_results(&self, endpoints: Vec<EndPoint>) -> Result<()> {
        self.results.lock().push(endpoints);
        match self.fail_results_with.lock().clone() {
            Some(message) => Err(SdamError::config(message)),
            None => Ok(()),
        }
    }

    fn process_dns_error(&self, error: String) {
        self.errors.lock().push(error);
    }
}

impl fmt::Debug for MockDnsMonitoringCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDnsMonitoringCluster")
            .field("stop_checks", &self.stop_checks())
            .field("results", &self.results.lock().len())
            .field("errors", &self.errors.lock().len())
            .finish_non_exhaustive()
    }
}

/// Returns endpoints on the default port for `hosts`.
#[must_use]
pub fn endpoints(hosts: &[&str]) -> Vec<EndPoint> {
    hosts.iter().map(|host| EndPoint::new(host, crate::endpoint::DEFAULT_PORT)).collect()
}
