//! The topology engine.
//!
//! A [`Cluster`] owns the published [`ClusterDescription`], the registry of
//! live [`Server`] handles and, for DNS-seeded deployments, one
//! [`DnsMonitor`] thread. Which discovery rules apply is decided once from
//! the settings:
//!
//! | Variant | Connection modes | Membership |
//! |---------|------------------|------------|
//! | Single | `Direct`, `Standalone` | the one configured endpoint |
//! | Multi | `Automatic`, `ReplicaSet`, `Sharded` | seeds or DNS, then primaries |
//! | LoadBalanced | `LoadBalanced` | one static or DNS-resolved endpoint |
//!
//! Readers never lock: the description lives in a `tokio::sync::watch`
//! channel and the registry in an [`ArcSwap`]. All writes go through one
//! writer path (see `writer.rs`).

mod load_balanced;
mod multi;
mod selection;
mod single;
mod writer;

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{ClusterClock, SharedClusterClock},
    description::{ClusterDescription, ClusterId, ClusterType},
    dns::{DnsResolver, HickoryDnsResolver},
    dns_monitor::{DnsMonitor, DnsMonitorState, DnsMonitoringCluster},
    endpoint::EndPoint,
    error::{DisposedSnafu, Result},
    events::{ClusterEvent, EventSink},
    selector::ServerSelector,
    server::{Server, ServerFactory, ServerListener},
    server_description::ServerDescription,
    session::{ClientSession, ServerSession, ServerSessionPool, SessionOptions},
    settings::{ClusterKind, ClusterSettings},
};

use self::{
    load_balanced::LoadBalancedTopology,
    multi::MultiTopology,
    single::SingleTopology,
    writer::{ServerChanged, Writer},
};

const STATE_INITIAL: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_DISPOSED: u8 = 2;

type DescriptionListener = Box<dyn Fn(&ClusterDescription, &ClusterDescription) + Send + Sync>;

/// Variant-specific discovery state, only touched under the writer lock.
enum Topology {
    Single(SingleTopology),
    Multi(MultiTopology),
    LoadBalanced(LoadBalancedTopology),
}

impl Topology {
    fn new(settings: &ClusterSettings) -> Self {
        match settings.cluster_kind() {
            ClusterKind::Single => Self::Single(SingleTopology::new(settings)),
            ClusterKind::Multi => Self::Multi(MultiTopology::new(settings)),
            ClusterKind::LoadBalanced => Self::LoadBalanced(LoadBalancedTopology::new(settings)),
        }
    }

    fn initialize(&mut self, writer: &mut Writer<'_>) {
        match self {
            Self::Single(t) => t.initialize(writer),
            Self::Multi(t) => t.initialize(writer),
            Self::LoadBalanced(t) => t.initialize(writer),
        }
    }

    fn server_description_changed(&mut self, writer: &mut Writer<'_>, new: ServerDescription) {
        match self {
            Self::Single(t) => t.server_description_changed(writer, new),
            Self::Multi(t) => t.server_description_changed(writer, new),
            Self::LoadBalanced(t) => t.server_description_changed(writer, new),
        }
    }

    fn process_dns_results(&mut self, writer: &mut Writer<'_>, endpoints: Vec<EndPoint>) -> Result<()> {
        match self {
            Self::Single(_) => Ok(()),
            Self::Multi(t) => t.process_dns_results(writer, endpoints),
            Self::LoadBalanced(t) => t.process_dns_results(writer, endpoints),
        }
    }
}

struct ClusterInner {
    cluster_id: ClusterId,
    settings: ClusterSettings,
    kind: ClusterKind,
    factory: Arc<dyn ServerFactory>,
    dns_resolver: Option<Arc<dyn DnsResolver>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn ClusterClock>,
    state: AtomicU8,
    description_tx: watch::Sender<Arc<ClusterDescription>>,
    servers: ArcSwap<Vec<Arc<dyn Server>>>,
    topology: Mutex<Topology>,
    pending: Mutex<VecDeque<ServerChanged>>,
    listeners: RwLock<Vec<DescriptionListener>>,
    sessions: Arc<ServerSessionPool>,
    wait_queue_size: AtomicUsize,
    last_heartbeat_request: Mutex<Option<tokio::time::Instant>>,
    dns_cancel: CancellationToken,
    dns_monitor: Mutex<Option<Arc<DnsMonitor>>>,
    dns_thread: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<ClusterInner>,
}

impl ClusterInner {
    fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_DISPOSED
    }

    fn find_server(&self, endpoint: &EndPoint) -> Option<Arc<dyn Server>> {
        self.servers.load().iter().find(|s| s.endpoint() == endpoint).cloned()
    }

    fn emit(&self, event: ClusterEvent) {
        tracing::trace!(cluster_id = %self.cluster_id, event = event.name(), "Cluster event");
        self.events.publish(&event);
    }

    fn information(&self, message: String) {
        tracing::info!(cluster_id = %self.cluster_id, "{message}");
        self.emit(ClusterEvent::Information { cluster_id: Some(self.cluster_id), message });
    }

    fn initialize(&self) -> Result<()> {
        match self.state.compare_exchange(
            STATE_INITIAL,
            STATE_OPEN,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {},
            Err(STATE_DISPOSED) => return DisposedSnafu.fail(),
            Err(_) => return Ok(()),
        }

        let started = Instant::now();
        tracing::info!(cluster_id = %self.cluster_id, kind = ?self.kind, "Opening cluster");
        self.emit(ClusterEvent::Opening { cluster_id: self.cluster_id });

        self.with_writer(|topology, writer| topology.initialize(writer));
        if self.kind != ClusterKind::Single {
            if let Some(domain) = self.settings.srv_lookup_domain() {
                self.start_dns_monitor(domain)?;
            }
        }

        self.emit(ClusterEvent::Opened { cluster_id: self.cluster_id, duration: started.elapsed() });
        Ok(())
    }

    fn start_dns_monitor(&self, lookup_domain: &str) -> Result<()> {
        let resolver: Arc<dyn DnsResolver> = match &self.dns_resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::new(HickoryDnsResolver::new()),
        };
        let monitor = Arc::new(
            DnsMonitor::builder()
                .cluster(Arc::new(DnsCallbacks { inner: self.weak_self.clone() }))
                .resolver(resolver)
                .lookup_domain(lookup_domain)
                .srv_service_name(self.settings.srv_service_name())
                .min_rescan_delay(self.settings.dns_min_rescan_delay())
                .retry_delay(self.settings.dns_retry_delay())
                .events(Arc::clone(&self.events))
                .cluster_id(self.cluster_id)
                .cancel(self.dns_cancel.clone())
                .build()?,
        );
        let handle = monitor.start()?;
        tracing::info!(cluster_id = %self.cluster_id, service = monitor.service(), "Started DNS monitor");
        *self.dns_monitor.lock() = Some(monitor);
        *self.dns_thread.lock() = Some(handle);
        Ok(())
    }

    fn dispose(&self) {
        if self.state.swap(STATE_DISPOSED, Ordering::AcqRel) == STATE_DISPOSED {
            return;
        }

        let started = Instant::now();
        tracing::info!(cluster_id = %self.cluster_id, "Closing cluster");
        self.emit(ClusterEvent::Closing { cluster_id: self.cluster_id });
        self.dns_cancel.cancel();

        let connection_mode = self.settings.connection_mode();
        self.with_writer(|_, writer| {
            writer.dispose_all_servers();
            writer.publish(ClusterDescription::new(
                self.cluster_id,
                connection_mode,
                ClusterType::Unknown,
                [],
                None,
            ));
        });

        let dns_thread = self.dns_thread.lock().take();
        if let Some(handle) = dns_thread {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!(cluster_id = %self.cluster_id, "DNS monitor thread panicked");
            }
        }

        self.emit(ClusterEvent::Closed { cluster_id: self.cluster_id, duration: started.elapsed() });
    }

    fn should_dns_monitor_stop(&self) -> bool {
        if self.is_disposed() {
            return true;
        }
        match self.kind {
            ClusterKind::Single => true,
            ClusterKind::Multi => !matches!(
                self.description_tx.borrow().cluster_type(),
                ClusterType::Unknown | ClusterType::Sharded
            ),
            ClusterKind::LoadBalanced => !self.servers.load().is_empty(),
        }
    }

    fn process_dns_results(&self, endpoints: Vec<EndPoint>) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        tracing::debug!(cluster_id = %self.cluster_id, endpoints = endpoints.len(), "Processing DNS results");
        self.with_writer(|topology, writer| topology.process_dns_results(writer, endpoints))
    }

    fn process_dns_error(&self, error: String) {
        if self.is_disposed() {
            return;
        }
        tracing::warn!(cluster_id = %self.cluster_id, error = %error, "DNS monitor reported an error");
        self.with_writer(|_, writer| {
            let description = writer.current().with_dns_monitor_error(Some(error));
            writer.publish(description);
        });
    }
}

impl Drop for ClusterInner {
    fn drop(&mut self) {
        self.dns_cancel.cancel();
        if self.state.load(Ordering::Acquire) != STATE_DISPOSED {
            for server in self.servers.load().iter() {
                server.dispose();
            }
        }
    }
}

/// Forwards server notifications into the writer queue.
struct EngineListener {
    inner: Weak<ClusterInner>,
}

impl ServerListener for EngineListener {
    fn description_changed(&self, old: &ServerDescription, new: &ServerDescription) {
        if let Some(inner) = self.inner.upgrade() {
            inner.submit(ServerChanged { old: old.clone(), new: new.clone() });
        }
    }
}

/// Gives the DNS monitor a non-owning route back into the engine.
struct DnsCallbacks {
    inner: Weak<ClusterInner>,
}

impl DnsMonitoringCluster for DnsCallbacks {
    fn should_dns_monitor_stop(&self) -> bool {
        self.inner.upgrade().is_none_or(|inner| inner.should_dns_monitor_stop())
    }

    fn process_dns_results(&self, endpoints: Vec<EndPoint>) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.process_dns_results(endpoints),
            None => Ok(()),
        }
    }

    fn process_dns_error(&self, error: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.process_dns_error(error);
        }
    }
}

/// Handle to a topology engine.
///
/// Cloning is cheap; every clone refers to the same engine.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

#[bon::bon]
impl Cluster {
    /// Creates an engine in the initial state.
    ///
    /// Nothing is contacted until [`Cluster::initialize`] is called. When no
    /// resolver is supplied, DNS-seeded settings use [`HickoryDnsResolver`].
    #[builder]
    pub fn new(
        settings: ClusterSettings,
        server_factory: Arc<dyn ServerFactory>,
        dns_resolver: Option<Arc<dyn DnsResolver>>,
        #[builder(default = crate::events::default_event_sink())] event_sink: Arc<dyn EventSink>,
        clock: Option<Arc<dyn ClusterClock>>,
    ) -> Self {
        let cluster_id = ClusterId::new();
        let initial = ClusterDescription::new(
            cluster_id,
            settings.connection_mode(),
            settings.initial_cluster_type(),
            [],
            None,
        );
        let (description_tx, description_rx) = watch::channel(Arc::new(initial));
        let clock: Arc<dyn ClusterClock> = match clock {
            Some(clock) => clock,
            None => Arc::new(SharedClusterClock::new()),
        };
        let kind = settings.cluster_kind();
        let topology = Topology::new(&settings);

        let inner = Arc::new_cyclic(|weak_self| ClusterInner {
            cluster_id,
            kind,
            factory: server_factory,
            dns_resolver,
            events: event_sink,
            clock,
            state: AtomicU8::new(STATE_INITIAL),
            description_tx,
            servers: ArcSwap::from_pointee(Vec::new()),
            topology: Mutex::new(topology),
            pending: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            sessions: Arc::new(ServerSessionPool::new(description_rx)),
            wait_queue_size: AtomicUsize::new(0),
            last_heartbeat_request: Mutex::new(None),
            dns_cancel: CancellationToken::new(),
            dns_monitor: Mutex::new(None),
            dns_thread: Mutex::new(None),
            weak_self: weak_self.clone(),
            settings,
        });
        tracing::debug!(cluster_id = %cluster_id, kind = ?kind, "Created cluster");
        Self { inner }
    }
}

impl Cluster {
    /// Returns the engine's id.
    #[must_use]
    pub fn cluster_id(&self) -> ClusterId {
        self.inner.cluster_id
    }

    /// Returns the settings the engine was built with.
    #[must_use]
    pub fn settings(&self) -> &ClusterSettings {
        &self.inner.settings
    }

    /// Returns the cluster clock shared with every server.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn ClusterClock> {
        &self.inner.clock
    }

    /// Returns the current description snapshot.
    #[must_use]
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.inner.description_tx.borrow().clone()
    }

    /// Returns a receiver that observes every published description.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterDescription>> {
        self.inner.description_tx.subscribe()
    }

    /// Registers a callback invoked synchronously with `(old, new)` after
    /// each content-changing replacement.
    ///
    /// Callbacks run on the writer path; they must not call back into
    /// mutating engine methods.
    pub fn add_description_changed_listener<F>(&self, listener: F)
    where
        F: Fn(&ClusterDescription, &ClusterDescription) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Box::new(listener));
    }

    /// Returns the registered server at `endpoint`.
    #[must_use]
    pub fn server(&self, endpoint: &EndPoint) -> Option<Arc<dyn Server>> {
        self.inner.find_server(endpoint)
    }

    /// Opens the engine and creates the initial servers.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Disposed`](crate::SdamError::Disposed) after
    /// [`Cluster::dispose`], or a runtime error if the DNS monitor thread
    /// cannot be started.
    pub fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    /// Closes the engine, disposing every server exactly once.
    ///
    /// Waiting selections fail with
    /// [`SdamError::Disposed`](crate::SdamError::Disposed).
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Returns `true` once [`Cluster::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Selects a server using the configured selection timeout.
    ///
    /// # Errors
    ///
    /// See [`Cluster::select_server_with_timeout`].
    pub async fn select_server(
        &self,
        selector: Arc<dyn ServerSelector>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        let timeout = self.inner.settings.server_selection_timeout();
        self.inner.select_server(selector, timeout, cancel).await
    }

    /// Selects a server, waiting up to `timeout` for one to match.
    ///
    /// # Errors
    ///
    /// - [`SdamError::ServerSelectionTimeout`](crate::SdamError::ServerSelectionTimeout)
    ///   if nothing matched in time
    /// - [`SdamError::IncompatibleServer`](crate::SdamError::IncompatibleServer)
    ///   immediately if any known server is outside the supported wire range
    /// - [`SdamError::Cancelled`](crate::SdamError::Cancelled) if `cancel` fires
    /// - [`SdamError::WaitQueueFull`](crate::SdamError::WaitQueueFull) if too
    ///   many selections are already waiting
    /// - [`SdamError::NotInitialized`](crate::SdamError::NotInitialized) or
    ///   [`SdamError::Disposed`](crate::SdamError::Disposed) outside the open state
    pub async fn select_server_with_timeout(
        &self,
        selector: Arc<dyn ServerSelector>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        self.inner.select_server(selector, timeout, cancel).await
    }

    /// Blocking form of [`Cluster::select_server`].
    ///
    /// # Errors
    ///
    /// Same as [`Cluster::select_server_with_timeout`], plus:
    /// - [`SdamError::BlockingInRuntime`](crate::SdamError::BlockingInRuntime)
    ///   when called from a thread already driving a tokio runtime
    /// - a runtime error if the call-scoped runtime cannot be built
    pub fn select_server_blocking(
        &self,
        selector: Arc<dyn ServerSelector>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        let timeout = self.inner.settings.server_selection_timeout();
        self.inner.select_server_blocking(selector, timeout, cancel)
    }

    /// Blocking form of [`Cluster::select_server_with_timeout`].
    ///
    /// # Errors
    ///
    /// Same as [`Cluster::select_server_blocking`].
    pub fn select_server_blocking_with_timeout(
        &self,
        selector: Arc<dyn ServerSelector>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        self.inner.select_server_blocking(selector, timeout, cancel)
    }

    /// Starts a client session backed by the engine's session pool.
    #[must_use]
    pub fn start_session(&self, options: SessionOptions) -> ClientSession {
        ClientSession::new(Arc::clone(&self.inner.sessions), options)
    }

    /// Takes a server session from the pool, minting one if needed.
    #[must_use]
    pub fn acquire_server_session(&self) -> ServerSession {
        self.inner.sessions.acquire()
    }

    /// Returns `true` once membership no longer needs DNS polling.
    #[must_use]
    pub fn should_dns_monitor_stop(&self) -> bool {
        self.inner.should_dns_monitor_stop()
    }

    /// Applies a DNS-resolved endpoint list.
    ///
    /// # Errors
    ///
    /// For load-balanced engines, returns
    /// [`SdamError::NoSrvRecords`](crate::SdamError::NoSrvRecords) for an
    /// empty list and a configuration error for more than one endpoint.
    pub fn process_dns_results(&self, endpoints: Vec<EndPoint>) -> Result<()> {
        self.inner.process_dns_results(endpoints)
    }

    /// Records a DNS resolution failure on the description.
    pub fn process_dns_error(&self, error: impl Into<String>) {
        self.inner.process_dns_error(error.into());
    }

    /// Returns the DNS monitor's state, if one was started.
    #[must_use]
    pub fn dns_monitor_state(&self) -> Option<DnsMonitorState> {
        self.inner.dns_monitor.lock().as_ref().map(|m| m.state())
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("cluster_id", &self.inner.cluster_id)
            .field("kind", &self.inner.kind)
            .field("disposed", &self.inner.is_disposed())
            .finish_non_exhaustive()
    }
}
