//! Client-side topology monitoring and server selection.
//!
//! This crate keeps a continuously updated, internally consistent view of a
//! replicated database deployment (which servers are reachable and what role
//! each plays) and selects a server satisfying an operation's constraints
//! within a bounded wait.
//!
//! # Features
//!
//! - **Three discovery variants**: a single fixed endpoint, replica set or
//!   sharded discovery from seeds or DNS, and a single load balancer
//! - **Primary tie-breaking**: competing primaries are ordered by
//!   `(setVersion, electionId)`; the loser is invalidated
//! - **DNS seeding**: SRV records polled on a background thread, with
//!   membership reconciled through the engine's single writer
//! - **Race-free selection**: waiters block on a watch channel and never miss
//!   a description change
//! - **Pluggable collaborators**: server factory, DNS resolver, event sink
//!   and cluster clock are injected
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use cluster_sdam::{Cluster, ClusterSettings, EndPoint, ReadPreferenceServerSelector};
//! use tokio_util::sync::CancellationToken;
//!
//! let settings = ClusterSettings::builder()
//!     .endpoints(vec![EndPoint::parse("db0.example.com:27017")?])
//!     .replica_set_name("rs0")
//!     .build()?;
//! let cluster = Cluster::builder().settings(settings).server_factory(my_factory).build();
//! cluster.initialize()?;
//!
//! let server = cluster
//!     .select_server(Arc::new(ReadPreferenceServerSelector::primary()), &CancellationToken::new())
//!     .await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Cluster (Public API)                     │
//! │ initialize │ select_server │ subscribe │ start_session      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Selection                                │
//! │  snapshot → pre/op/post selectors → registry → wait/retry   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Single Writer                            │
//! │  queued server reports │ DNS results │ publish on change    │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Topology: Single │ Multi │ LoadBalanced            │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Servers (ServerFactory)     │  DnsMonitor (own thread)     │
//! │  heartbeat → listener        │  SRV lookup → callbacks      │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod cluster;
mod description;
mod dns;
mod dns_monitor;
mod election;
mod endpoint;
mod error;
mod events;
pub mod mock;
mod selector;
mod server;
mod server_description;
mod session;
mod settings;

// Public API exports
pub use clock::{ClusterClock, ClusterTime, NoOpClusterClock, SharedClusterClock, greater_cluster_time};
pub use cluster::Cluster;
pub use description::{ClusterDescription, ClusterId, ClusterState, ClusterType};
pub use dns::{DnsResolver, HickoryDnsResolver, SrvRecord};
pub use dns_monitor::{
    DnsMonitor, DnsMonitorState, DnsMonitoringCluster, compute_rescan_delay, is_valid_host,
    validate_lookup_domain,
};
pub use election::{ELECTION_ID_PRIORITY_WIRE_VERSION, ElectionId, ElectionInfo, ReplicaSetConfig};
pub use endpoint::{DEFAULT_PORT, EndPoint};
pub use error::{Result, SdamError};
pub use events::{ClusterEvent, EventSink, MetricsEventSink, NoopEventSink};
pub use selector::{
    CompositeServerSelector, DelegateServerSelector, EndPointServerSelector, ReadPreferenceMode,
    ReadPreferenceServerSelector, ServerSelector, WritableServerSelector,
};
pub use server::{Server, ServerFactory, ServerListener};
pub use server_description::{
    SUPPORTED_WIRE_VERSION_RANGE, ServerDescription, ServerId, ServerState, ServerType,
    WireVersionRange,
};
pub use session::{ClientSession, ServerSession, ServerSessionPool, SessionOptions};
pub use settings::{
    ClusterKind, ClusterSettings, ConnectionMode, ConnectionScheme,
    DEFAULT_DNS_MIN_RESCAN_DELAY, DEFAULT_DNS_RETRY_DELAY,
    DEFAULT_MAX_SERVER_SELECTION_WAIT_QUEUE_SIZE, DEFAULT_MIN_HEARTBEAT_INTERVAL,
    DEFAULT_SERVER_SELECTION_TIMEOUT, DEFAULT_SRV_SERVICE_NAME,
};
