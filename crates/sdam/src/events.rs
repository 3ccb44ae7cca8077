//! Topology lifecycle events and pluggable event sinks.
//!
//! The engine publishes a [`ClusterEvent`] for every lifecycle transition,
//! membership change, description change and selection attempt. Sinks are
//! publish-only and must not block: they are invoked inline on the writer
//! path.
//!
//! Two sinks are included:
//!
//! - [`NoopEventSink`]: discards every event (the default).
//! - [`MetricsEventSink`]: forwards counters and histograms to the
//!   [`metrics`](https://docs.rs/metrics) facade.
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sdam_cluster_lifecycle_total` | Counter | `event` | Opening/opened/closing/closed |
//! | `sdam_servers_total` | Counter | `event` | Servers added and removed |
//! | `sdam_description_changes_total` | Counter | | Published description changes |
//! | `sdam_server_selection_total` | Counter | `outcome` | Selection attempts by outcome |
//! | `sdam_server_selection_duration_seconds` | Histogram | `outcome` | Selection latency |
//! | `sdam_information_total` | Counter | | Diagnostic messages |

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    description::{ClusterDescription, ClusterId},
    endpoint::EndPoint,
    server_description::ServerId,
};

/// An event published by the engine.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// The engine is initializing.
    Opening {
        /// Cluster id.
        cluster_id: ClusterId,
    },
    /// The engine finished initializing.
    Opened {
        /// Cluster id.
        cluster_id: ClusterId,
        /// Time spent initializing.
        duration: Duration,
    },
    /// The engine is being disposed.
    Closing {
        /// Cluster id.
        cluster_id: ClusterId,
    },
    /// The engine has been disposed.
    Closed {
        /// Cluster id.
        cluster_id: ClusterId,
        /// Time spent disposing.
        duration: Duration,
    },
    /// A server is about to be created.
    AddingServer {
        /// Cluster id.
        cluster_id: ClusterId,
        /// Endpoint of the new server.
        endpoint: EndPoint,
    },
    /// A server was created and registered.
    AddedServer {
        /// Server id.
        server_id: ServerId,
        /// Time spent creating the server.
        duration: Duration,
    },
    /// A server is about to be removed.
    RemovingServer {
        /// Server id.
        server_id: ServerId,
        /// Why the server is being removed.
        reason: String,
    },
    /// A server was removed and disposed.
    RemovedServer {
        /// Server id.
        server_id: ServerId,
        /// Why the server was removed.
        reason: String,
        /// Time spent removing the server.
        duration: Duration,
    },
    /// A content-different description replaced the previous one.
    DescriptionChanged {
        /// Previous description.
        old: Arc<ClusterDescription>,
        /// New description.
        new: Arc<ClusterDescription>,
    },
    /// A server selection started.
    SelectingServer {
        /// Description at the start of selection.
        description: Arc<ClusterDescription>,
        /// Rendered selector.
        selector: String,
    },
    /// A server selection succeeded.
    SelectedServer {
        /// Description the server was selected from.
        description: Arc<ClusterDescription>,
        /// Rendered selector.
        selector: String,
        /// Selected server.
        server_id: ServerId,
        /// Time spent selecting.
        duration: Duration,
    },
    /// A server selection failed.
    SelectionFailed {
        /// Last description seen.
        description: Arc<ClusterDescription>,
        /// Rendered selector.
        selector: String,
        /// Rendered error.
        error: String,
        /// Time spent before failing.
        duration: Duration,
    },
    /// A selection found no server and started waiting.
    EnteredSelectionQueue {
        /// Description when the wait began.
        description: Arc<ClusterDescription>,
        /// Rendered selector.
        selector: String,
        /// Time left before the selection times out.
        remaining: Duration,
    },
    /// A diagnostic message.
    Information {
        /// Cluster id, if the message concerns one engine.
        cluster_id: Option<ClusterId>,
        /// Message text.
        message: String,
    },
}

impl ClusterEvent {
    /// Returns a short, stable name for the event kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opening { .. } => "opening",
            Self::Opened { .. } => "opened",
            Self::Closing { .. } => "closing",
            Self::Closed { .. } => "closed",
            Self::AddingServer { .. } => "adding_server",
            Self::AddedServer { .. } => "added_server",
            Self::RemovingServer { .. } => "removing_server",
            Self::RemovedServer { .. } => "removed_server",
            Self::DescriptionChanged { .. } => "description_changed",
            Self::SelectingServer { .. } => "selecting_server",
            Self::SelectedServer { .. } => "selected_server",
            Self::SelectionFailed { .. } => "selection_failed",
            Self::EnteredSelectionQueue { .. } => "entered_selection_queue",
            Self::Information { .. } => "information",
        }
    }
}

/// Receives engine events.
///
/// Implementations must be `Send + Sync` and must not block: the engine calls
/// [`EventSink::publish`] inline.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Publishes one event.
    fn publish(&self, event: &ClusterEvent) {
        let _ = event;
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

/// Sink that forwards events to the `metrics` crate facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsEventSink;

/// Metric name constants for the `metrics` crate facade.
mod metric_names {
    /// Engine lifecycle transitions.
    pub const LIFECYCLE_TOTAL: &str = "sdam_cluster_lifecycle_total";
    /// Servers added and removed.
    pub const SERVERS_TOTAL: &str = "sdam_servers_total";
    /// Published description changes.
    pub const DESCRIPTION_CHANGES_TOTAL: &str = "sdam_description_changes_total";
    /// Selection attempts by outcome.
    pub const SELECTION_TOTAL: &str = "sdam_server_selection_total";
    /// Selection latency.
    pub const SELECTION_DURATION: &str = "sdam_server_selection_duration_seconds";
    /// Diagnostic messages.
    pub const INFORMATION_TOTAL: &str = "sdam_information_total";
}

impl EventSink for MetricsEventSink {
    fn publish(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::Opening { .. }
            | ClusterEvent::Opened { .. }
            | ClusterEvent::Closing { .. }
            | ClusterEvent::Closed { .. } => {
                metrics::counter!(metric_names::LIFECYCLE_TOTAL, "event" => event.name())
                    .increment(1);
            },
            ClusterEvent::AddedServer { .. } | ClusterEvent::RemovedServer { .. } => {
                metrics::counter!(metric_names::SERVERS_TOTAL, "event" => event.name()).increment(1);
            },
            ClusterEvent::DescriptionChanged { .. } => {
                metrics::counter!(metric_names::DESCRIPTION_CHANGES_TOTAL).increment(1);
            },
            ClusterEvent::SelectedServer { duration, .. } => {
                metrics::counter!(metric_names::SELECTION_TOTAL, "outcome" => "selected").increment(1);
                metrics::histogram!(metric_names::SELECTION_DURATION, "outcome" => "selected")
                    .record(duration.as_secs_f64());
            },
            ClusterEvent::SelectionFailed { duration, .. } => {
                metrics::counter!(metric_names::SELECTION_TOTAL, "outcome" => "failed").increment(1);
                metrics::histogram!(metric_names::SELECTION_DURATION, "outcome" => "failed")
                    .record(duration.as_secs_f64());
            },
            ClusterEvent::Information { .. } => {
                metrics::counter!(metric_names::INFORMATION_TOTAL).increment(1);
            },
            ClusterEvent::AddingServer { .. }
            | ClusterEvent::RemovingServer { .. }
            | ClusterEvent::SelectingServer { .. }
            | ClusterEvent::EnteredSelectionQueue { .. } => {},
        }
    }
}

/// Creates the default sink (no-op).
pub(crate) fn default_event_sink() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}
