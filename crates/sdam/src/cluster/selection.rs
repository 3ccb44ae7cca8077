//! Server selection.
//!
//! Selection loops over description snapshots: evaluate the current one, and
//! if nothing matches, wait on the description channel (bounded by the
//! remaining timeout) and try again. Each wait re-borrows the receiver with
//! `borrow_and_update`, so a description published between the evaluation
//! and the wait is never missed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    description::ClusterDescription,
    error::{
        BlockingInRuntimeSnafu, CancelledSnafu, DisposedSnafu, IncompatibleServerSnafu,
        NotInitializedSnafu, Result, RuntimeSnafu, ServerSelectionTimeoutSnafu,
        WaitQueueFullSnafu,
    },
    events::ClusterEvent,
    selector::{CompositeServerSelector, ServerSelector},
    server::Server,
    server_description::{SUPPORTED_WIRE_VERSION_RANGE, ServerDescription},
    settings::ClusterKind,
};

use super::{ClusterInner, STATE_DISPOSED, STATE_OPEN};

/// A slot in the selection wait queue, released on drop.
struct WaitQueueSlot<'a> {
    size: &'a AtomicUsize,
}

impl Drop for WaitQueueSlot<'_> {
    fn drop(&mut self) {
        self.size.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ClusterInner {
    pub(super) async fn select_server(
        &self,
        selector: Arc<dyn ServerSelector>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        self.ensure_open()?;
        let selector = self.decorate(selector);
        let selector_text = selector.to_string();
        let started = Instant::now();
        let deadline = started + timeout;

        let mut rx = self.description_tx.subscribe();
        let mut description = rx.borrow_and_update().clone();
        self.emit(ClusterEvent::SelectingServer {
            description: Arc::clone(&description),
            selector: selector_text.clone(),
        });

        let mut slot: Option<WaitQueueSlot<'_>> = None;
        let outcome: Result<Arc<dyn Server>> = loop {
            if self.is_disposed() {
                break DisposedSnafu.fail();
            }
            match self.try_select(&description, selector.as_ref()) {
                Ok(Some(server)) => break Ok(server),
                Ok(None) => {},
                Err(e) => break Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                break ServerSelectionTimeoutSnafu {
                    message: format!(
                        "A timeout occurred after {}ms selecting a server using {selector_text}. Client view of cluster state is {description}.",
                        started.elapsed().as_millis()
                    ),
                }
                .fail();
            }
            let remaining = deadline - now;

            if slot.is_none() {
                match self.enter_wait_queue() {
                    Ok(entered) => slot = Some(entered),
                    Err(e) => break Err(e),
                }
                tracing::debug!(cluster_id = %self.cluster_id, selector = %selector_text, ?remaining, "Waiting for a suitable server");
                self.emit(ClusterEvent::EnteredSelectionQueue {
                    description: Arc::clone(&description),
                    selector: selector_text.clone(),
                    remaining,
                });
            }
            self.request_heartbeat_throttled();

            let heartbeat_interval = self.settings.min_heartbeat_interval();
            let tick = if heartbeat_interval.is_zero() { remaining } else { remaining.min(heartbeat_interval) };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break CancelledSnafu.fail(),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break DisposedSnafu.fail();
                    }
                },
                () = tokio::time::sleep(tick) => {},
            }
            description = rx.borrow_and_update().clone();
        };
        drop(slot);

        let duration = started.elapsed();
        match &outcome {
            Ok(server) => {
                tracing::debug!(cluster_id = %self.cluster_id, endpoint = %server.endpoint(), ?duration, "Selected server");
                self.emit(ClusterEvent::SelectedServer {
                    description,
                    selector: selector_text,
                    server_id: server.server_id().clone(),
                    duration,
                });
            },
            Err(e) => {
                tracing::debug!(cluster_id = %self.cluster_id, error = %e, ?duration, "Server selection failed");
                self.emit(ClusterEvent::SelectionFailed {
                    description,
                    selector: selector_text,
                    error: e.to_string(),
                    duration,
                });
            },
        }
        outcome
    }

    pub(super) fn select_server_blocking(
        &self,
        selector: Arc<dyn ServerSelector>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Server>> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return BlockingInRuntimeSnafu { operation: "select_server_blocking" }.fail();
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context(RuntimeSnafu)?;
        runtime.block_on(self.select_server(selector, timeout, cancel))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => Ok(()),
            STATE_DISPOSED => DisposedSnafu.fail(),
            _ => NotInitializedSnafu.fail(),
        }
    }

    /// Wraps the operation selector with the configured pre and post selectors.
    fn decorate(&self, selector: Arc<dyn ServerSelector>) -> Arc<dyn ServerSelector> {
        let pre = self.settings.pre_server_selector();
        let post = self.settings.post_server_selector();
        if pre.is_none() && post.is_none() {
            return selector;
        }
        Arc::new(CompositeServerSelector::new(
            pre.cloned().into_iter().chain([selector]).chain(post.cloned()),
        ))
    }

    /// Evaluates one snapshot.
    ///
    /// Fails if any known server is incompatible, otherwise returns the first
    /// selected server that is still registered.
    fn try_select(
        &self,
        description: &ClusterDescription,
        selector: &dyn ServerSelector,
    ) -> Result<Option<Arc<dyn Server>>> {
        if let Some(server) = description.incompatible_server() {
            return IncompatibleServerSnafu { message: incompatibility_message(server, description) }
                .fail();
        }
        if self.kind == ClusterKind::LoadBalanced {
            return Ok(self.servers.load().first().cloned());
        }

        let connected: Vec<ServerDescription> =
            description.servers().iter().filter(|s| s.is_connected()).cloned().collect();
        Ok(selector
            .select_servers(description, &connected)
            .iter()
            .find_map(|candidate| self.find_server(candidate.endpoint())))
    }

    fn enter_wait_queue(&self) -> Result<WaitQueueSlot<'_>> {
        let max_size = self.settings.max_server_selection_wait_queue_size();
        if self.wait_queue_size.fetch_add(1, Ordering::AcqRel) >= max_size {
            self.wait_queue_size.fetch_sub(1, Ordering::AcqRel);
            return WaitQueueFullSnafu { max_size }.fail();
        }
        Ok(WaitQueueSlot { size: &self.wait_queue_size })
    }

    /// Asks monitored servers for an immediate heartbeat, at most once per
    /// minimum heartbeat interval across all waiters.
    fn request_heartbeat_throttled(&self) {
        if self.kind == ClusterKind::LoadBalanced {
            return;
        }
        {
            let mut last = self.last_heartbeat_request.lock();
            let now = Instant::now();
            if last.is_some_and(|t| now.duration_since(t) < self.settings.min_heartbeat_interval()) {
                return;
            }
            *last = Some(now);
        }
        for server in self.servers.load().iter().filter(|s| s.is_initialized()) {
            server.request_heartbeat();
        }
    }
}

fn incompatibility_message(server: &ServerDescription, description: &ClusterDescription) -> String {
    let supported = SUPPORTED_WIRE_VERSION_RANGE;
    let detail = match server.wire_version_range() {
        Some(range) if range.max() < *supported.start() => format!(
            "Server at {} reports wire version {}, but this version of the driver requires at least {}.",
            server.endpoint(),
            range.max(),
            supported.start()
        ),
        Some(range) => format!(
            "Server at {} requires wire version {}, but this version of the driver only supports up to {}.",
            server.endpoint(),
            range.min(),
            supported.end()
        ),
        None => format!("Server at {} is incompatible with this driver.", server.endpoint()),
    };
    format!("{detail} Client view of cluster state is {description}.")
}
