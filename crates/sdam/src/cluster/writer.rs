//! Single-writer application of topology updates.
//!
//! Every mutation of the published description happens while holding the
//! topology lock. Server notifications may arrive on any thread, including
//! re-entrantly from inside a server call the writer itself makes, so they
//! are queued and drained by whichever thread holds (or next acquires) the
//! lock. Servers created during an update are initialized only after the lock
//! is released.

use std::{sync::Arc, time::Instant};

use crate::{
    description::ClusterDescription,
    endpoint::EndPoint,
    events::ClusterEvent,
    server::Server,
    server_description::ServerDescription,
};

use super::{ClusterInner, EngineListener, Topology};

/// A queued server notification.
#[derive(Debug)]
pub(super) struct ServerChanged {
    pub(super) old: ServerDescription,
    pub(super) new: ServerDescription,
}

/// Write access to the engine for the duration of one locked section.
pub(super) struct Writer<'a> {
    inner: &'a ClusterInner,
    new_servers: Vec<Arc<dyn Server>>,
}

impl<'a> Writer<'a> {
    fn new(inner: &'a ClusterInner) -> Self {
        Self { inner, new_servers: Vec::new() }
    }

    /// Returns the currently published description.
    pub(super) fn current(&self) -> Arc<ClusterDescription> {
        self.inner.description_tx.borrow().clone()
    }

    /// Publishes `new` if its content differs from the current description.
    pub(super) fn publish(&mut self, new: ClusterDescription) {
        let old = self.current();
        if *old == new {
            return;
        }
        let new = Arc::new(new);
        self.inner.description_tx.send_replace(Arc::clone(&new));
        tracing::debug!(
            cluster_id = %self.inner.cluster_id,
            cluster_type = %new.cluster_type(),
            servers = new.servers().len(),
            "Cluster description changed"
        );
        self.inner.emit(ClusterEvent::DescriptionChanged { old: Arc::clone(&old), new: Arc::clone(&new) });
        let listeners = self.inner.listeners.read();
        for listener in listeners.iter() {
            listener(&old, &new);
        }
    }

    /// Returns the registered server at `endpoint`.
    pub(super) fn find_server(&self, endpoint: &EndPoint) -> Option<Arc<dyn Server>> {
        self.inner.find_server(endpoint)
    }

    /// Returns the number of registered servers.
    pub(super) fn server_count(&self) -> usize {
        self.inner.servers.load().len()
    }

    /// Creates and registers a server for `endpoint` unless one exists.
    ///
    /// The returned description includes the new server's initial
    /// description. Nothing is created once the engine is disposed.
    pub(super) fn ensure_server(
        &mut self,
        description: ClusterDescription,
        endpoint: &EndPoint,
    ) -> ClusterDescription {
        if self.inner.is_disposed() || self.find_server(endpoint).is_some() {
            return description;
        }

        let started = Instant::now();
        self.inner.emit(ClusterEvent::AddingServer {
            cluster_id: self.inner.cluster_id,
            endpoint: endpoint.clone(),
        });
        let listener = Arc::new(EngineListener { inner: self.inner.weak_self.clone() });
        let server = self.inner.factory.create_server(
            self.inner.cluster_id,
            Arc::clone(&self.inner.clock),
            endpoint,
            listener,
        );

        let mut servers = Vec::clone(&self.inner.servers.load());
        servers.push(Arc::clone(&server));
        self.inner.servers.store(Arc::new(servers));
        self.new_servers.push(Arc::clone(&server));

        let description = description.with_server_description(server.description());
        tracing::info!(cluster_id = %self.inner.cluster_id, endpoint = %endpoint, "Added server");
        self.inner.emit(ClusterEvent::AddedServer {
            server_id: server.server_id().clone(),
            duration: started.elapsed(),
        });
        description
    }

    /// Unregisters and disposes the server at `endpoint`, if any.
    pub(super) fn remove_server(
        &mut self,
        description: ClusterDescription,
        endpoint: &EndPoint,
        reason: &str,
    ) -> ClusterDescription {
        let Some(server) = self.find_server(endpoint) else {
            return description;
        };

        let started = Instant::now();
        self.inner.emit(ClusterEvent::RemovingServer {
            server_id: server.server_id().clone(),
            reason: reason.to_string(),
        });

        let servers: Vec<_> = self
            .inner
            .servers
            .load()
            .iter()
            .filter(|s| s.endpoint() != endpoint)
            .cloned()
            .collect();
        self.inner.servers.store(Arc::new(servers));
        self.new_servers.retain(|s| s.endpoint() != endpoint);
        server.dispose();

        tracing::info!(cluster_id = %self.inner.cluster_id, endpoint = %endpoint, reason, "Removed server");
        self.inner.emit(ClusterEvent::RemovedServer {
            server_id: server.server_id().clone(),
            reason: reason.to_string(),
            duration: started.elapsed(),
        });
        description.without_server_description(endpoint)
    }

    /// Unregisters and disposes every server without per-server events.
    pub(super) fn dispose_all_servers(&mut self) {
        let servers = self.inner.servers.swap(Arc::new(Vec::new()));
        self.new_servers.clear();
        for server in servers.iter() {
            server.dispose();
        }
    }

    /// Emits a diagnostic message for this engine.
    pub(super) fn information(&self, message: String) {
        self.inner.information(message);
    }
}

impl ClusterInner {
    /// Runs `f` under the writer lock, draining queued notifications before
    /// and after, then initializes any servers the section created.
    pub(super) fn with_writer<R>(&self, f: impl FnOnce(&mut Topology, &mut Writer<'_>) -> R) -> R {
        let (result, new_servers) = {
            let mut topology = self.topology.lock();
            let mut writer = Writer::new(self);
            self.apply_pending(&mut *topology, &mut writer);
            let result = f(&mut *topology, &mut writer);
            self.apply_pending(&mut *topology, &mut writer);
            (result, writer.new_servers)
        };
        initialize_servers(new_servers);
        self.drain();
        result
    }

    /// Queues a server notification and drains the queue if no other thread
    /// currently holds the writer lock.
    pub(super) fn submit(&self, update: ServerChanged) {
        self.pending.lock().push_back(update);
        self.drain();
    }

    fn drain(&self) {
        loop {
            let new_servers = {
                let Some(mut topology) = self.topology.try_lock() else {
                    return;
                };
                let mut writer = Writer::new(self);
                self.apply_pending(&mut *topology, &mut writer);
                writer.new_servers
            };
            initialize_servers(new_servers);
            // A notification queued after our last pop but before the unlock
            // would otherwise be stranded.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn apply_pending(&self, topology: &mut Topology, writer: &mut Writer<'_>) {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(update) = next else {
                return;
            };
            if self.is_disposed() || writer.find_server(update.new.endpoint()).is_none() {
                tracing::trace!(endpoint = %update.new.endpoint(), "Ignoring notification from unregistered server");
                continue;
            }
            tracing::trace!(
                endpoint = %update.new.endpoint(),
                from = %update.old.server_type(),
                to = %update.new.server_type(),
                state = %update.new.state(),
                "Applying server description"
            );
            topology.server_description_changed(writer, update.new);
        }
    }
}

fn initialize_servers(servers: Vec<Arc<dyn Server>>) {
    for server in servers {
        if !server.is_initialized() {
            server.initialize();
        }
    }
}
