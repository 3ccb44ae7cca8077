//! Collaborator interfaces for individual servers.
//!
//! The engine never talks to the network itself. Each endpoint is backed by a
//! [`Server`] created through a [`ServerFactory`]; the server runs its own
//! heartbeat loop and reports every new [`ServerDescription`] through the
//! [`ServerListener`] it was created with.

use std::{fmt, sync::Arc};

use crate::{
    clock::{ClusterClock, ClusterTime},
    description::ClusterId,
    endpoint::EndPoint,
    server_description::{ServerDescription, ServerId},
};

/// A monitored server owned by the engine.
///
/// Implementations must tolerate calls after [`Server::dispose`]; the engine
/// may race a heartbeat request against a removal.
pub trait Server: Send + Sync + fmt::Debug {
    /// Returns the server id.
    fn server_id(&self) -> &ServerId;

    /// Returns the endpoint.
    fn endpoint(&self) -> &EndPoint {
        self.server_id().endpoint()
    }

    /// Returns the latest description.
    fn description(&self) -> ServerDescription;

    /// Returns `true` once [`Server::initialize`] has been called.
    fn is_initialized(&self) -> bool;

    /// Starts monitoring.
    fn initialize(&self);

    /// Asks the monitor to heartbeat as soon as possible.
    fn request_heartbeat(&self);

    /// Marks the server unknown and requests a fresh heartbeat.
    fn invalidate(&self, reason: &str, cluster_time: Option<&ClusterTime>);

    /// Stops monitoring and releases resources.
    fn dispose(&self);
}

/// Receives description changes from servers.
pub trait ServerListener: Send + Sync {
    /// Called by a server whenever its description changes.
    fn description_changed(&self, old: &ServerDescription, new: &ServerDescription);
}

/// Creates servers for endpoints.
pub trait ServerFactory: Send + Sync + fmt::Debug {
    /// Creates an uninitialized server for `endpoint`.
    fn create_server(
        &self,
        cluster_id: ClusterId,
        clock: Arc<dyn ClusterClock>,
        endpoint: &EndPoint,
        listener: Arc<dyn ServerListener>,
    ) -> Arc<dyn Server>;
}
