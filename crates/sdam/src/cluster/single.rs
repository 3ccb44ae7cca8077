//! One fixed endpoint.

use crate::{
    description::ClusterType,
    endpoint::EndPoint,
    server_description::{ServerDescription, ServerState, ServerType},
    settings::{ClusterSettings, ConnectionMode},
};

use super::writer::Writer;

pub(super) struct SingleTopology {
    endpoint: Option<EndPoint>,
    connection_mode: ConnectionMode,
    initial_type: ClusterType,
    replica_set_name: Option<String>,
}

impl SingleTopology {
    pub(super) fn new(settings: &ClusterSettings) -> Self {
        Self {
            endpoint: settings.endpoints().first().cloned(),
            connection_mode: settings.connection_mode(),
            initial_type: settings.initial_cluster_type(),
            replica_set_name: settings.replica_set_name().map(str::to_string),
        }
    }

    pub(super) fn initialize(&mut self, writer: &mut Writer<'_>) {
        let mut description = writer.current().with_type(self.initial_type);
        if let Some(endpoint) = &self.endpoint {
            description = writer.ensure_server(description, endpoint);
        }
        writer.publish(description);
    }

    /// Applies the server's report, hiding the server while its role does
    /// not match what the connection mode expects.
    pub(super) fn server_description_changed(
        &mut self,
        writer: &mut Writer<'_>,
        new: ServerDescription,
    ) {
        let current = writer.current();
        let description = if new.state() == ServerState::Disconnected {
            current.with_type(self.initial_type).with_server_description(new)
        } else {
            match self.determine_cluster_type(&new) {
                ClusterType::Unknown => {
                    tracing::debug!(
                        endpoint = %new.endpoint(),
                        server_type = %new.server_type(),
                        mode = %self.connection_mode,
                        "Hiding server whose role does not match the connection mode"
                    );
                    current.with_type(ClusterType::Unknown).without_server_description(new.endpoint())
                },
                cluster_type => current.with_type(cluster_type).with_server_description(new),
            }
        };
        writer.publish(description);
    }

    fn determine_cluster_type(&self, server: &ServerDescription) -> ClusterType {
        if let Some(expected) = &self.replica_set_name {
            if server.replica_set_name() != Some(expected.as_str()) {
                return ClusterType::Unknown;
            }
        }

        let server_type = server.server_type();
        match self.connection_mode {
            ConnectionMode::Direct => server_type.to_cluster_type(),
            ConnectionMode::Standalone if server_type == ServerType::Standalone => {
                ClusterType::Standalone
            },
            _ => ClusterType::Unknown,
        }
    }
}
