//! A single load balancer fronting the deployment.
//!
//! The engine never heartbeats a load balancer: it creates exactly one
//! server, either from the static endpoint or from the first SRV lookup that
//! returns exactly one record, and always routes to it.

use crate::{
    description::ClusterType,
    endpoint::EndPoint,
    error::{NoSrvRecordsSnafu, Result, SdamError},
    server_description::ServerDescription,
    settings::{ClusterSettings, ConnectionScheme},
};

use super::writer::Writer;

pub(super) struct LoadBalancedTopology {
    endpoint: Option<EndPoint>,
    srv: bool,
}

impl LoadBalancedTopology {
    pub(super) fn new(settings: &ClusterSettings) -> Self {
        Self {
            endpoint: settings.endpoints().first().cloned(),
            srv: settings.scheme() == ConnectionScheme::Srv,
        }
    }

    pub(super) fn initialize(&mut self, writer: &mut Writer<'_>) {
        let mut description = writer.current().with_type(ClusterType::LoadBalanced);
        if !self.srv {
            if let Some(endpoint) = &self.endpoint {
                description = writer.ensure_server(description, endpoint);
            }
        }
        writer.publish(description);
    }

    pub(super) fn server_description_changed(
        &mut self,
        writer: &mut Writer<'_>,
        new: ServerDescription,
    ) {
        let description = writer.current().with_server_description(new);
        writer.publish(description);
    }

    pub(super) fn process_dns_results(
        &mut self,
        writer: &mut Writer<'_>,
        endpoints: Vec<EndPoint>,
    ) -> Result<()> {
        let endpoint = match endpoints.as_slice() {
            [] => return NoSrvRecordsSnafu.fail(),
            [endpoint] => endpoint,
            _ => {
                return Err(SdamError::config(
                    "Load balanced mode cannot be used with multiple host names.",
                ));
            },
        };

        let mut description = writer.current().with_dns_monitor_error(None);
        if writer.server_count() == 0 {
            tracing::info!(endpoint = %endpoint, "Load balancer resolved through DNS");
            description = writer.ensure_server(description, endpoint);
        }
        writer.publish(description);
        Ok(())
    }
}
