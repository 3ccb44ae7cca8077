//! SRV record resolution.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{Resolver, config::ResolverConfig, name_server::TokioConnectionProvider};
use tokio_util::sync::CancellationToken;

use crate::{
    endpoint::EndPoint,
    error::{CancelledSnafu, DnsResolutionSnafu, Result},
};

/// One resolved SRV record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SrvRecord {
    endpoint: EndPoint,
    time_to_live: Duration,
}

impl SrvRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(endpoint: EndPoint, time_to_live: Duration) -> Self {
        Self { endpoint, time_to_live }
    }

    /// Returns the target endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    /// Returns the record's time to live.
    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }
}

/// Resolves SRV records.
#[async_trait]
pub trait DnsResolver: Send + Sync + fmt::Debug {
    /// Resolves `service` (e.g. `_mongodb._tcp.cluster0.example.com`).
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Cancelled`](crate::SdamError::Cancelled) if
    /// `cancel` fires first, or
    /// [`SdamError::DnsResolution`](crate::SdamError::DnsResolution) if the
    /// lookup fails.
    async fn resolve_srv_records(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SrvRecord>>;
}

/// [`DnsResolver`] backed by the system configuration through hickory.
#[derive(Clone)]
pub struct HickoryDnsResolver {
    resolver: Resolver<TokioConnectionProvider>,
}

impl HickoryDnsResolver {
    /// Creates a resolver using the default resolver configuration.
    #[must_use]
    pub fn new() -> Self {
        let resolver = Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();
        Self { resolver }
    }
}

impl Default for HickoryDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HickoryDnsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryDnsResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve_srv_records(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SrvRecord>> {
        let lookup = tokio::select! {
            _ = cancel.cancelled() => return CancelledSnafu.fail(),
            result = self.resolver.srv_lookup(service) => result,
        };
        let lookup = lookup.map_err(|e| {
            DnsResolutionSnafu { service, message: e.to_string() }.build()
        })?;

        let ttl = lookup
            .as_lookup()
            .valid_until()
            .saturating_duration_since(std::time::Instant::now());

        let records = lookup
            .iter()
            .map(|srv| {
                // Targets are fully qualified; endpoints carry no root label.
                let target = srv.target().to_utf8();
                SrvRecord::new(EndPoint::new(target.trim_end_matches('.'), srv.port()), ttl)
            })
            .collect::<Vec<_>>();

        tracing::debug!(service, records = records.len(), ttl_secs = ttl.as_secs(), "Resolved SRV records");
        Ok(records)
    }
}
