//! Background SRV polling for DNS-seeded deployments.
//!
//! ```text
//!   Created ──start()──▶ Running ──┬──▶ Stopped   (engine says stop, or cancelled)
//!                                  └──▶ Failed    (unhandled error, recorded)
//!
//!   each cycle:
//!     resolve _{service}._tcp.{domain}
//!       ├─ error         → process_dns_error(text)           delay = retry delay
//!       ├─ no valid host → diagnostic                         delay = retry delay
//!       └─ valid hosts   → process_dns_results(endpoints)     delay = max(floor, min TTL)
//!     should_dns_monitor_stop()? → Stopped
//!     sleep(delay)  (cancellable)
//! ```
//!
//! The monitor runs on its own named thread driving a current-thread tokio
//! runtime. It never mutates engine state directly: results are handed to the
//! engine through [`DnsMonitoringCluster`], which applies them under its own
//! writer discipline.

use std::{fmt, sync::Arc, thread::JoinHandle, time::Duration};

use parking_lot::Mutex;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    description::ClusterId,
    dns::{DnsResolver, SrvRecord},
    endpoint::EndPoint,
    error::{CancelledSnafu, InvalidLookupDomainSnafu, Result, RuntimeSnafu, SdamError},
    events::{ClusterEvent, EventSink},
    settings::{DEFAULT_DNS_MIN_RESCAN_DELAY, DEFAULT_DNS_RETRY_DELAY, DEFAULT_SRV_SERVICE_NAME},
};

/// Engine callbacks used by the DNS monitor.
pub trait DnsMonitoringCluster: Send + Sync {
    /// Returns `true` once membership no longer needs DNS polling.
    fn should_dns_monitor_stop(&self) -> bool;

    /// Applies a freshly resolved, validated endpoint list.
    ///
    /// # Errors
    ///
    /// Any error is treated as unhandled and stops the monitor.
    fn process_dns_results(&self, endpoints: Vec<EndPoint>) -> Result<()>;

    /// Records a resolution failure on the topology description.
    fn process_dns_error(&self, error: String);
}

/// Lifecycle state of a [`DnsMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsMonitorState {
    /// Constructed, not started.
    Created,
    /// Polling.
    Running,
    /// Exited normally.
    Stopped,
    /// Exited on an unhandled error.
    Failed,
}

/// Validates an SRV lookup domain.
///
/// The domain must have at least three non-empty labels (`a.b.com`), so that
/// the parent domain used for host validation still has two.
///
/// # Errors
///
/// Returns [`SdamError::InvalidLookupDomain`] otherwise.
pub fn validate_lookup_domain(domain: &str) -> Result<()> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
        return InvalidLookupDomainSnafu {
            domain,
            reason: "a DNS SRV lookup domain must have at least three labels",
        }
        .fail();
    }
    Ok(())
}

/// Returns the rescan delay for a set of records.
///
/// The delay is the shortest TTL among the records, but never less than
/// `floor`; an empty set yields `floor`.
#[must_use]
pub fn compute_rescan_delay(records: &[SrvRecord], floor: Duration) -> Duration {
    records.iter().map(SrvRecord::time_to_live).min().map_or(floor, |ttl| ttl.max(floor))
}

/// Returns `true` if `host` is a subdomain of the lookup domain's parent.
///
/// For lookup domain `a.b.com` the parent is `b.com`, so `x.b.com` is valid
/// and `x.bb.com` or `x.c.com` are not.
#[must_use]
pub fn is_valid_host(lookup_domain: &str, host: &str) -> bool {
    let Some((_, parent)) = lookup_domain.split_once('.') else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let suffix = format!(".{}", parent.to_ascii_lowercase());
    host.len() > suffix.len() && host.ends_with(&suffix)
}

/// Polls SRV records and feeds membership changes to the engine.
pub struct DnsMonitor {
    cluster: Arc<dyn DnsMonitoringCluster>,
    resolver: Arc<dyn DnsResolver>,
    lookup_domain: String,
    service: String,
    min_rescan_delay: Duration,
    retry_delay: Duration,
    events: Arc<dyn EventSink>,
    cluster_id: Option<ClusterId>,
    cancel: CancellationToken,
    state: Mutex<DnsMonitorState>,
    unhandled_error: Mutex<Option<String>>,
}

#[bon::bon]
impl DnsMonitor {
    /// Creates a monitor in the [`DnsMonitorState::Created`] state.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::InvalidLookupDomain`] if the domain has fewer than
    /// three labels.
    #[builder]
    pub fn new(
        cluster: Arc<dyn DnsMonitoringCluster>,
        resolver: Arc<dyn DnsResolver>,
        #[builder(into)] lookup_domain: String,
        #[builder(into, default = DEFAULT_SRV_SERVICE_NAME.to_string())] srv_service_name: String,
        #[builder(default = DEFAULT_DNS_MIN_RESCAN_DELAY)] min_rescan_delay: Duration,
        #[builder(default = DEFAULT_DNS_RETRY_DELAY)] retry_delay: Duration,
        #[builder(default = crate::events::default_event_sink())] events: Arc<dyn EventSink>,
        cluster_id: Option<ClusterId>,
        #[builder(default)] cancel: CancellationToken,
    ) -> Result<Self> {
        validate_lookup_domain(&lookup_domain)?;
        let lookup_domain = lookup_domain.to_ascii_lowercase();
        let service = format!("_{srv_service_name}._tcp.{lookup_domain}");
        Ok(Self {
            cluster,
            resolver,
            lookup_domain,
            service,
            min_rescan_delay,
            retry_delay,
            events,
            cluster_id,
            cancel,
            state: Mutex::new(DnsMonitorState::Created),
            unhandled_error: Mutex::new(None),
        })
    }
}

impl DnsMonitor {
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DnsMonitorState {
        *self.state.lock()
    }

    /// Returns the SRV service name queried each cycle.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the lookup domain.
    #[must_use]
    pub fn lookup_domain(&self) -> &str {
        &self.lookup_domain
    }

    /// Returns the error that stopped the monitor, if it failed.
    #[must_use]
    pub fn unhandled_error(&self) -> Option<String> {
        self.unhandled_error.lock().clone()
    }

    /// Starts polling on a dedicated background thread.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Runtime`] if the thread cannot be spawned.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        *self.state.lock() = DnsMonitorState::Running;
        let monitor = Arc::clone(self);
        std::thread::Builder::new()
            .name("sdam-dns-monitor".to_string())
            .spawn(move || monitor.run())
            .context(RuntimeSnafu)
    }

    fn run(&self) {
        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeSnafu)
            .and_then(|rt| rt.block_on(self.monitor()));

        match outcome {
            Ok(()) | Err(SdamError::Cancelled) => {
                tracing::debug!(service = %self.service, "DNS monitor stopped");
                *self.state.lock() = DnsMonitorState::Stopped;
            },
            Err(e) => {
                let message = format!("Unhandled error in DNS monitor for \"{}\": {e}", self.service);
                tracing::error!(service = %self.service, error = %e, "DNS monitor failed");
                *self.unhandled_error.lock() = Some(e.to_string());
                *self.state.lock() = DnsMonitorState::Failed;
                self.information(message);
            },
        }
    }

    /// Runs the polling loop until the engine asks it to stop.
    ///
    /// # Errors
    ///
    /// Returns [`SdamError::Cancelled`] when cancelled, or whatever error the
    /// engine returned from [`DnsMonitoringCluster::process_dns_results`].
    pub async fn monitor(&self) -> Result<()> {
        loop {
            let delay = match self.resolver.resolve_srv_records(&self.service, &self.cancel).await {
                Err(SdamError::Cancelled) => return CancelledSnafu.fail(),
                Err(e) => {
                    tracing::warn!(service = %self.service, error = %e, "DNS SRV resolution failed");
                    self.cluster.process_dns_error(e.to_string());
                    self.retry_delay
                },
                Ok(records) => {
                    let records = self.valid_records(records);
                    if records.is_empty() {
                        self.information(format!(
                            "A DNS SRV query on \"{}\" returned no valid hosts.",
                            self.service
                        ));
                        self.retry_delay
                    } else {
                        tracing::debug!(service = %self.service, hosts = records.len(), "Applying DNS SRV results");
                        let endpoints = records.iter().map(|r| r.endpoint().clone()).collect();
                        self.cluster.process_dns_results(endpoints)?;
                        compute_rescan_delay(&records, self.min_rescan_delay)
                    }
                },
            };

            if self.cluster.should_dns_monitor_stop() {
                return Ok(());
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return CancelledSnafu.fail(),
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Keeps the records whose host passes validation.
    ///
    /// Every rejected host produces a diagnostic. Rejected records take no
    /// part in the rescan delay.
    pub fn valid_records(&self, records: Vec<SrvRecord>) -> Vec<SrvRecord> {
        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            let host = record.endpoint().host();
            if is_valid_host(&self.lookup_domain, host) {
                valid.push(record);
            } else {
                self.information(format!(
                    "Invalid host returned by DNS SRV lookup: SRV record \"{}\" resolved to host \"{host}\", which is not a subdomain of the SRV lookup domain \"{}\".",
                    self.service, self.lookup_domain
                ));
            }
        }
        valid
    }

    fn information(&self, message: String) {
        tracing::info!(service = %self.service, "{message}");
        self.events.publish(&ClusterEvent::Information { cluster_id: self.cluster_id, message });
    }
}

impl fmt::Debug for DnsMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsMonitor")
            .field("service", &self.service)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
