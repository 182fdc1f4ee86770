//! Bounded-concurrency connectivity checks
//!
//! ## Batch flow
//!
//! ```text
//! raw ids → canonicalise (fail fast) → de-duplicate → inventory lookup
//!        → buffer_unordered(max_concurrent) → spawn + timeout per device
//!        → one ConnectivityResult per id → counts + elapsed
//! ```
//!
//! Every device check runs in its own task under its own deadline. A slow,
//! refusing or panicking device degrades to an offline result and never
//! holds up or aborts the rest of the batch.
//!
//! Each finished device is also announced as a [`BatchProgress`] to anyone
//! subscribed through [`ConnectivityProbe::subscribe_progress`].

pub mod ping;
pub mod prober;
pub mod redfish;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::{MAX_CONCURRENT_LIMIT, ProbeConfig};
use crate::devices::DeviceRegistry;
use crate::{Device, DeviceId, MonitorError, MonitorResult, ProbeError};

pub use prober::{NetworkProber, ProbeOutcome, ProbeRequest, Prober};
pub use redfish::RedfishProber;

/// Which of a device's addresses a batch checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTarget {
    /// The production network address
    #[default]
    Business,
    /// The BMC / management controller address
    OutOfBand,
}

impl ProbeTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeTarget::Business => "business",
            ProbeTarget::OutOfBand => "out-of-band",
        }
    }
}

/// Build the prober matching a probe target
///
/// The first attempt (ICMP or the Redfish request) gets `ping_timeout_secs`,
/// so a silent host still leaves the TCP fallback time to run inside the
/// per-device `timeout_secs`.
pub fn prober_for(config: &ProbeConfig) -> anyhow::Result<Arc<dyn Prober>> {
    let first_attempt = Duration::from_secs(config.ping_timeout_secs);
    let port_timeout = Duration::from_secs(config.port_timeout_secs);

    Ok(match config.target {
        ProbeTarget::Business => Arc::new(NetworkProber::new(first_attempt, port_timeout)),
        ProbeTarget::OutOfBand => Arc::new(RedfishProber::new(first_attempt, port_timeout)?),
    })
}

/// Progress events kept for a slow subscriber before it starts lagging
const PROGRESS_BUFFER: usize = 256;

/// One more device of a batch has a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    /// Start of the batch this event belongs to
    pub check_time: DateTime<Utc>,
    pub completed: usize,
    pub total: usize,
    pub device_id: DeviceId,
    pub hostname: Option<String>,
}

impl BatchProgress {
    /// Share of the batch done, in percent with two decimals
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }

    /// Whether this event falls on a tenth of the batch, or ends it
    pub fn is_milestone(&self) -> bool {
        let step = (self.total / 10).max(1);
        self.completed == self.total || self.completed % step == 0
    }
}

/// A device identifier as it arrives from a caller
///
/// JSON clients send ids as numbers or as strings; anything else is kept so
/// the error can name it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawDeviceId {
    Integer(u64),
    Text(String),
    Other(serde_json::Value),
}

impl RawDeviceId {
    /// Coerce to the canonical integer form
    pub fn canonicalize(&self) -> MonitorResult<DeviceId> {
        match self {
            RawDeviceId::Integer(id) => Ok(DeviceId(*id)),
            RawDeviceId::Text(text) => text
                .trim()
                .parse::<u64>()
                .map(DeviceId)
                .map_err(|_| MonitorError::invalid(format!("'{text}' is not a valid device id"))),
            RawDeviceId::Other(value) => Err(MonitorError::invalid(format!(
                "{value} is not a valid device id"
            ))),
        }
    }
}

impl From<u64> for RawDeviceId {
    fn from(id: u64) -> Self {
        RawDeviceId::Integer(id)
    }
}

impl From<&str> for RawDeviceId {
    fn from(id: &str) -> Self {
        RawDeviceId::Text(id.to_string())
    }
}

impl From<DeviceId> for RawDeviceId {
    fn from(id: DeviceId) -> Self {
        RawDeviceId::Integer(id.0)
    }
}

/// Canonicalise and de-duplicate a caller's id list
///
/// Fails on the first id that cannot be coerced. First-seen order is kept.
pub fn canonicalize_ids(raw: &[RawDeviceId]) -> MonitorResult<Vec<DeviceId>> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut ids = Vec::with_capacity(raw.len());

    for raw_id in raw {
        let id = raw_id.canonicalize()?;
        if seen.insert(id) {
            ids.push(id);
        }
    }

    Ok(ids)
}

fn validate_max_concurrent(max_concurrent: usize) -> MonitorResult<()> {
    if (1..=MAX_CONCURRENT_LIMIT).contains(&max_concurrent) {
        Ok(())
    } else {
        Err(MonitorError::invalid(format!(
            "max_concurrent must be between 1 and {MAX_CONCURRENT_LIMIT}, got {max_concurrent}"
        )))
    }
}

/// Result of checking one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityResult {
    pub device_id: DeviceId,
    pub hostname: Option<String>,
    /// The address that was probed
    pub address: Option<IpAddr>,
    pub location: Option<String>,
    pub online: bool,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: Option<f64>,
    pub method: Option<String>,
    pub error: Option<ProbeError>,
}

impl ConnectivityResult {
    fn offline(
        device_id: DeviceId,
        device: Option<&Device>,
        address: Option<IpAddr>,
        error: ProbeError,
    ) -> Self {
        Self {
            device_id,
            hostname: device.map(|d| d.hostname.clone()),
            address,
            location: device.and_then(|d| d.location.clone()),
            online: false,
            checked_at: Utc::now(),
            latency_ms: None,
            method: None,
            error: Some(error),
        }
    }
}

/// Aggregate outcome of one probe batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub duration_ms: f64,
    pub check_time: DateTime<Utc>,
    pub results: Vec<ConnectivityResult>,
}

impl BatchReport {
    fn from_results(
        results: Vec<ConnectivityResult>,
        check_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let online = results.iter().filter(|r| r.online).count();
        Self {
            total: results.len(),
            online,
            offline: results.len() - online,
            duration_ms: (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
            check_time,
            results,
        }
    }

    /// Results keyed by device id
    pub fn by_device(&self) -> HashMap<DeviceId, &ConnectivityResult> {
        self.results.iter().map(|r| (r.device_id, r)).collect()
    }
}

/// Result of checking an address that is not in the inventory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressReport {
    pub address: IpAddr,
    pub online: bool,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub latency_ms: Option<f64>,
    pub method: Option<String>,
    pub error: Option<ProbeError>,
}

/// Checks reachability of inventory devices with bounded parallelism
#[derive(Clone)]
pub struct ConnectivityProbe {
    registry: Arc<dyn DeviceRegistry>,
    prober: Arc<dyn Prober>,
    target: ProbeTarget,
    check_timeout: Duration,
    default_max_concurrent: usize,
    progress: broadcast::Sender<BatchProgress>,
}

impl ConnectivityProbe {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        prober: Arc<dyn Prober>,
        config: &ProbeConfig,
    ) -> Self {
        Self {
            registry,
            prober,
            target: config.target,
            check_timeout: Duration::from_secs(config.timeout_secs),
            default_max_concurrent: config.max_concurrent,
            progress: broadcast::channel(PROGRESS_BUFFER).0,
        }
    }

    /// Per-device completion events of every batch started after this call
    pub fn subscribe_progress(&self) -> broadcast::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    /// Number of devices a full batch would check
    pub async fn inventory_size(&self) -> MonitorResult<usize> {
        Ok(self.registry.list_devices().await?.len())
    }

    /// Override the per-device deadline
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn target(&self) -> ProbeTarget {
        self.target
    }

    pub fn default_max_concurrent(&self) -> usize {
        self.default_max_concurrent
    }

    /// Check every registered device with the configured concurrency
    pub async fn check_all(&self) -> MonitorResult<BatchReport> {
        self.batch_check(None, self.default_max_concurrent).await
    }

    /// Check a set of devices, or the whole inventory when `device_ids` is `None`
    ///
    /// Fails only on malformed input or an unreadable inventory. The report
    /// carries exactly one result per distinct requested id.
    #[instrument(skip(self, device_ids), fields(requested = device_ids.map(|ids| ids.len())))]
    pub async fn batch_check(
        &self,
        device_ids: Option<&[RawDeviceId]>,
        max_concurrent: usize,
    ) -> MonitorResult<BatchReport> {
        validate_max_concurrent(max_concurrent)?;

        let entries: Vec<(DeviceId, Option<Device>)> = match device_ids {
            Some(raw) => {
                let ids = canonicalize_ids(raw)?;
                let mut found = self.registry.get_devices(&ids).await?;
                ids.into_iter().map(|id| (id, found.remove(&id))).collect()
            }
            None => self
                .registry
                .list_devices()
                .await?
                .into_iter()
                .map(|device| (device.device_id, Some(device)))
                .collect(),
        };

        let check_time = Utc::now();
        let start = Instant::now();

        if entries.is_empty() {
            debug!("no devices to check");
            return Ok(BatchReport::from_results(Vec::new(), check_time, start.elapsed()));
        }

        info!(
            "checking {} {} addresses with concurrency {max_concurrent}",
            entries.len(),
            self.target.as_str()
        );

        let total = entries.len();
        let mut checks = std::pin::pin!(
            stream::iter(entries)
                .map(|(id, device)| self.check_device(id, device))
                .buffer_unordered(max_concurrent)
        );

        let mut results = Vec::with_capacity(total);
        while let Some(result) = checks.next().await {
            // no subscribers is fine
            let _ = self.progress.send(BatchProgress {
                check_time,
                completed: results.len() + 1,
                total,
                device_id: result.device_id,
                hostname: result.hostname.clone(),
            });
            results.push(result);
        }

        let report = BatchReport::from_results(results, check_time, start.elapsed());
        info!(
            "connectivity batch done: {} online, {} offline in {}ms",
            report.online, report.offline, report.duration_ms
        );

        Ok(report)
    }

    /// Check a bare address with the configured prober
    pub async fn check_address(&self, address: IpAddr) -> AddressReport {
        let request = ProbeRequest {
            device_id: None,
            hostname: address.to_string(),
            ip: address,
            port: None,
        };

        let start = Instant::now();
        let checked_at = Utc::now();
        let outcome = self.run_isolated(request).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(outcome) => AddressReport {
                address,
                online: outcome.online,
                checked_at,
                duration_ms,
                latency_ms: outcome.latency_ms,
                error: outcome.detail.map(ProbeError::Failure),
                method: Some(outcome.method),
            },
            Err(error) => AddressReport {
                address,
                online: false,
                checked_at,
                duration_ms,
                latency_ms: None,
                method: None,
                error: Some(error),
            },
        }
    }

    fn address_of(&self, device: &Device) -> Option<(IpAddr, Option<u16>)> {
        match self.target {
            ProbeTarget::Business => device.business_ip.map(|ip| (ip, None)),
            ProbeTarget::OutOfBand => device.oob_ip.map(|ip| (ip, Some(device.oob_port))),
        }
    }

    async fn check_device(&self, id: DeviceId, device: Option<Device>) -> ConnectivityResult {
        let Some(device) = device else {
            warn!("device {id} not found in inventory");
            return ConnectivityResult::offline(id, None, None, ProbeError::NotFound);
        };

        let Some((ip, port)) = self.address_of(&device) else {
            return ConnectivityResult::offline(
                id,
                Some(&device),
                None,
                ProbeError::MissingAddress(self.target.as_str().to_string()),
            );
        };

        let request = ProbeRequest {
            device_id: Some(id),
            hostname: device.hostname.clone(),
            ip,
            port,
        };

        match self.run_isolated(request).await {
            Ok(outcome) => ConnectivityResult {
                device_id: id,
                hostname: Some(device.hostname),
                address: Some(ip),
                location: device.location,
                online: outcome.online,
                checked_at: Utc::now(),
                latency_ms: outcome.latency_ms,
                error: if outcome.online {
                    None
                } else {
                    Some(ProbeError::Failure(
                        outcome.detail.unwrap_or_else(|| "unreachable".to_string()),
                    ))
                },
                method: Some(outcome.method),
            },
            Err(error) => {
                debug!("device {id} ({}) offline: {error}", device.hostname);
                ConnectivityResult::offline(id, Some(&device), Some(ip), error)
            }
        }
    }

    /// Run one prober call in its own task under the per-device deadline
    async fn run_isolated(&self, request: ProbeRequest) -> Result<ProbeOutcome, ProbeError> {
        let prober = Arc::clone(&self.prober);
        let timeout = self.check_timeout;

        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, prober.check(&request)).await
        });

        match task.await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(ProbeError::Failure(format!("{e:#}"))),
            Ok(Err(_elapsed)) => Err(ProbeError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
            Err(join_error) => Err(ProbeError::Failure(format!("check task failed: {join_error}"))),
        }
    }
}
