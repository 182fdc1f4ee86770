//! Reachability strategies behind the [`Prober`] trait

use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument, trace};

use crate::DeviceId;

use super::ping::{PING_PROGRAM, ping_with};

/// Ports tried when ICMP gets no answer
pub const FALLBACK_PORTS: [u16; 3] = [22, 80, 443];

/// Everything a prober needs to check one address
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// `None` for ad-hoc address checks outside the inventory
    pub device_id: Option<DeviceId>,
    pub hostname: String,
    pub ip: IpAddr,
    /// Service port on the target, used by the out-of-band strategy
    pub port: Option<u16>,
}

/// What a completed check found
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub online: bool,
    /// Which method produced the verdict (`ping`, `tcp_port_22`, `redfish`)
    pub method: String,
    pub latency_ms: Option<f64>,
    /// Why the device is considered offline
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn online(method: impl Into<String>, latency_ms: Option<f64>) -> Self {
        Self {
            online: true,
            method: method.into(),
            latency_ms,
            detail: None,
        }
    }

    pub fn offline(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            online: false,
            method: method.into(),
            latency_ms: None,
            detail: Some(detail.into()),
        }
    }
}

/// A single-address reachability check
///
/// The caller owns the deadline: implementations may take as long as their
/// own fallbacks need and will be cancelled when the per-device timeout
/// fires. An `Err` means the check itself broke, which the batch records
/// the same way as an offline verdict.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome>;
}

/// Try a TCP handshake against `ip:port`
pub async fn tcp_port_check(ip: IpAddr, port: u16, timeout: Duration) -> Result<f64> {
    let start = Instant::now();
    let addr = SocketAddr::new(ip, port);

    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(start.elapsed().as_secs_f64() * 1000.0),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("connection to {addr} timed out after {}s", timeout.as_secs()),
    }
}

/// Try a list of ports concurrently and return as soon as one connects
///
/// Attempts still pending at that point are dropped. The error lists every
/// port's failure in the order the ports were given.
pub async fn first_open_port(
    ip: IpAddr,
    ports: &[u16],
    timeout: Duration,
) -> std::result::Result<(u16, f64), Vec<String>> {
    let mut attempts: FuturesUnordered<_> = ports
        .iter()
        .enumerate()
        .map(|(slot, &port)| async move { (slot, port, tcp_port_check(ip, port, timeout).await) })
        .collect();

    let mut errors = vec![String::new(); ports.len()];
    while let Some((slot, port, attempt)) = attempts.next().await {
        match attempt {
            Ok(latency) => return Ok((port, latency)),
            Err(e) => errors[slot] = format!("tcp_port_{port}: {e}"),
        }
    }

    Err(errors)
}

/// Business-network reachability: ICMP first, then common TCP ports
#[derive(Debug, Clone)]
pub struct NetworkProber {
    ping_program: OsString,
    ping_timeout: Duration,
    port_timeout: Duration,
    ports: Vec<u16>,
}

impl NetworkProber {
    pub fn new(ping_timeout: Duration, port_timeout: Duration) -> Self {
        Self {
            ping_program: OsString::from(PING_PROGRAM),
            ping_timeout,
            port_timeout,
            ports: FALLBACK_PORTS.to_vec(),
        }
    }

    /// Run a different `ping` binary
    pub fn with_ping_program(mut self, program: impl Into<OsString>) -> Self {
        self.ping_program = program.into();
        self
    }

    /// Override the fallback port list
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Skip ICMP entirely (hosts that drop echo requests)
    pub fn tcp_only(&self) -> bool {
        self.ping_timeout.is_zero()
    }
}

#[async_trait]
impl Prober for NetworkProber {
    #[instrument(skip(self), fields(host = %request.hostname, ip = %request.ip))]
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome> {
        let mut failures = Vec::new();

        if !self.tcp_only() {
            match ping_with(&self.ping_program, request.ip, self.ping_timeout).await {
                Ok(reply) if reply.success => {
                    trace!("ping answered");
                    return Ok(ProbeOutcome::online("ping", reply.latency_ms));
                }
                Ok(reply) => failures.push(format!(
                    "ping failed (exit code {})",
                    reply
                        .exit_code
                        .map_or_else(|| "none".to_string(), |c| c.to_string())
                )),
                Err(e) => {
                    debug!("ping unavailable: {e:#}");
                    failures.push(format!("ping unavailable: {e}"));
                }
            }
        }

        match first_open_port(request.ip, &self.ports, self.port_timeout).await {
            Ok((port, latency)) => Ok(ProbeOutcome::online(
                format!("tcp_port_{port}"),
                Some(latency),
            )),
            Err(port_errors) => {
                failures.extend(port_errors);
                Ok(ProbeOutcome::offline("ping+tcp", failures.join("; ")))
            }
        }
    }
}
