//! Out-of-band reachability through the BMC's Redfish service root

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use super::prober::{ProbeOutcome, ProbeRequest, Prober, tcp_port_check};

const SERVICE_ROOT: &str = "/redfish/v1/";

/// Checks that a BMC answers HTTP on its management port
///
/// Any HTTP response counts as reachable, including 401: the point is that
/// the controller is up, not that we hold valid credentials for it. If the
/// HTTP request fails at the transport level, a plain TCP handshake on the
/// same port decides.
pub struct RedfishProber {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
    scheme: &'static str,
    port_timeout: Duration,
}

impl RedfishProber {
    pub fn new(request_timeout: Duration, port_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            // BMCs ship with self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            scheme: "https",
            port_timeout,
        })
    }

    /// Talk plain HTTP instead of HTTPS
    pub fn insecure_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    fn service_root_url(&self, request: &ProbeRequest) -> String {
        let port = request.port.unwrap_or(443);
        match request.ip {
            std::net::IpAddr::V4(ip) => format!("{}://{ip}:{port}{SERVICE_ROOT}", self.scheme),
            std::net::IpAddr::V6(ip) => format!("{}://[{ip}]:{port}{SERVICE_ROOT}", self.scheme),
        }
    }
}

#[async_trait]
impl Prober for RedfishProber {
    #[instrument(skip(self), fields(host = %request.hostname, ip = %request.ip))]
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome> {
        let url = self.service_root_url(request);
        trace!("requesting {url}");

        let start = Instant::now();
        let http_error = match self.client.get(&url).send().await {
            Ok(response) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                debug!("service root answered with {}", response.status());
                return Ok(ProbeOutcome::online("redfish", Some(latency)));
            }
            Err(e) => e,
        };

        let port = request.port.unwrap_or(443);
        match tcp_port_check(request.ip, port, self.port_timeout).await {
            Ok(latency) => Ok(ProbeOutcome::online(
                format!("tcp_port_{port}"),
                Some(latency),
            )),
            Err(tcp_error) => Ok(ProbeOutcome::offline(
                "redfish+tcp",
                format!("redfish: {http_error}; tcp_port_{port}: {tcp_error}"),
            )),
        }
    }
}
