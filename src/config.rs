use std::net::SocketAddr;

use serde::Deserialize;
use tracing::trace;

use crate::Device;
use crate::probe::ProbeTarget;

pub const MAX_CONCURRENT_LIMIT: usize = 50;
pub const TTL_MINUTES_LIMIT: u32 = 60;
pub const INTERVAL_MINUTES_LIMIT: u32 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<Device>,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// HTTP/WebSocket server section (optional - defaults to localhost)
    pub api: Option<ApiSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Deadline for one device check, covering every fallback it tries
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Deadline for the first attempt: the ICMP echo, or the Redfish request
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Deadline for a single TCP port attempt
    #[serde(default = "default_port_timeout")]
    pub port_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub target: ProbeTarget,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
            ping_timeout_secs: default_ping_timeout(),
            port_timeout_secs: default_port_timeout(),
            max_concurrent: default_max_concurrent(),
            target: ProbeTarget::default(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    6
}

fn default_ping_timeout() -> u64 {
    3
}

fn default_port_timeout() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

fn default_ttl_minutes() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    #[serde(default = "default_job_name")]
    pub job_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            job_name: default_job_name(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u32 {
    5
}

pub fn default_job_name() -> String {
    String::from("monitor_all_devices")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// How long a single delivery may take before the connection is pruned
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Outbound frames buffered per connection
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_send_timeout() -> u64 {
    2000
}

fn default_outbound_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    pub bind: Option<SocketAddr>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Config {
    /// Check the numeric ranges the core relies on
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_CONCURRENT_LIMIT).contains(&self.probe.max_concurrent) {
            anyhow::bail!(
                "probe.max_concurrent must be between 1 and {MAX_CONCURRENT_LIMIT}, got {}",
                self.probe.max_concurrent
            );
        }
        if !(1..=TTL_MINUTES_LIMIT).contains(&self.cache.ttl_minutes) {
            anyhow::bail!(
                "cache.ttl_minutes must be between 1 and {TTL_MINUTES_LIMIT}, got {}",
                self.cache.ttl_minutes
            );
        }
        if !(1..=INTERVAL_MINUTES_LIMIT).contains(&self.scheduler.interval_minutes) {
            anyhow::bail!(
                "scheduler.interval_minutes must be between 1 and {INTERVAL_MINUTES_LIMIT}, got {}",
                self.scheduler.interval_minutes
            );
        }
        if self.probe.ping_timeout_secs == 0 || self.probe.port_timeout_secs == 0 {
            anyhow::bail!("probe ping and port timeouts must be greater than 0");
        }
        // the TCP fallback has to fit in what the first attempt leaves over
        let fallback_budget = self.probe.ping_timeout_secs + self.probe.port_timeout_secs;
        if self.probe.timeout_secs <= fallback_budget {
            anyhow::bail!(
                "probe.timeout_secs ({}) must exceed ping_timeout_secs + port_timeout_secs ({fallback_budget})",
                self.probe.timeout_secs
            );
        }
        if self.realtime.outbound_buffer == 0 {
            anyhow::bail!("realtime.outbound_buffer must be greater than 0");
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.device_id) {
                anyhow::bail!("duplicate device_id {} in inventory", device.device_id);
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
