pub mod actors;
#[cfg(feature = "api")]
pub mod api;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod devices;
pub mod error;
pub mod jobs;
pub mod probe;
pub mod realtime;
pub mod util;

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

pub use error::{MonitorError, MonitorResult, ProbeError};

/// Canonical device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A managed server as known to the inventory
///
/// The monitoring core only ever reads devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub hostname: String,
    pub business_ip: Option<IpAddr>,
    pub oob_ip: Option<IpAddr>,
    #[serde(default = "default_oob_port")]
    pub oob_port: u16,
    pub location: Option<String>,
    /// Reference to the BMC credentials, never the credentials themselves
    pub credential_ref: Option<String>,
}

fn default_oob_port() -> u16 {
    443
}
