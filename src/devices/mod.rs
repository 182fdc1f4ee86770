//! Device inventory port
//!
//! The monitoring core never owns device records. It only needs to enumerate
//! them and look a subset up by id, so the inventory sits behind the
//! [`DeviceRegistry`] trait. Record storage lives elsewhere.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Device, DeviceId, MonitorResult};

/// Read-only access to the device inventory
///
/// Implementations must be `Send + Sync` as they are shared between the
/// probe, the stats cache and the monitor worker.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Every registered device
    async fn list_devices(&self) -> MonitorResult<Vec<Device>>;

    /// Devices for the given ids
    ///
    /// Unknown ids are simply absent from the returned map.
    async fn get_devices(&self, ids: &[DeviceId]) -> MonitorResult<HashMap<DeviceId, Device>>;
}

/// In-memory inventory, loaded from configuration
#[derive(Debug, Default)]
pub struct MemoryDeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl MemoryDeviceRegistry {
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| (device.device_id, device))
            .collect();

        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Replace or add a device (inventory reloads)
    pub async fn upsert(&self, device: Device) {
        debug!("upserting device {}", device.device_id);
        self.devices.write().await.insert(device.device_id, device);
    }

    pub async fn remove(&self, id: DeviceId) -> Option<Device> {
        self.devices.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn list_devices(&self) -> MonitorResult<Vec<Device>> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by_key(|device| device.device_id);
        Ok(list)
    }

    async fn get_devices(&self, ids: &[DeviceId]) -> MonitorResult<HashMap<DeviceId, Device>> {
        let devices = self.devices.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| devices.get(id).map(|device| (*id, device.clone())))
            .collect())
    }
}
