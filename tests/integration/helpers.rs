//! Helper functions for integration tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oob_monitor::{
    Device, DeviceId,
    config::ProbeConfig,
    devices::MemoryDeviceRegistry,
    probe::{ConnectivityProbe, ProbeOutcome, ProbeRequest, Prober},
    realtime::{ConnectionSink, RoomRegistry},
};
use tokio::sync::mpsc;

pub fn create_test_device(id: u64) -> Device {
    Device {
        device_id: DeviceId(id),
        hostname: format!("node-{id:02}"),
        business_ip: Some(format!("10.0.{}.{}", id / 250, id % 250 + 1).parse().unwrap()),
        oob_ip: Some(format!("10.1.{}.{}", id / 250, id % 250 + 1).parse().unwrap()),
        oob_port: 443,
        location: Some("rack-a".to_string()),
        credential_ref: None,
    }
}

pub fn create_test_registry(count: u64) -> Arc<MemoryDeviceRegistry> {
    Arc::new(MemoryDeviceRegistry::new((1..=count).map(create_test_device)))
}

/// Prober with per-device behaviour and concurrency accounting
#[derive(Default)]
pub struct ScriptedProber {
    /// Devices that never answer
    pub hanging: Mutex<HashSet<DeviceId>>,
    /// Devices that answer offline
    pub down: Mutex<HashSet<DeviceId>>,
    /// How long an answering check takes
    pub delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProber {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn hang(&self, ids: impl IntoIterator<Item = u64>) {
        self.hanging.lock().unwrap().extend(ids.into_iter().map(DeviceId));
    }

    pub fn take_down(&self, ids: impl IntoIterator<Item = u64>) {
        self.down.lock().unwrap().extend(ids.into_iter().map(DeviceId));
    }

    /// Highest number of checks that ran at the same time
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, request: &ProbeRequest) -> anyhow::Result<ProbeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let id = request.device_id;
        if id.is_some_and(|id| self.hanging.lock().unwrap().contains(&id)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.delay).await;

        if id.is_some_and(|id| self.down.lock().unwrap().contains(&id)) {
            Ok(ProbeOutcome::offline("mock", "no answer"))
        } else {
            Ok(ProbeOutcome::online("mock", Some(self.delay.as_secs_f64() * 1000.0)))
        }
    }
}

pub fn create_test_probe(devices: u64, prober: Arc<ScriptedProber>) -> ConnectivityProbe {
    ConnectivityProbe::new(create_test_registry(devices), prober, &ProbeConfig::default())
        .with_check_timeout(Duration::from_millis(250))
}

/// Register a channel-backed connection and return its receiving end
pub async fn connect(
    rooms: &RoomRegistry,
    user: Option<&str>,
) -> (oob_monitor::realtime::ConnectionId, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(64);
    let sink: Arc<dyn ConnectionSink> = Arc::new(tx);
    let id = rooms.register(user.map(str::to_string), sink).await;
    (id, rx)
}

/// Next frame on a connection, parsed
pub async fn next_frame(rx: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    serde_json::from_str(&frame).unwrap()
}
