//! Bounded-parallel probe batches
//!
//! These tests verify that:
//! - Every requested device gets exactly one result
//! - Hanging checks become timeouts without failing the batch
//! - The concurrency bound is never exceeded

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use oob_monitor::{
    DeviceId, MonitorError, ProbeError,
    config::ProbeConfig,
    devices::MemoryDeviceRegistry,
    probe::{ConnectivityProbe, NetworkProber, ProbeTarget, RawDeviceId},
};

use crate::helpers::*;

#[tokio::test]
async fn test_batch_with_hanging_devices_reports_timeouts() {
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(20)));
    prober.hang([7, 19, 33]);
    let probe = create_test_probe(45, prober.clone());

    let report = probe.batch_check(None, 20).await.unwrap();

    assert_eq!(report.total, 45);
    assert_eq!(report.online, 42);
    assert_eq!(report.offline, 3);
    assert_eq!(report.results.len(), 45);

    let by_device = report.by_device();
    for id in [7, 19, 33] {
        let result = by_device[&DeviceId(id)];
        assert!(!result.online);
        assert_matches!(result.error, Some(ProbeError::Timeout { after_ms: 250 }));
    }

    assert!(prober.high_water_mark() <= 20);
    assert!(prober.high_water_mark() > 1);
}

#[tokio::test]
async fn test_concurrency_bound_of_one_is_sequential() {
    let prober = Arc::new(ScriptedProber::with_delay(Duration::from_millis(5)));
    let probe = create_test_probe(6, prober.clone());

    let report = probe.batch_check(None, 1).await.unwrap();

    assert_eq!(report.online, 6);
    assert_eq!(prober.high_water_mark(), 1);
}

#[tokio::test]
async fn test_requested_ids_are_canonicalized_and_deduplicated() {
    let prober = Arc::new(ScriptedProber::default());
    prober.take_down([3]);
    let probe = create_test_probe(5, prober.clone());

    let ids: Vec<RawDeviceId> = vec![1.into(), "1".into(), " 3 ".into(), 404.into()];
    let report = probe.batch_check(Some(&ids), 5).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.online, 1);
    assert_eq!(prober.calls(), 2);

    let by_device = report.by_device();
    assert_matches!(by_device[&DeviceId(3)].error, Some(ProbeError::Failure(_)));
    assert_matches!(by_device[&DeviceId(404)].error, Some(ProbeError::NotFound));
}

#[tokio::test]
async fn test_malformed_id_rejects_whole_batch() {
    let prober = Arc::new(ScriptedProber::default());
    let probe = create_test_probe(5, prober.clone());

    let ids: Vec<RawDeviceId> = vec![1.into(), "node-2".into()];
    let result = probe.batch_check(Some(&ids), 5).await;

    assert_matches!(result, Err(MonitorError::InvalidInput(_)));
    assert_eq!(prober.calls(), 0);
}

#[tokio::test]
async fn test_out_of_band_target_probes_management_address() {
    let mut device = create_test_device(1);
    device.oob_ip = None;
    let registry = Arc::new(MemoryDeviceRegistry::new([device, create_test_device(2)]));
    let config = ProbeConfig {
        target: ProbeTarget::OutOfBand,
        ..ProbeConfig::default()
    };
    let probe = ConnectivityProbe::new(registry, Arc::new(ScriptedProber::default()), &config);

    let report = probe.check_all().await.unwrap();

    let by_device = report.by_device();
    assert_matches!(
        by_device[&DeviceId(1)].error,
        Some(ProbeError::MissingAddress(_))
    );
    assert!(by_device[&DeviceId(2)].online);
    assert_eq!(
        by_device[&DeviceId(2)].address,
        create_test_device(2).oob_ip
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_open_port_found_when_ping_stalls() {
    use std::os::unix::fs::PermissionsExt;

    // a ping that never answers, like a host dropping ICMP
    let dir = tempfile::tempdir().unwrap();
    let ping = dir.path().join("ping");
    std::fs::write(&ping, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&ping, std::fs::Permissions::from_mode(0o755)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = ProbeConfig {
        timeout_secs: 3,
        ping_timeout_secs: 1,
        port_timeout_secs: 1,
        ..ProbeConfig::default()
    };
    let prober = NetworkProber::new(
        Duration::from_secs(config.ping_timeout_secs),
        Duration::from_secs(config.port_timeout_secs),
    )
    .with_ping_program(ping.as_os_str())
    .with_ports(vec![port]);

    let mut device = create_test_device(1);
    device.business_ip = Some("127.0.0.1".parse().unwrap());
    let registry = Arc::new(MemoryDeviceRegistry::new([device]));
    let probe = ConnectivityProbe::new(registry, Arc::new(prober), &config);

    let report = probe.check_all().await.unwrap();

    let result = &report.results[0];
    assert!(result.online, "unexpected error: {:?}", result.error);
    assert_eq!(result.method.as_deref(), Some(format!("tcp_port_{port}").as_str()));
    assert_eq!(result.error, None);
}
