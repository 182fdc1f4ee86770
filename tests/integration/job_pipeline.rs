//! End-to-end job flow
//!
//! ```text
//! JobTrigger → LocalTaskQueue → MonitorWorker → StatsCache → Broadcaster
//! ```
//!
//! These tests verify that:
//! - A manual run is announced, executed and tracked to completion
//! - Scheduled runs go through the same path and are recorded
//! - Device state flips reach the device monitoring room and the device's own room
//! - Offline devices raise alerts, escalated to urgent alerts on a fleet-wide outage

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use oob_monitor::{
    actors::{MonitorWorkerHandle, SchedulerHandle},
    bridge::RuntimeBridge,
    cache::StatsCache,
    jobs::{
        JobId, JobStatus, JobStatusLookup, JobStore, JobTrigger, LocalTaskQueue, RunState,
        TriggerType,
    },
    realtime::{
        Broadcaster, DEFAULT_ROOMS, ROOM_ALERTS, ROOM_DASHBOARD, ROOM_DEVICE_MONITORING,
        ROOM_URGENT_ALERTS, RoomRegistry,
    },
};
use tokio::sync::mpsc;

use crate::helpers::*;

struct Pipeline {
    prober: Arc<ScriptedProber>,
    cache: StatsCache,
    store: JobStore,
    trigger: JobTrigger,
    worker: MonitorWorkerHandle,
    rooms: RoomRegistry,
}

fn pipeline(devices: u64) -> Pipeline {
    let prober = Arc::new(ScriptedProber::default());
    let cache = StatsCache::new(create_test_probe(devices, prober.clone()));
    let rooms = RoomRegistry::with_rooms(DEFAULT_ROOMS);
    let broadcaster = Broadcaster::new(rooms.clone(), Duration::from_millis(500));

    let store = JobStore::new();
    let (queue, jobs_rx) = LocalTaskQueue::new(["monitor_all_devices"], store.clone());
    let worker = MonitorWorkerHandle::spawn(
        cache.clone(),
        broadcaster.clone(),
        store.clone(),
        jobs_rx,
        5,
    );
    let trigger = JobTrigger::new(
        Arc::new(queue),
        RuntimeBridge::default(),
        broadcaster,
        "monitor_all_devices",
    );

    Pipeline {
        prober,
        cache,
        store,
        trigger,
        worker,
        rooms,
    }
}

async fn wait_until_finished(store: &JobStore, id: &JobId) -> JobStatus {
    for _ in 0..300 {
        if let Some(handle) = store.status(id)
            && handle.status.is_finished()
        {
            return handle.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}

fn kind(frame: &serde_json::Value) -> String {
    format!("{}/{}", frame["type"], frame["action"]).replace('"', "")
}

/// Frames up to and including the end of the next monitoring job
async fn until_completed(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(rx).await;
        let done = kind(&frame) == "monitoring/completed";
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

#[tokio::test]
async fn test_manual_run_is_announced_and_completes() {
    let p = pipeline(4);
    let (id, mut rx) = connect(&p.rooms, Some("ops")).await;
    p.rooms.join(id, ROOM_DASHBOARD).await;

    let outcome = p.trigger.run_manual(Some("ops".to_string())).unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.trigger_type, TriggerType::Manual);
    assert_eq!(outcome.trigger_user.as_deref(), Some("ops"));
    assert_eq!(
        wait_until_finished(&p.store, &outcome.task_id).await,
        JobStatus::Completed
    );

    // announcement and result race each other
    let types: HashSet<String> = until_completed(&mut rx).await.iter().map(kind).collect();
    assert!(types.contains("monitor_task/started"));
    assert!(types.contains("monitoring/started"));
    assert!(types.contains("monitoring/progress"));
    assert!(types.contains("connectivity_stats/updated"));

    let stats = p.cache.peek().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(p.prober.calls(), 4);
}

#[tokio::test]
async fn test_scheduled_run_is_recorded() {
    let p = pipeline(2);
    let scheduler = SchedulerHandle::spawn(p.trigger.clone(), 60).unwrap();

    let outcome = scheduler.trigger_now().await.unwrap().unwrap();

    assert_eq!(outcome.trigger_type, TriggerType::Scheduled);
    assert!(outcome.trigger_user.is_none());
    wait_until_finished(&p.store, &outcome.task_id).await;

    let record = p.trigger.last_run().unwrap();
    assert_eq!(record.state, RunState::Success);
    assert_eq!(record.task_id, Some(outcome.task_id));
    assert!(!p.trigger.is_scheduled_running());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_device_flip_reaches_monitoring_room() {
    let p = pipeline(3);
    let (id, mut rx) = connect(&p.rooms, None).await;
    p.rooms.join(id, ROOM_DEVICE_MONITORING).await;

    let first = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &first.task_id).await;
    until_completed(&mut rx).await;

    p.prober.take_down([3]);
    let second = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &second.task_id).await;

    let frames = until_completed(&mut rx).await;
    let changes: Vec<_> = frames
        .iter()
        .filter(|f| kind(f) == "device_status/changed")
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["device_id"], 3);
    assert_eq!(changes[0]["online"], false);

    let status = p.worker.status().await.unwrap();
    assert_eq!(status.jobs_completed, 2);
    assert_eq!(status.tracked_devices, 3);
}

#[tokio::test]
async fn test_device_room_and_alert_routing() {
    let p = pipeline(4);
    let (watcher, mut device_rx) = connect(&p.rooms, None).await;
    p.rooms.join(watcher, "device_2").await;
    let (on_call, mut alerts_rx) = connect(&p.rooms, None).await;
    p.rooms.join(on_call, ROOM_ALERTS).await;
    let (pager, mut urgent_rx) = connect(&p.rooms, None).await;
    p.rooms.join(pager, ROOM_URGENT_ALERTS).await;

    let run = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &run.task_id).await;

    // one of four down: a plain alert, nothing urgent
    p.prober.take_down([2]);
    let run = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &run.task_id).await;

    let change = next_frame(&mut device_rx).await;
    assert_eq!(kind(&change), "device_status/changed");
    assert_eq!(change["device_id"], 2);
    let alert = next_frame(&mut alerts_rx).await;
    assert_eq!(kind(&alert), "alert/raised");
    assert_eq!(alert["level"], "warning");
    assert_eq!(alert["device_id"], 2);

    // three of four down: the new alerts are urgent and everyone is told
    p.prober.take_down([3, 4]);
    let run = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &run.task_id).await;

    for _ in 0..2 {
        let alert = next_frame(&mut urgent_rx).await;
        assert_eq!(kind(&alert), "alert/raised");
        assert_eq!(alert["level"], "critical");
    }
    let notice = next_frame(&mut urgent_rx).await;
    assert_eq!(notice["type"], "system_notification");
    assert_eq!(notice["level"], "critical");
    // device 2 did not change again
    let notice = next_frame(&mut device_rx).await;
    assert_eq!(notice["type"], "system_notification");

    let mut raised = Vec::new();
    for _ in 0..2 {
        let alert = next_frame(&mut alerts_rx).await;
        assert_eq!(alert["level"], "critical");
        raised.push(alert["device_id"].as_u64().unwrap());
    }
    raised.sort_unstable();
    assert_eq!(raised, vec![3, 4]);
    assert_eq!(next_frame(&mut alerts_rx).await["type"], "system_notification");

    // recovery resolves the alert
    p.prober.down.lock().unwrap().remove(&oob_monitor::DeviceId(2));
    let run = p.trigger.run_manual(None).unwrap();
    wait_until_finished(&p.store, &run.task_id).await;

    let resolved = next_frame(&mut alerts_rx).await;
    assert_eq!(kind(&resolved), "alert/resolved");
    assert_eq!(resolved["device_id"], 2);
    let change = next_frame(&mut device_rx).await;
    assert_eq!(change["online"], true);
}
