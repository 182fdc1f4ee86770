//! Room fan-out across the registry and the broadcaster
//!
//! These tests verify that:
//! - A member of several rooms gets a room message exactly once
//! - Dropped connections are pruned from every room
//! - Work scheduled from plain threads still reaches the rooms
//! - Joins, leaves and disconnects during a broadcast keep the registry consistent

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use oob_monitor::{
    bridge::RuntimeBridge,
    realtime::{
        BroadcastMessage, Broadcaster, ConnectionSink, DEFAULT_ROOMS, NotificationLevel,
        ROOM_ALERTS, ROOM_DASHBOARD, RoomRegistry,
    },
};
use tokio::sync::{mpsc, watch};

use crate::helpers::*;

fn broadcaster() -> Broadcaster {
    Broadcaster::new(
        RoomRegistry::with_rooms(DEFAULT_ROOMS),
        Duration::from_millis(500),
    )
}

#[tokio::test]
async fn test_member_of_two_rooms_receives_room_message_once() {
    let broadcaster = broadcaster();
    let rooms = broadcaster.registry();
    let (id, mut rx) = connect(rooms, Some("ops")).await;
    let (_bystander, mut bystander_rx) = connect(rooms, None).await;

    rooms.join(id, ROOM_DASHBOARD).await;
    rooms.join(id, ROOM_ALERTS).await;
    let dashboard_before = rooms.get_room_users_count(ROOM_DASHBOARD).await;

    let message = BroadcastMessage::notification(NotificationLevel::Critical, "rack-a offline");
    let report = broadcaster.broadcast_to_room(ROOM_ALERTS, &message).await.unwrap();

    assert_eq!(report.delivered, 1);
    let frame = next_frame(&mut rx).await;
    assert_eq!(frame["type"], "system_notification");
    assert_eq!(frame["message"], "rack-a offline");
    assert!(rx.try_recv().is_err());
    assert!(bystander_rx.try_recv().is_err());

    assert_eq!(rooms.get_room_users_count(ROOM_DASHBOARD).await, dashboard_before);
    assert_eq!(rooms.get_room_users_count(ROOM_ALERTS).await, 1);
}

#[tokio::test]
async fn test_closed_connection_is_pruned_from_all_rooms() {
    let broadcaster = broadcaster();
    let rooms = broadcaster.registry();
    let (gone, gone_rx) = connect(rooms, None).await;
    let (alive, mut alive_rx) = connect(rooms, None).await;
    for id in [gone, alive] {
        rooms.join(id, ROOM_DASHBOARD).await;
        rooms.join(id, ROOM_ALERTS).await;
    }
    drop(gone_rx);

    let report = broadcaster
        .broadcast_to_room(ROOM_DASHBOARD, &BroadcastMessage::pong())
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.pruned, vec![gone]);
    assert_eq!(next_frame(&mut alive_rx).await["type"], "pong");

    assert_eq!(rooms.get_active_connections_count().await, 1);
    assert_eq!(rooms.get_room_users_count(ROOM_ALERTS).await, 1);
    assert!(rooms.is_consistent().await);
}

#[test]
fn test_broadcast_scheduled_from_plain_thread() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let broadcaster = broadcaster();
    let mut rx = runtime.block_on(async {
        let (id, rx) = connect(broadcaster.registry(), None).await;
        broadcaster.registry().join(id, ROOM_DASHBOARD).await;
        rx
    });

    // no runtime on this thread: the bridge runs the unit in isolation
    let bridge = RuntimeBridge::default();
    let sender = broadcaster.clone();
    let dispatch = bridge
        .schedule("notify", async move {
            let message = BroadcastMessage::notification(NotificationLevel::Info, "hello");
            sender.broadcast_to_room(ROOM_DASHBOARD, &message).await?;
            Ok(())
        })
        .unwrap();
    assert!(dispatch.is_isolated());

    let frame = runtime.block_on(next_frame(&mut rx));
    assert_eq!(frame["message"], "hello");
    assert_eq!(bridge.stats().isolated, 1);
}

/// Parks every send until the gate opens
struct GatedSink {
    inner: mpsc::Sender<Arc<str>>,
    gate: watch::Receiver<bool>,
    parked: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionSink for GatedSink {
    async fn send_text(&self, text: Arc<str>) -> anyhow::Result<()> {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open).await?;
        self.inner.send_text(text).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_membership_changes_during_broadcast() {
    let broadcaster = Broadcaster::new(
        RoomRegistry::with_rooms(DEFAULT_ROOMS),
        Duration::from_secs(5),
    );
    let rooms = broadcaster.registry().clone();
    let (open_gate, gate) = watch::channel(false);
    let parked = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    let mut receivers = Vec::new();
    for user in ["a", "b", "c", "d"] {
        let (tx, rx) = mpsc::channel(8);
        let sink: Arc<dyn ConnectionSink> = Arc::new(GatedSink {
            inner: tx,
            gate: gate.clone(),
            parked: parked.clone(),
        });
        let id = rooms.register(Some(user.to_string()), sink).await;
        rooms.join(id, ROOM_DASHBOARD).await;
        rooms.join(id, ROOM_ALERTS).await;
        ids.push(id);
        receivers.push(rx);
    }
    let [a, b, c, d] = ids[..] else { unreachable!() };

    let in_flight = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            broadcaster
                .broadcast_to_room(ROOM_DASHBOARD, &BroadcastMessage::pong())
                .await
        })
    };
    for _ in 0..400 {
        if parked.load(Ordering::SeqCst) == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(parked.load(Ordering::SeqCst), 4);

    // every delivery is pending: churn the membership
    assert!(rooms.unregister(b).await);
    assert!(rooms.leave(c, ROOM_DASHBOARD).await);
    let d_rx = receivers.pop().unwrap();
    drop(d_rx);
    let (late, mut late_rx) = connect(&rooms, None).await;
    assert!(rooms.join(late, ROOM_DASHBOARD).await);
    assert!(rooms.is_consistent().await);

    open_gate.send(true).unwrap();
    let report = in_flight.await.unwrap().unwrap();

    // the snapshot taken at send time decides who is addressed
    assert_eq!(report.attempted(), 4);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.pruned, vec![d]);
    for rx in &mut receivers {
        assert_eq!(next_frame(rx).await["type"], "pong");
        assert!(rx.try_recv().is_err());
    }
    assert!(late_rx.try_recv().is_err());

    assert!(rooms.is_consistent().await);
    assert_eq!(rooms.get_active_connections_count().await, 3);
    assert_eq!(rooms.get_room_users_count(ROOM_DASHBOARD).await, 2);
    assert_eq!(rooms.get_room_users_count(ROOM_ALERTS).await, 2);
    assert_eq!(rooms.rooms_of(a).await.unwrap().len(), 2);
    assert_eq!(rooms.rooms_of(b).await, None);
    assert_eq!(rooms.rooms_of(c).await, Some(vec![ROOM_ALERTS.to_string()]));
    assert_eq!(rooms.rooms_of(d).await, None);
}
