//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - REST endpoints return the expected bodies and status codes
//! - Manual triggers are tracked through the job endpoint
//! - The WebSocket room protocol works end to end

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use oob_monitor::{
    actors::MonitorWorkerHandle,
    api::{ApiConfig, ApiState, spawn_api_server},
    bridge::RuntimeBridge,
    cache::StatsCache,
    config::Config,
    jobs::{JobStore, JobTrigger, LocalTaskQueue},
    realtime::{Broadcaster, DEFAULT_ROOMS, RoomRegistry},
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::helpers::*;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Helper to create test API server with a running worker
async fn spawn_test_api(devices: u64) -> (SocketAddr, Arc<ScriptedProber>) {
    let prober = Arc::new(ScriptedProber::default());
    let cache = StatsCache::new(create_test_probe(devices, prober.clone()));
    let broadcaster = Broadcaster::new(
        RoomRegistry::with_rooms(DEFAULT_ROOMS),
        Duration::from_millis(500),
    );

    let store = JobStore::new();
    let (queue, jobs_rx) = LocalTaskQueue::new(["monitor_all_devices"], store.clone());
    MonitorWorkerHandle::spawn(cache.clone(), broadcaster.clone(), store.clone(), jobs_rx, 5);
    let trigger = JobTrigger::new(
        Arc::new(queue),
        RuntimeBridge::default(),
        broadcaster.clone(),
        "monitor_all_devices",
    );

    let state = ApiState::new(cache, broadcaster, trigger, Arc::new(store), &Config::default());
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    (spawn_api_server(config, state).await.unwrap(), prober)
}

async fn open_socket(addr: SocketAddr, user: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/api/v1/ws?userId={user}"))
        .await
        .unwrap();
    socket
}

/// Next text frame, skipping control frames
async fn recv_json(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Receive until a frame of the given type arrives
async fn recv_type(socket: &mut Socket, kind: &str) -> Value {
    for _ in 0..10 {
        let frame = recv_json(socket).await;
        if frame["type"] == kind {
            return frame;
        }
    }
    panic!("no {kind} frame received");
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (addr, _) = spawn_test_api(1).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_statistics_are_cached_between_requests() {
    let (addr, prober) = spawn_test_api(5).await;
    let url = format!("http://{addr}/api/v1/connectivity/statistics");

    let first: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    let second: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();

    assert_eq!(first["total"], 5);
    assert_eq!(first["created_at"], second["created_at"]);
    assert_eq!(prober.calls(), 5);

    let fresh: Value = reqwest::get(format!("{url}?useCache=false"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fresh["total"], 5);
    assert_eq!(prober.calls(), 10);
}

#[tokio::test]
async fn test_batch_check_with_invalid_id_is_bad_request() {
    let (addr, prober) = spawn_test_api(3).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/connectivity/batch-check"))
        .json(&json!({ "deviceIds": [1, "two"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("two"));
    assert_eq!(prober.calls(), 0);
}

#[tokio::test]
async fn test_manual_trigger_is_tracked_to_completion() {
    let (addr, _) = spawn_test_api(2).await;
    let client = reqwest::Client::new();

    let outcome: Value = client
        .post(format!("http://{addr}/api/v1/jobs/monitor/trigger"))
        .json(&json!({ "userId": "ops" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["triggerType"], "manual");
    assert_eq!(outcome["triggerUser"], "ops");
    let task_id = outcome["taskId"].as_str().unwrap();

    let mut status = Value::Null;
    for _ in 0..100 {
        status = client
            .get(format!("http://{addr}/api/v1/jobs/{task_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status["status"], "completed");
    assert_eq!(status["job_name"], "monitor_all_devices");
}

#[tokio::test]
async fn test_websocket_greeting_and_room_protocol() {
    let (addr, _) = spawn_test_api(2).await;
    let mut socket = open_socket(addr, "alice").await;

    let connected = recv_json(&mut socket).await;
    assert_eq!(connected["type"], "connection");
    assert_eq!(connected["action"], "connected");
    assert_eq!(connected["user_id"], "alice");

    let joined = recv_json(&mut socket).await;
    assert_eq!(joined["type"], "room");
    assert_eq!(joined["room"], "dashboard");

    let initial = recv_json(&mut socket).await;
    assert_eq!(initial["type"], "status");
    assert_eq!(initial["action"], "initial");
    assert_eq!(initial["connections"], 1);

    send_json(&mut socket, json!({ "type": "join_room", "room": "alerts" })).await;
    let joined = recv_type(&mut socket, "room").await;
    assert_eq!(joined["action"], "joined");
    assert_eq!(joined["room"], "alerts");

    send_json(&mut socket, json!({ "type": "join_room", "room": "../../anything" })).await;
    let error = recv_type(&mut socket, "error").await;
    assert_eq!(error["action"], "invalid_request");

    send_json(&mut socket, json!({ "type": "join_room", "room": "device_2" })).await;
    let joined = recv_type(&mut socket, "room").await;
    assert_eq!(joined["room"], "device_2");

    send_json(&mut socket, json!({ "type": "ping" })).await;
    recv_type(&mut socket, "pong").await;

    send_json(&mut socket, json!({ "type": "subscribe_everything" })).await;
    let error = recv_type(&mut socket, "error").await;
    assert_eq!(error["action"], "invalid_request");

    let stats: Value = reqwest::get(format!("http://{addr}/api/v1/realtime/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["activeConnections"], 1);
    let alerts = stats["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .find(|room| room["room"] == "alerts")
        .unwrap();
    assert_eq!(alerts["connections"], 1);
    assert!(
        stats["rooms"]
            .as_array()
            .unwrap()
            .iter()
            .all(|room| room["room"] != "../../anything")
    );

    send_json(&mut socket, json!({ "type": "leave_room", "room": "alerts" })).await;
    let left = recv_type(&mut socket, "room").await;
    assert_eq!(left["action"], "left");
}

#[tokio::test]
async fn test_websocket_manual_monitor_pushes_results() {
    let (addr, _) = spawn_test_api(3).await;
    let mut socket = open_socket(addr, "bob").await;
    recv_type(&mut socket, "status").await;

    send_json(&mut socket, json!({ "type": "manual_monitor" })).await;

    // announcement and result race each other
    let (mut started, mut updated) = (None, None);
    for _ in 0..10 {
        let frame = recv_json(&mut socket).await;
        match frame["type"].as_str() {
            Some("monitor_task") => started = Some(frame),
            Some("connectivity_stats") => updated = Some(frame),
            _ => {}
        }
        if started.is_some() && updated.is_some() {
            break;
        }
    }
    let (started, updated) = (started.unwrap(), updated.unwrap());

    assert_eq!(started["action"], "started");
    assert!(started["message"].as_str().unwrap().contains("bob"));
    assert_eq!(updated["total"], 3);
    assert_eq!(updated["task_id"], started["task_id"]);
}

#[tokio::test]
async fn test_closed_socket_is_unregistered() {
    let (addr, _) = spawn_test_api(1).await;
    let mut socket = open_socket(addr, "carol").await;
    recv_type(&mut socket, "status").await;

    socket.close(None).await.unwrap();

    let url = format!("http://{addr}/api/v1/realtime/stats");
    let mut active = Value::Null;
    for _ in 0..100 {
        let stats: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        active = stats["activeConnections"].clone();
        if active == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(active, 0);
}
