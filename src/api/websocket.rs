//! WebSocket handler for the live dashboard stream
//!
//! Each socket is registered in the room registry with an mpsc sink. A
//! writer task drains the sink into the socket, the reader handles the
//! client's room and monitoring requests.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{state::ApiState, types::StreamQuery};
use crate::realtime::{BroadcastMessage, ClientRequest, ConnectionId, ROOM_DASHBOARD};

/// WebSocket upgrade handler
///
/// GET /api/v1/ws?userId=
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<ApiState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, query.user_id))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState, user_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.outbound_buffer);
    let registry = state.registry().clone();
    let id = registry.register(user_id.clone(), Arc::new(tx)).await;
    info!("WebSocket client connected as {id}");

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.to_string())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    greet(&state, id, user_id).await;

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_client_message(&recv_state, id, &text).await,
                Message::Close(_) => {
                    debug!("WebSocket close frame from {id}");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(id).await;
    info!("WebSocket client {id} disconnected");
}

/// Connection announcement, auto-join of the dashboard room and the
/// initial status snapshot
async fn greet(state: &ApiState, id: ConnectionId, user_id: Option<String>) {
    reply(state, id, BroadcastMessage::connected(id, user_id)).await;

    if state.registry().join(id, ROOM_DASHBOARD).await {
        reply(state, id, BroadcastMessage::room_joined(ROOM_DASHBOARD)).await;
    }

    let snapshot = state.status_snapshot().await;
    reply(state, id, BroadcastMessage::initial_status(snapshot)).await;
}

async fn handle_client_message(state: &ApiState, id: ConnectionId, text: &str) {
    let request = match ClientRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            debug!("rejecting message from {id}: {e}");
            reply(state, id, BroadcastMessage::invalid_request(e.to_string())).await;
            return;
        }
    };

    let registry = state.registry();
    match request {
        ClientRequest::JoinRoom { room } => {
            if registry.join(id, &room).await {
                reply(state, id, BroadcastMessage::room_joined(room)).await;
            }
        }

        ClientRequest::LeaveRoom { room } => {
            if registry.leave(id, &room).await {
                reply(state, id, BroadcastMessage::room_left(room)).await;
            }
        }

        ClientRequest::ManualMonitor => {
            let user = registry.user_of(id).await;
            let trigger = state.trigger.clone();
            let result = tokio::task::spawn_blocking(move || trigger.run_manual(user)).await;

            let failure = match result {
                Ok(Ok(outcome)) => {
                    debug!("manual run {} requested over {id}", outcome.task_id);
                    None
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("trigger task failed: {e}")),
            };
            if let Some(message) = failure {
                warn!("manual run requested by {id} failed: {message}");
                reply(state, id, BroadcastMessage::trigger_failed(message)).await;
            }
        }

        ClientRequest::GetStatus => {
            let snapshot = state.status_snapshot().await;
            reply(state, id, BroadcastMessage::initial_status(snapshot)).await;
        }

        ClientRequest::Ping => reply(state, id, BroadcastMessage::pong()).await,
    }
}

async fn reply(state: &ApiState, id: ConnectionId, message: BroadcastMessage) {
    if let Err(e) = state.broadcaster.send_to(id, &message).await {
        debug!("reply to {id} dropped: {e}");
    }
}
