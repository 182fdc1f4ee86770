//! Fan-out of messages to room members
//!
//! A broadcast serialises the message once, snapshots the target sinks,
//! then delivers to all of them concurrently with the registry lock
//! released. Each delivery has its own deadline. A connection that fails or
//! misses its deadline is unregistered from every room and the broadcast
//! carries on with the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::RealtimeConfig;
use crate::{MonitorError, MonitorResult};

use super::messages::BroadcastMessage;
use super::registry::{ConnectionId, RoomRegistry, Targets};

/// What happened to one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections that accepted the frame
    pub delivered: usize,
    /// Connections removed because delivery failed
    pub pruned: Vec<ConnectionId>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.pruned.len()
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: RoomRegistry,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: RoomRegistry, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn from_config(registry: RoomRegistry, config: &RealtimeConfig) -> Self {
        Self::new(registry, Duration::from_millis(config.send_timeout_ms))
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Deliver a message to every current member of `room`
    ///
    /// A room nobody joined yields an empty report.
    pub async fn broadcast_to_room(
        &self,
        room: &str,
        message: &BroadcastMessage,
    ) -> MonitorResult<DeliveryReport> {
        let text: Arc<str> = message.to_text()?.into();
        let targets = self.registry.room_targets(room).await;

        if targets.is_empty() {
            trace!("no members in {room}, nothing to send");
            return Ok(DeliveryReport::default());
        }

        let report = self.deliver(targets, text).await;
        debug!(
            "broadcast to {room}: {} delivered, {} pruned",
            report.delivered,
            report.pruned.len()
        );
        Ok(report)
    }

    /// Deliver a message to every registered connection
    pub async fn broadcast_to_all(
        &self,
        message: &BroadcastMessage,
    ) -> MonitorResult<DeliveryReport> {
        let text: Arc<str> = message.to_text()?.into();
        let targets = self.registry.all_targets().await;
        Ok(self.deliver(targets, text).await)
    }

    /// Deliver a message to a single connection
    ///
    /// A failed delivery prunes the connection like a broadcast would.
    pub async fn send_to(&self, id: ConnectionId, message: &BroadcastMessage) -> MonitorResult<()> {
        let Some(sink) = self.registry.sink_of(id).await else {
            return Err(MonitorError::NotFound(format!("connection {id}")));
        };
        let text: Arc<str> = message.to_text()?.into();

        let report = self.deliver(vec![(id, sink)], text).await;
        if report.delivered == 1 {
            Ok(())
        } else {
            Err(MonitorError::DeliveryFailure {
                connection: id.to_string(),
                reason: "send failed, connection removed".to_string(),
            })
        }
    }

    async fn deliver(&self, targets: Targets, text: Arc<str>) -> DeliveryReport {
        let send_timeout = self.send_timeout;

        let attempts = join_all(targets.into_iter().map(|(id, sink)| {
            let text = Arc::clone(&text);
            async move {
                let sent = tokio::time::timeout(send_timeout, sink.send_text(text)).await;
                let outcome = match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", send_timeout.as_millis())),
                };
                (id, outcome)
            }
        }))
        .await;

        let mut report = DeliveryReport::default();
        for (id, outcome) in attempts {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    let error = MonitorError::DeliveryFailure {
                        connection: id.to_string(),
                        reason,
                    };
                    warn!("{error}");
                    self.registry.unregister(id).await;
                    report.pruned.push(id);
                }
            }
        }

        report
    }
}
