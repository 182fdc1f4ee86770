//! Wire messages pushed to dashboard connections and the requests they send
//!
//! Every outbound frame is a JSON object `{type, action, ..., timestamp}`.
//! The set of kinds is closed: a message can only be built from one of the
//! [`Payload`] variants, so a frame without a type or action cannot exist.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::AggregateStats;
use crate::probe::{BatchProgress, ConnectivityResult};
use crate::{DeviceId, MonitorError, MonitorResult, ProbeError};

use super::registry::{ConnectionId, is_joinable_room};

/// A timestamped message, serialised once per broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastMessage {
    #[serde(flatten)]
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn to_text(&self) -> MonitorResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MonitorError::Internal(format!("failed to serialize message: {e}")))
    }

    pub fn monitor_started(
        task_id: impl Into<String>,
        execution_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Payload::MonitorTask(MonitorTaskEvent::Started {
            task_id: task_id.into(),
            execution_time,
            message: message.into(),
        }))
    }

    pub fn monitor_error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Payload::MonitorTask(MonitorTaskEvent::Error {
            error: error.into(),
            message: message.into(),
        }))
    }

    pub fn monitoring_started(task_id: impl Into<String>, total_devices: Option<usize>) -> Self {
        Self::new(Payload::Monitoring(MonitoringEvent::Started {
            task_id: task_id.into(),
            total_devices,
        }))
    }

    pub fn monitoring_progress(task_id: impl Into<String>, step: &BatchProgress) -> Self {
        Self::new(Payload::Monitoring(MonitoringEvent::Progress {
            task_id: task_id.into(),
            completed: step.completed,
            total: step.total,
            progress: step.percent(),
            current_device: step.hostname.clone(),
        }))
    }

    pub fn monitoring_completed(task_id: impl Into<String>, stats: &AggregateStats) -> Self {
        Self::new(Payload::Monitoring(MonitoringEvent::Completed {
            task_id: task_id.into(),
            summary: StatsSummary::from(stats),
        }))
    }

    /// A device that was online stopped answering
    pub fn alert_raised(result: &ConnectivityResult, level: NotificationLevel) -> Self {
        let name = result
            .hostname
            .clone()
            .unwrap_or_else(|| result.device_id.to_string());
        Self::new(Payload::Alert(AlertEvent::Raised {
            level,
            device_id: result.device_id,
            hostname: result.hostname.clone(),
            address: result.address,
            message: format!("device {name} is unreachable"),
            error: result.error.clone(),
        }))
    }

    /// A device that was offline answers again
    pub fn alert_resolved(result: &ConnectivityResult) -> Self {
        let name = result
            .hostname
            .clone()
            .unwrap_or_else(|| result.device_id.to_string());
        Self::new(Payload::Alert(AlertEvent::Resolved {
            device_id: result.device_id,
            hostname: result.hostname.clone(),
            address: result.address,
            message: format!("device {name} is reachable again"),
        }))
    }

    pub fn connected(connection_id: ConnectionId, user_id: Option<String>) -> Self {
        Self::new(Payload::Connection(ConnectionEvent::Connected {
            connection_id,
            user_id,
            message: "connection established".to_string(),
        }))
    }

    pub fn room_joined(room: impl Into<String>) -> Self {
        let room = room.into();
        Self::new(Payload::Room(RoomEvent::Joined {
            message: format!("joined room {room}"),
            room,
        }))
    }

    pub fn room_left(room: impl Into<String>) -> Self {
        let room = room.into();
        Self::new(Payload::Room(RoomEvent::Left {
            message: format!("left room {room}"),
            room,
        }))
    }

    pub fn stats_updated(stats: &AggregateStats, task_id: Option<String>) -> Self {
        Self::new(Payload::ConnectivityStats(StatsEvent::Updated {
            summary: StatsSummary::from(stats),
            task_id,
        }))
    }

    pub fn device_changed(result: &ConnectivityResult, previous_online: bool) -> Self {
        Self::new(Payload::DeviceStatus(DeviceStatusEvent::Changed {
            device_id: result.device_id,
            hostname: result.hostname.clone(),
            address: result.address,
            online: result.online,
            previous_online,
            checked_at: result.checked_at,
            error: result.error.clone(),
        }))
    }

    pub fn initial_status(status: StatusSnapshot) -> Self {
        Self::new(Payload::Status(StatusEvent::Initial(status)))
    }

    pub fn notification(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self::new(Payload::SystemNotification {
            level,
            message: message.into(),
        })
    }

    pub fn pong() -> Self {
        Self::new(Payload::Pong)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorEvent::InvalidRequest {
            message: message.into(),
        }))
    }

    pub fn trigger_failed(message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorEvent::TriggerFailed {
            message: message.into(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    MonitorTask(MonitorTaskEvent),
    Monitoring(MonitoringEvent),
    Alert(AlertEvent),
    Connection(ConnectionEvent),
    Room(RoomEvent),
    ConnectivityStats(StatsEvent),
    DeviceStatus(DeviceStatusEvent),
    Status(StatusEvent),
    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
    Pong,
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MonitorTaskEvent {
    Started {
        task_id: String,
        execution_time: DateTime<Utc>,
        message: String,
    },
    Error {
        error: String,
        message: String,
    },
}

/// Lifecycle of one monitoring job as the worker executes it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MonitoringEvent {
    Started {
        task_id: String,
        /// `None` when the inventory could not be read up front
        total_devices: Option<usize>,
    },
    Progress {
        task_id: String,
        completed: usize,
        total: usize,
        /// Percent, two decimals
        progress: f64,
        current_device: Option<String>,
    },
    Completed {
        task_id: String,
        #[serde(flatten)]
        summary: StatsSummary,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AlertEvent {
    Raised {
        level: NotificationLevel,
        device_id: DeviceId,
        hostname: Option<String>,
        address: Option<IpAddr>,
        message: String,
        error: Option<ProbeError>,
    },
    Resolved {
        device_id: DeviceId,
        hostname: Option<String>,
        address: Option<IpAddr>,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected {
        connection_id: ConnectionId,
        user_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoomEvent {
    Joined { room: String, message: String },
    Left { room: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StatsEvent {
    Updated {
        #[serde(flatten)]
        summary: StatsSummary,
        task_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceStatusEvent {
    Changed {
        device_id: DeviceId,
        hostname: Option<String>,
        address: Option<IpAddr>,
        online: bool,
        previous_online: bool,
        checked_at: DateTime<Utc>,
        error: Option<ProbeError>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StatusEvent {
    Initial(StatusSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ErrorEvent {
    InvalidRequest { message: String },
    TriggerFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

/// Counts from an [`AggregateStats`] without the per-device results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub duration_ms: f64,
    pub check_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&AggregateStats> for StatsSummary {
    fn from(stats: &AggregateStats) -> Self {
        Self {
            total: stats.total,
            online: stats.online,
            offline: stats.offline,
            duration_ms: stats.duration_ms,
            check_time: stats.check_time,
            expires_at: stats.expires_at,
        }
    }
}

/// What a freshly connected client is told about the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connections: usize,
    pub rooms: Vec<RoomOccupancy>,
    /// Last cached fleet statistics, if still fresh
    pub stats: Option<StatsSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOccupancy {
    pub room: String,
    pub connections: usize,
}

/// A text frame sent by a dashboard client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    JoinRoom { room: String },
    LeaveRoom { room: String },
    ManualMonitor,
    GetStatus,
    Ping,
}

impl ClientRequest {
    pub fn parse(text: &str) -> MonitorResult<Self> {
        let request: Self = serde_json::from_str(text)
            .map_err(|e| MonitorError::invalid(format!("unrecognised request: {e}")))?;

        match &request {
            ClientRequest::JoinRoom { room } | ClientRequest::LeaveRoom { room }
                if room.trim().is_empty() =>
            {
                Err(MonitorError::invalid("room name must not be empty"))
            }
            ClientRequest::JoinRoom { room } if !is_joinable_room(room) => {
                Err(MonitorError::invalid(format!("unknown room {room}")))
            }
            _ => Ok(request),
        }
    }
}
