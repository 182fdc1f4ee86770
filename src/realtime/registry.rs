//! Connection membership per named room
//!
//! Both directions of the membership relation (room → connections and
//! connection → rooms) live behind one lock and are only ever changed
//! together, so they cannot drift apart. The lock guards bookkeeping only:
//! callers take a snapshot of the sinks they need and do their I/O after the
//! guard is gone.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::DeviceId;

use super::messages::RoomOccupancy;

pub const ROOM_DASHBOARD: &str = "dashboard";
pub const ROOM_ALERTS: &str = "alerts";
pub const ROOM_URGENT_ALERTS: &str = "urgent_alerts";
pub const ROOM_DEVICE_MONITORING: &str = "device_monitoring";

/// Rooms that exist from startup
pub const DEFAULT_ROOMS: [&str; 4] = [
    ROOM_DASHBOARD,
    ROOM_ALERTS,
    ROOM_URGENT_ALERTS,
    ROOM_DEVICE_MONITORING,
];

const DEVICE_ROOM_PREFIX: &str = "device_";

/// Room carrying the updates of a single device
pub fn device_room(device_id: DeviceId) -> String {
    format!("{DEVICE_ROOM_PREFIX}{}", device_id.0)
}

/// Whether clients may join `room`: a default room or `device_<id>`
pub fn is_joinable_room(room: &str) -> bool {
    if DEFAULT_ROOMS.contains(&room) {
        return true;
    }
    // canonical ids only, so `device_7` and `device_007` cannot both exist
    room.strip_prefix(DEVICE_ROOM_PREFIX)
        .and_then(|id| id.parse::<u64>().ok())
        .is_some_and(|id| device_room(DeviceId(id)) == room)
}

/// Opaque per-connection identifier, unique for the registry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound side of a live connection
///
/// A failed send means the connection is gone. The broadcaster drops it
/// from every room.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send_text(&self, text: Arc<str>) -> anyhow::Result<()>;
}

/// Connections backed by a channel drained by a socket writer task
#[async_trait]
impl ConnectionSink for mpsc::Sender<Arc<str>> {
    async fn send_text(&self, text: Arc<str>) -> anyhow::Result<()> {
        self.send(text)
            .await
            .map_err(|_| anyhow::anyhow!("connection writer closed"))
    }
}

struct Entry {
    user_id: Option<String>,
    rooms: HashSet<String>,
    sink: Arc<dyn ConnectionSink>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Entry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Sinks captured for delivery outside the lock
pub type Targets = Vec<(ConnectionId, Arc<dyn ConnectionSink>)>;

/// Shared room registry
///
/// Cheap to clone. Every clone sees the same connections.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the given rooms already present (and empty)
    pub fn with_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = Inner::default();
        for room in rooms {
            inner.rooms.entry(room.into()).or_default();
        }

        Self {
            inner: Arc::new(RwLock::new(inner)),
            next_id: Arc::default(),
        }
    }

    pub async fn register(
        &self,
        user_id: Option<String>,
        sink: Arc<dyn ConnectionSink>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            Entry {
                user_id: user_id.clone(),
                rooms: HashSet::new(),
                sink,
            },
        );

        info!(
            "{id} registered (user {}), {} active",
            user_id.as_deref().unwrap_or("anonymous"),
            inner.connections.len()
        );
        id
    }

    /// Remove a connection from every room it joined
    ///
    /// Returns `false` if the connection was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.remove(&id) else {
            return false;
        };

        for room in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&id);
            }
        }

        info!("{id} unregistered, {} active", inner.connections.len());
        true
    }

    /// Add a connection to a room, creating the room on first use
    ///
    /// Joining twice is a no-op. Returns `false` for an unknown connection.
    pub async fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Inner { connections, rooms } = &mut *inner;

        let Some(entry) = connections.get_mut(&id) else {
            return false;
        };
        if entry.rooms.insert(room.to_string()) {
            debug!("{id} joined {room}");
        }
        rooms.entry(room.to_string()).or_default().insert(id);
        true
    }

    /// Remove a connection from a room
    ///
    /// Leaving a room the connection is not in is a no-op. Returns `false`
    /// for an unknown connection. Empty rooms are kept.
    pub async fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Inner { connections, rooms } = &mut *inner;

        let Some(entry) = connections.get_mut(&id) else {
            return false;
        };
        if entry.rooms.remove(room) {
            debug!("{id} left {room}");
        }
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&id);
        }
        true
    }

    /// Members of a room at this instant
    pub async fn room_targets(&self, room: &str) -> Targets {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| {
                        inner
                            .connections
                            .get(id)
                            .map(|entry| (*id, Arc::clone(&entry.sink)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registered connection at this instant
    pub async fn all_targets(&self) -> Targets {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
            .collect()
    }

    pub async fn sink_of(&self, id: ConnectionId) -> Option<Arc<dyn ConnectionSink>> {
        let inner = self.inner.read().await;
        inner.connections.get(&id).map(|entry| Arc::clone(&entry.sink))
    }

    pub async fn get_room_users_count(&self, room: &str) -> usize {
        let inner = self.inner.read().await;
        inner.rooms.get(room).map_or(0, HashSet::len)
    }

    pub async fn get_active_connections_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Sorted room names of a connection, `None` if it is not registered
    pub async fn rooms_of(&self, id: ConnectionId) -> Option<Vec<String>> {
        let inner = self.inner.read().await;
        inner.connections.get(&id).map(|entry| {
            let mut rooms: Vec<String> = entry.rooms.iter().cloned().collect();
            rooms.sort();
            rooms
        })
    }

    pub async fn user_of(&self, id: ConnectionId) -> Option<String> {
        let inner = self.inner.read().await;
        inner.connections.get(&id).and_then(|entry| entry.user_id.clone())
    }

    /// Every room ever created, sorted
    pub async fn room_names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Member count per room, sorted by room name
    pub async fn occupancy(&self) -> Vec<RoomOccupancy> {
        let inner = self.inner.read().await;
        let mut rooms: Vec<RoomOccupancy> = inner
            .rooms
            .iter()
            .map(|(room, members)| RoomOccupancy {
                room: room.clone(),
                connections: members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));
        rooms
    }

    /// Check that both membership maps describe the same relation
    pub async fn is_consistent(&self) -> bool {
        let inner = self.inner.read().await;

        let forward = inner.connections.iter().all(|(id, entry)| {
            entry
                .rooms
                .iter()
                .all(|room| inner.rooms.get(room).is_some_and(|m| m.contains(id)))
        });
        let backward = inner.rooms.iter().all(|(room, members)| {
            members.iter().all(|id| {
                inner
                    .connections
                    .get(id)
                    .is_some_and(|entry| entry.rooms.contains(room))
            })
        });

        forward && backward
    }
}
