//! Live updates for dashboard connections
//!
//! ```text
//! WebSocket ──register──► RoomRegistry ◄──snapshot── Broadcaster ◄── JobTrigger
//!                          (rooms ↔ conns)            (fan-out)       MonitorWorker
//! ```

pub mod broadcaster;
pub mod messages;
pub mod registry;

pub use broadcaster::{Broadcaster, DeliveryReport};
pub use messages::{BroadcastMessage, ClientRequest, NotificationLevel, Payload};
pub use registry::{
    ConnectionId, ConnectionSink, DEFAULT_ROOMS, ROOM_ALERTS, ROOM_DASHBOARD,
    ROOM_DEVICE_MONITORING, ROOM_URGENT_ALERTS, RoomRegistry, device_room, is_joinable_room,
};
