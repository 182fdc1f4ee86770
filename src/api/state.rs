//! API shared state containing the monitoring components

use std::sync::Arc;

use crate::cache::StatsCache;
use crate::config::Config;
use crate::jobs::{JobStatusLookup, JobTrigger};
use crate::realtime::messages::{StatsSummary, StatusSnapshot};
use crate::realtime::{Broadcaster, RoomRegistry};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Cached fleet statistics, also gives access to the probe
    pub cache: StatsCache,

    /// Fan-out to WebSocket connections
    pub broadcaster: Broadcaster,

    /// Manual monitoring runs
    pub trigger: JobTrigger,

    /// Status of submitted jobs
    pub jobs: Arc<dyn JobStatusLookup>,

    /// TTL used when a request does not name one
    pub default_ttl_minutes: u32,

    /// Frames buffered per connection before the socket writer catches up
    pub outbound_buffer: usize,
}

impl ApiState {
    pub fn new(
        cache: StatsCache,
        broadcaster: Broadcaster,
        trigger: JobTrigger,
        jobs: Arc<dyn JobStatusLookup>,
        config: &Config,
    ) -> Self {
        Self {
            cache,
            broadcaster,
            trigger,
            jobs,
            default_ttl_minutes: config.cache.ttl_minutes,
            outbound_buffer: config.realtime.outbound_buffer,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        self.broadcaster.registry()
    }

    /// Connections, rooms and the cached statistics, as sent to a new client
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let registry = self.registry();
        StatusSnapshot {
            connections: registry.get_active_connections_count().await,
            rooms: registry.occupancy().await,
            stats: self.cache.peek().await.map(|s| StatsSummary::from(&*s)),
        }
    }
}
