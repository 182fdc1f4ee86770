//! Request and response bodies of the HTTP API
//!
//! Field names follow the dashboard's camelCase convention.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::jobs::RunRecord;
use crate::probe::RawDeviceId;
use crate::realtime::messages::RoomOccupancy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Query of `GET /api/v1/connectivity/statistics`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    pub use_cache: Option<bool>,
    pub cache_ttl_minutes: Option<u32>,
}

/// Query of `POST /api/v1/connectivity/batch-check`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCheckQuery {
    pub max_concurrent: Option<usize>,
}

/// Body of `POST /api/v1/connectivity/batch-check`
///
/// Without `deviceIds` the whole inventory is checked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCheckRequest {
    #[serde(default)]
    pub device_ids: Option<Vec<RawDeviceId>>,
}

/// Query of `POST /api/v1/connectivity/refresh-cache`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQuery {
    pub cache_ttl_minutes: Option<u32>,
}

/// Body of `POST /api/v1/connectivity/check-ip`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIpRequest {
    pub business_ip: String,
}

/// Body of `POST /api/v1/jobs/monitor/trigger`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusResponse {
    pub message: String,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStatsResponse {
    pub active_connections: usize,
    pub rooms: Vec<RoomOccupancy>,
    pub cache: CacheStats,
    pub last_run: Option<RunRecord>,
    pub timestamp: String,
}

/// Query of the WebSocket upgrade
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub user_id: Option<String>,
}
