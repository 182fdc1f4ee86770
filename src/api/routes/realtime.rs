//! Realtime connection statistics

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::RealtimeStatsResponse};

/// GET /api/v1/realtime/stats
pub async fn get_realtime_stats(State(state): State<ApiState>) -> Json<RealtimeStatsResponse> {
    let registry = state.registry();

    Json(RealtimeStatsResponse {
        active_connections: registry.get_active_connections_count().await,
        rooms: registry.occupancy().await,
        cache: state.cache.stats().await,
        last_run: state.trigger.last_run(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
