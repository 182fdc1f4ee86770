//! Connectivity endpoints backed by the probe and the stats cache

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::debug;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{
        BatchCheckQuery, BatchCheckRequest, CacheStatusResponse, CheckIpRequest, RefreshQuery,
        StatisticsQuery,
    },
};
use crate::cache::AggregateStats;
use crate::probe::{AddressReport, BatchReport};

/// GET /api/v1/connectivity/statistics
///
/// Serves the cached snapshot unless `useCache=false`.
pub async fn get_statistics(
    State(state): State<ApiState>,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult<Json<Arc<AggregateStats>>> {
    let ttl = query
        .cache_ttl_minutes
        .unwrap_or(state.default_ttl_minutes);
    let stats = state
        .cache
        .get_statistics(query.use_cache.unwrap_or(true), ttl)
        .await?;
    Ok(Json(stats))
}

/// POST /api/v1/connectivity/batch-check
pub async fn batch_check(
    State(state): State<ApiState>,
    Query(query): Query<BatchCheckQuery>,
    Json(body): Json<BatchCheckRequest>,
) -> ApiResult<Json<BatchReport>> {
    let probe = state.cache.probe();
    let max_concurrent = query
        .max_concurrent
        .unwrap_or_else(|| probe.default_max_concurrent());

    let report = probe
        .batch_check(body.device_ids.as_deref(), max_concurrent)
        .await?;
    debug!(
        "batch check: {}/{} online in {}ms",
        report.online, report.total, report.duration_ms
    );
    Ok(Json(report))
}

/// POST /api/v1/connectivity/refresh-cache
pub async fn refresh_cache(
    State(state): State<ApiState>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<Json<Arc<AggregateStats>>> {
    let ttl = query
        .cache_ttl_minutes
        .unwrap_or(state.default_ttl_minutes);
    Ok(Json(state.cache.refresh(ttl).await?))
}

/// POST /api/v1/connectivity/clear-cache
pub async fn clear_cache(State(state): State<ApiState>) -> Json<CacheStatusResponse> {
    state.cache.invalidate().await;
    Json(CacheStatusResponse {
        message: "connectivity cache cleared".to_string(),
        cache: state.cache.stats().await,
    })
}

/// POST /api/v1/connectivity/check-ip
///
/// Checks an address that need not belong to the inventory.
pub async fn check_ip(
    State(state): State<ApiState>,
    Json(body): Json<CheckIpRequest>,
) -> ApiResult<Json<AddressReport>> {
    let address: IpAddr = body.business_ip.trim().parse().map_err(|_| {
        ApiError::InvalidRequest(format!("'{}' is not an IP address", body.business_ip))
    })?;
    Ok(Json(state.cache.probe().check_address(address).await))
}
