//! Short-TTL connectivity statistics with single-flight recomputation
//!
//! ## Read path
//!
//! ```text
//! get_statistics(use_cache, ttl)
//!     │
//!     ├── use_cache && fresh entry ──────────────► same Arc, no probing
//!     │
//!     ├── refresh already in flight ─────────────► join it (Shared future)
//!     │
//!     └── otherwise: spawn one probe batch, publish it as the in-flight
//!         refresh, store the result with expires_at = now + ttl
//! ```
//!
//! The refresh runs in its own task, so a batch always completes and lands
//! in the cache even if every caller waiting on it goes away. Callers that
//! join a refresh can only shorten its ttl: the stored entry expires after
//! the shortest ttl any of them asked for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::TTL_MINUTES_LIMIT;
use crate::probe::{BatchReport, ConnectivityProbe, ConnectivityResult};
use crate::{MonitorError, MonitorResult};

/// Cache key the statistics are published under
pub const DEFAULT_CACHE_KEY: &str = "connectivity_stats";

/// Fleet-wide connectivity snapshot
///
/// Never mutated once built. A refresh produces a new instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub duration_ms: f64,
    pub check_time: DateTime<Utc>,
    pub results: Vec<ConnectivityResult>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AggregateStats {
    pub fn from_report(report: BatchReport, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);

        Self {
            total: report.total,
            online: report.online,
            offline: report.offline,
            duration_ms: report.duration_ms,
            check_time: report.check_time,
            results: report.results,
            created_at,
            expires_at: created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.expires_at - self.created_at
    }
}

type SharedRefresh = Shared<BoxFuture<'static, MonitorResult<Arc<AggregateStats>>>>;

struct CachedEntry {
    stats: Arc<AggregateStats>,
    valid_until: Instant,
}

struct InFlight {
    generation: u64,
    /// Shortest ttl requested by the callers sharing this refresh
    ttl: Duration,
    refresh: SharedRefresh,
}

#[derive(Default)]
struct Slot {
    current: Option<CachedEntry>,
    in_flight: Option<InFlight>,
    generation: u64,
    computations: u64,
}

/// Observability counters for the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Probe batches started by the cache
    pub computations: u64,
    pub has_value: bool,
    pub refresh_in_flight: bool,
}

fn validate_ttl(ttl_minutes: u32) -> MonitorResult<Duration> {
    if (1..=TTL_MINUTES_LIMIT).contains(&ttl_minutes) {
        Ok(Duration::from_secs(u64::from(ttl_minutes) * 60))
    } else {
        Err(MonitorError::invalid(format!(
            "ttl_minutes must be between 1 and {TTL_MINUTES_LIMIT}, got {ttl_minutes}"
        )))
    }
}

/// TTL cache in front of [`ConnectivityProbe`]
#[derive(Clone)]
pub struct StatsCache {
    probe: ConnectivityProbe,
    slot: Arc<Mutex<Slot>>,
}

impl StatsCache {
    pub fn new(probe: ConnectivityProbe) -> Self {
        Self {
            probe,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn probe(&self) -> &ConnectivityProbe {
        &self.probe
    }

    /// Fleet statistics, from cache when allowed and fresh
    ///
    /// Concurrent callers that need a recomputation share a single probe
    /// batch and all receive its result.
    pub async fn get_statistics(
        &self,
        use_cache: bool,
        ttl_minutes: u32,
    ) -> MonitorResult<Arc<AggregateStats>> {
        let ttl = validate_ttl(ttl_minutes)?;

        let refresh = {
            let mut slot = self.slot.lock().await;

            if use_cache
                && let Some(entry) = &slot.current
                && Instant::now() < entry.valid_until
            {
                debug!("{DEFAULT_CACHE_KEY}: cache hit");
                return Ok(Arc::clone(&entry.stats));
            }

            match slot.in_flight.as_mut() {
                Some(in_flight) => {
                    debug!("{DEFAULT_CACHE_KEY}: joining in-flight refresh");
                    in_flight.ttl = in_flight.ttl.min(ttl);
                    in_flight.refresh.clone()
                }
                None => self.start_refresh(&mut slot, ttl),
            }
        };

        refresh.await
    }

    /// Force a fresh probe batch
    pub async fn refresh(&self, ttl_minutes: u32) -> MonitorResult<Arc<AggregateStats>> {
        self.get_statistics(false, ttl_minutes).await
    }

    /// Drop the cached value so the next read recomputes
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.current.take().is_some() {
            info!("{DEFAULT_CACHE_KEY}: cache cleared");
        }
    }

    /// The cached value if it is still fresh, without computing anything
    pub async fn peek(&self) -> Option<Arc<AggregateStats>> {
        let slot = self.slot.lock().await;
        slot.current
            .as_ref()
            .filter(|entry| Instant::now() < entry.valid_until)
            .map(|entry| Arc::clone(&entry.stats))
    }

    pub async fn stats(&self) -> CacheStats {
        let slot = self.slot.lock().await;
        CacheStats {
            computations: slot.computations,
            has_value: slot.current.is_some(),
            refresh_in_flight: slot.in_flight.is_some(),
        }
    }

    /// Spawn the probe batch and publish it as the in-flight refresh
    ///
    /// Must be called with the slot locked. The spawned task needs the same
    /// lock to store its result, so it cannot finish before `in_flight` is
    /// set.
    fn start_refresh(&self, slot: &mut Slot, ttl: Duration) -> SharedRefresh {
        slot.generation += 1;
        slot.computations += 1;
        let generation = slot.generation;

        debug!("{DEFAULT_CACHE_KEY}: starting refresh #{generation}");

        let probe = self.probe.clone();
        let shared_slot = Arc::clone(&self.slot);

        let task = tokio::spawn(async move {
            let report = probe.check_all().await;

            let mut slot = shared_slot.lock().await;
            let ttl = match &slot.in_flight {
                Some(in_flight) if in_flight.generation == generation => in_flight.ttl,
                _ => ttl,
            };
            let result = report.map(|report| Arc::new(AggregateStats::from_report(report, ttl)));
            match &result {
                Ok(stats) => {
                    slot.current = Some(CachedEntry {
                        stats: Arc::clone(stats),
                        valid_until: Instant::now() + ttl,
                    });
                }
                Err(e) => error!("{DEFAULT_CACHE_KEY}: refresh failed: {e}"),
            }
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                slot.in_flight = None;
            }

            result
        });

        let refresh = async move {
            task.await
                .map_err(|e| MonitorError::Internal(format!("statistics refresh task failed: {e}")))?
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            generation,
            ttl,
            refresh: refresh.clone(),
        });

        refresh
    }
}
