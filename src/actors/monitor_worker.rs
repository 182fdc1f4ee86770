//! MonitorWorker - Executes queued monitoring jobs
//!
//! ## Message Flow
//!
//! ```text
//! LocalTaskQueue → QueuedJob → monitoring/started → dashboard, device_monitoring
//!                                   │
//!                    force StatsCache refresh ──► monitoring/progress (every tenth) → same rooms
//!                                   │
//!                                   ├── connectivity_stats/updated → dashboard, device_monitoring
//!                                   ├── device_status/changed (per flipped device)
//!                                   │       → same rooms + device_{id}
//!                                   ├── alert/raised → alerts (+ urgent_alerts when critical)
//!                                   ├── alert/resolved → alerts
//!                                   └── monitoring/completed → dashboard, device_monitoring
//!     ↑
//!     └─── Commands (Status, Shutdown)
//! ```
//!
//! Jobs are executed one at a time in submission order. A failed refresh
//! marks the job failed and tells the dashboard, the worker keeps going.
//!
//! A device going offline raises a warning alert. When more than half of
//! the fleet is offline after the run, its alerts are critical instead and
//! every connection gets a critical system notification.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::DeviceId;
use crate::cache::{AggregateStats, StatsCache};
use crate::jobs::{JobId, JobStore, QueuedJob};
use crate::probe::ConnectivityResult;
use crate::realtime::{
    BroadcastMessage, Broadcaster, NotificationLevel, ROOM_ALERTS, ROOM_DASHBOARD,
    ROOM_DEVICE_MONITORING, ROOM_URGENT_ALERTS, device_room,
};

use super::messages::{WorkerCommand, WorkerStatus};

const UPDATE_ROOMS: [&str; 2] = [ROOM_DASHBOARD, ROOM_DEVICE_MONITORING];

pub struct MonitorWorker {
    cache: StatsCache,

    broadcaster: Broadcaster,

    /// Status table the queue registered the jobs in
    store: JobStore,

    jobs_rx: mpsc::UnboundedReceiver<QueuedJob>,

    command_rx: mpsc::Receiver<WorkerCommand>,

    ttl_minutes: u32,

    /// Online state per device as of the previous job
    last_states: HashMap<DeviceId, bool>,

    status: WorkerStatus,
}

impl MonitorWorker {
    pub fn new(
        cache: StatsCache,
        broadcaster: Broadcaster,
        store: JobStore,
        jobs_rx: mpsc::UnboundedReceiver<QueuedJob>,
        command_rx: mpsc::Receiver<WorkerCommand>,
        ttl_minutes: u32,
    ) -> Self {
        Self {
            cache,
            broadcaster,
            store,
            jobs_rx,
            command_rx,
            ttl_minutes,
            last_states: HashMap::new(),
            status: WorkerStatus::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor worker");

        loop {
            tokio::select! {
                Some(job) = self.jobs_rx.recv() => {
                    self.execute(job).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WorkerCommand::Status { respond_to } => {
                            let _ = respond_to.send(self.status.clone());
                        }

                        WorkerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("job and command channels closed, shutting down");
                    break;
                }
            }
        }

        debug!("monitor worker stopped");
    }

    #[instrument(skip(self, job), fields(job = %job.job_name, id = %job.id))]
    async fn execute(&mut self, job: QueuedJob) {
        self.store.mark_running(&job.id);
        self.status.last_job = Some(job.id);

        let probe = self.cache.probe();
        let mut progress = probe.subscribe_progress();
        let total_devices = match probe.inventory_size().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("inventory size unavailable: {e}");
                None
            }
        };
        let task_id = job.id.to_string();
        let started = BroadcastMessage::monitoring_started(&task_id, total_devices);
        self.broadcast_updates(&started).await;

        let outcome = {
            let refresh = self.cache.refresh(self.ttl_minutes);
            tokio::pin!(refresh);
            loop {
                tokio::select! {
                    // drain progress before taking the result
                    biased;

                    step = progress.recv() => match step {
                        Ok(step) if step.is_milestone() => {
                            let message = BroadcastMessage::monitoring_progress(&task_id, &step);
                            self.broadcast_updates(&message).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("skipped {missed} progress events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break (&mut refresh).await,
                    },

                    outcome = &mut refresh => break outcome,
                }
            }
        };

        match outcome {
            Ok(stats) => {
                info!(
                    "monitoring done: {}/{} online in {}ms",
                    stats.online, stats.total, stats.duration_ms
                );
                self.publish(&stats, job.id).await;
                let completed = BroadcastMessage::monitoring_completed(task_id, &stats);
                self.broadcast_updates(&completed).await;
                self.store.mark_completed(&job.id);
                self.status.jobs_completed += 1;
            }
            Err(e) => {
                error!("monitoring failed: {e}");
                self.store.mark_failed(&job.id, e.to_string());
                self.status.jobs_failed += 1;

                let message =
                    BroadcastMessage::monitor_error(e.to_string(), "monitoring task failed");
                self.broadcast(ROOM_DASHBOARD, &message).await;
            }
        }
    }

    async fn publish(&mut self, stats: &AggregateStats, job: JobId) {
        let summary = BroadcastMessage::stats_updated(stats, Some(job.to_string()));
        self.broadcast_updates(&summary).await;

        let previous = std::mem::take(&mut self.last_states);
        let mut went_offline = 0;
        let level = if stats.offline * 2 > stats.total {
            NotificationLevel::Critical
        } else {
            NotificationLevel::Warning
        };

        for result in &stats.results {
            self.last_states.insert(result.device_id, result.online);

            match previous.get(&result.device_id) {
                Some(&was_online) if was_online != result.online => {
                    info!(
                        "device {} went {}",
                        result.device_id,
                        if result.online { "online" } else { "offline" }
                    );
                    let change = BroadcastMessage::device_changed(result, was_online);
                    self.broadcast_updates(&change).await;
                    self.broadcast(&device_room(result.device_id), &change).await;

                    if !result.online {
                        went_offline += 1;
                    }
                    self.alert(result, level).await;
                }
                _ => {}
            }
        }
        self.status.tracked_devices = self.last_states.len();

        if went_offline > 0 && level == NotificationLevel::Critical {
            warn!("{}/{} devices offline", stats.offline, stats.total);
            let notice = BroadcastMessage::notification(
                NotificationLevel::Critical,
                format!(
                    "{went_offline} devices went offline, {}/{} unreachable",
                    stats.offline, stats.total
                ),
            );
            if let Err(e) = self.broadcaster.broadcast_to_all(&notice).await {
                warn!("failed to broadcast outage notice: {e}");
            }
        }
    }

    /// Raise or resolve the alert for a flipped device
    async fn alert(&self, result: &ConnectivityResult, level: NotificationLevel) {
        if result.online {
            let resolved = BroadcastMessage::alert_resolved(result);
            self.broadcast(ROOM_ALERTS, &resolved).await;
            return;
        }

        let raised = BroadcastMessage::alert_raised(result, level);
        self.broadcast(ROOM_ALERTS, &raised).await;
        if level == NotificationLevel::Critical {
            self.broadcast(ROOM_URGENT_ALERTS, &raised).await;
        }
    }

    async fn broadcast_updates(&self, message: &BroadcastMessage) {
        for room in UPDATE_ROOMS {
            self.broadcast(room, message).await;
        }
    }

    async fn broadcast(&self, room: &str, message: &BroadcastMessage) {
        if let Err(e) = self.broadcaster.broadcast_to_room(room, message).await {
            warn!("failed to broadcast to {room}: {e}");
        }
    }
}

/// Handle for controlling a MonitorWorker
#[derive(Clone)]
pub struct MonitorWorkerHandle {
    sender: mpsc::Sender<WorkerCommand>,
}

impl MonitorWorkerHandle {
    /// Spawn the worker draining `jobs_rx`
    pub fn spawn(
        cache: StatsCache,
        broadcaster: Broadcaster,
        store: JobStore,
        jobs_rx: mpsc::UnboundedReceiver<QueuedJob>,
        ttl_minutes: u32,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let worker = MonitorWorker::new(cache, broadcaster, store, jobs_rx, cmd_rx, ttl_minutes);
        tokio::spawn(worker.run());

        Self { sender: cmd_tx }
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Status { respond_to: tx })
            .await
            .context("failed to send Status command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WorkerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
