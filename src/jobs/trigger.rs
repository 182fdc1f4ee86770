//! Scheduled and manual entry point for monitoring runs
//!
//! ```text
//! run_scheduled ──(skip if a scheduled run is active)──┐
//! run_manual ──────────────────────────────────────────┤
//!                                                      ▼
//!                    submit(job) ──ok──► started broadcast ──► TriggerOutcome
//!                         │
//!                         └──err──► error broadcast ──► Err(SubmissionFailure)
//! ```
//!
//! A run succeeds once its job is queued. The trigger never waits for the
//! monitoring itself. Broadcasts go through the [`RuntimeBridge`] because
//! the scheduled entry point is called from synchronous code.
//!
//! Each run keeps its own [`RunRecord`] and stores a full copy at every
//! state change. A run that started earlier never overwrites the record of
//! one that started later, so `last_run` always describes a single run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::RuntimeBridge;
use crate::realtime::{BroadcastMessage, Broadcaster, ROOM_DASHBOARD};
use crate::{MonitorError, MonitorResult};

use super::{JobArgs, JobId, TaskQueue, TriggerType};

/// What the scheduling collaborator gets back from a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    pub success: bool,
    pub task_id: JobId,
    pub execution_time: DateTime<Utc>,
    pub message: String,
    pub trigger_type: TriggerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Waiting for the queue to accept the job
    Pending,
    /// Job queued, started notification being handed off
    Running,
    Success,
    Failure,
}

/// The most recent run of a trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub state: RunState,
    pub trigger_type: TriggerType,
    pub trigger_user: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub task_id: Option<JobId>,
    pub error: Option<String>,
    /// Start order among this trigger's runs
    #[serde(skip)]
    sequence: u64,
}

/// Clears the scheduled-run flag however the run ends
struct ScheduledSlot<'a>(&'a AtomicBool);

impl Drop for ScheduledSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct JobTrigger {
    queue: Arc<dyn TaskQueue>,
    bridge: RuntimeBridge,
    broadcaster: Broadcaster,
    job_name: String,
    scheduled_running: Arc<AtomicBool>,
    runs_started: Arc<AtomicU64>,
    last_run: Arc<Mutex<Option<RunRecord>>>,
}

impl JobTrigger {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        bridge: RuntimeBridge,
        broadcaster: Broadcaster,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            bridge,
            broadcaster,
            job_name: job_name.into(),
            scheduled_running: Arc::default(),
            runs_started: Arc::default(),
            last_run: Arc::default(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_scheduled_running(&self) -> bool {
        self.scheduled_running.load(Ordering::Acquire)
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.last_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scheduled entry point, callable from synchronous code
    ///
    /// Returns `Ok(None)` when a previous scheduled run is still active.
    #[instrument(skip(self, args), fields(job = %self.job_name))]
    pub fn run_scheduled(&self, args: &JobArgs) -> MonitorResult<Option<TriggerOutcome>> {
        let Some(_slot) = self.claim_scheduled_slot() else {
            return Ok(None);
        };

        let job_name = args.job_name.as_deref().unwrap_or(&self.job_name);
        let (outcome, message, run) = self.submit(job_name, TriggerType::Scheduled, None);
        self.dispatch(message);
        self.conclude(run, &outcome);
        outcome.map(Some)
    }

    /// Scheduled entry point for async callers
    ///
    /// Same contract as [`run_scheduled`](Self::run_scheduled), but the
    /// notification is delivered before returning.
    pub async fn run_scheduled_async(
        &self,
        args: &JobArgs,
    ) -> MonitorResult<Option<TriggerOutcome>> {
        let (outcome, message, run) = {
            let Some(_slot) = self.claim_scheduled_slot() else {
                return Ok(None);
            };
            let job_name = args.job_name.as_deref().unwrap_or(&self.job_name);
            self.submit(job_name, TriggerType::Scheduled, None)
        };

        if let Err(e) = self.broadcaster.broadcast_to_room(ROOM_DASHBOARD, &message).await {
            warn!("failed to broadcast monitor_task event: {e}");
        }
        self.conclude(run, &outcome);
        outcome.map(Some)
    }

    /// Operator-initiated run
    ///
    /// Not subject to the scheduled overlap check.
    #[instrument(skip(self), fields(job = %self.job_name))]
    pub fn run_manual(&self, user: Option<String>) -> MonitorResult<TriggerOutcome> {
        let (outcome, message, run) = self.submit(&self.job_name, TriggerType::Manual, user);
        self.dispatch(message);
        self.conclude(run, &outcome);
        outcome
    }

    fn claim_scheduled_slot(&self) -> Option<ScheduledSlot<'_>> {
        match self.scheduled_running.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(ScheduledSlot(&self.scheduled_running)),
            Err(_) => {
                info!("previous scheduled run still active, skipping this tick");
                None
            }
        }
    }

    /// Submit the job and build the notification describing the result
    fn submit(
        &self,
        job_name: &str,
        trigger_type: TriggerType,
        trigger_user: Option<String>,
    ) -> (MonitorResult<TriggerOutcome>, BroadcastMessage, RunRecord) {
        let mut run = self.begin(trigger_type, trigger_user.clone());
        let execution_time = run.started_at;

        let submitted = self.queue.submit(job_name).map_err(|e| match e {
            e @ MonitorError::SubmissionFailure { .. } => e,
            other => MonitorError::submission(job_name, other),
        });

        match submitted {
            Ok(handle) => {
                let message = match &trigger_user {
                    Some(user) => format!("{trigger_type} monitoring task started by {user}"),
                    None => format!("{trigger_type} monitoring task started"),
                };
                info!("submitted {job_name} as {}", handle.id);

                run.state = RunState::Running;
                run.task_id = Some(handle.id);
                self.store(&run);
                let notification = BroadcastMessage::monitor_started(
                    handle.id.to_string(),
                    execution_time,
                    &message,
                );

                let outcome = TriggerOutcome {
                    success: true,
                    task_id: handle.id,
                    execution_time,
                    message,
                    trigger_type,
                    trigger_user,
                };
                (Ok(outcome), notification, run)
            }
            Err(e) => {
                error!("failed to submit {job_name}: {e}");

                run.error = Some(e.to_string());
                let notification = BroadcastMessage::monitor_error(
                    e.to_string(),
                    format!("{trigger_type} monitoring task failed to start"),
                );
                (Err(e), notification, run)
            }
        }
    }

    /// Hand a notification to the bridge without waiting for delivery
    fn dispatch(&self, message: BroadcastMessage) {
        let broadcaster = self.broadcaster.clone();
        let unit = async move {
            broadcaster.broadcast_to_room(ROOM_DASHBOARD, &message).await?;
            Ok(())
        };

        if let Err(e) = self.bridge.schedule("monitor_task broadcast", unit) {
            warn!("notification dropped: {e}");
        }
    }

    fn begin(&self, trigger_type: TriggerType, trigger_user: Option<String>) -> RunRecord {
        let run = RunRecord {
            state: RunState::Pending,
            trigger_type,
            trigger_user,
            started_at: Utc::now(),
            finished_at: None,
            task_id: None,
            error: None,
            sequence: self.runs_started.fetch_add(1, Ordering::Relaxed),
        };
        self.store(&run);
        run
    }

    /// Settle a run once its notification has been handed off
    fn conclude(&self, mut run: RunRecord, outcome: &MonitorResult<TriggerOutcome>) {
        run.state = match outcome {
            Ok(_) => RunState::Success,
            Err(_) => RunState::Failure,
        };
        run.finished_at = Some(Utc::now());
        self.store(&run);
    }

    fn store(&self, run: &RunRecord) {
        let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        match last_run.as_ref() {
            Some(newer) if newer.sequence > run.sequence => {
                debug!(
                    "{} run {} superseded, keeping the later run's record",
                    run.trigger_type,
                    run.task_id.map_or_else(|| "-".to_string(), |id| id.to_string())
                );
            }
            _ => *last_run = Some(run.clone()),
        }
    }
}
