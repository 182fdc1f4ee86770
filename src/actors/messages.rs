//! Message types for actor communication
//!
//! Commands travel over each actor's mpsc channel. Queries carry a oneshot
//! sender for the reply.

use serde::Serialize;
use tokio::sync::oneshot;

use crate::MonitorResult;
use crate::jobs::{JobId, TriggerOutcome};

/// Commands that can be sent to the MonitorWorker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Report counters and the last processed job
    Status {
        respond_to: oneshot::Sender<WorkerStatus>,
    },

    /// Stop after the job currently being executed
    Shutdown,
}

/// Snapshot of the worker's progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub last_job: Option<JobId>,
    /// Devices whose online state is remembered for change detection
    pub tracked_devices: usize,
}

/// Commands that can be sent to the MonitorScheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Fire a scheduled run now, outside the interval
    ///
    /// Goes through the same overlap check as a timer tick.
    TriggerNow {
        respond_to: oneshot::Sender<MonitorResult<Option<TriggerOutcome>>>,
    },

    /// Change the tick interval
    ///
    /// The next tick happens one full new interval from now.
    UpdateInterval { interval_minutes: u32 },

    /// Stop ticking
    Shutdown,
}
