//! Monitoring job submission and tracking
//!
//! A trigger never runs monitoring itself. It hands a named job to a
//! [`TaskQueue`] and gets a [`JobHandle`] back; whoever drains the queue
//! reports progress through the same handle, which callers can look up
//! later via [`JobStatusLookup`].

pub mod queue;
pub mod trigger;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MonitorResult;

pub use queue::{JobStore, LocalTaskQueue, QueuedJob};
pub use trigger::{JobTrigger, RunRecord, RunState, TriggerOutcome};

/// Identifier handed out on submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A submitted job as seen by its submitter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: JobId,
    pub job_name: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobHandle {
    pub fn queued(job_name: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            job_name: job_name.into(),
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}

/// How a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Scheduled,
    Manual,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Scheduled => write!(f, "scheduled"),
            TriggerType::Manual => write!(f, "manual"),
        }
    }
}

/// Arguments the scheduling collaborator passes on each tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobArgs {
    /// Submit this job instead of the trigger's default
    pub job_name: Option<String>,
}

/// Fire-and-forget submission of a named job
///
/// Submission is synchronous: triggers call it from plain threads.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, job_name: &str) -> MonitorResult<JobHandle>;
}

/// Status of previously submitted jobs
pub trait JobStatusLookup: Send + Sync {
    fn status(&self, id: &JobId) -> Option<JobHandle>;
}
