//! In-process task queue in front of the monitor worker

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{MonitorError, MonitorResult};

use super::{JobHandle, JobId, JobStatus, JobStatusLookup, TaskQueue};

/// Finished jobs kept for status lookups
const MAX_TRACKED_JOBS: usize = 1024;

/// A job waiting for the worker
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub job_name: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<JobId, JobHandle>,
    order: VecDeque<JobId>,
}

/// Job status table shared by the queue and the worker
///
/// Lookups come from synchronous code, so this is a std lock held only for
/// map operations.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, handle: JobHandle) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.order.push_back(handle.id);
        inner.jobs.insert(handle.id, handle);

        while inner.order.len() > MAX_TRACKED_JOBS {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.jobs.remove(&oldest);
        }
    }

    fn remove(&self, id: &JobId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.jobs.remove(id);
        inner.order.retain(|queued| queued != id);
    }

    pub fn mark_running(&self, id: &JobId) {
        self.update(id, |job| job.status = JobStatus::Running);
    }

    pub fn mark_completed(&self, id: &JobId) {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
        });
    }

    pub fn mark_failed(&self, id: &JobId, error: impl Into<String>) {
        let error = error.into();
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.finished_at = Some(Utc::now());
            job.error = Some(error);
        });
    }

    fn update(&self, id: &JobId, change: impl FnOnce(&mut JobHandle)) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.jobs.get_mut(id) {
            Some(job) => change(job),
            None => debug!("job {id} no longer tracked"),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStatusLookup for JobStore {
    fn status(&self, id: &JobId) -> Option<JobHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(id)
            .cloned()
    }
}

/// Queue that hands jobs to an in-process worker over a channel
///
/// Only the job names it was built for are accepted.
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    accepted: Vec<String>,
    sender: mpsc::UnboundedSender<QueuedJob>,
    store: JobStore,
}

impl LocalTaskQueue {
    pub fn new(
        accepted: impl IntoIterator<Item = impl Into<String>>,
        store: JobStore,
    ) -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            accepted: accepted.into_iter().map(Into::into).collect(),
            sender,
            store,
        };
        (queue, receiver)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

impl TaskQueue for LocalTaskQueue {
    fn submit(&self, job_name: &str) -> MonitorResult<JobHandle> {
        if !self.accepted.iter().any(|name| name == job_name) {
            return Err(MonitorError::submission(job_name, "unknown job"));
        }

        let handle = JobHandle::queued(job_name);
        self.store.insert(handle.clone());

        let job = QueuedJob {
            id: handle.id,
            job_name: handle.job_name.clone(),
        };
        if self.sender.send(job).is_err() {
            warn!("worker gone, dropping job {}", handle.id);
            self.store.remove(&handle.id);
            return Err(MonitorError::submission(job_name, "worker is not running"));
        }

        debug!("queued {job_name} as {}", handle.id);
        Ok(handle)
    }
}

impl JobStatusLookup for LocalTaskQueue {
    fn status(&self, id: &JobId) -> Option<JobHandle> {
        self.store.status(id)
    }
}
