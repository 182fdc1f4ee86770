//! Hand-off of async work from synchronous call sites
//!
//! Triggers fire from plain threads (the scheduler's blocking pool, a cron
//! callback, a test) but broadcasting is async. [`RuntimeBridge::schedule`]
//! picks an execution context once per call:
//!
//! - **ambient**: the calling thread is inside a Tokio runtime, so the unit
//!   is spawned onto it and the caller returns immediately
//! - **isolated**: no runtime is reachable, so a named worker thread builds a
//!   current-thread runtime, drives the unit to completion and tears the
//!   runtime down again
//!
//! Either way the unit runs exactly once and its error or panic ends up in
//! the log, never in the caller.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::{MonitorError, MonitorResult};

/// Where a unit of work was sent
#[derive(Debug, Clone)]
pub enum Backend {
    /// Spawn onto the runtime the caller is already running in
    Ambient(Handle),
    /// Run on a dedicated thread with its own runtime
    Isolated,
}

impl Backend {
    /// Probe the calling thread for an active runtime
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(handle) => Backend::Ambient(handle),
            Err(_) => Backend::Isolated,
        }
    }
}

/// Handle on a dispatched unit
///
/// Dropping it detaches the unit. Tests keep it to wait for completion.
#[derive(Debug)]
pub enum Dispatch {
    Enqueued(JoinHandle<()>),
    Isolated(thread::JoinHandle<()>),
}

impl Dispatch {
    pub fn is_isolated(&self) -> bool {
        matches!(self, Dispatch::Isolated(_))
    }
}

/// Counters for dispatched units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub ambient: u64,
    pub isolated: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ambient: AtomicU64,
    isolated: AtomicU64,
}

/// Single schedule port in front of both backends
#[derive(Debug, Clone)]
pub struct RuntimeBridge {
    thread_name: String,
    counters: Arc<Counters>,
}

impl Default for RuntimeBridge {
    fn default() -> Self {
        Self::new("monitor-bridge")
    }
}

impl RuntimeBridge {
    /// `thread_name` names the worker threads of the isolated backend
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            counters: Arc::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            ambient: self.counters.ambient.load(Ordering::Relaxed),
            isolated: self.counters.isolated.load(Ordering::Relaxed),
        }
    }

    /// Run `unit` asynchronously without blocking the caller
    ///
    /// Only a failed hand-off is reported back. What the unit itself does,
    /// including panicking, is logged under `label`.
    pub fn schedule<F>(&self, label: &str, unit: F) -> MonitorResult<Dispatch>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.to_string();

        match Backend::detect() {
            Backend::Ambient(handle) => {
                trace!("{label}: spawning onto the ambient runtime");
                self.counters.ambient.fetch_add(1, Ordering::Relaxed);

                let inner = handle.spawn(unit);
                Ok(Dispatch::Enqueued(handle.spawn(supervise(label, inner))))
            }
            Backend::Isolated => {
                debug!("{label}: no runtime on this thread, running isolated");

                let thread_label = label.clone();
                let spawned = thread::Builder::new()
                    .name(self.thread_name.clone())
                    .spawn(move || run_isolated(thread_label, unit));

                match spawned {
                    Ok(thread) => {
                        self.counters.isolated.fetch_add(1, Ordering::Relaxed);
                        Ok(Dispatch::Isolated(thread))
                    }
                    Err(e) => {
                        error!("{label}: failed to spawn bridge thread: {e}");
                        Err(MonitorError::DispatchFailure(format!(
                            "{label}: failed to spawn bridge thread: {e}"
                        )))
                    }
                }
            }
        }
    }
}

fn run_isolated<F>(label: String, unit: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{label}: failed to build isolated runtime: {e}");
            return;
        }
    };

    runtime.block_on(async move {
        let inner = tokio::spawn(unit);
        supervise(label, inner).await;
    });
}

/// Await a spawned unit and log how it ended
async fn supervise(label: String, unit: JoinHandle<anyhow::Result<()>>) {
    match unit.await {
        Ok(Ok(())) => trace!("{label}: done"),
        Ok(Err(e)) => error!("{label}: {e:#}"),
        Err(join_error) if join_error.is_panic() => error!("{label}: panicked"),
        Err(join_error) => error!("{label}: cancelled: {join_error}"),
    }
}
