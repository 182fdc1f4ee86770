//! Long-running actors of the hub
//!
//! Each actor runs as an independent task, controlled through a cloneable
//! handle that sends commands over an mpsc channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   MonitorScheduler ──tick──► JobTrigger ──submit──► LocalTaskQueue
//!                                  │                        │
//!                                  │ started/error          │ QueuedJob
//!                                  ▼                        ▼
//!                             Broadcaster ◄──updates── MonitorWorker ──► StatsCache
//! ```
//!
//! ## Actor Types
//!
//! - **MonitorScheduler**: fires scheduled runs at the configured interval
//! - **MonitorWorker**: executes queued jobs and pushes the results
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for queries

pub mod messages;
pub mod monitor_worker;
pub mod scheduler;

pub use monitor_worker::{MonitorWorker, MonitorWorkerHandle};
pub use scheduler::{MonitorScheduler, SchedulerHandle};
