//! MonitorScheduler - Fires scheduled monitoring runs on an interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → spawn_blocking(JobTrigger::run_scheduled) → submitted / skipped / failed
//!     ↑
//!     └─── Commands (TriggerNow, UpdateInterval, Shutdown)
//! ```
//!
//! The trigger is synchronous, so each tick runs it on the blocking pool.
//! The first tick happens one full interval after start.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::config::INTERVAL_MINUTES_LIMIT;
use crate::jobs::{JobArgs, JobTrigger, TriggerOutcome};
use crate::{MonitorError, MonitorResult};

use super::messages::SchedulerCommand;

fn validate_interval(interval_minutes: u32) -> MonitorResult<Duration> {
    if (1..=INTERVAL_MINUTES_LIMIT).contains(&interval_minutes) {
        Ok(Duration::from_secs(u64::from(interval_minutes) * 60))
    } else {
        Err(MonitorError::invalid(format!(
            "interval_minutes must be between 1 and {INTERVAL_MINUTES_LIMIT}, got {interval_minutes}"
        )))
    }
}

fn tick_every(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub struct MonitorScheduler {
    trigger: JobTrigger,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    period: Duration,
}

impl MonitorScheduler {
    pub fn new(
        trigger: JobTrigger,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        period: Duration,
    ) -> Self {
        Self {
            trigger,
            command_rx,
            period,
        }
    }

    #[instrument(skip(self), fields(job = %self.trigger.job_name()))]
    pub async fn run(mut self) {
        debug!("starting scheduler, interval {}s", self.period.as_secs());

        let mut ticker = tick_every(self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.fire().await {
                        Ok(Some(outcome)) => debug!("scheduled run submitted as {}", outcome.task_id),
                        Ok(None) => debug!("scheduled run skipped"),
                        Err(e) => error!("scheduled run failed: {e}"),
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::TriggerNow { respond_to } => {
                            debug!("received TriggerNow command");
                            let result = self.fire().await;
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::UpdateInterval { interval_minutes } => {
                            match validate_interval(interval_minutes) {
                                Ok(period) => {
                                    info!("updating interval to {interval_minutes} min");
                                    self.period = period;
                                    ticker = tick_every(period);
                                }
                                Err(e) => warn!("ignoring interval update: {e}"),
                            }
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("scheduler stopped");
    }

    async fn fire(&self) -> MonitorResult<Option<TriggerOutcome>> {
        let trigger = self.trigger.clone();
        tokio::task::spawn_blocking(move || trigger.run_scheduled(&JobArgs::default()))
            .await
            .map_err(|e| MonitorError::Internal(format!("scheduled trigger task failed: {e}")))?
    }
}

/// Handle for controlling a MonitorScheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(trigger: JobTrigger, interval_minutes: u32) -> MonitorResult<Self> {
        let period = validate_interval(interval_minutes)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let scheduler = MonitorScheduler::new(trigger, cmd_rx, period);
        tokio::spawn(scheduler.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Fire a scheduled run immediately
    pub async fn trigger_now(&self) -> Result<Option<TriggerOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TriggerNow { respond_to: tx })
            .await
            .context("failed to send TriggerNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn update_interval(&self, interval_minutes: u32) -> Result<()> {
        validate_interval(interval_minutes)?;
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval_minutes })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
