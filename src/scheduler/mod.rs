pub mod job;
pub mod queue;

pub use job::{DatasetKind, Job, JobRequest, JobStatus};
pub use queue::JobQueue;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::SatlinkError;
use crate::protocol::DeviceCommand;
use crate::store::JobStore;
use crate::transport::DeviceChannel;

/// What a single scheduler poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link is down
    Offline,
    /// Another job holds the device
    Busy(Uuid),
    /// Nothing queued
    Idle,
    Started(Uuid),
    /// Dataset cannot run on the device; job marked ERROR
    Rejected(Uuid),
    /// Command could not be written; job marked ERROR
    SendFailed(Uuid),
}

/// Moves queued jobs onto the device, one at a time.
pub struct Scheduler {
    store: Arc<JobStore>,
    channel: Arc<DeviceChannel>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, channel: Arc<DeviceChannel>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            channel,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Poll at a fixed interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Start the next queued job if the link is up and the device is free.
    ///
    /// Failures are confined to the job concerned; the queue keeps moving.
    pub async fn tick(&self) -> TickOutcome {
        if !self.channel.is_connected() {
            return TickOutcome::Offline;
        }
        if let Some(current) = self.store.current_job().await {
            return TickOutcome::Busy(current);
        }
        let Some(job) = self.store.pop_queued().await else {
            return TickOutcome::Idle;
        };

        let command = match DeviceCommand::for_job(&job) {
            Ok(command) => command,
            Err(e) => {
                if let Err(err) = self.store.fail(job.id, &e.to_string()).await {
                    tracing::error!(job_id = %job.id, error = %err, "Failed to mark job ERROR");
                }
                return TickOutcome::Rejected(job.id);
            }
        };

        if let Err(e) = self.store.start(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Job could not be started");
            self.store.requeue(job.id).await;
            return match e {
                SatlinkError::DeviceBusy(current) => TickOutcome::Busy(current),
                _ => TickOutcome::Idle,
            };
        }

        match self.channel.write(&command.to_wire()).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, command = %command, "Command sent to device");
                TickOutcome::Started(job.id)
            }
            Err(e) => {
                if let Err(err) = self.store.fail(job.id, &e.to_string()).await {
                    tracing::error!(job_id = %job.id, error = %err, "Failed to mark job ERROR");
                }
                TickOutcome::SendFailed(job.id)
            }
        }
    }
}
