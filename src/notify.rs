//! Live job updates for subscribers.
//!
//! Delivery is best effort: a subscriber whose channel is full or closed
//! misses the event and the failure is logged. Publishing never blocks and
//! never fails from the caller's point of view.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::scheduler::Job;

const SUBSCRIBER_BUFFER: usize = 64;

/// Snapshot of the queue as seen by clients.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub device_online: bool,
    pub active_job: Option<Job>,
    pub queued_jobs: Vec<Job>,
    pub queue_length: usize,
    pub total_jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum JobEvent {
    /// Full job record after a status change
    Status(Job),
    /// One device line appended to a job's progress log
    Progress { job_id: Uuid, line: String },
    QueueUpdate(QueueStatus),
}

/// Outbound side of live updates.
pub trait Notifier: Send + Sync {
    /// Deliver `event` to everyone watching `job_id` and to global watchers.
    fn publish(&self, job_id: Uuid, event: JobEvent);

    /// Deliver `event` to every subscriber.
    fn broadcast(&self, event: JobEvent);
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, _job_id: Uuid, _event: JobEvent) {}

    fn broadcast(&self, _event: JobEvent) {}
}

#[derive(Default)]
struct Subscribers {
    per_job: HashMap<Uuid, Vec<mpsc::Sender<JobEvent>>>,
    global: Vec<mpsc::Sender<JobEvent>>,
}

/// In-process fan-out over bounded channels.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Subscribers>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive events for one job plus queue-wide broadcasts.
    pub fn subscribe(&self, job_id: Uuid) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().per_job.entry(job_id).or_default().push(tx);
        rx
    }

    /// Receive every event.
    pub fn subscribe_all(&self) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().global.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let subs = self.lock();
        subs.global.len() + subs.per_job.values().map(Vec::len).sum::<usize>()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(senders: &mut Vec<mpsc::Sender<JobEvent>>, event: &JobEvent) {
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Subscriber lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Subscriber gone, removing");
                false
            }
        });
    }
}

impl Notifier for Broadcaster {
    fn publish(&self, job_id: Uuid, event: JobEvent) {
        let mut subs = self.lock();
        if let Some(senders) = subs.per_job.get_mut(&job_id) {
            Self::deliver(senders, &event);
            if senders.is_empty() {
                subs.per_job.remove(&job_id);
            }
        }
        Self::deliver(&mut subs.global, &event);
    }

    fn broadcast(&self, event: JobEvent) {
        let mut subs = self.lock();
        for senders in subs.per_job.values_mut() {
            Self::deliver(senders, &event);
        }
        subs.per_job.retain(|_, senders| !senders.is_empty());
        Self::deliver(&mut subs.global, &event);
    }
}
