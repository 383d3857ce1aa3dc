//! Job records, the pending FIFO and the single current-job pointer.
//!
//! # Locking
//!
//! Three locks, never nested with one another except as listed:
//!
//! - `queue` guards FIFO order only.
//! - `records` guards every job's fields and the current-job pointer.
//! - `persist` serializes repository writes; it may be held while `records`
//!   is taken briefly to snapshot the job being written.
//!
//! `queue` and `records` are never held at the same time, and no lock is held
//! across device I/O.

pub mod artifacts;
pub mod repository;

pub use artifacts::{ArtifactStore, FsArtifacts, MemoryArtifacts};
pub use repository::{FsRepository, JobRepository, MemoryRepository};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cnf::{encode, Formula};
use crate::error::{Result, SatlinkError};
use crate::notify::{JobEvent, Notifier, NullNotifier, QueueStatus};
use crate::protocol;
use crate::scheduler::{Job, JobQueue, JobRequest, JobStatus};
use crate::verify::{self, VerificationReport};

/// Formula text as submitted, kept for verification.
pub const ORIGINAL_FORMULA: &str = "original.cnf";
/// Persisted [`VerificationReport`].
pub const RESULTS_FILE: &str = "test_results.json";

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<Uuid, Job>,
    current: Option<Uuid>,
}

impl JobTable {
    fn transition(&mut self, id: Uuid, next: JobStatus) -> Result<&mut Job> {
        let job = self.jobs.get_mut(&id).ok_or(SatlinkError::JobNotFound(id))?;
        if !job.status.can_transition_to(next) {
            return Err(SatlinkError::InvalidTransition {
                job_id: id,
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        if next == JobStatus::Completed {
            job.completed_at = Some(Utc::now());
        }
        if next != JobStatus::Running && self.current == Some(id) {
            self.current = None;
        }
        Ok(job)
    }
}

pub struct JobStore {
    queue: Mutex<JobQueue>,
    records: Mutex<JobTable>,
    persist: Mutex<()>,
    repository: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    device_online: AtomicBool,
}

impl JobStore {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue: Mutex::new(JobQueue::new()),
            records: Mutex::new(JobTable::default()),
            persist: Mutex::new(()),
            repository,
            artifacts,
            notifier,
            device_online: AtomicBool::new(false),
        }
    }

    /// Store backed by memory only, with no subscribers.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(MemoryArtifacts::new()),
            Arc::new(NullNotifier),
        )
    }

    pub fn with_queue_capacity(self, max_jobs: usize) -> Self {
        Self {
            queue: Mutex::new(JobQueue::with_capacity(max_jobs)),
            ..self
        }
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    pub fn set_device_online(&self, online: bool) {
        self.device_online.store(online, Ordering::SeqCst);
    }

    pub fn device_online(&self) -> bool {
        self.device_online.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Create a QUEUED job and append it to the FIFO.
    pub async fn submit(&self, request: JobRequest) -> Result<Job> {
        self.enqueue(Job::new(request)).await
    }

    /// Parse and encode a user formula, store its artifacts and queue a
    /// single-instance custom job. Malformed text creates no job.
    pub async fn submit_formula(
        &self,
        owner: impl Into<String>,
        name: impl Into<String>,
        dimacs: &str,
    ) -> Result<Job> {
        let formula = Formula::parse(dimacs)?;
        let job = Job::new(JobRequest::custom(owner, name));
        let id = job.id;

        let queued = match self.store_formula(id, &formula, dimacs).await {
            Ok(()) => {
                tracing::info!(
                    job_id = %id,
                    variables = formula.variable_count,
                    clauses = formula.clauses.len(),
                    "Formula encoded"
                );
                self.enqueue(job).await
            }
            Err(e) => Err(e),
        };

        if queued.is_err() {
            if let Err(e) = self.artifacts.delete_job(id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to discard formula artifacts");
            }
        }
        queued
    }

    async fn store_formula(&self, id: Uuid, formula: &Formula, dimacs: &str) -> Result<()> {
        for file in encode(formula).serialize() {
            self.artifacts
                .store_file(id, &file.file_name(), file.to_text().as_bytes())
                .await?;
        }
        self.artifacts
            .store_file(id, ORIGINAL_FORMULA, dimacs.as_bytes())
            .await
    }

    async fn enqueue(&self, job: Job) -> Result<Job> {
        let id = job.id;
        self.records.lock().await.jobs.insert(id, job.clone());

        let accepted = self.queue.lock().await.push(id);
        if !accepted {
            self.records.lock().await.jobs.remove(&id);
            tracing::warn!(job_id = %id, "Job queue at capacity, submission rejected");
            return Err(SatlinkError::QueueFull);
        }

        tracing::info!(job_id = %id, owner = %job.owner, dataset = %job.dataset, "Job queued");
        self.persist(id).await;
        self.broadcast_queue().await;
        Ok(job)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.records.lock().await.jobs.get(&id).cloned()
    }

    /// Look in memory first, then in the repository.
    pub async fn find(&self, id: Uuid) -> Result<Job> {
        if let Some(job) = self.get(id).await {
            return Ok(job);
        }
        self.repository
            .load(id)
            .await?
            .ok_or(SatlinkError::JobNotFound(id))
    }

    /// Jobs owned by or shared with `identity`, oldest first.
    pub async fn list_for(&self, identity: &str) -> Result<Vec<Job>> {
        self.repository.list(identity).await
    }

    pub async fn current_job(&self) -> Option<Uuid> {
        self.records.lock().await.current
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let queued_ids = self.queue.lock().await.ids();
        let records = self.records.lock().await;
        let queued_jobs: Vec<Job> = queued_ids
            .iter()
            .filter_map(|id| records.jobs.get(id))
            .filter(|job| job.status == JobStatus::Queued)
            .cloned()
            .collect();
        QueueStatus {
            device_online: self.device_online(),
            active_job: records.current.and_then(|id| records.jobs.get(&id).cloned()),
            queue_length: queued_jobs.len(),
            queued_jobs,
            total_jobs: records.jobs.len(),
        }
    }

    // =========================================================================
    // Scheduler side
    // =========================================================================

    /// Pop the oldest job that is still QUEUED. Ids of jobs removed while
    /// waiting are discarded.
    pub async fn pop_queued(&self) -> Option<Job> {
        loop {
            let id = self.queue.lock().await.pop()?;
            let records = self.records.lock().await;
            match records.jobs.get(&id) {
                Some(job) if job.status == JobStatus::Queued => return Some(job.clone()),
                Some(job) => {
                    tracing::debug!(job_id = %id, status = %job.status, "Skipping dequeued job");
                }
                None => {
                    tracing::debug!(job_id = %id, "Skipping removed job");
                }
            }
        }
    }

    /// Put a popped job back at the head of the FIFO if it is still QUEUED.
    pub async fn requeue(&self, id: Uuid) -> bool {
        let queued = matches!(
            self.get(id).await,
            Some(job) if job.status == JobStatus::Queued
        );
        if !queued {
            return false;
        }
        self.queue.lock().await.push_front(id);
        tracing::debug!(job_id = %id, "Job returned to head of queue");
        true
    }

    /// QUEUED -> RUNNING and take the current-job pointer.
    pub async fn start(&self, id: Uuid) -> Result<Job> {
        let job = {
            let mut records = self.records.lock().await;
            if let Some(current) = records.current {
                return Err(SatlinkError::DeviceBusy(current));
            }
            let job = records.transition(id, JobStatus::Running)?.clone();
            records.current = Some(id);
            job
        };

        tracing::info!(job_id = %id, name = %job.name, "Job running");
        self.persist(id).await;
        self.notifier.publish(id, JobEvent::Status(job.clone()));
        self.broadcast_queue().await;
        Ok(job)
    }

    /// Move a job to ERROR from any non-terminal state, releasing the device
    /// if it held it.
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<Job> {
        let job = self
            .records
            .lock()
            .await
            .transition(id, JobStatus::Error)?
            .clone();

        tracing::error!(job_id = %id, reason, "Job failed");
        self.persist(id).await;
        self.notifier.publish(id, JobEvent::Status(job.clone()));
        Ok(job)
    }

    // =========================================================================
    // Device reader side
    // =========================================================================

    /// Apply one forwarded device line to the running job `id`.
    ///
    /// Returns the job when the line signals that the device finished it;
    /// the job is then PROCESSING and the device is free for the next one.
    pub async fn record_progress(&self, id: Uuid, line: &str) -> Option<Job> {
        let (instance_done, finished) = {
            let mut records = self.records.lock().await;
            if records.current != Some(id) {
                tracing::debug!(job_id = %id, "Line for job no longer running, dropped");
                return None;
            }
            let Some(job) = records.jobs.get_mut(&id) else {
                tracing::warn!(job_id = %id, "Current job missing from table");
                records.current = None;
                return None;
            };

            job.progress.push(line.to_string());
            let instance_done = protocol::is_instance_complete(line);
            if instance_done {
                job.record_instance_complete();
            }

            let finished = if protocol::is_job_finished(line) {
                match records.transition(id, JobStatus::Processing) {
                    Ok(job) => Some(job.clone()),
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "Ignoring finish signal");
                        None
                    }
                }
            } else {
                None
            };
            (instance_done, finished)
        };

        self.notifier.publish(
            id,
            JobEvent::Progress {
                job_id: id,
                line: line.to_string(),
            },
        );

        if instance_done || finished.is_some() {
            self.persist(id).await;
        }

        if let Some(job) = &finished {
            tracing::info!(
                job_id = %id,
                completed = job.completed_instances,
                total = job.instance_count(),
                "Device finished job"
            );
            self.notifier.publish(id, JobEvent::Status(job.clone()));
            self.broadcast_queue().await;
        }
        finished
    }

    /// File-sink for captured device files. Failures are logged only.
    pub async fn store_file(&self, job_id: Uuid, name: &str, bytes: &[u8]) {
        match self.artifacts.store_file(job_id, name, bytes).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, file = name, bytes = bytes.len(), "Stored device file");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, file = name, error = %e, "Failed to store device file");
            }
        }
    }

    /// Record the post-processing result: PROCESSING -> COMPLETED or ERROR.
    pub async fn finish_processing(&self, id: Uuid, outcome: Result<()>) -> Result<Job> {
        let next = match &outcome {
            Ok(()) => JobStatus::Completed,
            Err(_) => JobStatus::Error,
        };
        let job = self.records.lock().await.transition(id, next)?.clone();

        match outcome {
            Ok(()) => tracing::info!(job_id = %id, "Job completed"),
            Err(e) => tracing::error!(job_id = %id, error = %e, "Post-processing failed"),
        }
        self.persist(id).await;
        self.notifier.publish(id, JobEvent::Status(job.clone()));
        Ok(job)
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// Replace the set of identities a job is shared with. Owner only.
    pub async fn share(&self, id: Uuid, owner: &str, identities: Vec<String>) -> Result<Job> {
        self.update_owned(id, owner, |job| job.shared_with = identities)
            .await
    }

    pub async fn set_visibility(&self, id: Uuid, owner: &str, public: bool) -> Result<Job> {
        self.update_owned(id, owner, |job| job.is_public = public)
            .await
    }

    /// Owner: delete the job. Shared identity: detach only that identity.
    pub async fn remove(&self, id: Uuid, identity: &str) -> Result<()> {
        let job = self.find(id).await?;

        if job.owner == identity {
            // Status is checked again under the record lock: the scheduler
            // may have started the job since it was read.
            {
                let mut records = self.records.lock().await;
                let running = records.current == Some(id)
                    || matches!(records.jobs.get(&id), Some(j) if j.status == JobStatus::Running);
                if running {
                    return Err(SatlinkError::DeviceBusy(id));
                }
                records.jobs.remove(&id);
            }
            self.queue.lock().await.remove(&id);
            {
                let _guard = self.persist.lock().await;
                self.repository.delete(id).await?;
            }
            if let Err(e) = self.artifacts.delete_job(id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to delete job artifacts");
            }
            tracing::info!(job_id = %id, owner = identity, "Job deleted");
            self.broadcast_queue().await;
            return Ok(());
        }

        if job.shared_with.iter().any(|s| s == identity) {
            self.update_job(id, |job| job.shared_with.retain(|s| s != identity))
                .await?;
            tracing::info!(job_id = %id, identity, "Shared access revoked");
            return Ok(());
        }

        Err(SatlinkError::PermissionDenied {
            job_id: id,
            identity: identity.to_string(),
        })
    }

    async fn update_owned<F>(&self, id: Uuid, owner: &str, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let job = self.find(id).await?;
        if job.owner != owner {
            return Err(SatlinkError::PermissionDenied {
                job_id: id,
                identity: owner.to_string(),
            });
        }
        self.update_job(id, apply).await
    }

    /// Mutate a job in memory if loaded, otherwise its stored copy, then save.
    async fn update_job<F>(&self, id: Uuid, apply: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let _guard = self.persist.lock().await;
        let mut apply = Some(apply);
        let in_memory = {
            let mut records = self.records.lock().await;
            records.jobs.get_mut(&id).map(|job| {
                if let Some(f) = apply.take() {
                    f(job);
                }
                job.clone()
            })
        };
        let job = match in_memory {
            Some(job) => job,
            None => {
                let mut job = self
                    .repository
                    .load(id)
                    .await?
                    .ok_or(SatlinkError::JobNotFound(id))?;
                if let Some(f) = apply.take() {
                    f(&mut job);
                }
                job
            }
        };
        self.repository.save(&job).await?;
        Ok(job)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the latest in-memory state of `id`. Failures are logged only.
    async fn persist(&self, id: Uuid) {
        let _guard = self.persist.lock().await;
        let Some(job) = self.get(id).await else {
            return;
        };
        if let Err(e) = self.repository.save(&job).await {
            tracing::error!(job_id = %id, error = %e, "Failed to persist job");
        }
    }

    async fn broadcast_queue(&self) {
        let status = self.queue_status().await;
        self.notifier.broadcast(JobEvent::QueueUpdate(status));
    }

    /// Load persisted jobs after a restart.
    ///
    /// QUEUED jobs go back on the FIFO oldest first. Jobs caught on the
    /// device or in post-processing cannot be resumed and become ERROR.
    pub async fn restore(&self) -> Result<usize> {
        let jobs = self.repository.load_all().await?;
        let count = jobs.len();
        let mut interrupted = Vec::new();

        for mut job in jobs {
            let id = job.id;
            match job.status {
                JobStatus::Queued => {
                    if !self.queue.lock().await.push(id) {
                        tracing::warn!(job_id = %id, "Job queue at capacity, restored job not queued");
                        job.status = JobStatus::Error;
                        interrupted.push(id);
                    }
                }
                JobStatus::Running | JobStatus::Processing => {
                    job.status = JobStatus::Error;
                    interrupted.push(id);
                }
                JobStatus::Completed | JobStatus::Error => {}
            }
            self.records.lock().await.jobs.insert(id, job);
        }

        for id in interrupted {
            tracing::warn!(job_id = %id, "Job interrupted by restart, marked ERROR");
            self.persist(id).await;
        }
        tracing::info!(jobs = count, queued = self.queue_len().await, "Restored jobs");
        Ok(count)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Verify every device solution file stored for a custom job against its
    /// original formula, and store the report as [`RESULTS_FILE`].
    pub async fn verify_job(&self, id: Uuid) -> Result<VerificationReport> {
        let job = self.find(id).await?;
        let text = self
            .artifacts
            .read_file(id, ORIGINAL_FORMULA)
            .await?
            .ok_or_else(|| SatlinkError::ArtifactNotFound {
                job_id: id,
                name: ORIGINAL_FORMULA.to_string(),
            })?;
        let formula = Formula::parse(&String::from_utf8_lossy(&text))?;

        let mut solutions = Vec::new();
        for name in self.artifacts.list_files(id).await? {
            if !verify::is_solution_artifact(&name) {
                continue;
            }
            match self.artifacts.read_file(id, &name).await {
                Ok(Some(bytes)) => solutions.push((name, bytes)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %id, file = %name, error = %e, "Failed to read solution file");
                }
            }
        }

        let report = verify::verify_all(&formula, Some(job.id), solutions);
        tracing::info!(
            job_id = %id,
            valid = report.valid_solutions,
            total = report.total_runs,
            "Verification complete"
        );

        match serde_json::to_vec_pretty(&report) {
            Ok(data) => {
                if let Err(e) = self.artifacts.store_file(id, RESULTS_FILE, &data).await {
                    tracing::error!(job_id = %id, error = %e, "Failed to store verification report");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to serialize verification report");
            }
        }
        Ok(report)
    }
}
