use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{self, PostProcessor};
use crate::config::HostConfig;
use crate::error::Result;
use crate::notify::Broadcaster;
use crate::protocol::DeviceReader;
use crate::scheduler::{Job, Scheduler};
use crate::store::{
    ArtifactStore, FsArtifacts, FsRepository, JobRepository, JobStore, MemoryArtifacts,
    MemoryRepository,
};
use crate::transport::DeviceChannel;

/// Everything needed to drive one device: the job store, the link, the
/// subscriber fan-out and the post-processing collaborator.
pub struct Host {
    pub config: HostConfig,
    pub store: Arc<JobStore>,
    pub channel: Arc<DeviceChannel>,
    pub broadcaster: Arc<Broadcaster>,
    post_processor: Arc<dyn PostProcessor>,
}

/// Background tasks started by [`Host::start`].
pub struct HostTasks {
    pub reader: JoinHandle<()>,
    pub scheduler: JoinHandle<()>,
}

impl HostTasks {
    pub async fn join(self) {
        if let Err(e) = self.reader.await {
            tracing::error!(error = %e, "Device reader task panicked");
        }
        if let Err(e) = self.scheduler.await {
            tracing::error!(error = %e, "Scheduler task panicked");
        }
    }
}

impl Host {
    /// Build storage, restore persisted jobs and open the device link.
    ///
    /// # Errors
    ///
    /// A link that cannot be opened is fatal: returns `Connection`.
    pub async fn open(config: HostConfig) -> Result<Self> {
        let (repository, artifacts): (Arc<dyn JobRepository>, Arc<dyn ArtifactStore>) =
            match &config.storage.data_dir {
                Some(dir) => (
                    Arc::new(FsRepository::open(dir.join("jobs")).await?),
                    Arc::new(FsArtifacts::open(dir.join("artifacts")).await?),
                ),
                None => (
                    Arc::new(MemoryRepository::new()),
                    Arc::new(MemoryArtifacts::new()),
                ),
            };

        let broadcaster = Arc::new(Broadcaster::new());
        let store = Arc::new(JobStore::new(repository, artifacts, broadcaster.clone()));
        store.restore().await?;

        let channel = Arc::new(DeviceChannel::open(&config.transport).await?);
        let post_processor = analysis::from_config(&config.analysis);

        Ok(Self {
            config,
            store,
            channel,
            broadcaster,
            post_processor,
        })
    }

    /// Assemble a host from already-built parts.
    pub fn from_parts(
        config: HostConfig,
        store: Arc<JobStore>,
        channel: Arc<DeviceChannel>,
        broadcaster: Arc<Broadcaster>,
        post_processor: Arc<dyn PostProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            channel,
            broadcaster,
            post_processor,
        }
    }

    /// Spawn the device reader and the scheduler.
    pub fn start(&self, cancel: &CancellationToken) -> HostTasks {
        let reader = DeviceReader::new(
            self.channel.clone(),
            self.store.clone(),
            self.post_processor.clone(),
        );
        // Online before the first tick; the reader flips it off on EOF.
        self.store.set_device_online(true);
        let reader = tokio::spawn(reader.run(cancel.child_token()));

        let scheduler = Scheduler::new(
            self.store.clone(),
            self.channel.clone(),
            &self.config.scheduler,
        );
        let scheduler = tokio::spawn(scheduler.run(cancel.child_token()));

        tracing::info!(link = %self.config.transport, "Host started");
        HostTasks { reader, scheduler }
    }

    /// Run until `cancel` fires, then close the link.
    pub async fn run(self, cancel: CancellationToken) {
        let tasks = self.start(&cancel);
        cancel.cancelled().await;
        tasks.join().await;
        self.channel.close().await;
    }

    /// Wait until every job in `ids` is terminal, polling the store.
    /// Jobs removed in the meantime are left out of the result.
    pub async fn wait_for_terminal(&self, ids: &[Uuid], poll: Duration) -> Vec<Job> {
        loop {
            let mut finished = Vec::with_capacity(ids.len());
            let mut pending = false;
            for id in ids {
                match self.store.get(*id).await {
                    Some(job) if job.status.is_terminal() => finished.push(job),
                    Some(_) => {
                        pending = true;
                        break;
                    }
                    None => {}
                }
            }
            if !pending {
                return finished;
            }
            tokio::time::sleep(poll).await;
        }
    }
}
