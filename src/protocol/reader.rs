use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Decoder, DecoderEvent};
use crate::analysis::PostProcessor;
use crate::scheduler::{DatasetKind, Job};
use crate::store::JobStore;
use crate::transport::DeviceChannel;

/// Marks the device online while the reader lives. Dropped on every exit,
/// including a panic, so a dead reader never looks like an idle device.
struct OnlineFlag(Arc<JobStore>);

impl OnlineFlag {
    fn raise(store: Arc<JobStore>) -> Self {
        store.set_device_online(true);
        Self(store)
    }
}

impl Drop for OnlineFlag {
    fn drop(&mut self) {
        self.0.set_device_online(false);
        if std::thread::panicking() {
            tracing::error!("Device reader panicked, link marked offline");
        }
    }
}

/// The single task that reads from the device link.
///
/// Each line goes through the [`Decoder`]; status lines update the running
/// job and captured files go to the job's artifacts. When the device reports
/// a job finished, post-processing runs detached so the next job can start.
pub struct DeviceReader {
    channel: Arc<DeviceChannel>,
    store: Arc<JobStore>,
    post_processor: Arc<dyn PostProcessor>,
    decoder: Decoder,
}

impl DeviceReader {
    pub fn new(
        channel: Arc<DeviceChannel>,
        store: Arc<JobStore>,
        post_processor: Arc<dyn PostProcessor>,
    ) -> Self {
        Self {
            channel,
            store,
            post_processor,
            decoder: Decoder::new(),
        }
    }

    /// Read until end of stream, a link error or cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        let _online = OnlineFlag::raise(self.store.clone());
        tracing::info!(link = %self.channel.description(), "Device reader started");

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Device reader shutting down");
                    break;
                }
                read = self.channel.read_line() => read,
            };

            match read {
                Ok(Some(line)) => {
                    self.handle_line(&line).await;
                }
                Ok(None) => {
                    tracing::warn!(link = %self.channel.description(), "Device link closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Device read failed");
                    break;
                }
            }
        }
    }

    /// Decode one line and apply it. Returns the post-processing task when
    /// the line finished a job.
    pub async fn handle_line(&mut self, line: &str) -> Option<JoinHandle<()>> {
        tracing::debug!(target: "device", line = %line, "Device line");

        let active = self.store.current_job().await;
        match self.decoder.feed(line, active)? {
            DecoderEvent::Progress { job_id, line } => {
                let job = self.store.record_progress(job_id, &line).await?;
                Some(self.spawn_post_processing(job))
            }
            DecoderEvent::File {
                job_id,
                name,
                content,
            } => {
                self.store.store_file(job_id, &name, &content).await;
                None
            }
        }
    }

    fn spawn_post_processing(&self, job: Job) -> JoinHandle<()> {
        let store = self.store.clone();
        let post_processor = self.post_processor.clone();

        tokio::spawn(async move {
            let outcome = post_processor.run(&job).await;
            if let Err(e) = store.finish_processing(job.id, outcome).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record post-processing result");
            }

            if job.dataset == DatasetKind::Custom {
                if let Err(e) = store.verify_job(job.id).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Automatic verification failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_reader_takes_device_offline() {
        let store = Arc::new(JobStore::in_memory());
        let task_store = store.clone();

        let handle = tokio::spawn(async move {
            let _online = OnlineFlag::raise(task_store.clone());
            assert!(task_store.device_online());
            panic!("reader failure");
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert!(!store.device_online());
    }
}
