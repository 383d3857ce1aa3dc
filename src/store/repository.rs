use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::Job;

/// Durable home of job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;

    async fn load(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs owned by or shared with `identity`, oldest first.
    async fn list(&self, identity: &str) -> Result<Vec<Job>>;

    /// Every stored job, oldest first.
    async fn load_all(&self) -> Result<Vec<Job>>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

fn sort_by_creation(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by_key(|j| j.created_at);
    jobs
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list(&self, identity: &str) -> Result<Vec<Job>> {
        let jobs = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.is_visible_to(identity))
            .cloned()
            .collect();
        Ok(sort_by_creation(jobs))
    }

    async fn load_all(&self) -> Result<Vec<Job>> {
        Ok(sort_by_creation(
            self.jobs.read().await.values().cloned().collect(),
        ))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.jobs.write().await.remove(&id);
        Ok(())
    }
}

/// One pretty-printed JSON document per job: `<root>/job_<id>.json`.
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("job_{}.json", id))
    }

    async fn read_job(path: &Path) -> Result<Job> {
        let data = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl JobRepository for FsRepository {
    async fn save(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_vec_pretty(job)?;
        let path = self.path_for(job.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Job>> {
        let path = self.path_for(id);
        match tokio::fs::try_exists(&path).await? {
            true => Ok(Some(Self::read_job(&path).await?)),
            false => Ok(None),
        }
    }

    async fn list(&self, identity: &str) -> Result<Vec<Job>> {
        let jobs = self
            .load_all()
            .await?
            .into_iter()
            .filter(|j| j.is_visible_to(identity))
            .collect();
        Ok(jobs)
    }

    async fn load_all(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("job_") || !name.ends_with(".json") {
                continue;
            }
            match Self::read_job(&entry.path()).await {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Skipping unreadable job record");
                }
            }
        }
        Ok(sort_by_creation(jobs))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
