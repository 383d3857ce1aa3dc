use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, SatlinkError};

/// Per-job file storage: captured device files, encoded problems, the
/// original formula and verification results.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store_file(&self, job_id: Uuid, name: &str, bytes: &[u8]) -> Result<()>;

    async fn read_file(&self, job_id: Uuid, name: &str) -> Result<Option<Vec<u8>>>;

    /// File names stored for `job_id`, sorted.
    async fn list_files(&self, job_id: Uuid) -> Result<Vec<String>>;

    async fn delete_job(&self, job_id: Uuid) -> Result<()>;
}

/// Reject names that could escape the job's namespace.
pub fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(SatlinkError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid artifact name: {:?}", name),
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryArtifacts {
    files: RwLock<HashMap<Uuid, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn store_file(&self, job_id: Uuid, name: &str, bytes: &[u8]) -> Result<()> {
        validate_file_name(name)?;
        self.files
            .write()
            .await
            .entry(job_id)
            .or_default()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, job_id: Uuid, name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(name)?;
        Ok(self
            .files
            .read()
            .await
            .get(&job_id)
            .and_then(|files| files.get(name).cloned()))
    }

    async fn list_files(&self, job_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .files
            .read()
            .await
            .get(&job_id)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        self.files.write().await.remove(&job_id);
        Ok(())
    }
}

/// Files under `<root>/job_<id>/<name>`.
#[derive(Debug, Clone)]
pub struct FsArtifacts {
    root: PathBuf,
}

impl FsArtifacts {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("job_{}", job_id))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifacts {
    async fn store_file(&self, job_id: Uuid, name: &str, bytes: &[u8]) -> Result<()> {
        validate_file_name(name)?;
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), bytes).await?;
        Ok(())
    }

    async fn read_file(&self, job_id: Uuid, name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(name)?;
        match tokio::fs::read(self.job_dir(job_id).join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_files(&self, job_id: Uuid) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.job_dir(job_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(store: &dyn ArtifactStore) {
        let job = Uuid::new_v4();
        store.store_file(job, "b.csv", b"1,\n").await.unwrap();
        store.store_file(job, "a.csv", b"0,\n").await.unwrap();

        assert_eq!(store.list_files(job).await.unwrap(), vec!["a.csv", "b.csv"]);
        assert_eq!(
            store.read_file(job, "b.csv").await.unwrap(),
            Some(b"1,\n".to_vec())
        );
        assert_eq!(store.read_file(job, "missing").await.unwrap(), None);
        assert!(store.list_files(Uuid::new_v4()).await.unwrap().is_empty());

        store.delete_job(job).await.unwrap();
        assert!(store.list_files(job).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_artifacts_contract() {
        exercise(&MemoryArtifacts::new()).await;
    }

    #[tokio::test]
    async fn fs_artifacts_contract() {
        let dir = TempDir::new().unwrap();
        exercise(&FsArtifacts::open(dir.path()).await.unwrap()).await;
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let store = MemoryArtifacts::new();
        let job = Uuid::new_v4();
        assert!(store.store_file(job, "../escape", b"x").await.is_err());
        assert!(store.store_file(job, "a/b", b"x").await.is_err());
        assert!(store.store_file(job, "..", b"x").await.is_err());
        assert!(store.store_file(job, "", b"x").await.is_err());
    }
}
