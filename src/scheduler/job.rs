use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Edges of the job lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Error)
                | (Running, Processing)
                | (Running, Error)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Where a job's problem instances come from.
///
/// Unknown kinds are kept as submitted; they are rejected when the job is
/// scheduled, not when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatasetKind {
    /// A user-submitted formula
    Custom,
    /// SATLIB uniform random 3-SAT, 20 variables / 91 clauses
    Uf20_91,
    /// SATLIB uniform random 3-SAT, 50 variables / 218 clauses
    Uf50_218,
    Other(String),
}

impl DatasetKind {
    pub fn as_str(&self) -> &str {
        match self {
            DatasetKind::Custom => "custom",
            DatasetKind::Uf20_91 => "uf20-91",
            DatasetKind::Uf50_218 => "uf50-218",
            DatasetKind::Other(name) => name,
        }
    }

    pub fn is_benchmark(&self) -> bool {
        matches!(self, DatasetKind::Uf20_91 | DatasetKind::Uf50_218)
    }
}

impl From<String> for DatasetKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "custom" => DatasetKind::Custom,
            "uf20-91" => DatasetKind::Uf20_91,
            "uf50-218" => DatasetKind::Uf50_218,
            _ => DatasetKind::Other(value),
        }
    }
}

impl From<&str> for DatasetKind {
    fn from(value: &str) -> Self {
        DatasetKind::from(value.to_string())
    }
}

impl From<DatasetKind> for String {
    fn from(value: DatasetKind) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client asks for when submitting a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub owner: String,
    pub name: String,
    pub dataset: DatasetKind,
    pub start: u32,
    pub end: u32,
}

impl JobRequest {
    pub fn benchmark(
        owner: impl Into<String>,
        name: impl Into<String>,
        dataset: DatasetKind,
        start: u32,
        end: u32,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            dataset,
            start,
            end,
        }
    }

    /// Single-instance custom-formula run.
    pub fn custom(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::benchmark(owner, name, DatasetKind::Custom, 1, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub dataset: DatasetKind,
    pub start: u32,
    pub end: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Raw device lines received while the job was running
    pub progress: Vec<String>,
    pub completed_instances: u32,
    pub is_public: bool,
    pub shared_with: Vec<String>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self::with_id(Uuid::new_v4(), request, Utc::now())
    }

    pub fn with_id(id: Uuid, request: JobRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: request.owner,
            name: request.name,
            dataset: request.dataset,
            start: request.start,
            end: request.end,
            created_at,
            completed_at: None,
            status: JobStatus::Queued,
            progress: Vec::new(),
            completed_instances: 0,
            is_public: false,
            shared_with: Vec::new(),
        }
    }

    /// Number of instances in the configured range.
    pub fn instance_count(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    pub fn is_visible_to(&self, identity: &str) -> bool {
        self.owner == identity || self.shared_with.iter().any(|s| s == identity)
    }

    /// Count one finished instance, never exceeding the configured range.
    pub fn record_instance_complete(&mut self) {
        if self.completed_instances < self.instance_count() {
            self.completed_instances += 1;
        }
    }
}
