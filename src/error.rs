use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

/// Malformed DIMACS text. `line` is 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SatlinkError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("Invalid CNF: {0}")]
    Parse(#[from] ParseError),

    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(String),

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Artifact {name} not found for job {job_id}")]
    ArtifactNotFound { job_id: Uuid, name: String },

    #[error("Job queue is at capacity")]
    QueueFull,

    #[error("Device is busy with job {0}")]
    DeviceBusy(Uuid),

    #[error("Permission denied for {identity} on job {job_id}")]
    PermissionDenied { job_id: Uuid, identity: String },

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

pub type Result<T> = std::result::Result<T, SatlinkError>;
