//! Line-oriented device wire protocol.
//!
//! Host to device: one `TEST ...` command per job. Device to host: echo lines,
//! free-form status text, and file payloads framed by `START_FILE:<name>` and
//! `END_FILE`.

pub mod decoder;
pub mod reader;

pub use decoder::{Decoder, DecoderEvent, DecoderState};
pub use reader::DeviceReader;

use crate::error::{Result, SatlinkError};
use crate::scheduler::{DatasetKind, Job};

pub const ECHO_MARKER: &str = "ECHO:";
pub const START_FILE_MARKER: &str = "START_FILE:";
pub const END_FILE_MARKER: &str = "END_FILE";
pub const ALL_FILES_SENT_MARKER: &str = "ALL_FILES_SENT";

/// Tokens that together mark one finished problem instance.
pub const INSTANCE_TOKENS: [&str; 2] = ["Problem", "Complete"];
/// Device signal that the whole job is done.
pub const JOB_FINISHED_PHRASE: &str = "COMPLETE: Test";

pub fn is_instance_complete(line: &str) -> bool {
    INSTANCE_TOKENS.iter().all(|token| line.contains(token))
}

pub fn is_job_finished(line: &str) -> bool {
    line.contains(JOB_FINISHED_PHRASE)
}

/// A command ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    text: String,
}

impl DeviceCommand {
    /// Build the run command for a job.
    ///
    /// Custom formulas always run as a single instance. Benchmark kinds use
    /// the job's configured range. Anything else cannot be run.
    pub fn for_job(job: &Job) -> Result<Self> {
        let text = match &job.dataset {
            DatasetKind::Custom => format!("TEST custom {} 1 1", job.name),
            kind if kind.is_benchmark() => {
                format!("TEST {} {} {} {}", kind, job.name, job.start, job.end)
            }
            other => return Err(SatlinkError::UnsupportedDataset(other.to_string())),
        };
        Ok(Self { text })
    }

    /// Command text without the terminator.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Bytes as written to the link, newline-terminated.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
