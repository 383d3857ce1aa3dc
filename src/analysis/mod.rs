use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::AnalysisConfig;
use crate::error::{Result, SatlinkError};
use crate::scheduler::Job;

/// Work run after the device has finished a job.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn run(&self, job: &Job) -> Result<()>;
}

/// Always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPostProcessor;

#[async_trait]
impl PostProcessor for NoopPostProcessor {
    async fn run(&self, job: &Job) -> Result<()> {
        tracing::debug!(job_id = %job.id, "No post-processing configured");
        Ok(())
    }
}

/// Runs an external analysis program.
///
/// The program receives any configured arguments followed by the job's owner,
/// id, start, end and dataset kind. A non-zero exit is a failure; stderr is
/// carried in the error.
#[derive(Debug, Clone)]
pub struct CommandPostProcessor {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandPostProcessor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn job_args(job: &Job) -> [String; 5] {
        [
            job.owner.clone(),
            job.id.to_string(),
            job.start.to_string(),
            job.end.to_string(),
            job.dataset.to_string(),
        ]
    }

    fn process_output(job: &Job, result: std::io::Result<std::process::Output>) -> Result<()> {
        match result {
            Ok(output) if output.status.success() => {
                tracing::info!(job_id = %job.id, "Post-processing finished");
                Ok(())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let exit_code = output.status.code();
                tracing::warn!(job_id = %job.id, exit_code = ?exit_code, "Post-processing exited with failure");
                Err(SatlinkError::Analysis(if stderr.is_empty() {
                    format!("exit code: {:?}", exit_code)
                } else {
                    stderr
                }))
            }
            Err(e) => Err(SatlinkError::Analysis(format!("failed to spawn: {}", e))),
        }
    }
}

#[async_trait]
impl PostProcessor for CommandPostProcessor {
    async fn run(&self, job: &Job) -> Result<()> {
        tracing::info!(job_id = %job.id, program = %self.program.display(), "Starting post-processing");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(Self::job_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let result = command.output().await;
        Self::process_output(job, result)
    }
}

/// Build the post-processor described by `config`.
pub fn from_config(config: &AnalysisConfig) -> std::sync::Arc<dyn PostProcessor> {
    match &config.program {
        Some(program) => {
            let mut processor = CommandPostProcessor::new(program).with_args(config.args.clone());
            if let Some(dir) = &config.working_dir {
                processor = processor.with_working_dir(dir);
            }
            std::sync::Arc::new(processor)
        }
        None => std::sync::Arc::new(NoopPostProcessor),
    }
}
