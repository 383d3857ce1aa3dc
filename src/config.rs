use std::net::SocketAddr;
use std::path::PathBuf;

/// Delays used by the simulated device between the parts of its script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorTiming {
    /// Delay before the "Problem 1 Complete" progress line
    pub progress_delay_ms: u64,
    /// Delay before the file-transfer block
    pub file_delay_ms: u64,
    /// Delay before the job-completion line
    pub finish_delay_ms: u64,
}

impl Default for SimulatorTiming {
    fn default() -> Self {
        Self {
            progress_delay_ms: 2000,
            file_delay_ms: 2000,
            finish_delay_ms: 0,
        }
    }
}

impl SimulatorTiming {
    /// All delays zero. Useful for tests that drive the simulator directly.
    pub fn immediate() -> Self {
        Self {
            progress_delay_ms: 0,
            file_delay_ms: 0,
            finish_delay_ms: 0,
        }
    }
}

/// Which byte-stream link the host talks to the device over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Scripted in-process device
    Simulated(SimulatorTiming),
    /// Device exposed through a TCP bridge (e.g. ser2net)
    Tcp { addr: SocketAddr },
    /// Character device opened directly. Line settings (baud etc.) are
    /// expected to be configured on the device node beforehand.
    Device { path: PathBuf },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Simulated(SimulatorTiming::default())
    }
}

impl std::fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Simulated(_) => write!(f, "simulated"),
            TransportConfig::Tcp { addr } => write!(f, "tcp://{}", addr),
            TransportConfig::Device { path } => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often the scheduler polls the queue
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

/// External post-processing program run after the device finishes a job.
///
/// When `program` is `None` post-processing is skipped and every job that
/// reaches PROCESSING is marked COMPLETED.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub program: Option<PathBuf>,
    /// Extra arguments placed before the per-job arguments
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl AnalysisConfig {
    pub fn is_enabled(&self) -> bool {
        self.program.is_some()
    }
}

/// Where job records and artifacts live. `None` keeps everything in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
}

impl HostConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.storage.data_dir = Some(dir);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.scheduler.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }
}
