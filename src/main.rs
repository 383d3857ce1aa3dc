use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use satlink::cnf::{encode, Formula};
use satlink::config::{AnalysisConfig, HostConfig, SimulatorTiming, TransportConfig};
use satlink::host::Host;
use satlink::scheduler::{DatasetKind, Job, JobRequest, JobStatus};
use satlink::shutdown::install_shutdown_handler;
use satlink::verify::{self, VerificationReport};

#[derive(Parser, Debug)]
#[command(name = "satlink")]
#[command(version)]
#[command(about = "Host for a single SAT-solving accelerator device")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Drive the device: submit jobs, wait for them, report results
    Run(RunArgs),

    /// Encode a DIMACS file into the device's six data-info files
    Encode {
        /// DIMACS CNF input
        cnf: PathBuf,

        /// Directory to write data_info_*.csv into
        out_dir: PathBuf,
    },

    /// Check solution files against a formula without a device
    Verify {
        /// DIMACS CNF the solutions belong to
        cnf: PathBuf,

        /// Solution files (one value per line, optional trailing comma)
        #[arg(required = true)]
        solutions: Vec<PathBuf>,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Connect to a device bridge over TCP instead of the simulator
    #[arg(long, conflicts_with = "device")]
    tcp: Option<SocketAddr>,

    /// Device node to open (line settings must already be configured)
    #[arg(long)]
    device: Option<PathBuf>,

    /// Run the simulator without delays
    #[arg(long)]
    fast: bool,

    /// Persist jobs and artifacts here instead of in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Scheduler poll interval
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// External post-processing program
    #[arg(long)]
    analysis: Option<PathBuf>,

    /// Identity recorded as the owner of submitted jobs
    #[arg(long, default_value = "local")]
    owner: String,

    /// CNF files to run as custom jobs
    #[arg(long = "cnf")]
    cnf_files: Vec<PathBuf>,

    /// Benchmark ranges, format "kind:start-end" (e.g. "uf20-91:1-10")
    #[arg(long = "benchmark", value_parser = parse_benchmark)]
    benchmarks: Vec<BenchmarkArg>,

    /// Keep serving after submitted jobs finish, until SIGINT/SIGTERM
    #[arg(long)]
    serve: bool,

    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone)]
struct BenchmarkArg {
    kind: String,
    start: u32,
    end: u32,
}

fn parse_benchmark(s: &str) -> Result<BenchmarkArg, String> {
    let (kind, range) = s
        .split_once(':')
        .ok_or_else(|| format!("expected kind:start-end, got {:?}", s))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| format!("expected start-end, got {:?}", range))?;
    let start: u32 = start.parse().map_err(|e| format!("bad start: {}", e))?;
    let end: u32 = end.parse().map_err(|e| format!("bad end: {}", e))?;
    if kind.is_empty() || start == 0 || end < start {
        return Err(format!("invalid benchmark range {:?}", s));
    }
    Ok(BenchmarkArg {
        kind: kind.to_string(),
        start,
        end,
    })
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Structures
// =============================================================================

#[derive(Serialize)]
struct RunOutput {
    jobs: Vec<Job>,
    reports: Vec<VerificationReport>,
}

// =============================================================================
// Handlers
// =============================================================================

fn host_config(args: &RunArgs) -> HostConfig {
    let transport = match (&args.tcp, &args.device) {
        (Some(addr), _) => TransportConfig::Tcp { addr: *addr },
        (None, Some(path)) => TransportConfig::Device { path: path.clone() },
        (None, None) if args.fast => TransportConfig::Simulated(SimulatorTiming::immediate()),
        (None, None) => TransportConfig::Simulated(SimulatorTiming::default()),
    };

    let mut config = HostConfig::new(transport).with_poll_interval(args.poll_interval_ms);
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir.clone());
    }
    if let Some(program) = &args.analysis {
        config = config.with_analysis(AnalysisConfig {
            program: Some(program.clone()),
            ..Default::default()
        });
    }
    config
}

fn job_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "formula".to_string())
}

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::open(host_config(&args)).await?;
    let cancel = install_shutdown_handler();
    let tasks = host.start(&cancel);

    let mut submitted = Vec::new();
    for path in &args.cnf_files {
        let text = tokio::fs::read_to_string(path).await?;
        let job = host
            .store
            .submit_formula(args.owner.clone(), job_name(path), &text)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        submitted.push(job.id);
    }
    for bench in &args.benchmarks {
        let request = JobRequest::benchmark(
            args.owner.clone(),
            format!("{}-{}-{}", bench.kind, bench.start, bench.end),
            DatasetKind::from(bench.kind.as_str()),
            bench.start,
            bench.end,
        );
        submitted.push(host.store.submit(request).await?.id);
    }

    if !submitted.is_empty() {
        let jobs = tokio::select! {
            jobs = host.wait_for_terminal(&submitted, Duration::from_millis(200)) => jobs,
            _ = cancel.cancelled() => Vec::new(),
        };

        let mut reports = Vec::new();
        for job in jobs.iter().filter(|j| j.dataset == DatasetKind::Custom) {
            if job.status != JobStatus::Completed {
                continue;
            }
            match host.store.verify_job(job.id).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Verification failed"),
            }
        }
        print_run(&jobs, &reports, &args.output)?;
    }

    if args.serve {
        cancel.cancelled().await;
    } else {
        cancel.cancel();
    }
    tasks.join().await;
    host.channel.close().await;
    Ok(())
}

fn print_run(
    jobs: &[Job],
    reports: &[VerificationReport],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            let output = RunOutput {
                jobs: jobs.to_vec(),
                reports: reports.to_vec(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<38} {:<12} {:<10} {:<10} NAME",
                "JOB ID", "STATUS", "DATASET", "PROGRESS"
            );
            println!("{}", "-".repeat(84));
            for job in jobs {
                println!(
                    "{:<38} {:<12} {:<10} {:<10} {}",
                    job.id,
                    job.status,
                    job.dataset,
                    format!("{}/{}", job.completed_instances, job.instance_count()),
                    job.name
                );
            }
            for report in reports {
                println!();
                print_report_table(report);
            }
        }
    }
    Ok(())
}

fn print_report_table(report: &VerificationReport) {
    if let Some(job_id) = report.job_id {
        println!("Job ID:     {}", job_id);
    }
    println!("Variables:  {}", report.variable_count);
    println!("Clauses:    {}", report.clause_count);
    println!(
        "Valid:      {}/{}",
        report.valid_solutions, report.total_runs
    );
    for solution in &report.solutions {
        println!(
            "  {:<32} {}",
            solution.source,
            if solution.is_valid { "SAT" } else { "INVALID" }
        );
    }
}

async fn handle_encode(cnf: &Path, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(cnf).await?;
    let formula = Formula::parse(&text)?;
    let encoded = encode(&formula);

    tokio::fs::create_dir_all(out_dir).await?;
    for file in encoded.serialize() {
        let path = out_dir.join(file.file_name());
        tokio::fs::write(&path, file.to_text()).await?;
        println!("{}", path.display());
    }
    Ok(())
}

async fn handle_verify(
    cnf: &Path,
    solutions: &[PathBuf],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let formula = Formula::parse(&tokio::fs::read_to_string(cnf).await?)?;

    let mut files = Vec::with_capacity(solutions.len());
    for path in solutions {
        files.push((path.display().to_string(), tokio::fs::read(path).await?));
    }
    let report = verify::verify_all(&formula, None, files);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report_table(&report),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => handle_run(run_args).await?,
        Commands::Encode { cnf, out_dir } => handle_encode(&cnf, &out_dir).await?,
        Commands::Verify {
            cnf,
            solutions,
            output,
        } => handle_verify(&cnf, &solutions, &output).await?,
    }

    Ok(())
}
