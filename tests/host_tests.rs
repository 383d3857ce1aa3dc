//! End-to-end runs against the simulated device.

use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use satlink::config::{HostConfig, SimulatorTiming, TransportConfig};
use satlink::error::SatlinkError;
use satlink::host::Host;
use satlink::scheduler::{DatasetKind, JobRequest, JobStatus};
use satlink::store::{ArtifactStore, JobRepository};

// x1..x5 = 1,0,1,0,1 as played back by the simulator satisfies this.
const FORMULA: &str = "p cnf 5 2\n1 -2 3 0\n-1 4 5 0\n";

fn simulated() -> HostConfig {
    HostConfig::new(TransportConfig::Simulated(SimulatorTiming::default())).with_poll_interval(100)
}

#[tokio::test(start_paused = true)]
async fn test_simulated_custom_job_end_to_end() {
    let host = Host::open(simulated()).await.unwrap();
    let cancel = CancellationToken::new();
    let tasks = host.start(&cancel);

    let job = host
        .store
        .submit_formula("alice", "five", FORMULA)
        .await
        .unwrap();
    let mut events = host.broadcaster.subscribe(job.id);

    let finished = host
        .wait_for_terminal(&[job.id], Duration::from_millis(50))
        .await;
    assert_eq!(finished.len(), 1);
    let done = &finished[0];
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.completed_instances, 1);
    assert!(done.progress.iter().any(|l| l == "Problem 1 Complete"));
    assert!(!done.progress.iter().any(|l| l.starts_with("ECHO:")));

    let artifacts = host.store.artifacts();
    assert_eq!(
        artifacts
            .read_file(job.id, "data_out_uf50-01.csv")
            .await
            .unwrap(),
        Some(b"1,\n0,\n1,\n0,\n1,\n".to_vec())
    );

    let report = host.store.verify_job(job.id).await.unwrap();
    assert_eq!(report.total_runs, 1);
    assert_eq!(report.valid_solutions, 1);
    assert_eq!(report.solutions[0].variables, vec![true, false, true, false, true]);

    let mut saw_progress = false;
    while let Ok(event) = events.try_recv() {
        if let satlink::notify::JobEvent::Progress { job_id, .. } = event {
            assert_eq!(job_id, job.id);
            saw_progress = true;
        }
    }
    assert!(saw_progress);

    cancel.cancel();
    tasks.join().await;
    host.channel.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_simulated_queue_drains_in_order() {
    let host = Host::open(simulated()).await.unwrap();
    let cancel = CancellationToken::new();
    let tasks = host.start(&cancel);

    let mut ids = Vec::new();
    for name in ["one", "two", "three"] {
        let job = host
            .store
            .submit(JobRequest::benchmark(
                "bob",
                name,
                DatasetKind::Uf20_91,
                1,
                1,
            ))
            .await
            .unwrap();
        ids.push(job.id);
    }
    let unsupported = host
        .store
        .submit(JobRequest::benchmark(
            "bob",
            "huge",
            DatasetKind::from("uf250-1065"),
            1,
            1,
        ))
        .await
        .unwrap();
    ids.push(unsupported.id);

    let finished = host.wait_for_terminal(&ids, Duration::from_millis(50)).await;
    let statuses: Vec<_> = finished.iter().map(|j| j.status).collect();
    assert_eq!(
        statuses,
        vec![
            JobStatus::Completed,
            JobStatus::Completed,
            JobStatus::Completed,
            JobStatus::Error,
        ]
    );
    assert!(finished[3].progress.is_empty());

    // Strict FIFO: each job finished before the next one was picked up.
    let completed: Vec<_> = finished[..3].iter().map(|j| j.completed_at.unwrap()).collect();
    assert!(completed.windows(2).all(|w| w[0] <= w[1]));

    cancel.cancel();
    tasks.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_jobs_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = simulated().with_data_dir(dir.path().to_path_buf());

    let job_id = {
        let host = Host::open(config.clone()).await.unwrap();
        let cancel = CancellationToken::new();
        let tasks = host.start(&cancel);

        let job = host
            .store
            .submit_formula("alice", "persisted", FORMULA)
            .await
            .unwrap();
        host.wait_for_terminal(&[job.id], Duration::from_millis(50))
            .await;
        cancel.cancel();
        tasks.join().await;
        host.channel.close().await;
        job.id
    };
    // Queued but never started before the next restart.
    let leftover = {
        let host = Host::open(config.clone()).await.unwrap();
        let job = host
            .store
            .submit(JobRequest::custom("alice", "leftover"))
            .await
            .unwrap();
        job.id
    };

    let host = Host::open(config).await.unwrap();
    let restored = host.store.get(job_id).await.unwrap();
    assert_eq!(restored.status, JobStatus::Completed);
    assert!(host
        .store
        .artifacts()
        .read_file(job_id, "data_out_uf50-01.csv")
        .await
        .unwrap()
        .is_some());

    assert_eq!(host.store.queue_len().await, 1);
    assert_eq!(host.store.pop_queued().await.unwrap().id, leftover);
    assert_eq!(
        host.store.repository().load_all().await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_unreachable_link_is_fatal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = HostConfig::new(TransportConfig::Tcp { addr });
    assert!(matches!(
        Host::open(config).await,
        Err(SatlinkError::Connection(_))
    ));
}

#[tokio::test]
async fn test_tcp_bridge() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Minimal device behind a TCP bridge: finishes every command at once.
    let device = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(command)) = lines.next_line().await {
            let reply = format!("ECHO: {}\r\nProblem 1 Complete\r\nCOMPLETE: Test done\r\n", command);
            write_half.write_all(reply.as_bytes()).await.unwrap();
        }
    });

    let host = Host::open(HostConfig::new(TransportConfig::Tcp { addr }).with_poll_interval(10))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let tasks = host.start(&cancel);

    let job = host
        .store
        .submit(JobRequest::custom("alice", "remote"))
        .await
        .unwrap();
    let finished = tokio::time::timeout(
        Duration::from_secs(5),
        host.wait_for_terminal(&[job.id], Duration::from_millis(10)),
    )
    .await
    .unwrap();
    assert_eq!(finished[0].status, JobStatus::Completed);
    assert_eq!(
        finished[0].progress,
        vec!["Problem 1 Complete", "COMPLETE: Test done"]
    );

    cancel.cancel();
    tasks.join().await;
    host.channel.close().await;
    device.await.unwrap();
}
