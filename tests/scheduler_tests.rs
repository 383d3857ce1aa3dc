
use std::sync::Arc;
use std::time::Duration;

use satlink::config::SchedulerConfig;
use satlink::notify::{Broadcaster, JobEvent};
use satlink::scheduler::{DatasetKind, JobRequest, JobStatus, Scheduler, TickOutcome};
use satlink::store::{JobStore, MemoryArtifacts, MemoryRepository};
use test_harness::device_link;

const WAIT: Duration = Duration::from_secs(2);

fn store_with(broadcaster: Arc<Broadcaster>) -> Arc<JobStore> {
    Arc::new(JobStore::new(
        Arc::new(MemoryRepository::new()),
        Arc::new(MemoryArtifacts::new()),
        broadcaster,
    ))
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order_one_at_a_time() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, mut device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel, &SchedulerConfig::default());

    let a = store.submit(JobRequest::custom("alice", "A")).await.unwrap();
    let b = store.submit(JobRequest::custom("alice", "B")).await.unwrap();
    let c = store.submit(JobRequest::custom("alice", "C")).await.unwrap();

    for (job, name) in [(&a, "A"), (&b, "B"), (&c, "C")] {
        assert_eq!(scheduler.tick().await, TickOutcome::Started(job.id));
        assert_eq!(
            device.next_command(WAIT).await.as_deref(),
            Some(format!("TEST custom {} 1 1", name).as_str())
        );

        // Device is held until the running job reports completion.
        assert_eq!(scheduler.tick().await, TickOutcome::Busy(job.id));
        let running: Vec<_> = running_jobs(&store, &[a.id, b.id, c.id]).await;
        assert_eq!(running, vec![job.id]);

        store
            .record_progress(job.id, "COMPLETE: Test finished")
            .await
            .expect("finish line should end the job");
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Processing);
    }

    assert_eq!(scheduler.tick().await, TickOutcome::Idle);
}

async fn running_jobs(store: &JobStore, ids: &[uuid::Uuid]) -> Vec<uuid::Uuid> {
    let mut running = Vec::new();
    for id in ids {
        if store.get(*id).await.unwrap().status == JobStatus::Running {
            running.push(*id);
        }
    }
    running
}

#[tokio::test]
async fn test_unsupported_dataset_goes_straight_to_error() {
    let broadcaster = Arc::new(Broadcaster::new());
    let store = store_with(broadcaster.clone());
    let (channel, mut device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel, &SchedulerConfig::default());

    let bad = store
        .submit(JobRequest::benchmark(
            "alice",
            "big",
            DatasetKind::from("uf250-1065"),
            1,
            4,
        ))
        .await
        .unwrap();
    let good = store.submit(JobRequest::custom("alice", "ok")).await.unwrap();
    let mut events = broadcaster.subscribe(bad.id);

    assert_eq!(scheduler.tick().await, TickOutcome::Rejected(bad.id));
    assert_eq!(store.get(bad.id).await.unwrap().status, JobStatus::Error);
    assert_eq!(store.current_job().await, None);

    // Next tick carries on with the queue.
    assert_eq!(scheduler.tick().await, TickOutcome::Started(good.id));
    assert_eq!(
        device.next_command(WAIT).await.as_deref(),
        Some("TEST custom ok 1 1")
    );

    while let Ok(event) = events.try_recv() {
        if let JobEvent::Status(job) = event {
            if job.id == bad.id {
                assert_ne!(job.status, JobStatus::Running);
            }
        }
    }
}

#[tokio::test]
async fn test_benchmark_command_carries_range() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, mut device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel, &SchedulerConfig::default());

    let job = store
        .submit(JobRequest::benchmark(
            "bob",
            "sweep",
            DatasetKind::Uf20_91,
            5,
            12,
        ))
        .await
        .unwrap();

    assert_eq!(scheduler.tick().await, TickOutcome::Started(job.id));
    assert_eq!(
        device.next_command(WAIT).await.as_deref(),
        Some("TEST uf20-91 sweep 5 12")
    );
}

#[tokio::test]
async fn test_write_failure_marks_job_error_and_frees_device() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel, &SchedulerConfig::default());

    let first = store.submit(JobRequest::custom("alice", "one")).await.unwrap();
    let second = store.submit(JobRequest::custom("alice", "two")).await.unwrap();

    // Device vanishes without the reader noticing.
    drop(device);

    assert_eq!(scheduler.tick().await, TickOutcome::SendFailed(first.id));
    assert_eq!(store.get(first.id).await.unwrap().status, JobStatus::Error);
    assert_eq!(store.current_job().await, None);

    assert_eq!(scheduler.tick().await, TickOutcome::SendFailed(second.id));
    assert_eq!(store.get(second.id).await.unwrap().status, JobStatus::Error);
}

#[tokio::test]
async fn test_offline_link_leaves_queue_untouched() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, _device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel.clone(), &SchedulerConfig::default());

    let job = store.submit(JobRequest::custom("alice", "wait")).await.unwrap();
    channel.close().await;

    assert_eq!(scheduler.tick().await, TickOutcome::Offline);
    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Queued);
    assert_eq!(store.queue_len().await, 1);
}

#[tokio::test]
async fn test_removed_job_is_skipped() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, mut device) = device_link();
    let scheduler = Scheduler::new(store.clone(), channel, &SchedulerConfig::default());

    let gone = store.submit(JobRequest::custom("alice", "gone")).await.unwrap();
    let kept = store.submit(JobRequest::custom("alice", "kept")).await.unwrap();
    store.remove(gone.id, "alice").await.unwrap();

    assert_eq!(scheduler.tick().await, TickOutcome::Started(kept.id));
    assert_eq!(
        device.next_command(WAIT).await.as_deref(),
        Some("TEST custom kept 1 1")
    );
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let store = Arc::new(JobStore::in_memory());
    let (channel, mut device) = device_link();
    let scheduler = Scheduler::new(
        store.clone(),
        channel,
        &SchedulerConfig {
            poll_interval_ms: 10,
        },
    );
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(scheduler.run(cancel.clone()));

    let job = store.submit(JobRequest::custom("alice", "loop")).await.unwrap();
    assert_eq!(
        device.next_command(WAIT).await.as_deref(),
        Some("TEST custom loop 1 1")
    );
    assert_eq!(store.current_job().await, Some(job.id));

    cancel.cancel();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("scheduler should stop")
        .unwrap();
}
