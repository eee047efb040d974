//! Worker loop behavior driven through fake resolvers and fetchers.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeFetcher, FakeResolver, FetchBehavior, Harness, fast_config, job, registry_of};
use media_queue::domain::TaskState;
use media_queue::worker::{IterationOutcome, WorkerConfig};

#[tokio::test]
async fn test_first_success_wins_after_resolution_failures() {
    let resolvers = [FakeResolver::failing(), FakeResolver::failing(), FakeResolver::ok()];
    let fetcher = FakeFetcher::new(FetchBehavior::Succeed);
    let harness = Harness::new(registry_of(&resolvers), fetcher.clone(), fast_config());

    harness.orchestrator.enqueue("abc-100").await.unwrap();
    let outcome = harness.orchestrator.run_iteration().await.unwrap();

    assert!(matches!(outcome, IterationOutcome::Cooldown(_)));
    assert!(resolvers.iter().all(|r| r.calls() == 1));
    assert_eq!(fetcher.backends(), vec!["backend-2"]);

    let status = harness.status.status(&job("abc-100")).unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert!(harness.queued().await.is_empty());
}

#[tokio::test]
async fn test_success_removes_job_and_schedules_cooldown_in_bounds() {
    let config = WorkerConfig {
        cooldown_min: Duration::from_millis(300),
        cooldown_max: Duration::from_millis(900),
        ..fast_config()
    };
    let harness = Harness::new(
        registry_of(&[FakeResolver::ok()]),
        FakeFetcher::new(FetchBehavior::Succeed),
        config,
    );
    harness.orchestrator.enqueue("ok-1").await.unwrap();
    harness.orchestrator.enqueue("ok-2").await.unwrap();

    let outcome = harness.orchestrator.run_iteration().await.unwrap();
    match outcome {
        IterationOutcome::Cooldown(pause) => {
            assert!(pause >= Duration::from_millis(300));
            assert!(pause <= Duration::from_millis(900));
        }
        other => panic!("expected cooldown, got {other:?}"),
    }

    assert_eq!(harness.queued().await, vec!["OK-2"]);
    let snapshot = harness.orchestrator.status().await.unwrap();
    assert_eq!(snapshot.completed.len(), 1);
    assert_eq!(snapshot.completed[0].id, job("ok-1"));
    assert!(snapshot.current_task.is_none());
}

#[tokio::test]
async fn test_next_job_starts_only_after_cooldown() {
    let config = WorkerConfig {
        cooldown_min: Duration::from_millis(200),
        cooldown_max: Duration::from_millis(300),
        ..fast_config()
    };
    let fetcher = FakeFetcher::new(FetchBehavior::Succeed);
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), config);
    harness.orchestrator.enqueue("first").await.unwrap();
    harness.orchestrator.enqueue("second").await.unwrap();

    let worker = harness.orchestrator.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher.count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both jobs should run");
    harness.orchestrator.shutdown();
    worker.await.unwrap();

    let requests = fetcher.requests.lock();
    let first_done = requests[0].2;
    let second_started = requests[1].1;
    assert!(second_started.duration_since(first_done) >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_failure_drops_job_without_cooldown() {
    let fetcher = FakeFetcher::new(FetchBehavior::Fail);
    let harness = Harness::new(
        registry_of(&[FakeResolver::ok(), FakeResolver::ok()]),
        fetcher.clone(),
        fast_config(),
    );
    harness.orchestrator.enqueue("bad-1").await.unwrap();

    let outcome = harness.orchestrator.run_iteration().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Continue);
    assert_eq!(fetcher.backends(), vec!["backend-0", "backend-1"]);
    assert!(harness.queued().await.is_empty());

    let snapshot = harness.orchestrator.status().await.unwrap();
    assert_eq!(snapshot.failed.len(), 1);
    let failed = &snapshot.failed[0];
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.message.contains("backend-0"));
    assert!(failed.message.contains("backend-1"));
}

#[tokio::test]
async fn test_stop_keeps_job_queued_and_skips_cooldown() {
    let fetcher = FakeFetcher::new(FetchBehavior::BlockUntilCancelled);
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), fast_config());
    harness.orchestrator.enqueue("stop-me").await.unwrap();

    let iteration = {
        let orchestrator = harness.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_iteration().await })
    };

    fetcher.started.notified().await;
    assert_eq!(
        harness.status.status(&job("stop-me")).unwrap().state,
        TaskState::Downloading
    );
    assert!(harness.orchestrator.request_stop());

    let outcome = tokio::time::timeout(Duration::from_secs(5), iteration)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, IterationOutcome::Continue);

    assert_eq!(harness.queued().await, vec!["STOP-ME"]);
    let status = harness.status.status(&job("stop-me")).unwrap();
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.message, "Task stopped");

    let snapshot = harness.orchestrator.status().await.unwrap();
    assert_eq!(snapshot.failed.len(), 1);
    assert!(snapshot.current_task.is_none());
}

#[tokio::test]
async fn test_stopped_job_is_reclaimed_next_iteration() {
    let fetcher = FakeFetcher::new(FetchBehavior::BlockUntilCancelled);
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), fast_config());
    harness.orchestrator.enqueue("again").await.unwrap();

    for round in 1..=2 {
        let iteration = {
            let orchestrator = harness.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_iteration().await })
        };
        fetcher.started.notified().await;
        harness.orchestrator.request_stop();
        iteration.await.unwrap().unwrap();
        assert_eq!(fetcher.count(), round);
    }

    assert_eq!(harness.queued().await, vec!["AGAIN"]);
}

#[tokio::test]
async fn test_at_most_one_job_downloading() {
    let fetcher = FakeFetcher::with_delay(FetchBehavior::Succeed, Duration::from_millis(30));
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), fast_config());
    for id in ["m-1", "m-2", "m-3", "m-4"] {
        harness.orchestrator.enqueue(id).await.unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let status = harness.status.clone();
        let done = done.clone();
        let max_seen = max_seen.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                max_seen.fetch_max(status.downloading_count(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let worker = harness.orchestrator.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher.count() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all jobs should run");

    harness.orchestrator.shutdown();
    worker.await.unwrap();
    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(harness.queued().await.is_empty());
    assert_eq!(harness.orchestrator.status().await.unwrap().completed.len(), 4);
}

#[tokio::test]
async fn test_enqueue_wakes_idle_worker() {
    let config = WorkerConfig {
        poll_interval: Duration::from_secs(30),
        ..fast_config()
    };
    let fetcher = FakeFetcher::new(FetchBehavior::Succeed);
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), config);

    let worker = harness.orchestrator.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.orchestrator.enqueue("late").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), fetcher.started.notified())
        .await
        .expect("enqueue should wake the worker before the poll interval");

    harness.orchestrator.shutdown();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_worker_survives_unreadable_queue() {
    let fetcher = FakeFetcher::new(FetchBehavior::Succeed);
    let harness = Harness::new(registry_of(&[FakeResolver::ok()]), fetcher.clone(), fast_config());

    // A directory where the queue file should be makes every read fail.
    let queue_path = harness.dir.path().join("queue.txt");
    std::fs::create_dir(&queue_path).unwrap();

    let worker = harness.orchestrator.start();
    for _ in 0..4 {
        tokio::time::sleep(fast_config().error_backoff).await;
        assert!(harness.status.current().is_none());
    }
    assert!(!worker.is_finished());
    assert_eq!(fetcher.count(), 0);

    std::fs::remove_dir(&queue_path).unwrap();
    harness.orchestrator.enqueue("recovered").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), fetcher.started.notified())
        .await
        .expect("worker should claim the job once the queue is readable");

    harness.orchestrator.shutdown();
    worker.await.unwrap();
}
