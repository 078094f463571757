use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

use studybell_scheduler::{Cadence, JobKind, JobRegistry, JobState, SchedulerError, TaskFn, task};

fn counting(counter: &Arc<AtomicU64>) -> TaskFn {
    let counter = counter.clone();
    task(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn every_second() -> Cadence {
    Cadence::Every(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn test_recurring_job_fires_on_cadence() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));
    registry.register("tick", every_second(), counting(&runs)).unwrap();

    assert_eq!(registry.job_status("tick").unwrap().state, JobState::Created);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0, "created jobs do not fire");

    registry.start("tick").unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert!(runs.load(Ordering::SeqCst) >= 2);
    let status = registry.job_status("tick").unwrap();
    assert!(status.running);
    assert_eq!(status.kind, JobKind::Recurring);
    assert_eq!(status.cadence, "every 1s");
    assert!(status.last_run_at.is_some());
    assert!(status.next_run_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failing_job_keeps_firing() {
    let registry = JobRegistry::new();
    let attempts = Arc::new(AtomicU64::new(0));
    let counter = attempts.clone();
    registry
        .register(
            "flaky",
            every_second(),
            task(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("store unreachable")
                }
            }),
        )
        .unwrap();

    registry.start("flaky").unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let status = registry.job_status("flaky").unwrap();
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert_eq!(status.failure_count, status.run_count);
    assert_eq!(status.last_error.as_deref(), Some("store unreachable"));
    assert!(status.running);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_job_is_contained() {
    let registry = JobRegistry::new();
    let healthy = Arc::new(AtomicU64::new(0));
    registry
        .register(
            "panics",
            every_second(),
            task(|| async {
                if Utc::now().timestamp() > 0 {
                    panic!("boom");
                }
                Ok(())
            }),
        )
        .unwrap();
    registry.register("healthy", every_second(), counting(&healthy)).unwrap();

    registry.start_all();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let status = registry.job_status("panics").unwrap();
    assert!(status.failure_count >= 2);
    assert_eq!(status.last_error.as_deref(), Some("task panicked"));
    assert!(healthy.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_future_firings() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));
    registry.register("tick", every_second(), counting(&runs)).unwrap();
    registry.start("tick").unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    registry.stop("tick").unwrap();
    let after_stop = runs.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_stop);

    let status = registry.job_status("tick").unwrap();
    assert_eq!(status.state, JobState::Stopped);
    assert!(status.next_run_at.is_none());

    // Restarting re-arms the timer.
    registry.start("tick").unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(runs.load(Ordering::SeqCst) > after_stop);
}

#[tokio::test(start_paused = true)]
async fn test_stop_does_not_interrupt_in_flight_run() {
    let registry = JobRegistry::new();
    let finished = Arc::new(AtomicU64::new(0));
    let counter = finished.clone();
    registry
        .register(
            "slow",
            every_second(),
            task(move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();
    registry.start("slow").unwrap();

    // Stop while the first execution is sleeping.
    tokio::time::sleep(Duration::from_secs(2)).await;
    registry.stop("slow").unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(registry.job_status("slow").unwrap().run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_time_job_fires_once_and_removes_itself() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));
    registry
        .schedule_once("later", Utc::now() + chrono::Duration::hours(1), counting(&runs))
        .unwrap();

    let status = registry.job_status("later").unwrap();
    assert_eq!(status.kind, JobKind::OneTime);
    assert!(status.running);

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(matches!(
        registry.job_status("later"),
        Err(SchedulerError::UnknownJob(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_bulk_job_still_removes_itself() {
    let registry = JobRegistry::new();
    registry
        .schedule_bulk("broadcast", task(|| async { anyhow::bail!("relay down") }))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(registry.status().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_now_bypasses_cadence() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));
    registry
        .register("weekly", Cadence::weekly(chrono::Weekday::Sun, 3, 0).unwrap(), counting(&runs))
        .unwrap();

    let report = registry.run_now("weekly").await.unwrap();
    assert!(report.succeeded);
    assert_eq!(report.job, "weekly");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // The job was never started, and running it does not start it.
    let status = registry.job_status("weekly").unwrap();
    assert_eq!(status.state, JobState::Created);
    assert_eq!(status.run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_now_reports_failure() {
    let registry = JobRegistry::new();
    registry
        .register("broken", every_second(), task(|| async { anyhow::bail!("bad row") }))
        .unwrap();

    let report = registry.run_now("broken").await.unwrap();
    assert!(!report.succeeded);
    assert_eq!(report.error.as_deref(), Some("bad row"));
}

#[tokio::test]
async fn test_unknown_and_duplicate_jobs() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));

    assert!(matches!(registry.start("missing"), Err(SchedulerError::UnknownJob(_))));
    assert!(matches!(registry.stop("missing"), Err(SchedulerError::UnknownJob(_))));
    assert!(matches!(registry.remove("missing"), Err(SchedulerError::UnknownJob(_))));
    assert!(matches!(
        registry.run_now("missing").await,
        Err(SchedulerError::UnknownJob(_))
    ));

    registry.register("tick", every_second(), counting(&runs)).unwrap();
    assert!(matches!(
        registry.register("tick", every_second(), counting(&runs)),
        Err(SchedulerError::DuplicateJob(_))
    ));
    assert!(matches!(
        registry.register("fast", Cadence::Every(Duration::from_millis(10)), counting(&runs)),
        Err(SchedulerError::InvalidCadence(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_counts_and_remove() {
    let registry = JobRegistry::new();
    let runs = Arc::new(AtomicU64::new(0));
    registry.register("a", every_second(), counting(&runs)).unwrap();
    registry.register("b", every_second(), counting(&runs)).unwrap();
    registry.register("c", every_second(), counting(&runs)).unwrap();

    registry.start("a").unwrap();
    registry.start("b").unwrap();
    let counts = registry.counts();
    assert_eq!((counts.running, counts.stopped), (2, 1));

    registry.remove("a").unwrap();
    let names: Vec<String> = registry.status().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["b", "c"]);

    registry.shutdown();
    let counts = registry.counts();
    assert_eq!((counts.running, counts.stopped), (0, 2));
}
