//! Job store state machine tests through the public API.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{JobSpecBuilder, TestHarness};
use mediaflow::worker::JobErrorInfo;
use mediaflow::{JobError, JobEvent, JobEventKind, JobSpec, JobStatus, JobStore, TransitionContext};

const HAPPY_PATH: [JobStatus; 5] = [
    JobStatus::Downloading,
    JobStatus::Extracting,
    JobStatus::Transcribing,
    JobStatus::Packing,
    JobStatus::Completed,
];

fn advance_all(store: &JobStore, id: &str, path: &[JobStatus]) {
    for status in path {
        store
            .advance_stage(id, *status, TransitionContext::default())
            .unwrap_or_else(|e| panic!("{} should be reachable: {}", status, e));
    }
}

#[test]
fn test_add_then_skip_to_completed_is_rejected() {
    let harness = TestHarness::new();
    let job = harness
        .store
        .add(JobSpec::new("u", "/tmp/x"))
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let err = harness
        .store
        .advance_stage(&job.id, JobStatus::Completed, TransitionContext::default())
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Completed,
            ..
        }
    ));
    assert_eq!(harness.store.get(&job.id).unwrap().status, JobStatus::Pending);
}

#[test]
fn test_happy_path_emits_ordered_stage_changes() {
    let harness = TestHarness::new();
    let job = harness
        .store
        .add(JobSpecBuilder::new(harness.job_dir("b")).build())
        .unwrap();

    advance_all(&harness.store, &job.id, &HAPPY_PATH);

    let transitions = harness.wait_for_status(&job.id, JobStatus::Completed);
    assert_eq!(
        transitions,
        vec![
            (JobStatus::Pending, JobStatus::Downloading),
            (JobStatus::Downloading, JobStatus::Extracting),
            (JobStatus::Extracting, JobStatus::Transcribing),
            (JobStatus::Transcribing, JobStatus::Packing),
            (JobStatus::Packing, JobStatus::Completed),
        ]
    );
    assert_eq!(
        harness.events_for(&job.id)[0].kind(),
        JobEventKind::Created
    );
}

#[test]
fn test_double_fail_is_rejected() {
    let harness = TestHarness::new();
    let job = harness.store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    advance_all(&harness.store, &job.id, &[JobStatus::Downloading]);

    assert!(harness
        .store
        .fail(&job.id, JobErrorInfo::new("X", "first"))
        .unwrap());
    let failed = harness.store.get(&job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.unwrap().code, "X");

    let err = harness
        .store
        .fail(&job.id, JobErrorInfo::new("X", "second"))
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidTransition { .. }));
}

#[test]
fn test_retry_clears_error_and_allows_full_run() {
    let harness = TestHarness::new();
    let job = harness.store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    advance_all(&harness.store, &job.id, &[JobStatus::Downloading]);
    harness
        .store
        .fail(&job.id, JobErrorInfo::new("X", "boom"))
        .unwrap();

    harness
        .store
        .advance_stage(&job.id, JobStatus::Pending, TransitionContext::default())
        .unwrap();
    assert!(harness.store.get(&job.id).unwrap().error.is_none());

    advance_all(&harness.store, &job.id, &HAPPY_PATH);
    assert_eq!(
        harness.store.get(&job.id).unwrap().status,
        JobStatus::Completed
    );
}

#[test]
fn test_failed_only_allows_pending() {
    let store = JobStore::new(8);
    let job = store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    store.fail(&job.id, JobErrorInfo::new("X", "boom")).unwrap();

    for status in JobStatus::ALL {
        if status == JobStatus::Pending {
            continue;
        }
        assert!(
            store
                .advance_stage(&job.id, status, TransitionContext::default())
                .is_err(),
            "FAILED -> {} should be rejected",
            status
        );
    }
    assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Failed);
}

#[test]
fn test_interleaved_jobs_keep_per_job_order() {
    let harness = TestHarness::new();
    let store = Arc::clone(&harness.store);
    let a = store.add(JobSpec::new("a", "/tmp/a")).unwrap();
    let b = store.add(JobSpec::new("b", "/tmp/b")).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [a.id.clone(), b.id.clone()]
        .into_iter()
        .map(|id| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for status in HAPPY_PATH {
                    store
                        .update_progress(&id, 50.0, 100.0, "working")
                        .unwrap();
                    store
                        .advance_stage(&id, status, TransitionContext::default())
                        .unwrap();
                    thread::yield_now();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in [&a.id, &b.id] {
        let transitions = harness.wait_for_status(id, JobStatus::Completed);
        let expected: Vec<_> = std::iter::once(JobStatus::Pending)
            .chain(HAPPY_PATH)
            .collect::<Vec<_>>()
            .windows(2)
            .map(|w| (w[0], w[1]))
            .collect();
        assert_eq!(transitions, expected);
    }
}

#[test]
fn test_panicking_listener_does_not_affect_store_or_others() {
    let harness = TestHarness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    harness
        .store
        .subscribe(move |_: &JobEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("listener bug");
        })
        .unwrap();

    let job = harness.store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    advance_all(&harness.store, &job.id, &[JobStatus::Downloading]);
    harness.store.cancel(&job.id, Some("stop")).unwrap();

    let transitions = harness.wait_for_status(&job.id, JobStatus::Cancelled);
    assert_eq!(transitions.len(), 2);
    assert_eq!(
        harness.store.get(&job.id).unwrap().status,
        JobStatus::Cancelled
    );

    for _ in 0..200 {
        if calls.load(Ordering::SeqCst) == 3 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_concurrent_fail_only_one_succeeds() {
    let store = Arc::new(JobStore::new(8));
    let job = store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    store
        .advance_stage(&job.id, JobStatus::Downloading, TransitionContext::default())
        .unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let id = job.id.clone();
            thread::spawn(move || {
                barrier.wait();
                store
                    .fail(&id, JobErrorInfo::new(format!("E{}", i), "race"))
                    .is_ok()
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_event_stream_sees_lifecycle() {
    let store = JobStore::new(16);
    let mut events = store.events();

    let job = store.add(JobSpec::new("u", "/tmp/x")).unwrap();
    store
        .advance_stage(&job.id, JobStatus::Downloading, TransitionContext::default())
        .unwrap();
    store.update_progress(&job.id, 30.0, 100.0, "30%").unwrap();
    store.cancel(&job.id, None).unwrap();
    store.remove(&job.id).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..5 {
        kinds.push(events.recv().await.unwrap().kind());
    }
    assert_eq!(
        kinds,
        vec![
            JobEventKind::Created,
            JobEventKind::StageChanged,
            JobEventKind::ProgressUpdated,
            JobEventKind::StageChanged,
            JobEventKind::Removed,
        ]
    );
}
