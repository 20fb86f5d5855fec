//! Integration tests for the bounded task queue.
//!
//! These tests validate:
//! - Jobs run concurrently up to the worker count, never beyond
//! - `submit` blocks while every slot is busy
//! - In-flight accounting returns to zero, including after panics
//! - Shutdown lets running jobs finish
//! - Async draining under tokio

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use errata_queue::config::QueueConfig;
use errata_queue::core::{QueueJob, SchedulerError, SlotLease, TaskQueue};

// ============================================================================
// HELPERS
// ============================================================================

/// Runs a boxed closure as a queue job.
struct FnJob(Box<dyn FnOnce(&SlotLease) + Send>);

impl QueueJob for FnJob {
    fn run(self, slot: &SlotLease) {
        (self.0)(slot);
    }
}

fn job(f: impl FnOnce(&SlotLease) + Send + 'static) -> FnJob {
    FnJob(Box::new(f))
}

fn config(workers: usize) -> QueueConfig {
    QueueConfig::new()
        .with_worker_count(workers)
        .with_thread_name_prefix("tq-it")
}

/// Tracks the current and peak number of running jobs.
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn blocking_job(gate: Receiver<()>) -> FnJob {
    job(move |slot: &SlotLease| {
        slot.starting();
        let _ = gate.recv_timeout(Duration::from_secs(5));
    })
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_two_jobs_run_concurrently_on_two_workers() {
    let queue = TaskQueue::new(&config(2)).unwrap();
    let concurrency = Arc::new(Concurrency::default());

    for _ in 0..2 {
        let concurrency = Arc::clone(&concurrency);
        queue
            .submit(job(move |slot: &SlotLease| {
                slot.starting();
                concurrency.enter();
                // Hold the slot until the other job is running too (bounded).
                wait_for(Duration::from_secs(2), || concurrency.peak.load(Ordering::SeqCst) >= 2);
                concurrency.exit();
            }))
            .unwrap();
    }
    queue.drain();

    assert_eq!(concurrency.peak.load(Ordering::SeqCst), 2);
    queue.shutdown();
}

#[test]
fn test_running_jobs_never_exceed_worker_count() {
    let queue = TaskQueue::new(&config(3)).unwrap();
    let concurrency = Arc::new(Concurrency::default());
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let concurrency = Arc::clone(&concurrency);
        let done = Arc::clone(&done);
        queue
            .submit(job(move |slot: &SlotLease| {
                slot.starting();
                concurrency.enter();
                thread::sleep(Duration::from_millis(5));
                concurrency.exit();
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(queue.stats().busy_slots <= 3);
    }
    queue.drain();

    assert_eq!(done.load(Ordering::SeqCst), 20);
    assert!(concurrency.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(queue.stats().submitted, 20);
    assert_eq!(queue.stats().completed, 20);
    queue.shutdown();
}

// ============================================================================
// BACKPRESSURE
// ============================================================================

#[test]
fn test_submit_blocks_until_a_slot_is_free() {
    let queue = Arc::new(TaskQueue::new(&config(1)).unwrap());
    let (release_tx, release_rx) = bounded::<()>(1);

    queue.submit(blocking_job(release_rx)).unwrap();
    assert!(wait_for(Duration::from_secs(2), || queue.in_flight() == 1));

    let second_ran = Arc::new(AtomicBool::new(false));
    let submitter = {
        let queue = Arc::clone(&queue);
        let second_ran = Arc::clone(&second_ran);
        thread::spawn(move || {
            queue.submit(job(move |slot: &SlotLease| {
                slot.starting();
                second_ran.store(true, Ordering::SeqCst);
            }))
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!submitter.is_finished(), "submit returned while the only slot was busy");

    release_tx.send(()).unwrap();
    submitter.join().unwrap().unwrap();
    queue.drain();

    assert!(second_ran.load(Ordering::SeqCst));
    queue.shutdown();
}

#[test]
fn test_shutdown_unblocks_waiting_submitter() {
    let queue = Arc::new(TaskQueue::new(&config(1)).unwrap());
    let (release_tx, release_rx) = bounded::<()>(1);
    queue.submit(blocking_job(release_rx)).unwrap();

    let submitter = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.submit(job(|slot: &SlotLease| slot.starting())))
    };
    thread::sleep(Duration::from_millis(20));

    // Let the running job finish once shutdown has started joining.
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = release_tx.send(());
    });
    queue.shutdown();
    releaser.join().unwrap();

    // The blocked submit either got the freed slot before close or was refused.
    match submitter.join().unwrap() {
        Ok(()) | Err(SchedulerError::PoolShutdown) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert!(queue.is_shut_down());
}

// ============================================================================
// ACCOUNTING
// ============================================================================

#[test]
fn test_in_flight_returns_to_zero_after_panics() {
    let queue = TaskQueue::new(&config(2)).unwrap();
    for i in 0..10 {
        queue
            .submit(job(move |slot: &SlotLease| {
                slot.starting();
                assert!(i % 3 != 0, "job {i} fails");
            }))
            .unwrap();
    }
    queue.drain();

    let stats = queue.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.busy_slots, 0);
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.panicked, 4);
    queue.shutdown();
}

#[test]
fn test_job_that_never_starts_still_frees_slot() {
    let queue = TaskQueue::new(&config(1)).unwrap();
    queue.submit(job(|_slot: &SlotLease| {})).unwrap();
    queue.submit(job(|_slot: &SlotLease| {})).unwrap();
    assert!(queue.drain_timeout(Duration::from_secs(2)));
    assert_eq!(queue.stats().busy_slots, 0);
    queue.shutdown();
}

#[test]
fn test_drain_timeout_reports_busy_queue() {
    let queue = TaskQueue::new(&config(1)).unwrap();
    let (release_tx, release_rx) = bounded::<()>(1);
    queue.submit(blocking_job(release_rx)).unwrap();

    assert!(!queue.drain_timeout(Duration::from_millis(20)));
    release_tx.send(()).unwrap();
    assert!(queue.drain_timeout(Duration::from_secs(2)));
    queue.shutdown();
}

#[test]
fn test_shutdown_waits_for_running_job() {
    let queue = TaskQueue::new(&config(1)).unwrap();
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = Arc::clone(&finished);
        queue
            .submit(job(move |slot: &SlotLease| {
                slot.starting();
                thread::sleep(Duration::from_millis(30));
                finished.store(true, Ordering::SeqCst);
            }))
            .unwrap();
    }
    queue.shutdown();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(queue.in_flight(), 0);
}

// ============================================================================
// ASYNC
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain_async_waits_for_jobs() {
    let queue = TaskQueue::new(&config(2)).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let count = Arc::clone(&count);
        queue
            .submit(job(move |slot: &SlotLease| {
                slot.starting();
                thread::sleep(Duration::from_millis(10));
                count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), queue.drain_async())
        .await
        .expect("drain timed out")
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 4);
    queue.shutdown();
}
