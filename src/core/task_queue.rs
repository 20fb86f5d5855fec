//! Bounded task queue backed by dedicated worker threads.
//!
//! `TaskQueue` owns a fixed number of slots and one OS thread per slot.
//! `submit` blocks while every slot is busy, then hands the job to an idle
//! thread over a channel and returns immediately. Workers never hold a
//! reference to the queue: each job receives a [`SlotLease`] whose
//! `starting()` call marks the slot Running and whose drop frees it.
//!
//! # Example
//!
//! ```rust,ignore
//! use errata_queue::config::QueueConfig;
//! use errata_queue::core::{QueueJob, SlotLease, TaskQueue};
//!
//! struct Hello(u32);
//!
//! impl QueueJob for Hello {
//!     fn run(self, slot: &SlotLease) {
//!         slot.starting();
//!         println!("hello {}", self.0);
//!     }
//! }
//!
//! let queue = TaskQueue::new(&QueueConfig::new().with_worker_count(4))?;
//! for i in 0..10 {
//!     queue.submit(Hello(i))?;
//! }
//! queue.drain();
//! assert_eq!(queue.in_flight(), 0);
//! ```

mod slots;

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::core::error::SchedulerError;

use self::slots::SlotLedger;

/// A unit of work the task queue can run on one of its threads.
pub trait QueueJob: Send + 'static {
    /// Run to completion. Call `slot.starting()` when real work begins; the
    /// slot is released when this returns, even if it panics.
    fn run(self, slot: &SlotLease);
}

/// A worker's hold on one queue slot.
///
/// Created by the worker thread for each job; dropping it is the
/// `workerDone` signal.
pub struct SlotLease {
    ledger: Arc<SlotLedger>,
    worker_id: usize,
    started: Cell<bool>,
}

impl SlotLease {
    fn new(ledger: Arc<SlotLedger>, worker_id: usize) -> Self {
        Self {
            ledger,
            worker_id,
            started: Cell::new(false),
        }
    }

    /// Mark this slot Running. Repeated calls are ignored.
    pub fn starting(&self) {
        if !self.started.replace(true) {
            self.ledger.worker_starting();
        }
    }

    /// Index of the worker thread holding the slot.
    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.ledger.worker_done(self.started.get());
    }
}

/// Statistics about queue utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of slots (and worker threads).
    pub capacity: usize,
    /// Slots currently Assigned or Running.
    pub busy_slots: usize,
    /// Slots currently Running.
    pub in_flight: usize,
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Jobs whose slot has been released.
    pub completed: u64,
    /// Jobs that panicked (also counted in `completed`).
    pub panicked: u64,
}

/// Bounded concurrency controller with a fixed pool of worker threads.
pub struct TaskQueue<J: QueueJob> {
    name: String,
    ledger: Arc<SlotLedger>,
    /// Job sender. `None` once shut down.
    job_tx: Mutex<Option<Sender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: QueueJob> TaskQueue<J> {
    /// Create a queue with `config.worker_count` slots and threads.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is
    /// invalid, or `SchedulerError::WorkerSpawn` if a thread cannot start.
    pub fn new(config: &QueueConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let ledger = Arc::new(SlotLedger::new(config.worker_count));
        // Never holds more than `worker_count` jobs: every send is preceded
        // by a successful slot acquire.
        let (job_tx, job_rx) = unbounded::<J>();

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let spawned = spawn_worker(
                &config.thread_name_prefix,
                worker_id,
                job_rx.clone(),
                Arc::clone(&ledger),
                config.thread_stack_size,
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Dropping the sender lets the threads already started exit.
                    drop(job_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::WorkerSpawn(e.to_string()));
                }
            }
        }

        info!(
            queue = %config.thread_name_prefix,
            worker_count = config.worker_count,
            "TaskQueue initialized"
        );

        Ok(Self {
            name: config.thread_name_prefix.clone(),
            ledger,
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Hand `job` to an idle worker, blocking while every slot is busy.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::PoolShutdown` if the queue has been shut down
    /// (including while this call was blocked).
    pub fn submit(&self, job: J) -> Result<(), SchedulerError> {
        self.ledger.acquire()?;

        let sent = {
            let tx_guard = self.job_tx.lock();
            tx_guard
                .as_ref()
                .is_some_and(|job_tx| job_tx.send(job).is_ok())
        };
        if !sent {
            self.ledger.release_unsent();
            return Err(SchedulerError::PoolShutdown);
        }
        debug!(queue = %self.name, "job submitted");
        Ok(())
    }

    /// Block until every submitted job has released its slot.
    pub fn drain(&self) {
        self.ledger.wait_idle();
    }

    /// Like [`drain`](Self::drain) with an upper bound. Returns `true` if
    /// the queue went idle in time.
    #[must_use]
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        self.ledger.wait_idle_for(timeout)
    }

    /// Drain from an async context without blocking the runtime.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Internal` if the blocking task fails.
    #[cfg(feature = "tokio-runtime")]
    pub async fn drain_async(&self) -> Result<(), SchedulerError> {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || ledger.wait_idle())
            .await
            .map_err(|e| SchedulerError::Internal(format!("drain task failed: {e}")))
    }

    /// Number of workers currently Running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.ledger.snapshot().in_flight
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let slots = self.ledger.snapshot();
        let counters = &self.ledger.counters;
        QueueStats {
            capacity: slots.capacity,
            busy_slots: slots.assigned,
            in_flight: slots.in_flight,
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.ledger.is_closed()
    }

    /// Stop accepting work, let already-submitted jobs finish, and join the
    /// worker threads. Running jobs are never interrupted.
    pub fn shutdown(&self) {
        if !self.ledger.close() {
            return;
        }
        info!(queue = %self.name, "Shutting down task queue");

        // Workers drain whatever is still in the channel, then see it closed.
        self.job_tx.lock().take();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(queue = %self.name, worker_id = idx, "Worker thread panicked");
            } else {
                debug!(queue = %self.name, worker_id = idx, "Worker joined");
            }
        }
        info!(queue = %self.name, worker_count, "Task queue shut down");
    }
}

impl<J: QueueJob> Drop for TaskQueue<J> {
    fn drop(&mut self) {
        // Don't join here; a job stuck on I/O would hang the dropping thread.
        if self.ledger.close() {
            self.job_tx.lock().take();
            debug!(queue = %self.name, "TaskQueue dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn spawn_worker<J: QueueJob>(
    prefix: &str,
    worker_id: usize,
    job_rx: Receiver<J>,
    ledger: Arc<SlotLedger>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{prefix}-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "Worker thread started");
            // recv() fails once the sender is dropped and the channel is empty.
            while let Ok(job) = job_rx.recv() {
                let lease = SlotLease::new(Arc::clone(&ledger), worker_id);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&lease)));
                if outcome.is_err() {
                    ledger.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id, "Job panicked; slot released");
                }
                drop(lease);
            }
            debug!(worker_id, "Worker thread exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountJob {
        count: Arc<AtomicUsize>,
    }

    impl QueueJob for CountJob {
        fn run(self, slot: &SlotLease) {
            slot.starting();
            thread::sleep(Duration::from_millis(5));
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanicJob;

    impl QueueJob for PanicJob {
        fn run(self, slot: &SlotLease) {
            slot.starting();
            panic!("boom");
        }
    }

    fn config(workers: usize) -> QueueConfig {
        QueueConfig::new()
            .with_worker_count(workers)
            .with_thread_name_prefix("tq-test")
    }

    #[test]
    fn test_submit_and_drain() {
        let queue = TaskQueue::new(&config(2)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            queue.submit(CountJob { count: Arc::clone(&count) }).unwrap();
        }
        queue.drain();

        assert_eq!(count.load(Ordering::SeqCst), 8);
        let stats = queue.stats();
        assert_eq!(stats.submitted, 8);
        assert_eq!(stats.completed, 8);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.busy_slots, 0);
        queue.shutdown();
    }

    #[test]
    fn test_panicking_job_releases_slot() {
        let queue = TaskQueue::new(&config(1)).unwrap();
        queue.submit(PanicJob).unwrap();
        queue.drain();
        assert_eq!(queue.stats().panicked, 1);
        assert_eq!(queue.in_flight(), 0);
        queue.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let queue: TaskQueue<PanicJob> = TaskQueue::new(&config(1)).unwrap();
        queue.shutdown();
        assert!(queue.is_shut_down());
        assert!(matches!(queue.submit(PanicJob), Err(SchedulerError::PoolShutdown)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result: Result<TaskQueue<PanicJob>, _> = TaskQueue::new(&config(0));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }
}
