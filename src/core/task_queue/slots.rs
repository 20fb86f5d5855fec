//! Slot accounting shared between the dispatcher and its worker threads.
//!
//! Per-slot lifecycle: Idle -> Assigned (submit) -> Running (workerStarting)
//! -> Idle (workerDone). `assigned` counts every non-idle slot; `in_flight`
//! counts only the running ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::error::SchedulerError;

#[derive(Debug)]
struct SlotState {
    capacity: usize,
    assigned: usize,
    in_flight: usize,
    closed: bool,
}

/// Lifetime counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct SlotCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
}

/// Busy/idle bookkeeping for a fixed number of worker slots.
#[derive(Debug)]
pub(crate) struct SlotLedger {
    state: Mutex<SlotState>,
    /// Signalled whenever a slot returns to Idle or the ledger closes.
    freed: Condvar,
    pub counters: SlotCounters,
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotSnapshot {
    pub capacity: usize,
    pub assigned: usize,
    pub in_flight: usize,
}

impl SlotLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                capacity,
                assigned: 0,
                in_flight: 0,
                closed: false,
            }),
            freed: Condvar::new(),
            counters: SlotCounters::default(),
        }
    }

    /// Block until a slot is idle, then mark it Assigned.
    pub fn acquire(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SchedulerError::PoolShutdown);
            }
            if state.assigned < state.capacity {
                state.assigned += 1;
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            self.freed.wait(&mut state);
        }
    }

    /// Undo an `acquire` whose job never reached a worker.
    pub fn release_unsent(&self) {
        let mut state = self.state.lock();
        state.assigned = state.assigned.saturating_sub(1);
        self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
        drop(state);
        self.freed.notify_all();
    }

    /// Assigned -> Running.
    pub fn worker_starting(&self) {
        let mut state = self.state.lock();
        state.in_flight += 1;
    }

    /// Running (or Assigned) -> Idle; wakes blocked submitters and drainers.
    pub fn worker_done(&self, started: bool) {
        let mut state = self.state.lock();
        if started {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        state.assigned = state.assigned.saturating_sub(1);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.freed.notify_all();
    }

    /// Refuse further `acquire` calls and wake anyone blocked in one.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = !state.closed;
        state.closed = true;
        drop(state);
        self.freed.notify_all();
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Block until every slot is Idle.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.assigned > 0 {
            self.freed.wait(&mut state);
        }
    }

    /// Block until every slot is Idle or `timeout` elapses. Returns `true`
    /// when idle.
    pub fn wait_idle_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.assigned > 0 {
            if self.freed.wait_until(&mut state, deadline).timed_out() {
                return state.assigned == 0;
            }
        }
        true
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.state.lock();
        SlotSnapshot {
            capacity: state.capacity,
            assigned: state.assigned,
            in_flight: state.in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_slot_lifecycle_counts() {
        let ledger = SlotLedger::new(2);
        ledger.acquire().unwrap();
        assert_eq!(ledger.snapshot(), SlotSnapshot { capacity: 2, assigned: 1, in_flight: 0 });

        ledger.worker_starting();
        assert_eq!(ledger.snapshot().in_flight, 1);

        ledger.worker_done(true);
        assert_eq!(ledger.snapshot(), SlotSnapshot { capacity: 2, assigned: 0, in_flight: 0 });
        assert_eq!(ledger.counters.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_done_without_start_frees_slot() {
        let ledger = SlotLedger::new(1);
        ledger.acquire().unwrap();
        ledger.worker_done(false);
        assert_eq!(ledger.snapshot().assigned, 0);
        assert_eq!(ledger.snapshot().in_flight, 0);
    }

    #[test]
    fn test_acquire_blocks_until_slot_freed() {
        let ledger = Arc::new(SlotLedger::new(1));
        ledger.acquire().unwrap();

        let waiter = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || ledger.acquire())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        ledger.worker_done(false);
        waiter.join().unwrap().unwrap();
        assert_eq!(ledger.snapshot().assigned, 1);
    }

    #[test]
    fn test_close_wakes_blocked_acquire() {
        let ledger = Arc::new(SlotLedger::new(1));
        ledger.acquire().unwrap();

        let waiter = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || ledger.acquire())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(ledger.close());
        assert!(!ledger.close());
        assert!(matches!(waiter.join().unwrap(), Err(SchedulerError::PoolShutdown)));
    }

    #[test]
    fn test_wait_idle_for_times_out_while_busy() {
        let ledger = SlotLedger::new(1);
        ledger.acquire().unwrap();
        assert!(!ledger.wait_idle_for(Duration::from_millis(20)));
        ledger.worker_done(false);
        assert!(ledger.wait_idle_for(Duration::from_millis(20)));
    }
}
