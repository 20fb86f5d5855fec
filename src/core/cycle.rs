//! One scheduling pass over the errata queue.
//!
//! A cycle selects up to `max_work_items` pending rows, submits one
//! [`ErrataJob`] per row to the task queue, waits for the queue to drain,
//! and tallies the reported outcomes.

use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::core::error::SchedulerError;
use crate::core::model::WorkItem;
use crate::core::ports::Database;
use crate::core::rows::{decode_rows, CandidateParams, QueryName, QueryParams};
use crate::core::session::SessionScope;
use crate::core::task_queue::{QueueStats, TaskQueue};
use crate::core::worker::{ErrataJob, ErrataQueueWorker, WorkOutcome};

/// Tally of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Correlates log lines of one cycle.
    pub cycle_id: Uuid,
    /// Rows selected.
    pub candidates: usize,
    /// Jobs accepted by the task queue.
    pub submitted: usize,
    /// Items that scheduled at least one action.
    pub completed: usize,
    /// Items dequeued with no auto-update servers.
    pub no_recipients: usize,
    /// Items dequeued because a reference was missing.
    pub abandoned: usize,
    /// Items left claimed after a load or expansion failure.
    pub left_in_progress: usize,
    /// Items whose claim or finalize failed.
    pub failed: usize,
    /// Actions committed across all items.
    pub actions_scheduled: usize,
}

impl CycleReport {
    const fn new(cycle_id: Uuid, candidates: usize) -> Self {
        Self {
            cycle_id,
            candidates,
            submitted: 0,
            completed: 0,
            no_recipients: 0,
            abandoned: 0,
            left_in_progress: 0,
            failed: 0,
            actions_scheduled: 0,
        }
    }

    fn record(&mut self, outcome: &WorkOutcome) {
        self.actions_scheduled += outcome.actions();
        match outcome {
            WorkOutcome::Completed { .. } => self.completed += 1,
            WorkOutcome::NoRecipients => self.no_recipients += 1,
            WorkOutcome::Abandoned(_) => self.abandoned += 1,
            WorkOutcome::LeftInProgress { .. } => self.left_in_progress += 1,
            WorkOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Outcomes received; lower than `submitted` only if a job panicked.
    #[must_use]
    pub const fn reported(&self) -> usize {
        self.completed + self.no_recipients + self.abandoned + self.left_in_progress + self.failed
    }
}

/// Owns the task queue and drives errata workers through it.
pub struct ErrataQueueCycle {
    db: Arc<dyn Database>,
    worker: Arc<ErrataQueueWorker>,
    queue: TaskQueue<ErrataJob>,
    max_work_items: usize,
}

impl ErrataQueueCycle {
    /// Start the task queue described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` or `SchedulerError::WorkerSpawn`
    /// from queue construction.
    pub fn new(
        config: &QueueConfig,
        db: Arc<dyn Database>,
        worker: ErrataQueueWorker,
    ) -> Result<Self, SchedulerError> {
        let queue = TaskQueue::new(config)?;
        Ok(Self {
            db,
            worker: Arc::new(worker),
            queue,
            max_work_items: config.max_work_items,
        })
    }

    /// Select, dispatch, and drain one batch of queue rows.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Store` if candidate selection fails, or
    /// `SchedulerError::PoolShutdown` if the queue was shut down. Per-item
    /// failures are reported in the `CycleReport`, not here.
    pub fn run_once(&self) -> Result<CycleReport, SchedulerError> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("errata_queue_cycle", cycle_id = %cycle_id);
        let _entered = span.enter();

        let candidates = self.select_candidates()?;
        let mut report = CycleReport::new(cycle_id, candidates.len());
        if candidates.is_empty() {
            debug!("no errata queue candidates");
            return Ok(report);
        }
        info!(candidates = candidates.len(), "dispatching errata queue items");

        let (report_tx, report_rx) = unbounded();
        for item in candidates {
            let job = ErrataJob::new(Arc::clone(&self.worker), item).with_reports(report_tx.clone());
            if let Err(e) = self.queue.submit(job) {
                warn!(error = %e, submitted = report.submitted, "stopping dispatch");
                self.queue.drain();
                return Err(e);
            }
            report.submitted += 1;
        }
        drop(report_tx);
        self.queue.drain();

        for work in report_rx.try_iter() {
            report.record(&work.outcome);
        }
        if report.reported() < report.submitted {
            warn!(
                submitted = report.submitted,
                reported = report.reported(),
                "some errata jobs ended without reporting"
            );
        }
        info!(
            completed = report.completed,
            no_recipients = report.no_recipients,
            abandoned = report.abandoned,
            left_in_progress = report.left_in_progress,
            failed = report.failed,
            actions = report.actions_scheduled,
            "errata queue cycle finished"
        );
        Ok(report)
    }

    fn select_candidates(&self) -> Result<Vec<WorkItem>, SchedulerError> {
        let params = QueryParams::encode(
            QueryName::FindCandidates,
            &CandidateParams {
                limit: self.max_work_items,
            },
        )?;
        let mut scope = SessionScope::new(Arc::clone(&self.db));
        let rows = scope.tx()?.select(QueryName::FindCandidates, &params)?;
        scope.commit_and_close()?;

        let mut items: Vec<WorkItem> = decode_rows(QueryName::FindCandidates, rows)?;
        items.truncate(self.max_work_items);
        Ok(items)
    }

    /// Current task queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// The worker every job runs.
    #[must_use]
    pub fn worker(&self) -> &ErrataQueueWorker {
        &self.worker
    }

    /// Stop the task queue and join its threads.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
