//! Errata queue worker: claim, load, expand, finalize.
//!
//! One worker run processes one [`WorkItem`] end to end:
//!
//! 1. **Claim**: mark the queue row in progress and commit at once, so other
//!    schedulers skip it while expansion runs.
//! 2. **Load**: resolve the erratum and channel. A missing reference is not
//!    an error; the item is abandoned (see [`LoadOutcome::MissingReference`]).
//! 3. **Expand**: find auto-update servers and create one action per server,
//!    committing after each so a later failure cannot undo earlier ones.
//! 4. **Finalize**: insert the notification marker, delete the queue row,
//!    commit.
//!
//! A failure during load or expand leaves the row claimed and skips
//! finalize. Any other failure rolls back the open transaction. Nothing is
//! propagated to the task queue.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, info_span};

use crate::core::error::{EmitError, WorkerError};
use crate::core::model::{ActionStatus, Channel, Errata, WorkItem};
use crate::core::ports::{ActionEmitter, Catalog, Database, StatusRegistry};
use crate::core::rows::{
    decode_rows, ItemKeyParams, NotificationParams, QueryName, QueryParams, RecipientParams,
    RecipientRow,
};
use crate::core::session::SessionScope;
use crate::core::task_queue::{QueueJob, SlotLease};

/// Which reference of a work item could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingReference {
    /// The erratum was not found.
    pub errata: bool,
    /// The channel was not found.
    pub channel: bool,
}

impl fmt::Display for MissingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.errata, self.channel) {
            (true, true) => f.write_str("errata and channel not found"),
            (true, false) => f.write_str("errata not found"),
            (false, true) => f.write_str("channel not found"),
            (false, false) => f.write_str("nothing missing"),
        }
    }
}

/// Result of the load phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Both references resolved.
    Loaded {
        /// The erratum to schedule.
        errata: Errata,
        /// The channel it was published into.
        channel: Channel,
    },
    /// The erratum or channel no longer exists; the item will be dequeued
    /// without scheduling anything.
    MissingReference(MissingReference),
}

/// Final state of one work item after a worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Actions were scheduled and the item was dequeued.
    Completed {
        /// Number of actions created.
        actions: usize,
    },
    /// No auto-update servers; the item was dequeued.
    NoRecipients,
    /// A reference was missing; the item was dequeued without actions.
    Abandoned(MissingReference),
    /// Load or expansion failed; the item stays claimed for manual recovery.
    LeftInProgress {
        /// Actions committed before the failure.
        actions: usize,
        /// Failure message.
        error: String,
    },
    /// Claim or finalize failed and was rolled back.
    Failed {
        /// Failure message.
        error: String,
    },
}

impl WorkOutcome {
    /// Whether the queue row was removed.
    #[must_use]
    pub const fn dequeued(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::NoRecipients | Self::Abandoned(_)
        )
    }

    /// Actions committed during the run.
    #[must_use]
    pub const fn actions(&self) -> usize {
        match self {
            Self::Completed { actions } | Self::LeftInProgress { actions, .. } => *actions,
            Self::NoRecipients | Self::Abandoned(_) | Self::Failed { .. } => 0,
        }
    }
}

/// Outcome of the load-and-expand phases that still allows finalize.
enum Expansion {
    Scheduled(usize),
    NoRecipients,
    Abandoned(MissingReference),
}

/// Expansion failure; carries how far the loop got.
struct ExpandFailure {
    actions: usize,
    error: WorkerError,
}

impl ExpandFailure {
    fn at<E: Into<WorkerError>>(actions: usize) -> impl FnOnce(E) -> Self {
        move |error| Self {
            actions,
            error: error.into(),
        }
    }
}

/// Processes errata queue rows into auto-update actions.
#[derive(Clone)]
pub struct ErrataQueueWorker {
    db: Arc<dyn Database>,
    catalog: Arc<dyn Catalog>,
    emitter: Arc<dyn ActionEmitter>,
    statuses: Arc<dyn StatusRegistry>,
    notification_delay_minutes: i64,
}

impl ErrataQueueWorker {
    /// Create a worker over the given collaborators.
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        catalog: Arc<dyn Catalog>,
        emitter: Arc<dyn ActionEmitter>,
        statuses: Arc<dyn StatusRegistry>,
    ) -> Self {
        Self {
            db,
            catalog,
            emitter,
            statuses,
            notification_delay_minutes: 0,
        }
    }

    /// Delay written into the notification marker (default 0).
    #[must_use]
    pub const fn with_notification_delay_minutes(mut self, minutes: i64) -> Self {
        self.notification_delay_minutes = minutes;
        self
    }

    /// Process one work item to completion. Never panics on store or emitter
    /// failures and never propagates them.
    pub fn run(&self, item: &WorkItem, slot: &SlotLease) -> WorkOutcome {
        slot.starting();
        let span = info_span!(
            "errata_queue_worker",
            worker_id = slot.worker_id(),
            errata_id = item.errata_id.get(),
            channel_id = item.channel_id.get(),
            org_id = item.org_id.get(),
        );
        let _entered = span.enter();

        let mut scope = SessionScope::new(Arc::clone(&self.db));
        let outcome = match self.process(item, &mut scope) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "errata queue item failed; rolled back");
                scope.rollback_and_close();
                WorkOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        scope.close();
        outcome
    }

    fn process(&self, item: &WorkItem, scope: &mut SessionScope) -> Result<WorkOutcome, WorkerError> {
        Self::mark_in_progress(item, scope)?;
        let queued = self.lookup_queued_status();

        let expansion = match self.load_and_expand(item, queued.as_ref(), scope) {
            Ok(expansion) => expansion,
            Err(failure) => {
                error!(
                    error = %failure.error,
                    actions_committed = failure.actions,
                    "expansion failed; item left in progress"
                );
                scope.rollback_and_close();
                return Ok(WorkOutcome::LeftInProgress {
                    actions: failure.actions,
                    error: failure.error.to_string(),
                });
            }
        };

        self.finalize(item, scope)?;

        Ok(match expansion {
            Expansion::Scheduled(actions) => {
                info!(actions, "errata queue item processed");
                WorkOutcome::Completed { actions }
            }
            Expansion::NoRecipients => WorkOutcome::NoRecipients,
            Expansion::Abandoned(missing) => WorkOutcome::Abandoned(missing),
        })
    }

    fn mark_in_progress(item: &WorkItem, scope: &mut SessionScope) -> Result<(), WorkerError> {
        let params = QueryParams::encode(QueryName::MarkInProgress, &item_key(item))?;
        let rows = scope.tx()?.update(QueryName::MarkInProgress, &params)?;
        debug!(rows, "marked errata queue rows in progress");
        scope.commit_and_close()?;
        Ok(())
    }

    fn lookup_queued_status(&self) -> Option<ActionStatus> {
        let status = self.statuses.lookup(ActionStatus::QUEUED);
        if status.is_none() {
            error!(status = ActionStatus::QUEUED, "couldn't locate action status");
        }
        status
    }

    /// Resolve the erratum and channel named by `item`.
    ///
    /// # Errors
    ///
    /// Only backend failures; unknown ids yield `MissingReference`.
    pub fn load(&self, item: &WorkItem, scope: &mut SessionScope) -> Result<LoadOutcome, WorkerError> {
        let tx = scope.tx()?;
        let errata = self.catalog.errata(tx, item.errata_id)?;
        let channel = self.catalog.channel(tx, item.channel_id)?;
        Ok(match (errata, channel) {
            (Some(errata), Some(channel)) => LoadOutcome::Loaded { errata, channel },
            (errata, channel) => LoadOutcome::MissingReference(MissingReference {
                errata: errata.is_none(),
                channel: channel.is_none(),
            }),
        })
    }

    fn load_and_expand(
        &self,
        item: &WorkItem,
        queued: Option<&ActionStatus>,
        scope: &mut SessionScope,
    ) -> Result<Expansion, ExpandFailure> {
        match self.load(item, scope).map_err(ExpandFailure::at(0))? {
            LoadOutcome::Loaded { errata, channel } => {
                self.schedule_auto_updates(&errata, &channel, queued, scope)
            }
            LoadOutcome::MissingReference(missing) => Ok(Self::abandon_missing_reference(missing)),
        }
    }

    /// Abandon-on-missing-reference: the erratum or channel is gone, so a
    /// retry can never succeed. The item still goes through finalize and is
    /// dequeued; only this log line records that it was dropped.
    fn abandon_missing_reference(missing: MissingReference) -> Expansion {
        error!(%missing, "skipping errata queue item; it will be dequeued");
        Expansion::Abandoned(missing)
    }

    fn schedule_auto_updates(
        &self,
        errata: &Errata,
        channel: &Channel,
        queued: Option<&ActionStatus>,
        scope: &mut SessionScope,
    ) -> Result<Expansion, ExpandFailure> {
        debug!(advisory = %errata.advisory_name, "scheduling auto updates");

        let params = QueryParams::encode(
            QueryName::FindAutoupdateServers,
            &RecipientParams {
                errata_id: errata.id,
                channel_id: channel.id,
            },
        )
        .map_err(ExpandFailure::at(0))?;
        let rows = scope
            .tx()
            .and_then(|tx| tx.select(QueryName::FindAutoupdateServers, &params))
            .map_err(ExpandFailure::at(0))?;
        let recipients: Vec<RecipientRow> = decode_rows(QueryName::FindAutoupdateServers, rows)
            .map_err(ExpandFailure::at(0))?;

        if recipients.is_empty() {
            debug!("no autoupdate servers found");
            return Ok(Expansion::NoRecipients);
        }
        debug!(servers = recipients.len(), "found autoupdate servers");

        let mut scheduled = 0;
        for recipient in &recipients {
            self.schedule_one(errata, recipient, queued, scope)
                .map_err(ExpandFailure::at(scheduled))?;
            scheduled += 1;
        }
        scope
            .commit_and_close()
            .map_err(ExpandFailure::at(scheduled))?;
        Ok(Expansion::Scheduled(scheduled))
    }

    /// Create, target, persist, and commit one action.
    fn schedule_one(
        &self,
        errata: &Errata,
        recipient: &RecipientRow,
        queued: Option<&ActionStatus>,
        scope: &mut SessionScope,
    ) -> Result<(), WorkerError> {
        debug!(
            server_id = recipient.server_id.get(),
            server_org_id = recipient.org_id.get(),
            "scheduling auto update"
        );
        let tx = scope.tx()?;
        let Some(org) = self.catalog.org(tx, recipient.org_id)? else {
            return Err(EmitError::Rejected(format!(
                "{} not found for {}",
                recipient.org_id, recipient.server_id
            ))
            .into());
        };
        let mut action = self.emitter.create_action(tx, &org, errata, queued)?;
        self.emitter.attach_recipient(tx, recipient.server_id, &mut action)?;
        let action_id = self.emitter.persist(tx, &mut action)?;
        scope.commit_and_close()?;
        debug!(action_id = action_id.get(), "auto update action committed");
        Ok(())
    }

    fn finalize(&self, item: &WorkItem, scope: &mut SessionScope) -> Result<(), WorkerError> {
        let marker = QueryParams::encode(
            QueryName::EnqueueNotification,
            &NotificationParams {
                errata_id: item.errata_id,
                channel_id: item.channel_id,
                minutes: self.notification_delay_minutes,
            },
        )?;
        let inserted = scope.tx()?.update(QueryName::EnqueueNotification, &marker)?;
        debug!(rows = inserted, "inserted errata notification markers");

        let key = QueryParams::encode(QueryName::DequeueErrata, &item_key(item))?;
        let deleted = scope.tx()?.update(QueryName::DequeueErrata, &key)?;
        debug!(rows = deleted, "dequeued errata queue rows");

        scope.commit_and_close()?;
        Ok(())
    }
}

const fn item_key(item: &WorkItem) -> ItemKeyParams {
    ItemKeyParams {
        errata_id: item.errata_id,
        channel_id: item.channel_id,
    }
}

/// A work item's outcome, reported back to whoever submitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkReport {
    /// The processed item.
    pub item: WorkItem,
    /// What happened to it.
    pub outcome: WorkOutcome,
}

/// Adapts [`ErrataQueueWorker`] to the task queue.
pub struct ErrataJob {
    worker: Arc<ErrataQueueWorker>,
    item: WorkItem,
    reports: Option<Sender<WorkReport>>,
}

impl ErrataJob {
    /// Job that processes `item` with `worker`.
    #[must_use]
    pub const fn new(worker: Arc<ErrataQueueWorker>, item: WorkItem) -> Self {
        Self {
            worker,
            item,
            reports: None,
        }
    }

    /// Send the outcome to `reports` when done.
    #[must_use]
    pub fn with_reports(mut self, reports: Sender<WorkReport>) -> Self {
        self.reports = Some(reports);
        self
    }
}

impl QueueJob for ErrataJob {
    fn run(self, slot: &SlotLease) {
        let outcome = self.worker.run(&self.item, slot);
        if let Some(reports) = self.reports {
            // The submitter may have stopped listening; the outcome is logged already.
            let _ = reports.send(WorkReport {
                item: self.item,
                outcome,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_reference_display() {
        let both = MissingReference { errata: true, channel: true };
        let channel = MissingReference { errata: false, channel: true };
        assert_eq!(both.to_string(), "errata and channel not found");
        assert_eq!(channel.to_string(), "channel not found");
    }

    #[test]
    fn test_outcome_dequeued_and_actions() {
        let abandoned = WorkOutcome::Abandoned(MissingReference { errata: true, channel: false });
        assert!(abandoned.dequeued());
        assert_eq!(abandoned.actions(), 0);

        let stuck = WorkOutcome::LeftInProgress {
            actions: 2,
            error: "boom".into(),
        };
        assert!(!stuck.dequeued());
        assert_eq!(stuck.actions(), 2);

        assert!(WorkOutcome::Completed { actions: 3 }.dequeued());
        assert!(!WorkOutcome::Failed { error: "x".into() }.dequeued());
    }
}
