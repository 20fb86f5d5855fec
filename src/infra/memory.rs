//! In-memory store, action emitter, and status registry.
//!
//! `InMemoryStore` implements both [`Database`] and [`Catalog`]. Writes made
//! through a [`MemoryTransaction`] are staged and only applied on commit;
//! rollback and close discard them. Action ids come from a sequence that, as
//! in a real database, does not roll back.
//!
//! Faults can be injected per query role to exercise failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::core::error::{EmitError, StoreError};
use crate::core::model::{
    ActionHandle, ActionId, ActionStatus, Channel, ChannelId, Errata, ErrataId, ItemKey, Org,
    OrgId, ServerId, WorkItem,
};
use crate::core::ports::{ActionEmitter, Catalog, Database, StatusRegistry, Transaction};
use crate::core::rows::{
    decode_rows, ActionParams, CandidateParams, InsertedActionRow, ItemKeyParams,
    NotificationParams, QueryName, QueryParams, RecipientParams, RecipientRow, Row,
};

/// A queue row and its claim flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRow {
    /// The pending work.
    pub item: WorkItem,
    /// Set once a worker has claimed the row.
    pub in_progress: bool,
}

/// Notification marker written on finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationMarker {
    /// Erratum id.
    pub errata_id: ErrataId,
    /// Channel id.
    pub channel_id: ChannelId,
    /// Delay in minutes.
    pub minutes: i64,
}

/// A persisted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAction {
    /// Assigned id.
    pub id: ActionId,
    /// Scheduling organization.
    pub org_id: OrgId,
    /// Applied erratum.
    pub errata_id: ErrataId,
    /// Target servers.
    pub server_ids: Vec<ServerId>,
    /// Initial status name.
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Subscription {
    server_id: ServerId,
    org_id: OrgId,
    channel_id: ChannelId,
    auto_update: bool,
}

#[derive(Debug, Clone)]
enum Write {
    Claim(ItemKey),
    Notify(NotificationMarker),
    Dequeue(ItemKey),
    InsertAction(StoredAction),
}

#[derive(Debug, Default)]
struct Tables {
    queue: Vec<QueueRow>,
    errata: HashMap<ErrataId, Errata>,
    channels: HashMap<ChannelId, Channel>,
    orgs: HashMap<OrgId, Org>,
    subscriptions: Vec<Subscription>,
    notifications: Vec<NotificationMarker>,
    actions: Vec<StoredAction>,
}

impl Tables {
    fn apply(&mut self, write: Write) {
        match write {
            Write::Claim(key) => {
                for row in self.queue.iter_mut().filter(|row| row.item.key() == key) {
                    row.in_progress = true;
                }
            }
            Write::Notify(marker) => self.notifications.push(marker),
            Write::Dequeue(key) => self.queue.retain(|row| row.item.key() != key),
            Write::InsertAction(action) => self.actions.push(action),
        }
    }

    fn matching(&self, key: ItemKey) -> u64 {
        let count = self.queue.iter().filter(|row| row.item.key() == key).count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }
}

#[derive(Debug)]
struct Fault {
    /// Calls that still succeed before the fault fires.
    remaining_ok: usize,
}

/// Transaction counters, for checking that every scope was released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Transactions opened.
    pub begun: u64,
    /// Successful commits.
    pub committed: u64,
    /// Rollbacks.
    pub rolled_back: u64,
    /// Transactions closed (each counted once).
    pub closed: u64,
}

#[derive(Debug, Default)]
struct TxCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    closed: AtomicU64,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    faults: Mutex<HashMap<QueryName, Fault>>,
    fail_lookups: AtomicBool,
    fail_commits: AtomicBool,
    next_action_id: AtomicI64,
    counters: TxCounters,
}

impl Shared {
    fn check_fault(&self, query: QueryName) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        match faults.get_mut(&query) {
            Some(fault) if fault.remaining_ok == 0 => {
                Err(StoreError::Backend(format!("injected failure on `{query}`")))
            }
            Some(fault) => {
                fault.remaining_ok -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory store with transactional staging.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an erratum.
    pub fn insert_errata(&self, errata: Errata) {
        self.shared.tables.lock().errata.insert(errata.id, errata);
    }

    /// Add or replace a channel.
    pub fn insert_channel(&self, channel: Channel) {
        self.shared.tables.lock().channels.insert(channel.id, channel);
    }

    /// Add or replace an organization.
    pub fn insert_org(&self, org: Org) {
        self.shared.tables.lock().orgs.insert(org.id, org);
    }

    /// Subscribe a server to a channel.
    pub fn subscribe(&self, server_id: ServerId, org_id: OrgId, channel_id: ChannelId, auto_update: bool) {
        self.shared.tables.lock().subscriptions.push(Subscription {
            server_id,
            org_id,
            channel_id,
            auto_update,
        });
    }

    /// Append an unclaimed queue row.
    pub fn enqueue(&self, item: WorkItem) {
        self.shared.tables.lock().queue.push(QueueRow {
            item,
            in_progress: false,
        });
    }

    /// Committed queue rows, in insertion order.
    #[must_use]
    pub fn queue_rows(&self) -> Vec<QueueRow> {
        self.shared.tables.lock().queue.clone()
    }

    /// The committed row for `key`, if still queued.
    #[must_use]
    pub fn queue_row(&self, key: ItemKey) -> Option<QueueRow> {
        self.shared.tables.lock().queue.iter().find(|row| row.item.key() == key).copied()
    }

    /// Committed notification markers.
    #[must_use]
    pub fn notifications(&self) -> Vec<NotificationMarker> {
        self.shared.tables.lock().notifications.clone()
    }

    /// Committed actions.
    #[must_use]
    pub fn actions(&self) -> Vec<StoredAction> {
        self.shared.tables.lock().actions.clone()
    }

    /// Transaction counters so far.
    #[must_use]
    pub fn tx_stats(&self) -> TxStats {
        let c = &self.shared.counters;
        TxStats {
            begun: c.begun.load(Ordering::SeqCst),
            committed: c.committed.load(Ordering::SeqCst),
            rolled_back: c.rolled_back.load(Ordering::SeqCst),
            closed: c.closed.load(Ordering::SeqCst),
        }
    }

    /// Fail every call to `query`.
    pub fn fail_query(&self, query: QueryName) {
        self.fail_query_after(query, 0);
    }

    /// Let `successes` calls to `query` through, then fail every later one.
    pub fn fail_query_after(&self, query: QueryName, successes: usize) {
        self.shared.faults.lock().insert(
            query,
            Fault {
                remaining_ok: successes,
            },
        );
    }

    /// Make catalog lookups fail (or succeed again).
    pub fn fail_lookups(&self, fail: bool) {
        self.shared.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make commits fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
        self.fail_lookups(false);
        self.fail_commits(false);
    }

    fn lookup_guard(&self) -> Result<(), StoreError> {
        if self.shared.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected lookup failure".into()));
        }
        Ok(())
    }
}

impl Database for InMemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.shared.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged: Vec::new(),
            closed: false,
        }))
    }
}

impl Catalog for InMemoryStore {
    fn errata(&self, _tx: &mut dyn Transaction, id: ErrataId) -> Result<Option<Errata>, StoreError> {
        self.lookup_guard()?;
        Ok(self.shared.tables.lock().errata.get(&id).cloned())
    }

    fn channel(&self, _tx: &mut dyn Transaction, id: ChannelId) -> Result<Option<Channel>, StoreError> {
        self.lookup_guard()?;
        Ok(self.shared.tables.lock().channels.get(&id).cloned())
    }

    fn org(&self, _tx: &mut dyn Transaction, id: OrgId) -> Result<Option<Org>, StoreError> {
        self.lookup_guard()?;
        Ok(self.shared.tables.lock().orgs.get(&id).cloned())
    }
}

/// Transaction over an [`InMemoryStore`]. Reads see committed data only.
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: Vec<Write>,
    closed: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn to_row<T: Serialize>(query: QueryName, value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::MalformedRow {
            query,
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(StoreError::MalformedRow {
            query,
            reason: e.to_string(),
        }),
    }
}

impl Transaction for MemoryTransaction {
    fn select(&mut self, query: QueryName, params: &QueryParams) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        self.shared.check_fault(query)?;
        trace!(%query, "memory select");
        match query {
            QueryName::FindCandidates => {
                let CandidateParams { limit } = params.decode(query)?;
                let tables = self.shared.tables.lock();
                tables
                    .queue
                    .iter()
                    .filter(|row| !row.in_progress)
                    .take(limit)
                    .map(|row| to_row(query, &row.item))
                    .collect()
            }
            QueryName::FindAutoupdateServers => {
                let RecipientParams { channel_id, .. } = params.decode(query)?;
                let tables = self.shared.tables.lock();
                tables
                    .subscriptions
                    .iter()
                    .filter(|sub| sub.channel_id == channel_id && sub.auto_update)
                    .map(|sub| {
                        to_row(
                            query,
                            &RecipientRow {
                                server_id: sub.server_id,
                                org_id: sub.org_id,
                            },
                        )
                    })
                    .collect()
            }
            QueryName::InsertErrataAction => {
                let action: ActionParams = params.decode(query)?;
                let id = ActionId(self.shared.next_action_id.fetch_add(1, Ordering::SeqCst) + 1);
                self.staged.push(Write::InsertAction(StoredAction {
                    id,
                    org_id: action.org_id,
                    errata_id: action.errata_id,
                    server_ids: action.server_ids,
                    status: action.status,
                }));
                Ok(vec![to_row(query, &InsertedActionRow { action_id: id })?])
            }
            QueryName::MarkInProgress | QueryName::EnqueueNotification | QueryName::DequeueErrata => {
                Err(StoreError::UnsupportedQuery(query))
            }
        }
    }

    fn update(&mut self, query: QueryName, params: &QueryParams) -> Result<u64, StoreError> {
        self.ensure_open()?;
        self.shared.check_fault(query)?;
        trace!(%query, "memory update");
        match query {
            QueryName::MarkInProgress => {
                let ItemKeyParams { errata_id, channel_id } = params.decode(query)?;
                let key = ItemKey { errata_id, channel_id };
                let rows = self.shared.tables.lock().matching(key);
                self.staged.push(Write::Claim(key));
                Ok(rows)
            }
            QueryName::EnqueueNotification => {
                let NotificationParams {
                    errata_id,
                    channel_id,
                    minutes,
                } = params.decode(query)?;
                self.staged.push(Write::Notify(NotificationMarker {
                    errata_id,
                    channel_id,
                    minutes,
                }));
                Ok(1)
            }
            QueryName::DequeueErrata => {
                let ItemKeyParams { errata_id, channel_id } = params.decode(query)?;
                let key = ItemKey { errata_id, channel_id };
                let rows = self.shared.tables.lock().matching(key);
                self.staged.push(Write::Dequeue(key));
                Ok(rows)
            }
            QueryName::FindCandidates | QueryName::FindAutoupdateServers | QueryName::InsertErrataAction => {
                Err(StoreError::UnsupportedQuery(query))
            }
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.shared.fail_commits.load(Ordering::SeqCst) {
            self.staged.clear();
            return Err(StoreError::Backend("injected commit failure".into()));
        }
        let mut tables = self.shared.tables.lock();
        for write in self.staged.drain(..) {
            tables.apply(write);
        }
        drop(tables);
        self.shared.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.staged.clear();
        self.shared.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.staged.clear();
            self.shared.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.close();
    }
}

/// Action emitter that persists through `InsertErrataAction`.
#[derive(Debug, Default)]
pub struct InMemoryActionEmitter {
    /// Persists that still succeed before rejection; `None` never rejects.
    reject_after: Mutex<Option<usize>>,
    persisted: AtomicUsize,
}

impl InMemoryActionEmitter {
    /// Emitter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `successes` persists, then reject every later one.
    #[must_use]
    pub fn rejecting_after(successes: usize) -> Self {
        Self {
            reject_after: Mutex::new(Some(successes)),
            persisted: AtomicUsize::new(0),
        }
    }

    /// Actions persisted (committed or not).
    #[must_use]
    pub fn persisted(&self) -> usize {
        self.persisted.load(Ordering::SeqCst)
    }
}

impl ActionEmitter for InMemoryActionEmitter {
    fn create_action(
        &self,
        _tx: &mut dyn Transaction,
        org: &Org,
        errata: &Errata,
        status: Option<&ActionStatus>,
    ) -> Result<ActionHandle, EmitError> {
        Ok(ActionHandle::new(org.id, errata.id, status.cloned()))
    }

    fn attach_recipient(
        &self,
        _tx: &mut dyn Transaction,
        server: ServerId,
        action: &mut ActionHandle,
    ) -> Result<(), EmitError> {
        if !action.recipients.contains(&server) {
            action.recipients.push(server);
        }
        Ok(())
    }

    fn persist(&self, tx: &mut dyn Transaction, action: &mut ActionHandle) -> Result<ActionId, EmitError> {
        {
            let mut budget = self.reject_after.lock();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(EmitError::Rejected(format!(
                        "{} rejected for {:?}",
                        action.errata_id, action.recipients
                    )));
                }
                *remaining -= 1;
            }
        }

        let params = QueryParams::encode(
            QueryName::InsertErrataAction,
            &ActionParams {
                org_id: action.org_id,
                errata_id: action.errata_id,
                server_ids: action.recipients.clone(),
                status: ActionParams::status_name(action.status.as_ref()),
            },
        )?;
        let rows = tx.select(QueryName::InsertErrataAction, &params)?;
        let inserted: Vec<InsertedActionRow> = decode_rows(QueryName::InsertErrataAction, rows)?;
        let Some(row) = inserted.first() else {
            return Err(EmitError::Rejected("insert returned no action id".into()));
        };
        action.id = Some(row.action_id);
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(row.action_id)
    }
}

/// Fixed set of action status constants.
#[derive(Debug, Clone, Default)]
pub struct StaticStatusRegistry {
    statuses: HashMap<String, ActionStatus>,
}

impl StaticStatusRegistry {
    /// Registry with no statuses configured.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Queued, Picked Up, Completed, and Failed.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_status(ActionStatus::new(0, ActionStatus::QUEUED))
            .with_status(ActionStatus::new(1, "Picked Up"))
            .with_status(ActionStatus::new(2, "Completed"))
            .with_status(ActionStatus::new(3, "Failed"))
    }

    /// Add or replace a status.
    #[must_use]
    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.statuses.insert(status.name.clone(), status);
        self
    }
}

impl StatusRegistry for StaticStatusRegistry {
    fn lookup(&self, name: &str) -> Option<ActionStatus> {
        self.statuses.get(name).cloned()
    }
}
