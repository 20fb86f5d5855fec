//! Interfaces the scheduler consumes from its collaborators.
//!
//! Persistence, the entity catalog, and action creation all live outside
//! this crate. Worker threads call these synchronously; each call may block
//! on I/O and the worker slot stays busy while it does.

use crate::core::error::{EmitError, StoreError};
use crate::core::model::{
    ActionHandle, ActionId, ActionStatus, Channel, ChannelId, Errata, ErrataId, Org, OrgId,
    ServerId,
};
use crate::core::rows::{QueryName, QueryParams, Row};

/// One open transactional scope on the store.
pub trait Transaction: Send {
    /// Run a named select.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on backend failure.
    fn select(&mut self, query: QueryName, params: &QueryParams) -> Result<Vec<Row>, StoreError>;

    /// Run a named insert/update/delete and return the affected row count.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on backend failure.
    fn update(&mut self, query: QueryName, params: &QueryParams) -> Result<u64, StoreError>;

    /// Make every write in this scope durable.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the commit fails; the writes are then lost.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every uncommitted write in this scope.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the backend could not roll back.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Release the scope. Idempotent; uncommitted writes are discarded.
    fn close(&mut self);
}

/// Source of transactional scopes.
pub trait Database: Send + Sync {
    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if no connection is available.
    fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Entity lookups. Unknown ids resolve to `Ok(None)`, never to an error.
pub trait Catalog: Send + Sync {
    /// Resolve an erratum.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on backend failure only.
    fn errata(&self, tx: &mut dyn Transaction, id: ErrataId) -> Result<Option<Errata>, StoreError>;

    /// Resolve a channel.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on backend failure only.
    fn channel(&self, tx: &mut dyn Transaction, id: ChannelId) -> Result<Option<Channel>, StoreError>;

    /// Resolve an organization.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` on backend failure only.
    fn org(&self, tx: &mut dyn Transaction, id: OrgId) -> Result<Option<Org>, StoreError>;
}

/// Creates and persists schedulable errata actions.
pub trait ActionEmitter: Send + Sync {
    /// Create an action applying `errata` under `org`.
    ///
    /// # Errors
    ///
    /// Returns an `EmitError` if the action cannot be created.
    fn create_action(
        &self,
        tx: &mut dyn Transaction,
        org: &Org,
        errata: &Errata,
        status: Option<&ActionStatus>,
    ) -> Result<ActionHandle, EmitError>;

    /// Add a server to the action's recipients.
    ///
    /// # Errors
    ///
    /// Returns an `EmitError` if the server cannot be targeted.
    fn attach_recipient(
        &self,
        tx: &mut dyn Transaction,
        server: ServerId,
        action: &mut ActionHandle,
    ) -> Result<(), EmitError>;

    /// Persist the action inside `tx`; durable once `tx` commits.
    ///
    /// # Errors
    ///
    /// Returns an `EmitError` if the action cannot be stored.
    fn persist(&self, tx: &mut dyn Transaction, action: &mut ActionHandle) -> Result<ActionId, EmitError>;
}

/// Registry of canonical action status constants.
pub trait StatusRegistry: Send + Sync {
    /// Look up a status by name; `None` when unconfigured.
    fn lookup(&self, name: &str) -> Option<ActionStatus>;
}
