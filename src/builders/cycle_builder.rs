//! Wire an [`ErrataQueueCycle`] from a [`QueueConfig`] and its collaborators.

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::core::{
    ActionEmitter, Catalog, Database, ErrataQueueCycle, ErrataQueueWorker, SchedulerError,
    StatusRegistry,
};

/// Builder for [`ErrataQueueCycle`].
///
/// ```rust,ignore
/// let store = Arc::new(InMemoryStore::new());
/// let cycle = CycleBuilder::new(QueueConfig::new().with_worker_count(4))
///     .database(store.clone())
///     .catalog(store.clone())
///     .emitter(Arc::new(InMemoryActionEmitter::new()))
///     .statuses(Arc::new(StaticStatusRegistry::with_defaults()))
///     .build()?;
/// let report = cycle.run_once()?;
/// ```
#[derive(Default)]
pub struct CycleBuilder {
    config: QueueConfig,
    db: Option<Arc<dyn Database>>,
    catalog: Option<Arc<dyn Catalog>>,
    emitter: Option<Arc<dyn ActionEmitter>>,
    statuses: Option<Arc<dyn StatusRegistry>>,
}

impl CycleBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Store transactions are opened on.
    #[must_use]
    pub fn database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Entity lookups.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Action creation.
    #[must_use]
    pub fn emitter(mut self, emitter: Arc<dyn ActionEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Status constants.
    #[must_use]
    pub fn statuses(mut self, statuses: Arc<dyn StatusRegistry>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Build the worker alone, without starting a queue.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::MissingCollaborator` naming the first
    /// collaborator that was not supplied.
    pub fn build_worker(&self) -> Result<ErrataQueueWorker, SchedulerError> {
        let db = self.db.clone().ok_or(SchedulerError::MissingCollaborator("database"))?;
        let catalog = self.catalog.clone().ok_or(SchedulerError::MissingCollaborator("catalog"))?;
        let emitter = self.emitter.clone().ok_or(SchedulerError::MissingCollaborator("emitter"))?;
        let statuses = self.statuses.clone().ok_or(SchedulerError::MissingCollaborator("statuses"))?;
        Ok(ErrataQueueWorker::new(db, catalog, emitter, statuses)
            .with_notification_delay_minutes(self.config.notification_delay_minutes))
    }

    /// Validate the configuration, build the worker, and start the queue.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::MissingCollaborator`,
    /// `SchedulerError::InvalidConfig`, or `SchedulerError::WorkerSpawn`.
    pub fn build(self) -> Result<ErrataQueueCycle, SchedulerError> {
        let worker = self.build_worker()?;
        let db = self.db.ok_or(SchedulerError::MissingCollaborator("database"))?;
        ErrataQueueCycle::new(&self.config, db, worker)
    }
}
