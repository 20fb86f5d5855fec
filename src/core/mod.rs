//! Core scheduling types: the bounded task queue, the errata worker, and the
//! ports they consume.

pub mod cycle;
pub mod error;
pub mod model;
pub mod ports;
pub mod rows;
pub mod session;
pub mod task_queue;
pub mod worker;

pub use cycle::{CycleReport, ErrataQueueCycle};
pub use error::{AppResult, EmitError, SchedulerError, StoreError, WorkerError};
pub use model::{
    ActionHandle, ActionId, ActionStatus, Channel, ChannelId, Errata, ErrataId, ItemKey, Org,
    OrgId, ServerId, WorkItem,
};
pub use ports::{ActionEmitter, Catalog, Database, StatusRegistry, Transaction};
pub use session::SessionScope;
pub use task_queue::{QueueJob, QueueStats, SlotLease, TaskQueue};
pub use worker::{
    ErrataJob, ErrataQueueWorker, LoadOutcome, MissingReference, WorkOutcome, WorkReport,
};
