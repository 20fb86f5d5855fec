//! Error types for the errata queue scheduler.

use thiserror::Error;

use crate::core::rows::QueryName;

/// Errors produced by the task queue and the owning scheduler cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The task queue has been shut down and accepts no more work.
    #[error("task queue has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
    /// A required collaborator was not supplied to a builder.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    /// Store failure while selecting candidate work items.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Internal failure (join error, closed channel, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by a store executor or transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// A result row did not carry the columns the query role promises.
    #[error("malformed row from `{query}`: {reason}")]
    MalformedRow {
        /// Query whose result failed validation.
        query: QueryName,
        /// Decoder message naming the missing or mistyped column.
        reason: String,
    },
    /// Parameters could not be encoded or decoded for a query.
    #[error("invalid parameters for `{query}`: {reason}")]
    InvalidParams {
        /// Query the parameters were built for.
        query: QueryName,
        /// Encoder/decoder message.
        reason: String,
    },
    /// The store does not know how to execute this query role.
    #[error("unsupported query `{0}`")]
    UnsupportedQuery(QueryName),
    /// The transaction was used after it had been closed.
    #[error("transaction already closed")]
    Closed,
}

/// Errors surfaced by an action emitter.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The emitter refused to create or persist the action.
    #[error("action rejected: {0}")]
    Rejected(String),
    /// Persisting the action through the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures inside one worker lifecycle; never escapes `ErrataQueueWorker::run`.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Store or transaction failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Action emitter failure.
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_row_display_names_query() {
        let err = StoreError::MalformedRow {
            query: QueryName::FindAutoupdateServers,
            reason: "missing field `server_id`".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed row from `errata_queue_find_autoupdate_servers`: missing field `server_id`"
        );
    }

    #[test]
    fn test_worker_error_is_transparent() {
        let err = WorkerError::from(EmitError::Rejected("org over quota".into()));
        assert_eq!(err.to_string(), "action rejected: org over quota");

        let err = WorkerError::from(StoreError::Backend("connection reset".into()));
        assert_eq!(err.to_string(), "backend error: connection reset");
    }

    #[test]
    fn test_scheduler_error_from_store() {
        let err: SchedulerError = StoreError::Closed.into();
        assert!(matches!(err, SchedulerError::Store(StoreError::Closed)));
        assert_eq!(err.to_string(), "store error: transaction already closed");
    }
}
