//! Scoped transaction guard.
//!
//! A `SessionScope` holds at most one open [`Transaction`]. `tx()` begins one
//! on first use and reuses it afterwards; the commit/rollback helpers always
//! close it again. Dropping the scope closes whatever is still open, so every
//! exit path of a worker releases its transaction.

use std::sync::Arc;

use tracing::warn;

use crate::core::error::StoreError;
use crate::core::ports::{Database, Transaction};

/// Begin-or-reuse wrapper around a database transaction.
pub struct SessionScope {
    db: Arc<dyn Database>,
    tx: Option<Box<dyn Transaction>>,
}

impl SessionScope {
    /// Create a scope with no open transaction.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, tx: None }
    }

    /// Whether a transaction is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// The open transaction, beginning one if needed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if a new transaction cannot be opened.
    pub fn tx(&mut self) -> Result<&mut (dyn Transaction + 'static), StoreError> {
        if self.tx.is_none() {
            self.tx = Some(self.db.begin()?);
        }
        match self.tx.as_deref_mut() {
            Some(tx) => Ok(tx),
            None => Err(StoreError::Closed),
        }
    }

    /// Commit and close the open transaction. No-op when nothing is open.
    ///
    /// # Errors
    ///
    /// Returns the commit failure; the transaction is closed either way.
    pub fn commit_and_close(&mut self) -> Result<(), StoreError> {
        let Some(mut tx) = self.tx.take() else {
            return Ok(());
        };
        let result = tx.commit();
        tx.close();
        result
    }

    /// Roll back and close the open transaction. No-op when nothing is open.
    pub fn rollback_and_close(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            if let Err(e) = tx.rollback() {
                warn!(error = %e, "rollback failed; closing transaction anyway");
            }
            tx.close();
        }
    }

    /// Close the open transaction without committing.
    pub fn close(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            tx.close();
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rows::{QueryName, QueryParams, Row};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<&'static str>>,
    }

    struct RecordingTx {
        journal: Arc<Journal>,
    }

    impl Transaction for RecordingTx {
        fn select(&mut self, _query: QueryName, _params: &QueryParams) -> Result<Vec<Row>, StoreError> {
            self.journal.events.lock().push("select");
            Ok(Vec::new())
        }

        fn update(&mut self, _query: QueryName, _params: &QueryParams) -> Result<u64, StoreError> {
            self.journal.events.lock().push("update");
            Ok(1)
        }

        fn commit(&mut self) -> Result<(), StoreError> {
            self.journal.events.lock().push("commit");
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), StoreError> {
            self.journal.events.lock().push("rollback");
            Ok(())
        }

        fn close(&mut self) {
            self.journal.events.lock().push("close");
        }
    }

    struct RecordingDb {
        journal: Arc<Journal>,
    }

    impl Database for RecordingDb {
        fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
            self.journal.events.lock().push("begin");
            Ok(Box::new(RecordingTx {
                journal: Arc::clone(&self.journal),
            }))
        }
    }

    fn scope() -> (SessionScope, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let db = Arc::new(RecordingDb {
            journal: Arc::clone(&journal),
        });
        (SessionScope::new(db), journal)
    }

    #[test]
    fn test_tx_is_reused_until_closed() {
        let (mut scope, journal) = scope();
        scope.tx().unwrap().update(QueryName::MarkInProgress, &QueryParams::default()).unwrap();
        scope.tx().unwrap().select(QueryName::FindCandidates, &QueryParams::default()).unwrap();
        scope.commit_and_close().unwrap();
        assert!(!scope.is_open());

        assert_eq!(*journal.events.lock(), vec!["begin", "update", "select", "commit", "close"]);
    }

    #[test]
    fn test_commit_without_open_tx_is_noop() {
        let (mut scope, journal) = scope();
        scope.commit_and_close().unwrap();
        scope.rollback_and_close();
        assert!(journal.events.lock().is_empty());
    }

    #[test]
    fn test_drop_closes_open_tx() {
        let (mut scope, journal) = scope();
        scope.tx().unwrap();
        drop(scope);
        assert_eq!(*journal.events.lock(), vec!["begin", "close"]);
    }

    #[test]
    fn test_rollback_closes() {
        let (mut scope, journal) = scope();
        scope.tx().unwrap();
        scope.rollback_and_close();
        assert_eq!(*journal.events.lock(), vec!["begin", "rollback", "close"]);
    }
}
