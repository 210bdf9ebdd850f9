//! Unit of work: atomic commit of a session's tracked changes.
//!
//! # Responsibility
//! - Write every pending tracked change inside one SQLite transaction.
//! - Turn the outcome into a `TransactionResult` instead of an error.
//!
//! # Invariants
//! - One commit attempt per transaction; a finished unit of work returns its
//!   existing result until `begin_transaction` resets it.
//! - After a successful commit no entity remains tracked.
//! - After a failed commit the database is unchanged and tracked entries
//!   keep their states.

use crate::db::is_constraint_violation;
use crate::error::{format_error_chain, single_line, DataError, DataResult};
use crate::model::entity::Entity;
use crate::repo::entity_store::EntityStore;
use crate::session::Session;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Lifecycle of one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    InTransaction,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InTransaction => "in_transaction",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Outcome of exactly one commit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    success: bool,
    message: String,
}

impl TransactionResult {
    fn committed(changes: usize) -> Self {
        Self {
            success: true,
            message: format!("Transaction committed: {changes} change(s) saved."),
        }
    }

    fn rolled_back(err: &DataError) -> Self {
        let reason = if err.is_persistence() {
            "a persistence failure"
        } else {
            "an unexpected error"
        };
        Self {
            success: false,
            message: format!(
                "Transaction rolled back due to {reason}:\n{}",
                format_error_chain(err)
            ),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Batches a session's tracked mutations into one transaction.
pub struct UnitOfWork<'s> {
    session: &'s Session,
    state: TransactionState,
    result: Option<TransactionResult>,
}

impl<'s> UnitOfWork<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            state: TransactionState::Idle,
            result: None,
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Store for `E` bound to the same session.
    pub fn store<E: Entity>(&self) -> DataResult<EntityStore<'s, E>> {
        EntityStore::new(self.session)
    }

    /// Resets to `Idle` and clears the previous result.
    ///
    /// The SQLite transaction itself is opened by `commit`.
    pub fn begin_transaction(&mut self) {
        self.state = TransactionState::Idle;
        self.result = None;
    }

    /// Writes every pending change atomically.
    ///
    /// Never returns an error: failures roll back and are described by the
    /// returned result. On a finished unit of work the existing result is
    /// returned and nothing is written.
    pub fn commit(&mut self) -> &TransactionResult {
        let result = match self.result.take() {
            Some(existing) => {
                warn!(
                    "event=uow_commit module=service status=skipped session_id={} state={} reason=already_finished",
                    self.session.id(),
                    self.state.as_str()
                );
                existing
            }
            None => self.attempt_commit(),
        };
        self.result.insert(result)
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn result(&self) -> Option<&TransactionResult> {
        self.result.as_ref()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.session.has_changes()
    }

    fn attempt_commit(&mut self) -> TransactionResult {
        let started_at = Instant::now();
        let session = self.session;
        self.state = TransactionState::InTransaction;
        info!(
            "event=uow_commit module=service status=start session_id={}",
            session.id()
        );

        let tx = match session.connection().unchecked_transaction() {
            Ok(tx) => tx,
            Err(err) => return self.roll_back(started_at, classify_commit(err)),
        };

        let changes = match session.flush(&tx) {
            Ok(changes) => changes,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=uow_rollback module=service status=error session_id={} error={}",
                        session.id(),
                        rollback_err
                    );
                }
                return self.roll_back(started_at, err);
            }
        };

        // A failed COMMIT drops the transaction, which rolls it back.
        if let Err(err) = tx.commit() {
            return self.roll_back(started_at, classify_commit(err));
        }

        session.detach_all();
        self.state = TransactionState::Committed;
        info!(
            "event=uow_commit module=service status=ok session_id={} duration_ms={} changes={}",
            session.id(),
            started_at.elapsed().as_millis(),
            changes
        );
        TransactionResult::committed(changes)
    }

    fn roll_back(&mut self, started_at: Instant, err: DataError) -> TransactionResult {
        self.state = TransactionState::RolledBack;
        error!(
            "event=uow_rollback module=service status=ok session_id={} duration_ms={} error_code={} error={}",
            self.session.id(),
            started_at.elapsed().as_millis(),
            if err.is_persistence() {
                "persistence_failure"
            } else {
                "unexpected_error"
            },
            single_line(&err)
        );
        TransactionResult::rolled_back(&err)
    }
}

fn classify_commit(err: rusqlite::Error) -> DataError {
    let message = "failed to commit transaction".to_string();
    if is_constraint_violation(&err) {
        DataError::Persistence {
            message,
            source: Box::new(err),
        }
    } else {
        DataError::Unexpected {
            message,
            source: Some(Box::new(err)),
        }
    }
}
