//! Mutation context
//!
//! Every field of one mutation operation writes through the same
//! [`MutationContext`]. The transaction is opened on the first statement and
//! closed exactly once by [`MutationContext::finalize`]: committed when no
//! field reported an error, rolled back otherwise.
//!
//! Each field's writes sit behind a savepoint taken before its first
//! statement. A failed field returns to that savepoint, so the fields after
//! it still run against a usable transaction, while the recorded error keeps
//! the final outcome a rollback.
//!
//! The transaction handle and both flags sit behind one async mutex, so a
//! statement, a `mark_error` and a `finalize` never interleave.

use crate::core::error::{EngineError, StorageFailure};
use crate::core::executor::{Executor, QuerySource, Transaction, WriteResult};
use crate::core::planner::Statement;
use crate::core::value::Row;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How the operation's transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    RolledBack,
    /// No statement ran, so no transaction was opened
    Untouched,
}

struct ContextState {
    tx: Option<Box<dyn Transaction>>,
    errored: bool,
    outcome: Option<Outcome>,
    field: Option<FieldScope>,
    fields_started: u64,
}

/// Savepoint of the field currently writing; set lazily on its first statement
struct FieldScope {
    savepoint: String,
    set: bool,
}

/// Shared transaction and error flag for one mutation operation
pub struct MutationContext {
    executor: Arc<dyn Executor>,
    state: Mutex<ContextState>,
}

impl MutationContext {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            state: Mutex::new(ContextState {
                tx: None,
                errored: false,
                outcome: None,
                field: None,
                fields_started: 0,
            }),
        }
    }

    /// Run a read statement inside the shared transaction
    pub async fn query(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
        let mut state = self.state.lock().await;
        let tx = self.open(&mut state).await?;
        tx.query(statement).await
    }

    /// Run a write statement inside the shared transaction
    pub async fn exec(&self, statement: &Statement) -> Result<WriteResult, StorageFailure> {
        let mut state = self.state.lock().await;
        let tx = self.open(&mut state).await?;
        tx.exec(statement).await
    }

    async fn open<'s>(
        &self,
        state: &'s mut ContextState,
    ) -> Result<&'s mut Box<dyn Transaction>, StorageFailure> {
        if state.outcome.is_some() {
            return Err(StorageFailure::other("mutation context is already finalized"));
        }
        if state.tx.is_none() {
            tracing::debug!("beginning mutation transaction");
            state.tx = Some(self.executor.begin().await?);
        }

        let ContextState { tx, field, .. } = state;
        let tx = tx
            .as_mut()
            .ok_or_else(|| StorageFailure::other("transaction unavailable"))?;
        if let Some(scope) = field.as_mut().filter(|scope| !scope.set) {
            tx.savepoint(&scope.savepoint).await?;
            scope.set = true;
        }
        Ok(tx)
    }

    /// Open a savepoint scope for the next field's writes
    pub async fn begin_field(&self) {
        let mut state = self.state.lock().await;
        state.fields_started += 1;
        state.field = Some(FieldScope {
            savepoint: format!("relgraph_field_{}", state.fields_started),
            set: false,
        });
    }

    /// Close the current field's scope: keep its writes, or undo them back to
    /// its savepoint
    pub async fn end_field(&self, succeeded: bool) -> Result<(), StorageFailure> {
        let mut state = self.state.lock().await;
        let Some(scope) = state.field.take() else {
            return Ok(());
        };
        if !scope.set || state.outcome.is_some() {
            return Ok(());
        }
        let Some(tx) = state.tx.as_mut() else {
            return Ok(());
        };

        if succeeded {
            tx.release_savepoint(&scope.savepoint).await
        } else {
            tracing::debug!(savepoint = %scope.savepoint, "undoing failed mutation field");
            tx.rollback_to_savepoint(&scope.savepoint).await
        }
    }

    /// Force the final outcome to be a rollback
    pub async fn mark_error(&self) {
        let mut state = self.state.lock().await;
        state.errored = true;
    }

    pub async fn is_errored(&self) -> bool {
        self.state.lock().await.errored
    }

    /// Commit or roll back; later calls return the first call's outcome
    pub async fn finalize(&self) -> Result<Outcome, EngineError> {
        let mut state = self.state.lock().await;
        if let Some(outcome) = state.outcome {
            return Ok(outcome);
        }

        let Some(tx) = state.tx.take() else {
            state.outcome = Some(Outcome::Untouched);
            return Ok(Outcome::Untouched);
        };

        if state.errored {
            state.outcome = Some(Outcome::RolledBack);
            tracing::debug!("rolling back mutation transaction");
            tx.rollback().await?;
            return Ok(Outcome::RolledBack);
        }

        match tx.commit().await {
            Ok(()) => {
                state.outcome = Some(Outcome::Committed);
                tracing::debug!("committed mutation transaction");
                Ok(Outcome::Committed)
            }
            Err(failure) => {
                // A failed commit leaves nothing applied
                state.outcome = Some(Outcome::RolledBack);
                tracing::warn!(error = %failure, "mutation commit failed");
                Err(failure.into())
            }
        }
    }
}

#[async_trait]
impl QuerySource for MutationContext {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
        self.query(statement).await
    }
}
