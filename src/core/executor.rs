//! Executor interface
//!
//! Runs statements produced by a [`Planner`](crate::core::planner::Planner),
//! either directly or inside a transaction. Failures are reported as raw
//! [`StorageFailure`]s; classification happens in the caller.

use crate::core::error::StorageFailure;
use crate::core::planner::Statement;
use crate::core::value::{Row, SqlValue};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a write statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResult {
    pub rows_affected: u64,
    /// Storage-generated key of the inserted row, when there is one
    pub last_insert_id: Option<SqlValue>,
}

/// Runs statements against one database
#[async_trait]
pub trait Executor: Send + Sync {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure>;

    async fn exec(&self, statement: &Statement) -> Result<WriteResult, StorageFailure>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageFailure>;
}

/// An open transaction; exactly one statement in flight at a time
#[async_trait]
pub trait Transaction: Send {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageFailure>;

    async fn exec(&mut self, statement: &Statement) -> Result<WriteResult, StorageFailure>;

    async fn savepoint(&mut self, name: &str) -> Result<(), StorageFailure>;

    /// Undo everything since `name` and leave the transaction usable again;
    /// the savepoint itself survives
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StorageFailure>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StorageFailure>;

    async fn commit(self: Box<Self>) -> Result<(), StorageFailure>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageFailure>;
}

/// Where read statements run: straight against the executor, or through a
/// mutation's shared transaction so reads observe the operation's own writes
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure>;
}

/// Reads outside any transaction
pub struct DirectSource {
    executor: Arc<dyn Executor>,
}

impl DirectSource {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl QuerySource for DirectSource {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
        self.executor.query(statement).await
    }
}
