//! Request-scoped batch state
//!
//! One [`RequestBatchState`] lives for exactly one top-level operation. It
//! records which parent rows were produced together (sibling groups) and
//! caches the grouped child fetch for each relationship batch, so every
//! sibling resolver after the first is served without I/O.
//!
//! Each cache entry is a [`tokio::sync::OnceCell`]: concurrent first accesses
//! to the same [`BatchKey`] wait on the one running computation instead of
//! issuing their own query.

use crate::core::error::EngineError;
use crate::core::value::{Row, SqlValue, tuple_key};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;

/// Identity of a sibling group of parent rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentKey {
    /// Table the rows belong to
    pub table: String,
    /// Field that produced them (root list field or qualified relationship)
    pub field: String,
    /// Canonical arguments used to produce them
    pub args: String,
}

impl ParentKey {
    pub fn new(table: impl Into<String>, field: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            args: args.into(),
        }
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.table, self.field, self.args)
    }
}

/// Identity of one relationship batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Qualified relationship name (`owner.field`)
    pub relationship: String,
    /// Requested column set
    pub selection: String,
    /// Canonical pagination/filter/sort arguments
    pub args: String,
    pub parent_group: ParentKey,
}

/// Child rows of a whole sibling group, partitioned by owning parent
#[derive(Debug, Default)]
pub struct GroupedRows {
    groups: HashMap<String, Vec<Row>>,
    /// Sibling group the child rows were registered under
    pub child_group: Option<ParentKey>,
}

impl GroupedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to its parent's partition, keeping fetch order
    pub fn push(&mut self, parent: &[SqlValue], row: Row) {
        self.groups.entry(tuple_key(parent)).or_default().push(row);
    }

    /// Rows of one parent, in the relation's sort order
    pub fn rows_for(&self, parent: &[SqlValue]) -> &[Row] {
        self.groups
            .get(&tuple_key(parent))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of parents with at least one row
    pub fn parent_count(&self) -> usize {
        self.groups.len()
    }

    pub fn row_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    pub hits: u64,
    pub misses: u64,
}

type CacheCell = Arc<OnceCell<Arc<GroupedRows>>>;

/// Parent registries and grouped-result cache for one operation
#[derive(Default)]
pub struct RequestBatchState {
    parent_rows: RwLock<HashMap<ParentKey, Arc<Vec<Row>>>>,
    batch_cache: Mutex<HashMap<BatchKey, CacheCell>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RequestBatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) the sibling group for `key`
    pub fn set_parent_rows(&self, key: ParentKey, rows: Vec<Row>) -> Result<(), EngineError> {
        let mut parents = self
            .parent_rows
            .write()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        parents.insert(key, Arc::new(rows));
        Ok(())
    }

    pub fn get_parent_rows(&self, key: &ParentKey) -> Result<Option<Arc<Vec<Row>>>, EngineError> {
        let parents = self
            .parent_rows
            .read()
            .map_err(|e| EngineError::Internal(format!("Failed to acquire read lock: {}", e)))?;
        Ok(parents.get(key).cloned())
    }

    /// Return the cached grouped result for `key`, running `compute` on a miss
    ///
    /// `compute` runs at most once per key even when several resolvers ask
    /// concurrently. A failed computation leaves the entry empty, so the next
    /// caller retries.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: BatchKey,
        compute: F,
    ) -> Result<Arc<GroupedRows>, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GroupedRows, EngineError>>,
    {
        let cell = {
            let mut cache = self
                .batch_cache
                .lock()
                .map_err(|e| EngineError::Internal(format!("Failed to acquire cache lock: {}", e)))?;
            cache.entry(key.clone()).or_default().clone()
        };

        let ran = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                ran.store(true, Ordering::SeqCst);
                compute().await.map(Arc::new)
            })
            .await?
            .clone();

        if ran.load(Ordering::SeqCst) {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                relationship = %key.relationship,
                parent_group = %key.parent_group,
                rows = result.row_count(),
                "batch cache miss"
            );
        } else {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(relationship = %key.relationship, "batch cache hit");
        }

        Ok(result)
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}
