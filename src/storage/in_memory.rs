//! In-memory backend for testing and development
//!
//! [`InMemoryDatabase`] is both the [`Planner`] and the [`Executor`]: planned
//! statements carry a serialized [`MemoryOp`] instead of SQL text, and the
//! executor interprets it against tables held in memory.
//!
//! It enforces the same constraints a relational database would and reports
//! them with PostgreSQL's SQLSTATE codes, so mutation error classification
//! behaves identically on both backends. Every executed statement is
//! recorded in a log that tests use to count queries.

use crate::core::error::{EngineError, StorageFailure, sqlstate};
use crate::core::executor::{Executor, Transaction, WriteResult};
use crate::core::planner::{
    AggregateFunction, AggregateQuery, ConnectionQuery, Planner, SortDirection, SortKey, Statement,
    parent_key_column,
};
use crate::core::schema::{ColumnType, Index, RelationshipKind, Schema, Table};
use crate::core::value::{Row, SqlValue, project, tuple_key};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

const UNDEFINED_COLUMN: &str = "42703";
const UNDEFINED_TABLE: &str = "42P01";

/// Statement payload understood by the in-memory executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemoryOp {
    Select {
        query: ConnectionQuery,
        grouped: bool,
    },
    Aggregate(AggregateQuery),
    /// Rows whose `columns` equal `values`
    Lookup {
        table: String,
        columns: Vec<String>,
        values: Vec<SqlValue>,
        select: Vec<String>,
    },
    Insert {
        table: String,
        values: Row,
    },
    Update {
        table: String,
        key: Vec<SqlValue>,
        set: Row,
    },
    Delete {
        table: String,
        key: Vec<SqlValue>,
    },
}

impl MemoryOp {
    fn kind(&self) -> StatementKind {
        match self {
            MemoryOp::Select { grouped: false, .. } => StatementKind::Select,
            MemoryOp::Select { grouped: true, .. } => StatementKind::SelectBatch,
            MemoryOp::Aggregate(_) => StatementKind::Aggregate,
            MemoryOp::Lookup { .. } => StatementKind::Lookup,
            MemoryOp::Insert { .. } => StatementKind::Insert,
            MemoryOp::Update { .. } => StatementKind::Update,
            MemoryOp::Delete { .. } => StatementKind::Delete,
        }
    }

    fn table(&self) -> &str {
        match self {
            MemoryOp::Select { query, .. } => &query.table,
            MemoryOp::Aggregate(query) => &query.table,
            MemoryOp::Lookup { table, .. }
            | MemoryOp::Insert { table, .. }
            | MemoryOp::Update { table, .. }
            | MemoryOp::Delete { table, .. } => table,
        }
    }

    fn decode(statement: &Statement) -> Result<Self, StorageFailure> {
        serde_json::from_str(&statement.sql)
            .map_err(|e| StorageFailure::other(format!("malformed in-memory statement: {}", e)))
    }

    fn into_statement(self) -> Result<Statement, EngineError> {
        let sql = serde_json::to_string(&self)
            .map_err(|e| EngineError::Internal(format!("failed to encode statement: {}", e)))?;
        Ok(Statement::new(sql, Vec::new()))
    }
}

/// Kind of a logged statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    /// Grouped connection fetch for a whole sibling group
    SelectBatch,
    Aggregate,
    Lookup,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    RollbackToSavepoint,
    ReleaseSavepoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    pub kind: StatementKind,
    /// Empty for transaction control
    pub table: String,
    pub in_transaction: bool,
}

// =============================================================================
// Table storage
// =============================================================================

#[derive(Debug, Clone, Default)]
struct TableData {
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
struct Store {
    tables: HashMap<String, TableData>,
}

impl Store {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }
}

fn undefined_column(table: &str, column: &str) -> StorageFailure {
    StorageFailure::new(
        UNDEFINED_COLUMN,
        format!("column \"{}\" of relation \"{}\" does not exist", column, table),
    )
}

fn values_match(a: &[SqlValue], b: &[SqlValue]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| !x.is_null() && !y.is_null() && x.same_as(y))
}

fn compare_rows(sort: &[SortKey], a: &Row, b: &Row) -> Ordering {
    for key in sort {
        let left = a.get(&key.column).unwrap_or(&SqlValue::Null);
        let right = b.get(&key.column).unwrap_or(&SqlValue::Null);
        let ord = directed(left.total_cmp(right), key.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Position of `row` relative to a boundary tuple under `sort`
fn compare_to_boundary(sort: &[SortKey], row: &Row, boundary: &[SqlValue]) -> Ordering {
    for (key, bound) in sort.iter().zip(boundary) {
        let value = row.get(&key.column).unwrap_or(&SqlValue::Null);
        let ord = directed(value.total_cmp(bound), key.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

// =============================================================================
// Reads
// =============================================================================

struct Reader<'a> {
    schema: &'a Schema,
    store: &'a Store,
}

impl<'a> Reader<'a> {
    fn table(&self, name: &str) -> Result<&'a Table, StorageFailure> {
        self.schema.table(name).ok_or_else(|| {
            StorageFailure::new(UNDEFINED_TABLE, format!("relation \"{}\" does not exist", name))
        })
    }

    /// Filtered rows of `table`, grouped by owning parent key
    ///
    /// Without a scope everything lands in one group keyed by the empty tuple.
    fn matching(
        &self,
        table: &Table,
        filter: &[(String, SqlValue)],
        scope: Option<&crate::core::planner::RelationScope>,
    ) -> Result<IndexMap<String, (Vec<SqlValue>, Vec<&'a Row>)>, StorageFailure> {
        for (column, _) in filter {
            if !table.has_column(column) {
                return Err(undefined_column(&table.name, column));
            }
        }
        let passes = |row: &Row| {
            filter.iter().all(|(column, expected)| {
                let actual = row.get(column).unwrap_or(&SqlValue::Null);
                if expected.is_null() {
                    actual.is_null()
                } else {
                    !actual.is_null() && actual.same_as(expected)
                }
            })
        };

        let rows = self.store.rows(&table.name);
        let mut groups: IndexMap<String, (Vec<SqlValue>, Vec<&'a Row>)> = IndexMap::new();

        let Some(scope) = scope else {
            groups.insert(String::new(), (Vec::new(), rows.iter().filter(|r| passes(*r)).collect()));
            return Ok(groups);
        };

        for key in &scope.parent_keys {
            groups
                .entry(tuple_key(key))
                .or_insert_with(|| (key.clone(), Vec::new()));
        }

        match &scope.junction {
            None => {
                for row in rows.iter().filter(|r| passes(*r)) {
                    let key = project(row, &scope.key_columns)
                        .ok_or_else(|| undefined_column(&table.name, &scope.key_columns.join(",")))?;
                    if let Some((_, members)) = groups.get_mut(&tuple_key(&key)) {
                        members.push(row);
                    }
                }
            }
            Some(hop) => {
                let mut by_key: HashMap<String, Vec<&'a Row>> = HashMap::new();
                for row in rows.iter().filter(|r| passes(*r)) {
                    let key = project(row, &hop.remote_columns)
                        .ok_or_else(|| undefined_column(&table.name, &hop.remote_columns.join(",")))?;
                    by_key.entry(tuple_key(&key)).or_default().push(row);
                }
                for link in self.store.rows(&hop.table) {
                    let owner = project(link, &scope.key_columns)
                        .ok_or_else(|| undefined_column(&hop.table, &scope.key_columns.join(",")))?;
                    let Some((_, members)) = groups.get_mut(&tuple_key(&owner)) else {
                        continue;
                    };
                    let target = project(link, &hop.target_columns)
                        .ok_or_else(|| undefined_column(&hop.table, &hop.target_columns.join(",")))?;
                    if let Some(found) = by_key.get(&tuple_key(&target)) {
                        members.extend(found.iter().copied());
                    }
                }
            }
        }

        Ok(groups)
    }

    fn select(&self, query: &ConnectionQuery, grouped: bool) -> Result<Vec<Row>, StorageFailure> {
        let table = self.table(&query.table)?;
        for column in query.columns.iter().chain(query.sort.iter().map(|k| &k.column)) {
            if !table.has_column(column) {
                return Err(undefined_column(&table.name, column));
            }
        }

        let groups = self.matching(table, &query.filter, query.scope.as_ref())?;
        let page = |members: Vec<&'a Row>| {
            let mut members: Vec<&Row> = members
                .into_iter()
                .filter(|row| {
                    query.after.as_ref().is_none_or(|b| {
                        compare_to_boundary(&query.sort, row, b) == Ordering::Greater
                    }) && query.before.as_ref().is_none_or(|b| {
                        compare_to_boundary(&query.sort, row, b) == Ordering::Less
                    })
                })
                .collect();
            members.sort_by(|a, b| compare_rows(&query.sort, a, b));
            if let Some(limit) = query.limit {
                members.truncate(limit);
            }
            members
        };
        let output = |row: &Row| -> Row {
            query
                .columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                .collect()
        };

        let mut result = Vec::new();
        if grouped {
            for (_, (owner, members)) in groups {
                for row in page(members) {
                    let mut out = output(row);
                    for (i, value) in owner.iter().enumerate() {
                        out.insert(parent_key_column(i), value.clone());
                    }
                    result.push(out);
                }
            }
        } else {
            let all: Vec<&Row> = groups.into_values().flat_map(|(_, members)| members).collect();
            result.extend(page(all).into_iter().map(output));
        }
        Ok(result)
    }

    fn aggregate(&self, query: &AggregateQuery) -> Result<Row, StorageFailure> {
        let table = self.table(&query.table)?;
        let groups = self.matching(table, &query.filter, query.scope.as_ref())?;
        let rows: Vec<&Row> = groups.into_values().flat_map(|(_, members)| members).collect();

        let mut result = Row::new();
        for function in &query.functions {
            let value = match function {
                AggregateFunction::Count => SqlValue::Int(rows.len() as i64),
                other => {
                    let column = other.column().unwrap_or_default();
                    let column_type = table
                        .column(column)
                        .ok_or_else(|| undefined_column(&table.name, column))?
                        .column_type;
                    let values: Vec<&SqlValue> = rows
                        .iter()
                        .filter_map(|r| r.get(column))
                        .filter(|v| !v.is_null())
                        .collect();
                    fold_aggregate(other, column_type, &values)
                }
            };
            result.insert(function.alias(), value);
        }
        Ok(result)
    }

    fn lookup(
        &self,
        table: &str,
        columns: &[String],
        values: &[SqlValue],
        select: &[String],
    ) -> Result<Vec<Row>, StorageFailure> {
        let table = self.table(table)?;
        for column in columns.iter().chain(select) {
            if !table.has_column(column) {
                return Err(undefined_column(&table.name, column));
            }
        }
        Ok(self
            .store
            .rows(&table.name)
            .iter()
            .filter(|row| project(row, columns).is_some_and(|key| values_match(&key, values)))
            .map(|row| {
                select
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                    .collect()
            })
            .collect())
    }
}

fn fold_aggregate(function: &AggregateFunction, column_type: ColumnType, values: &[&SqlValue]) -> SqlValue {
    if values.is_empty() {
        return SqlValue::Null;
    }
    let as_float = |v: &SqlValue| match v {
        SqlValue::Int(i) => *i as f64,
        SqlValue::Float(f) => *f,
        _ => 0.0,
    };
    match function {
        AggregateFunction::Count => SqlValue::Int(values.len() as i64),
        AggregateFunction::Sum(_) if column_type == ColumnType::Int => {
            SqlValue::Int(values.iter().filter_map(|v| v.as_int()).sum())
        }
        AggregateFunction::Sum(_) => SqlValue::Float(values.iter().map(|v| as_float(*v)).sum()),
        AggregateFunction::Avg(_) => {
            SqlValue::Float(values.iter().map(|v| as_float(*v)).sum::<f64>() / values.len() as f64)
        }
        AggregateFunction::Min(_) => values
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(SqlValue::Null),
        AggregateFunction::Max(_) => values
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(SqlValue::Null),
    }
}

// =============================================================================
// Writes
// =============================================================================

struct Writer<'a> {
    schema: &'a Schema,
    store: &'a mut Store,
}

impl<'a> Writer<'a> {
    fn writable(&self, name: &str) -> Result<&'a Table, StorageFailure> {
        let table = self.schema.table(name).ok_or_else(|| {
            StorageFailure::new(UNDEFINED_TABLE, format!("relation \"{}\" does not exist", name))
        })?;
        if table.read_only {
            return Err(StorageFailure::new(
                sqlstate::INSUFFICIENT_PRIVILEGE,
                format!("permission denied for table {}", table.name),
            ));
        }
        Ok(table)
    }

    fn insert(&mut self, table: &str, values: &Row) -> Result<WriteResult, StorageFailure> {
        let table = self.writable(table)?;
        for column in values.keys() {
            if !table.has_column(column) {
                return Err(undefined_column(&table.name, column));
            }
        }

        let data = self.store.tables.entry(table.name.clone()).or_default();
        let mut row = Row::new();
        let mut generated_key = None;
        for column in &table.columns {
            let value = match values.get(&column.name) {
                Some(value) => {
                    if column.generated
                        && let SqlValue::Int(id) = value
                    {
                        data.next_id = data.next_id.max(*id);
                    }
                    value.clone()
                }
                None if column.generated => {
                    let value = match column.column_type {
                        ColumnType::Uuid => SqlValue::Uuid(Uuid::new_v4()),
                        _ => {
                            data.next_id += 1;
                            SqlValue::Int(data.next_id)
                        }
                    };
                    generated_key = Some(value.clone());
                    value
                }
                None => column.default.clone().unwrap_or(SqlValue::Null),
            };
            row.insert(column.name.clone(), value);
        }

        self.check_row(table, &row, None)?;
        self.store
            .tables
            .entry(table.name.clone())
            .or_default()
            .rows
            .push(row);

        Ok(WriteResult {
            rows_affected: 1,
            last_insert_id: generated_key.filter(|_| table.primary_key.len() == 1),
        })
    }

    fn update(&mut self, table: &str, key: &[SqlValue], set: &Row) -> Result<WriteResult, StorageFailure> {
        let table = self.writable(table)?;
        for column in set.keys() {
            if !table.has_column(column) {
                return Err(undefined_column(&table.name, column));
            }
        }

        let Some(position) = self.position(table, key) else {
            return Ok(WriteResult::default());
        };
        let current = self.store.rows(&table.name)[position].clone();
        let mut updated = current.clone();
        for (column, value) in set {
            updated.insert(column.clone(), value.clone());
        }

        self.check_row(table, &updated, Some(position))?;
        self.check_unreferenced(table, &current, Some(&updated))?;

        if let Some(data) = self.store.tables.get_mut(&table.name) {
            data.rows[position] = updated;
        }
        Ok(WriteResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn delete(&mut self, table: &str, key: &[SqlValue]) -> Result<WriteResult, StorageFailure> {
        let table = self.writable(table)?;
        let Some(position) = self.position(table, key) else {
            return Ok(WriteResult::default());
        };
        let current = self.store.rows(&table.name)[position].clone();
        self.check_unreferenced(table, &current, None)?;

        if let Some(data) = self.store.tables.get_mut(&table.name) {
            data.rows.remove(position);
        }
        Ok(WriteResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn position(&self, table: &Table, key: &[SqlValue]) -> Option<usize> {
        self.store
            .rows(&table.name)
            .iter()
            .position(|row| project(row, &table.primary_key).is_some_and(|pk| values_match(&pk, key)))
    }

    /// Not-null, uniqueness and outgoing foreign keys of a candidate row
    fn check_row(&self, table: &Table, row: &Row, replacing: Option<usize>) -> Result<(), StorageFailure> {
        for column in &table.columns {
            if !column.nullable && row.get(&column.name).is_none_or(SqlValue::is_null) {
                return Err(StorageFailure::new(
                    sqlstate::NOT_NULL_VIOLATION,
                    format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        column.name, table.name
                    ),
                ));
            }
        }

        let primary = Index {
            name: format!("{}_pkey", table.name),
            columns: table.primary_key.clone(),
            unique: true,
            field: String::new(),
        };
        for index in std::iter::once(&primary).chain(table.indexes.iter().filter(|i| i.unique)) {
            let Some(key) = project(row, &index.columns) else {
                continue;
            };
            let duplicate = self
                .store
                .rows(&table.name)
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != replacing)
                .any(|(_, other)| project(other, &index.columns).is_some_and(|k| values_match(&k, &key)));
            if duplicate {
                return Err(StorageFailure::new(
                    sqlstate::UNIQUE_VIOLATION,
                    format!("duplicate key value violates unique constraint \"{}\"", index.name),
                ));
            }
        }

        for rel in table
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::ManyToOne)
        {
            let Some(key) = project(row, &rel.local_columns) else {
                continue;
            };
            if key.iter().any(SqlValue::is_null) {
                continue;
            }
            let exists = self
                .store
                .rows(&rel.target)
                .iter()
                .any(|target| project(target, &rel.remote_columns).is_some_and(|k| values_match(&k, &key)));
            if !exists {
                return Err(StorageFailure::new(
                    sqlstate::FOREIGN_KEY_VIOLATION,
                    format!(
                        "insert or update on table \"{}\" violates foreign key constraint \"{}_{}_fkey\"",
                        table.name,
                        table.name,
                        rel.local_columns.join("_")
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Restrict semantics: a row still referenced by a many-to-one elsewhere
    /// cannot be deleted or have its referenced columns changed
    fn check_unreferenced(&self, table: &Table, current: &Row, updated: Option<&Row>) -> Result<(), StorageFailure> {
        for referencing in self.schema.tables() {
            for rel in referencing
                .relationships
                .iter()
                .filter(|r| r.kind == RelationshipKind::ManyToOne && r.target == table.name)
            {
                let Some(key) = project(current, &rel.remote_columns) else {
                    continue;
                };
                if let Some(updated) = updated
                    && project(updated, &rel.remote_columns).is_some_and(|k| values_match(&k, &key))
                {
                    continue;
                }
                let referenced = self
                    .store
                    .rows(&referencing.name)
                    .iter()
                    .any(|r| project(r, &rel.local_columns).is_some_and(|k| values_match(&k, &key)));
                if referenced {
                    return Err(StorageFailure::new(
                        sqlstate::FOREIGN_KEY_VIOLATION,
                        format!(
                            "update or delete on table \"{}\" violates foreign key constraint \"{}_{}_fkey\" on table \"{}\"",
                            table.name,
                            referencing.name,
                            rel.local_columns.join("_"),
                            referencing.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn run_read(schema: &Schema, store: &Store, op: &MemoryOp) -> Result<Vec<Row>, StorageFailure> {
    let reader = Reader { schema, store };
    match op {
        MemoryOp::Select { query, grouped } => reader.select(query, *grouped),
        MemoryOp::Aggregate(query) => Ok(vec![reader.aggregate(query)?]),
        MemoryOp::Lookup {
            table,
            columns,
            values,
            select,
        } => reader.lookup(table, columns, values, select),
        _ => Err(StorageFailure::other("statement does not return rows")),
    }
}

fn run_write(schema: &Schema, store: &mut Store, op: &MemoryOp) -> Result<WriteResult, StorageFailure> {
    let mut writer = Writer { schema, store };
    match op {
        MemoryOp::Insert { table, values } => writer.insert(table, values),
        MemoryOp::Update { table, key, set } => writer.update(table, key, set),
        MemoryOp::Delete { table, key } => writer.delete(table, key),
        _ => Err(StorageFailure::other("statement is not a write")),
    }
}

// =============================================================================
// Database
// =============================================================================

/// In-memory relational database
///
/// Cheap to clone; clones share the same tables and statement log.
#[derive(Clone)]
pub struct InMemoryDatabase {
    schema: Arc<Schema>,
    store: Arc<RwLock<Store>>,
    log: Arc<Mutex<Vec<LoggedStatement>>>,
    /// Held by open transactions and direct writes, one writer at a time
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryDatabase {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            store: Arc::new(RwLock::new(Store::default())),
            log: Arc::new(Mutex::new(Vec::new())),
            writer: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Insert a row outside any transaction without logging it
    ///
    /// Returns the row's primary key.
    pub fn seed(&self, table: &str, values: Row) -> Result<Vec<SqlValue>, StorageFailure> {
        let mut store = self
            .store
            .write()
            .map_err(|e| StorageFailure::other(format!("Failed to acquire write lock: {}", e)))?;
        let result = Writer {
            schema: &self.schema,
            store: &mut store,
        }
        .insert(table, &values)?;

        let table = self.schema.table(table).ok_or_else(|| StorageFailure::other("unknown table"))?;
        match project(&values, &table.primary_key) {
            Some(key) => Ok(key),
            None => result
                .last_insert_id
                .map(|id| vec![id])
                .ok_or_else(|| StorageFailure::other("seeded row has no primary key")),
        }
    }

    /// Current contents of `table`, in insertion order
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StorageFailure> {
        let store = self
            .store
            .read()
            .map_err(|e| StorageFailure::other(format!("Failed to acquire read lock: {}", e)))?;
        Ok(store.rows(table).to_vec())
    }

    /// Every statement executed so far
    pub fn statements(&self) -> Vec<LoggedStatement> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Number of executed statements of `kind`
    pub fn count(&self, kind: StatementKind) -> usize {
        self.statements().iter().filter(|s| s.kind == kind).count()
    }

    /// Number of executed statements of `kind` against `table`
    pub fn count_on(&self, kind: StatementKind, table: &str) -> usize {
        self.statements()
            .iter()
            .filter(|s| s.kind == kind && s.table == table)
            .count()
    }

    pub fn clear_statements(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    fn record(&self, kind: StatementKind, table: &str, in_transaction: bool) {
        tracing::trace!(?kind, table, in_transaction, "in-memory statement");
        if let Ok(mut log) = self.log.lock() {
            log.push(LoggedStatement {
                kind,
                table: table.to_string(),
                in_transaction,
            });
        }
    }

    fn snapshot(&self) -> Result<Store, StorageFailure> {
        self.store
            .read()
            .map(|store| store.clone())
            .map_err(|e| StorageFailure::other(format!("Failed to acquire read lock: {}", e)))
    }
}

impl Planner for InMemoryDatabase {
    fn plan_connection(&self, query: &ConnectionQuery) -> Result<Statement, EngineError> {
        MemoryOp::Select {
            query: query.clone(),
            grouped: false,
        }
        .into_statement()
    }

    fn plan_connection_batch(&self, query: &ConnectionQuery) -> Result<Statement, EngineError> {
        if query.scope.is_none() {
            return Err(EngineError::Internal(
                "grouped connection requires a relation scope".to_string(),
            ));
        }
        MemoryOp::Select {
            query: query.clone(),
            grouped: true,
        }
        .into_statement()
    }

    fn plan_aggregate(&self, query: &AggregateQuery) -> Result<Statement, EngineError> {
        MemoryOp::Aggregate(query.clone()).into_statement()
    }

    fn plan_insert(&self, table: &Table, values: &Row) -> Result<Statement, EngineError> {
        MemoryOp::Insert {
            table: table.name.clone(),
            values: values.clone(),
        }
        .into_statement()
    }

    fn plan_update(&self, table: &Table, key: &[SqlValue], set: &Row) -> Result<Statement, EngineError> {
        MemoryOp::Update {
            table: table.name.clone(),
            key: key.to_vec(),
            set: set.clone(),
        }
        .into_statement()
    }

    fn plan_delete(&self, table: &Table, key: &[SqlValue]) -> Result<Statement, EngineError> {
        MemoryOp::Delete {
            table: table.name.clone(),
            key: key.to_vec(),
        }
        .into_statement()
    }

    fn plan_unique_key_lookup(
        &self,
        table: &Table,
        index: &Index,
        values: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError> {
        MemoryOp::Lookup {
            table: table.name.clone(),
            columns: index.columns.clone(),
            values: values.to_vec(),
            select: columns.to_vec(),
        }
        .into_statement()
    }

    fn plan_table_by_pk(
        &self,
        table: &Table,
        key: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError> {
        MemoryOp::Lookup {
            table: table.name.clone(),
            columns: table.primary_key.clone(),
            values: key.to_vec(),
            select: columns.to_vec(),
        }
        .into_statement()
    }
}

#[async_trait]
impl Executor for InMemoryDatabase {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
        let op = MemoryOp::decode(statement)?;
        self.record(op.kind(), op.table(), false);
        let store = self
            .store
            .read()
            .map_err(|e| StorageFailure::other(format!("Failed to acquire read lock: {}", e)))?;
        run_read(&self.schema, &store, &op)
    }

    async fn exec(&self, statement: &Statement) -> Result<WriteResult, StorageFailure> {
        let op = MemoryOp::decode(statement)?;
        let _writer = self.writer.lock().await;
        self.record(op.kind(), op.table(), false);
        let mut store = self
            .store
            .write()
            .map_err(|e| StorageFailure::other(format!("Failed to acquire write lock: {}", e)))?;
        // Statements are atomic: apply to a copy, publish on success
        let mut working = store.clone();
        let result = run_write(&self.schema, &mut working, &op)?;
        *store = working;
        Ok(result)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageFailure> {
        let guard = self.writer.clone().lock_owned().await;
        self.record(StatementKind::Begin, "", true);
        Ok(Box::new(MemoryTransaction {
            snapshot: self.snapshot()?,
            savepoints: Vec::new(),
            db: self.clone(),
            _writer: guard,
        }))
    }
}

/// Snapshot transaction: statements run against a private copy that
/// replaces the shared tables on commit
struct MemoryTransaction {
    db: InMemoryDatabase,
    snapshot: Store,
    /// Named copies of `snapshot`, innermost last
    savepoints: Vec<(String, Store)>,
    _writer: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn savepoint_position(&self, name: &str) -> Result<usize, StorageFailure> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| {
                StorageFailure::new(sqlstate::INVALID_SAVEPOINT, format!("savepoint \"{}\" does not exist", name))
            })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
        let op = MemoryOp::decode(statement)?;
        self.db.record(op.kind(), op.table(), true);
        run_read(&self.db.schema, &self.snapshot, &op)
    }

    async fn exec(&mut self, statement: &Statement) -> Result<WriteResult, StorageFailure> {
        let op = MemoryOp::decode(statement)?;
        self.db.record(op.kind(), op.table(), true);
        let mut working = self.snapshot.clone();
        let result = run_write(&self.db.schema, &mut working, &op)?;
        self.snapshot = working;
        Ok(result)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
        self.db.record(StatementKind::Savepoint, "", true);
        self.savepoints.push((name.to_string(), self.snapshot.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
        self.db.record(StatementKind::RollbackToSavepoint, "", true);
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position + 1);
        self.snapshot = self.savepoints[position].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
        self.db.record(StatementKind::ReleaseSavepoint, "", true);
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageFailure> {
        let this = *self;
        this.db.record(StatementKind::Commit, "", true);
        let mut store = this
            .db
            .store
            .write()
            .map_err(|e| StorageFailure::other(format!("Failed to acquire write lock: {}", e)))?;
        *store = this.snapshot;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageFailure> {
        self.db.record(StatementKind::Rollback, "", true);
        Ok(())
    }
}
