//! Create / update / delete orchestration
//!
//! Each operation is a single forward pass with no retries. Every statement
//! runs through the shared [`MutationContext`]; any failure marks the context
//! so the whole operation rolls back, and is handed back to the caller as a
//! [`MutationFailure`] to be turned into a payload (typed) or propagated
//! (fatal).

use crate::core::error::{MutationError, MutationFailure, classify};
use crate::core::node_id::NodeId;
use crate::core::planner::Planner;
use crate::core::schema::{Relationship, RelationshipKind, Schema, Table};
use crate::core::value::{Row, SqlValue, project};
use crate::mutation::connect::resolve_connect;
use crate::mutation::context::MutationContext;
use crate::mutation::input::{ConnectInput, Depth, PartitionedInput, partition_set};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Key of a deleted row
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedRow {
    /// Opaque id of the row that no longer exists
    pub id: String,
    /// Primary-key columns and their values
    pub key: Row,
}

/// Runs the write state machines of one mutation operation
pub struct Orchestrator {
    schema: Arc<Schema>,
    planner: Arc<dyn Planner>,
    ctx: Arc<MutationContext>,
}

impl Orchestrator {
    pub fn new(schema: Arc<Schema>, planner: Arc<dyn Planner>, ctx: Arc<MutationContext>) -> Self {
        Self {
            schema,
            planner,
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<MutationContext> {
        &self.ctx
    }

    /// Insert a row (plus nested children and junction rows) and return the
    /// re-selected parent with at least `columns`
    pub async fn create(
        &self,
        table: &Table,
        input: &Value,
        columns: &[String],
    ) -> Result<Row, MutationFailure> {
        self.guarded(&table.type_name, "create", self.run_create(table, input, columns))
            .await
    }

    /// Apply `set` to the row named by `id`
    ///
    /// Absent or empty `set` returns the current row. Zero affected rows is a
    /// success with no row.
    pub async fn update(
        &self,
        table: &Table,
        id: &str,
        set: Option<&Value>,
        columns: &[String],
    ) -> Result<Option<Row>, MutationFailure> {
        self.guarded(&table.type_name, "update", self.run_update(table, id, set, columns))
            .await
    }

    /// Delete the row named by `id`; zero affected rows is `NotFound`
    pub async fn delete(&self, table: &Table, id: &str) -> Result<DeletedRow, MutationFailure> {
        self.guarded(&table.type_name, "delete", self.run_delete(table, id))
            .await
    }

    async fn guarded<T>(
        &self,
        type_name: &str,
        operation: &str,
        step: impl Future<Output = Result<T, MutationFailure>>,
    ) -> Result<T, MutationFailure> {
        self.ctx.begin_field().await;
        let result = step.await;
        if let Err(failure) = self.ctx.end_field(result.is_ok()).await {
            self.ctx.mark_error().await;
            tracing::error!(type_name, operation, error = %failure, "savepoint handling failed");
            return Err(MutationFailure::Fatal(failure.into()));
        }
        if let Err(failure) = &result {
            self.ctx.mark_error().await;
            match failure {
                MutationFailure::Typed(err) => tracing::warn!(
                    type_name,
                    operation,
                    kind = err.kind.type_name(),
                    native_code = err.native_code.as_deref().unwrap_or(""),
                    message = %err.message,
                    "mutation failed"
                ),
                MutationFailure::Fatal(err) => tracing::error!(
                    type_name,
                    operation,
                    error = %err,
                    "mutation aborted"
                ),
            }
        }
        result
    }

    // =========================================================================
    // Create
    // =========================================================================

    async fn run_create(
        &self,
        table: &Table,
        input: &Value,
        columns: &[String],
    ) -> Result<Row, MutationFailure> {
        let input = PartitionedInput::partition(&self.schema, table, input, Depth::Root)?;

        let mut values = input.scalars.clone();
        self.resolve_connects(table, &input.connects, &mut values).await?;
        check_required(table, &values)?;

        let key = self.insert(table, &values).await?;

        // Children need the parent's side of their relationship
        let mut reselect: Vec<String> = columns.to_vec();
        let nested_rels = input
            .creates
            .iter()
            .map(|c| c.relationship.as_str())
            .chain(input.junction_connects.iter().map(|c| c.relationship.as_str()));
        for name in nested_rels {
            for column in &self.relationship(table, name)?.local_columns {
                if !reselect.contains(column) {
                    reselect.push(column.clone());
                }
            }
        }
        let parent = self.load(table, &key, &reselect).await?.ok_or_else(|| {
            MutationError::internal(format!("inserted {} could not be re-selected", table.type_name))
        })?;

        for nested in &input.creates {
            let rel = self.relationship(table, &nested.relationship)?;
            let child = self.target(rel)?;
            let injected = parent_values(rel, &parent)?;

            for row in &nested.rows {
                let mut values = row.scalars.clone();
                for (column, value) in rel.remote_columns.iter().zip(&injected) {
                    values.insert(column.clone(), value.clone());
                }
                self.resolve_connects(child, &row.connects, &mut values).await?;
                check_required(child, &values)?;
                self.insert(child, &values).await?;
            }
        }

        for connect in &input.junction_connects {
            let rel = self.relationship(table, &connect.relationship)?;
            let target = self.target(rel)?;
            let junction = rel.junction.as_ref().ok_or_else(|| {
                MutationError::internal(format!("'{}' has no junction", rel.qualified_name()))
            })?;
            let junction_table = self.schema.table(&junction.table).ok_or_else(|| {
                MutationError::internal(format!("unknown junction table '{}'", junction.table))
            })?;
            let owner = parent_values(rel, &parent)?;

            for reference in &connect.references {
                let remote =
                    resolve_connect(self.planner.as_ref(), &self.ctx, target, reference, &rel.remote_columns)
                        .await?;
                let mut row = Row::new();
                for (column, value) in junction.local_columns.iter().zip(&owner) {
                    row.insert(column.clone(), value.clone());
                }
                for (column, value) in junction.remote_columns.iter().zip(remote) {
                    row.insert(column.clone(), value);
                }
                self.insert(junction_table, &row).await?;
            }
        }

        Ok(parent)
    }

    /// Merge resolved many-to-one references into `values`
    async fn resolve_connects(
        &self,
        table: &Table,
        connects: &[ConnectInput],
        values: &mut Row,
    ) -> Result<(), MutationFailure> {
        for connect in connects {
            let rel = self.relationship(table, &connect.relationship)?;
            debug_assert_eq!(rel.kind, RelationshipKind::ManyToOne);
            let target = self.target(rel)?;
            let remote = resolve_connect(
                self.planner.as_ref(),
                &self.ctx,
                target,
                &connect.reference,
                &rel.remote_columns,
            )
            .await?;
            for (column, value) in rel.local_columns.iter().zip(remote) {
                values.insert(column.clone(), value);
            }
        }
        Ok(())
    }

    /// Insert one row and return its primary key
    async fn insert(&self, table: &Table, values: &Row) -> Result<Vec<SqlValue>, MutationFailure> {
        let statement = self.planner.plan_insert(table, values)?;

        let (returned, last_insert_id) = if statement.returning {
            let rows = self.ctx.query(&statement).await.map_err(classify)?;
            (rows.into_iter().next(), None)
        } else {
            let result = self.ctx.exec(&statement).await.map_err(classify)?;
            (None, result.last_insert_id)
        };

        if let Some(key) = returned.as_ref().and_then(|row| project(row, &table.primary_key)) {
            return Ok(key);
        }
        if let Some(key) = project(values, &table.primary_key)
            && !key.iter().any(SqlValue::is_null)
        {
            return Ok(key);
        }
        match (last_insert_id, table.primary_key.len()) {
            (Some(id), 1) => Ok(vec![id]),
            _ => Err(MutationError::internal(format!(
                "could not determine the primary key of the inserted {}",
                table.type_name
            ))
            .into()),
        }
    }

    // =========================================================================
    // Update / delete
    // =========================================================================

    async fn run_update(
        &self,
        table: &Table,
        id: &str,
        set: Option<&Value>,
        columns: &[String],
    ) -> Result<Option<Row>, MutationFailure> {
        let id = NodeId::decode_for(id, &table.type_name, table.primary_key.len())?;

        let set = match set {
            None | Some(Value::Null) => Row::new(),
            Some(set) => partition_set(table, set)?,
        };
        if set.is_empty() {
            return self.load(table, &id.keys, columns).await;
        }

        let statement = self.planner.plan_update(table, &id.keys, &set)?;
        let result = self.ctx.exec(&statement).await.map_err(classify)?;
        if result.rows_affected == 0 {
            return Ok(None);
        }

        // The key itself may have been updated
        let key: Vec<SqlValue> = table
            .primary_key
            .iter()
            .zip(&id.keys)
            .map(|(column, old)| set.get(column).cloned().unwrap_or_else(|| old.clone()))
            .collect();
        self.load(table, &key, columns).await
    }

    async fn run_delete(&self, table: &Table, id: &str) -> Result<DeletedRow, MutationFailure> {
        let node_id = NodeId::decode_for(id, &table.type_name, table.primary_key.len())?;

        let statement = self.planner.plan_delete(table, &node_id.keys)?;
        let result = self.ctx.exec(&statement).await.map_err(classify)?;
        if result.rows_affected == 0 {
            return Err(MutationError::not_found(format!("no {} with id '{}'", table.type_name, id)).into());
        }

        let key = table
            .primary_key
            .iter()
            .cloned()
            .zip(node_id.keys.iter().cloned())
            .collect();
        Ok(DeletedRow {
            id: node_id.encode(),
            key,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(
        &self,
        table: &Table,
        key: &[SqlValue],
        columns: &[String],
    ) -> Result<Option<Row>, MutationFailure> {
        let mut columns = columns.to_vec();
        for pk in &table.primary_key {
            if !columns.contains(pk) {
                columns.push(pk.clone());
            }
        }
        let statement = self.planner.plan_table_by_pk(table, key, &columns)?;
        let rows = self.ctx.query(&statement).await.map_err(classify)?;
        Ok(rows.into_iter().next())
    }

    fn relationship<'t>(&self, table: &'t Table, name: &str) -> Result<&'t Relationship, MutationFailure> {
        table.relationship(name).ok_or_else(|| {
            MutationError::internal(format!("{} has no relationship '{}'", table.type_name, name)).into()
        })
    }

    fn target(&self, rel: &Relationship) -> Result<&Table, MutationFailure> {
        self.schema.table(&rel.target).ok_or_else(|| {
            MutationError::internal(format!(
                "relationship '{}' targets unknown table '{}'",
                rel.qualified_name(),
                rel.target
            ))
            .into()
        })
    }
}

fn check_required(table: &Table, values: &Row) -> Result<(), MutationError> {
    let missing: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.is_required() && !values.contains_key(&c.name))
        .map(|c| c.name.as_str())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(MutationError::invalid_input(format!(
        "missing required field(s) on {}: {}",
        table.type_name,
        missing.join(", ")
    )))
}

fn parent_values(rel: &Relationship, parent: &Row) -> Result<Vec<SqlValue>, MutationError> {
    project(parent, &rel.local_columns).ok_or_else(|| {
        MutationError::internal(format!(
            "re-selected parent lacks the columns of '{}'",
            rel.qualified_name()
        ))
    })
}
