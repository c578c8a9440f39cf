//! Connect resolution
//!
//! Turns a [`ConnectRef`] into the referenced row's key values, reading
//! through the mutation's transaction so rows created earlier in the same
//! operation are visible.

use crate::core::error::{MutationError, MutationFailure, classify};
use crate::core::node_id::NodeId;
use crate::core::planner::Planner;
use crate::core::schema::Table;
use crate::core::value::{SqlValue, project};
use crate::mutation::context::MutationContext;
use crate::mutation::input::ConnectRef;

/// Resolve `reference` to the values of `columns` on the referenced `target` row
pub async fn resolve_connect(
    planner: &dyn Planner,
    ctx: &MutationContext,
    target: &Table,
    reference: &ConnectRef,
    columns: &[String],
) -> Result<Vec<SqlValue>, MutationFailure> {
    let statement = match reference {
        ConnectRef::Id(token) => {
            let id = NodeId::decode_for(token, &target.type_name, target.primary_key.len())?;
            planner.plan_table_by_pk(target, &id.keys, columns)?
        }
        ConnectRef::Unique { field, values } => {
            let index = target.unique_index_by_field(field).ok_or_else(|| {
                MutationError::invalid_input(format!(
                    "'{}' is not a unique key of {}",
                    field, target.type_name
                ))
            })?;

            if values.len() != index.columns.len()
                || index.columns.iter().any(|c| !values.contains_key(c))
            {
                return Err(MutationError::invalid_input(format!(
                    "'{}' requires exactly the columns [{}]",
                    field,
                    index.columns.join(", ")
                ))
                .into());
            }

            let mut key = Vec::with_capacity(index.columns.len());
            for name in &index.columns {
                let column = target.column(name).ok_or_else(|| {
                    MutationError::internal(format!("index '{}' names unknown column '{}'", index.name, name))
                })?;
                let value = values.get(name).cloned().unwrap_or_default();
                let value = column.column_type.coerce(&value).map_err(|e| {
                    MutationError::invalid_input(format!("'{}.{}': {}", field, name, e))
                })?;
                key.push(value);
            }
            planner.plan_unique_key_lookup(target, index, &key, columns)?
        }
    };

    let rows = ctx.query(&statement).await.map_err(classify)?;
    let row = rows.first().ok_or_else(|| {
        MutationError::not_found(format!("no {} matches the connect reference", target.type_name))
    })?;

    project(row, columns)
        .ok_or_else(|| MutationError::internal(format!("lookup on {} lacks key columns", target.name)).into())
}
