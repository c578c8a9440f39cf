//! Root query fields

use anyhow::{Result, bail};
use futures::future::try_join_all;
use serde_json::{Map, Value, json};

use super::field_resolver::{connection_columns, resolve_connection, resolve_object, selected_columns};
use super::selection::{FieldNode, SelectionNode, fields_for};
use super::utils::require_string_arg;
use crate::core::error::EngineError;
use crate::core::node_id::NodeId;
use crate::engine::connection::ConnectionArgs;
use crate::engine::resolver::{ResolveContext, resolve_node, resolve_root_connection};

/// Resolve every root field concurrently against one request context
pub async fn execute_query(ctx: &ResolveContext, selections: &[SelectionNode]) -> Result<Value> {
    let fields = fields_for(selections, &["Query"]);
    let values = try_join_all(fields.iter().map(|field| resolve_query_field(ctx, field))).await?;

    let mut data = Map::new();
    for (field, value) in fields.iter().zip(values) {
        data.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(data))
}

async fn resolve_query_field(ctx: &ResolveContext, field: &FieldNode) -> Result<Value> {
    if field.name == "__typename" {
        return Ok(json!("Query"));
    }

    // List query (e.g., "posts")
    if let Some(table) = ctx.schema.table_by_list_field(&field.name) {
        let args = ConnectionArgs::from_arguments(table, &field.arguments, ctx.settings())?;
        let columns = connection_columns(table, &field.selections);
        let connection = resolve_root_connection(ctx, table, &args, &columns).await?;
        return resolve_connection(ctx, table, &connection, &field.selections).await;
    }

    // Single query by id (e.g., "post")
    if let Some(table) = ctx.schema.table_by_single_field(&field.name) {
        let token = require_string_arg(&field.arguments, "id")?;
        let id = NodeId::decode_for(token, &table.type_name, table.primary_key.len())
            .map_err(|e| EngineError::invalid_argument("id", e.message))?;
        let columns = selected_columns(table, &field.selections);
        return match resolve_node(ctx, table, &id, &columns).await? {
            Some((row, group)) => {
                resolve_object(ctx, table, &row, group.as_ref(), &field.selections).await
            }
            None => Ok(Value::Null),
        };
    }

    bail!("Unknown query field: {}", field.name)
}
