//! Field resolution for table objects and connections

use anyhow::{Result, bail};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::{Map, Value, json};

use super::selection::{FieldNode, SelectionNode, fields_for};
use crate::core::naming::camel_to_snake;
use crate::core::node_id::NodeId;
use crate::core::planner::AggregateFunction;
use crate::core::schema::{Relationship, RelationshipKind, Table};
use crate::core::value::{Row, project};
use crate::engine::batch::ParentKey;
use crate::engine::connection::{Connection, ConnectionArgs, Edge, PageInfo};
use crate::engine::resolver::{
    ParentRef, RelationValue, ResolveContext, fetch_columns, resolve_relationship,
};

pub fn edge_type_name(table: &Table) -> String {
    format!("{}Edge", table.type_name)
}

pub fn aggregate_type_name(table: &Table) -> String {
    format!("{}Aggregate", table.type_name)
}

/// Column a GraphQL field name reads: the name itself or its snake_case form
pub fn column_for_field<'t>(table: &'t Table, field: &str) -> Option<&'t str> {
    table
        .column(field)
        .or_else(|| table.column(&camel_to_snake(field)))
        .map(|c| c.name.as_str())
}

/// Opaque `id` of a row
pub fn node_id(table: &Table, row: &Row) -> Result<String> {
    let Some(keys) = project(row, &table.primary_key) else {
        bail!("Row of {} is missing its primary key", table.type_name);
    };
    Ok(NodeId::new(&table.type_name, keys).encode())
}

// =============================================================================
// Column selection
// =============================================================================

/// Columns to fetch for objects of `table` given their selection set
pub fn selected_columns(table: &Table, selections: &[SelectionNode]) -> Vec<String> {
    let mut fields = Vec::new();
    let mut relationships: Vec<&Relationship> = Vec::new();
    for field in fields_for(selections, &[&table.type_name]) {
        if let Some(rel) = table.relationship(&field.name) {
            if !relationships.iter().any(|r| r.name == rel.name) {
                relationships.push(rel);
            }
        } else if let Some(column) = column_for_field(table, &field.name) {
            fields.push(column.to_string());
        }
    }
    fetch_columns(table, &fields, &relationships)
}

/// Columns to fetch for the nodes of a connection, merging `nodes` and
/// `edges.node`
pub fn connection_columns(table: &Table, selections: &[SelectionNode]) -> Vec<String> {
    let connection_type = table.connection_type_name();
    let edge_type = edge_type_name(table);
    let mut node_selections: Vec<SelectionNode> = Vec::new();
    for field in fields_for(selections, &[&connection_type]) {
        match field.name.as_str() {
            "nodes" => node_selections.extend(field.selections.iter().cloned()),
            "edges" => {
                for edge_field in fields_for(&field.selections, &[&edge_type]) {
                    if edge_field.name == "node" {
                        node_selections.extend(edge_field.selections.iter().cloned());
                    }
                }
            }
            _ => {}
        }
    }
    selected_columns(table, &node_selections)
}

// =============================================================================
// Objects
// =============================================================================

/// Resolve the selection set of one row
pub fn resolve_object<'a>(
    ctx: &'a ResolveContext,
    table: &'a Table,
    row: &'a Row,
    group: Option<&'a ParentKey>,
    selections: &'a [SelectionNode],
) -> BoxFuture<'a, Result<Value>> {
    resolve_object_impl(ctx, table, row, group, selections).boxed()
}

async fn resolve_object_impl(
    ctx: &ResolveContext,
    table: &Table,
    row: &Row,
    group: Option<&ParentKey>,
    selections: &[SelectionNode],
) -> Result<Value> {
    let fields = fields_for(selections, &[&table.type_name]);
    let values = try_join_all(
        fields
            .iter()
            .map(|field| resolve_object_field(ctx, table, row, group, field)),
    )
    .await?;

    let mut object = Map::new();
    for (field, value) in fields.iter().zip(values) {
        object.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(object))
}

async fn resolve_object_field(
    ctx: &ResolveContext,
    table: &Table,
    row: &Row,
    group: Option<&ParentKey>,
    field: &FieldNode,
) -> Result<Value> {
    if field.name == "__typename" {
        return Ok(json!(table.type_name));
    }
    if field.name == "id" {
        return Ok(json!(node_id(table, row)?));
    }
    if let Some(rel) = table.relationship(&field.name) {
        return resolve_relationship_field(ctx, rel, row, group, field).await;
    }
    if let Some(column) = column_for_field(table, &field.name) {
        return Ok(row.get(column).map(|v| v.to_json()).unwrap_or(Value::Null));
    }
    bail!("Unknown field '{}' on type '{}'", field.name, table.type_name)
}

async fn resolve_relationship_field(
    ctx: &ResolveContext,
    rel: &Relationship,
    row: &Row,
    group: Option<&ParentKey>,
    field: &FieldNode,
) -> Result<Value> {
    let Some(target) = ctx.schema.table(&rel.target) else {
        bail!("Relationship '{}' targets unknown table '{}'", rel.qualified_name(), rel.target);
    };

    let (args, columns) = if rel.kind == RelationshipKind::ManyToOne {
        (ConnectionArgs::default(), selected_columns(target, &field.selections))
    } else {
        (
            ConnectionArgs::from_arguments(target, &field.arguments, ctx.settings())?,
            connection_columns(target, &field.selections),
        )
    };

    let parent = ParentRef { row, group };
    match resolve_relationship(ctx, rel, parent, &args, &columns).await? {
        RelationValue::Connection(connection) => {
            resolve_connection(ctx, target, &connection, &field.selections).await
        }
        RelationValue::Object(None) => Ok(Value::Null),
        RelationValue::Object(Some((child, child_group))) => {
            resolve_object(ctx, target, &child, child_group.as_ref(), &field.selections).await
        }
    }
}

// =============================================================================
// Connections
// =============================================================================

/// Resolve the selection set of a connection
pub async fn resolve_connection(
    ctx: &ResolveContext,
    table: &Table,
    connection: &Connection,
    selections: &[SelectionNode],
) -> Result<Value> {
    let connection_type = table.connection_type_name();
    let mut object = Map::new();
    for field in fields_for(selections, &[&connection_type]) {
        let value = match field.name.as_str() {
            "__typename" => json!(connection_type),
            "nodes" => {
                let nodes = try_join_all(connection.nodes().map(|node| {
                    resolve_object(ctx, table, node, connection.group.as_ref(), &field.selections)
                }))
                .await?;
                Value::Array(nodes)
            }
            "edges" => {
                let edges = try_join_all(
                    connection
                        .edges
                        .iter()
                        .map(|edge| resolve_edge(ctx, table, connection, edge, &field.selections)),
                )
                .await?;
                Value::Array(edges)
            }
            "pageInfo" => page_info(&connection.page_info, &field.selections),
            "aggregate" => resolve_aggregate(table, connection, &field.selections).await?,
            other => bail!("Unknown field '{}' on type '{}'", other, connection_type),
        };
        object.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(object))
}

async fn resolve_edge(
    ctx: &ResolveContext,
    table: &Table,
    connection: &Connection,
    edge: &Edge,
    selections: &[SelectionNode],
) -> Result<Value> {
    let edge_type = edge_type_name(table);
    let mut object = Map::new();
    for field in fields_for(selections, &[&edge_type]) {
        let value = match field.name.as_str() {
            "__typename" => json!(edge_type),
            "cursor" => json!(edge.cursor),
            "node" => {
                resolve_object(ctx, table, &edge.node, connection.group.as_ref(), &field.selections)
                    .await?
            }
            other => bail!("Unknown field '{}' on type '{}'", other, edge_type),
        };
        object.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn page_info(info: &PageInfo, selections: &[SelectionNode]) -> Value {
    let mut object = Map::new();
    for field in fields_for(selections, &["PageInfo"]) {
        let value = match field.name.as_str() {
            "__typename" => json!("PageInfo"),
            "hasNextPage" => json!(info.has_next_page),
            "hasPreviousPage" => json!(info.has_previous_page),
            "startCursor" => json!(info.start_cursor),
            "endCursor" => json!(info.end_cursor),
            _ => Value::Null,
        };
        object.insert(field.response_key().to_string(), value);
    }
    Value::Object(object)
}

/// `aggregate { count sum { col } ... }`
///
/// A count-only selection runs the dedicated count query; anything else runs
/// one aggregate query that also yields the count.
async fn resolve_aggregate(
    table: &Table,
    connection: &Connection,
    selections: &[SelectionNode],
) -> Result<Value> {
    let Some(aggregate) = connection.aggregate() else {
        return Ok(Value::Null);
    };
    let aggregate_type = aggregate_type_name(table);
    let fields = fields_for(selections, &[&aggregate_type]);

    let mut functions = Vec::new();
    for field in &fields {
        let make: fn(String) -> AggregateFunction = match field.name.as_str() {
            "sum" => AggregateFunction::Sum,
            "avg" => AggregateFunction::Avg,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            _ => continue,
        };
        for column_field in fields_for(&field.selections, &[]) {
            if column_field.name == "__typename" {
                continue;
            }
            let Some(column) = column_for_field(table, &column_field.name) else {
                bail!("Unknown column '{}' in aggregate of {}", column_field.name, table.type_name);
            };
            let function = make(column.to_string());
            if !functions.contains(&function) {
                functions.push(function);
            }
        }
    }

    let values = if functions.is_empty() {
        None
    } else {
        Some(aggregate.values(&functions).await?)
    };

    let mut object = Map::new();
    for field in fields {
        let value = match field.name.as_str() {
            "__typename" => json!(aggregate_type),
            "count" => match values {
                Some(row) => row.get("count").map(|v| v.to_json()).unwrap_or(json!(0)),
                None => json!(aggregate.count().await?),
            },
            "sum" | "avg" | "min" | "max" => match values {
                Some(row) => {
                    let mut columns = Map::new();
                    for column_field in fields_for(&field.selections, &[]) {
                        let value = if column_field.name == "__typename" {
                            json!(format!("{}{}", aggregate_type, capitalize(&field.name)))
                        } else {
                            column_for_field(table, &column_field.name)
                                .and_then(|column| row.get(&format!("{}__{}", field.name, column)))
                                .map(|v| v.to_json())
                                .unwrap_or(Value::Null)
                        };
                        columns.insert(column_field.response_key().to_string(), value);
                    }
                    Value::Object(columns)
                }
                None => Value::Null,
            },
            other => bail!("Unknown field '{}' on type '{}'", other, aggregate_type),
        };
        object.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
