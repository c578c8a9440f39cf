//! Root mutation fields
//!
//! Fields run one after another in document order against the operation's
//! single [`MutationContext`]. The caller finalizes the context.

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};

use super::field_resolver::{resolve_object, selected_columns};
use super::selection::{FieldNode, SelectionNode, fields_for};
use super::utils::{get_json_arg, get_string_arg, mutation_target};
use crate::core::schema::Table;
use crate::engine::resolver::ResolveContext;
use crate::mutation::{MutationPayload, Orchestrator};

/// `__typename` of the result union of `operation` on `table`
pub fn union_type_name(operation: &str, table: &Table) -> String {
    let mut chars = operation.chars();
    let operation: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{}{}Result", operation, table.type_name)
}

/// Resolve every mutation field serially; the first fatal error stops the run
pub async fn execute_mutation(
    orchestrator: &Orchestrator,
    ctx: &ResolveContext,
    selections: &[SelectionNode],
) -> Result<Value> {
    let mut data = Map::new();
    for field in fields_for(selections, &["Mutation"]) {
        let value = resolve_mutation_field(orchestrator, ctx, field).await?;
        data.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(data))
}

async fn resolve_mutation_field(
    orchestrator: &Orchestrator,
    ctx: &ResolveContext,
    field: &FieldNode,
) -> Result<Value> {
    if field.name == "__typename" {
        return Ok(json!("Mutation"));
    }

    let Some((operation, suffix)) = mutation_target(&field.name) else {
        bail!("Unknown mutation: {}", field.name);
    };
    let Some(table) = ctx.schema.table_by_mutation_suffix(suffix) else {
        bail!("Unknown mutation: {}", field.name);
    };

    let columns = node_columns(table, &field.selections);
    let id = get_string_arg(&field.arguments, "id").unwrap_or_default();

    let payload = match operation {
        "create" => {
            let input = get_json_arg(&field.arguments, "input").unwrap_or(&Value::Null);
            MutationPayload::from_result(
                orchestrator.create(table, input, &columns).await,
                MutationPayload::Created,
            )?
        }
        "update" => {
            let set = get_json_arg(&field.arguments, "set");
            MutationPayload::from_result(
                orchestrator.update(table, id, set, &columns).await,
                MutationPayload::Updated,
            )?
        }
        _ => MutationPayload::from_result(
            orchestrator.delete(table, id).await,
            MutationPayload::Deleted,
        )?,
    };

    resolve_payload(ctx, table, operation, &payload, &field.selections).await
}

/// Columns the `node` selections of any success member need
fn node_columns(table: &Table, selections: &[SelectionNode]) -> Vec<String> {
    let mut node_selections = Vec::new();
    collect_node_selections(selections, &mut node_selections);
    selected_columns(table, &node_selections)
}

fn collect_node_selections(selections: &[SelectionNode], out: &mut Vec<SelectionNode>) {
    for selection in selections {
        match selection {
            SelectionNode::Field(field) if field.name == "node" => {
                out.extend(field.selections.iter().cloned());
            }
            SelectionNode::Field(_) => {}
            SelectionNode::Fragment { selections, .. } => collect_node_selections(selections, out),
        }
    }
}

async fn resolve_payload(
    ctx: &ResolveContext,
    table: &Table,
    operation: &str,
    payload: &MutationPayload,
    selections: &[SelectionNode],
) -> Result<Value> {
    let member = payload.type_name(table);
    let union = union_type_name(operation, table);

    let mut types = vec![member.as_str(), union.as_str()];
    if payload.is_error() {
        types.push("MutationError");
    }

    let mut object = Map::new();
    for field in fields_for(selections, &types) {
        let value = match field.name.as_str() {
            "__typename" => json!(member),
            "node" if !payload.is_error() => match payload.node() {
                Some(row) => resolve_object(ctx, table, row, None, &field.selections).await?,
                None => Value::Null,
            },
            name => match payload.scalar(name) {
                Some(value) => value,
                None => bail!("Unknown field '{}' on type '{}'", name, member),
            },
        };
        object.insert(field.response_key().to_string(), value);
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;

    #[test]
    fn test_union_type_name() {
        let schema = SchemaConfig::blog().into_schema().unwrap();
        let posts = schema.table("posts").unwrap();
        assert_eq!(union_type_name("create", posts), "CreatePostResult");
        assert_eq!(union_type_name("delete", posts), "DeletePostResult");
    }

    #[test]
    fn test_node_columns_collected_across_fragments() {
        let schema = SchemaConfig::blog().into_schema().unwrap();
        let users = schema.table("users").unwrap();
        let node = |name: &str| {
            SelectionNode::Field(FieldNode {
                alias: None,
                name: name.to_string(),
                arguments: Map::new(),
                selections: Vec::new(),
            })
        };
        let selections = vec![SelectionNode::Fragment {
            type_condition: Some("CreateUserSuccess".to_string()),
            selections: vec![SelectionNode::Field(FieldNode {
                alias: None,
                name: "node".to_string(),
                arguments: Map::new(),
                selections: vec![node("email"), node("name")],
            })],
        }];
        assert_eq!(node_columns(users, &selections), vec!["id", "email", "name"]);
    }
}
