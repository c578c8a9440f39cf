//! Utility functions for GraphQL execution

use anyhow::{Result, anyhow};
use graphql_parser::query::Value as GqlValue;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// Get string argument from a lowered field
pub fn get_string_arg<'v>(arguments: &'v Map<String, Value>, arg_name: &str) -> Option<&'v str> {
    arguments.get(arg_name).and_then(Value::as_str)
}

/// Get a required string argument
pub fn require_string_arg<'v>(arguments: &'v Map<String, Value>, arg_name: &str) -> Result<&'v str> {
    get_string_arg(arguments, arg_name)
        .ok_or_else(|| anyhow!("Missing required argument '{}'", arg_name))
}

/// Get JSON argument, treating an explicit `null` as absent
pub fn get_json_arg<'v>(arguments: &'v Map<String, Value>, arg_name: &str) -> Option<&'v Value> {
    arguments.get(arg_name).filter(|v| !v.is_null())
}

/// Convert GraphQL value to JSON, substituting variables
///
/// Unbound variables become `null`, matching an omitted nullable argument.
pub fn gql_value_to_json(value: &GqlValue<String>, variables: &HashMap<String, Value>) -> Value {
    match value {
        GqlValue::Null => Value::Null,
        GqlValue::Int(i) => json!(i.as_i64().unwrap_or(0)),
        GqlValue::Float(f) => json!(f),
        GqlValue::String(s) => json!(s),
        GqlValue::Boolean(b) => json!(b),
        GqlValue::Enum(e) => json!(e),
        GqlValue::List(list) => Value::Array(
            list.iter()
                .map(|item| gql_value_to_json(item, variables))
                .collect(),
        ),
        GqlValue::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.clone(), gql_value_to_json(v, variables));
            }
            Value::Object(map)
        }
        GqlValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
    }
}

/// Strip a mutation prefix (`createPost` -> `Post`)
pub fn mutation_target<'n>(field_name: &'n str) -> Option<(&'static str, &'n str)> {
    ["create", "update", "delete"]
        .into_iter()
        .find_map(|prefix| field_name.strip_prefix(prefix).map(|rest| (prefix, rest)))
        .filter(|(_, rest)| rest.starts_with(|c: char| c.is_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphql_parser::query::Number;

    #[test]
    fn test_variables_resolved() {
        let mut variables = HashMap::new();
        variables.insert("limit".to_string(), json!(5));
        let value = GqlValue::List(vec![
            GqlValue::Variable("limit".to_string()),
            GqlValue::Variable("missing".to_string()),
            GqlValue::Int(Number::from(2)),
        ]);
        assert_eq!(gql_value_to_json(&value, &variables), json!([5, null, 2]));
    }

    #[test]
    fn test_mutation_target() {
        assert_eq!(mutation_target("createPost"), Some(("create", "Post")));
        assert_eq!(mutation_target("deletePostTag"), Some(("delete", "PostTag")));
        assert_eq!(mutation_target("created"), None);
        assert_eq!(mutation_target("posts"), None);
    }

    #[test]
    fn test_json_arg_null_is_absent() {
        let mut args = Map::new();
        args.insert("set".to_string(), Value::Null);
        args.insert("id".to_string(), json!("abc"));
        assert!(get_json_arg(&args, "set").is_none());
        assert_eq!(require_string_arg(&args, "id").unwrap(), "abc");
        assert!(require_string_arg(&args, "other").is_err());
    }
}
