//! Partitioned write input
//!
//! Raw argument objects are inspected exactly once, here. The result is a
//! [`PartitionedInput`] with four disjoint buckets; nothing downstream looks
//! at the untyped map again.

use crate::core::error::MutationError;
use crate::core::schema::{RelationshipKind, Schema, Table};
use crate::core::value::Row;
use serde_json::{Map, Value};

/// Reference to an existing row
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectRef {
    /// Opaque node id
    Id(String),
    /// Values for every column of a unique index, addressed by its field name
    Unique { field: String, values: Map<String, Value> },
}

/// `<rel>Connect` on a many-to-one relationship
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectInput {
    pub relationship: String,
    pub reference: ConnectRef,
}

/// `<rel>Create` rows on a one-to-many or edge-list relationship
#[derive(Debug, Clone, PartialEq)]
pub struct NestedCreate {
    pub relationship: String,
    pub rows: Vec<PartitionedInput>,
}

/// `<rel>Connect` list on a many-to-many relationship
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionConnect {
    pub relationship: String,
    pub references: Vec<ConnectRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionedInput {
    pub scalars: Row,
    pub connects: Vec<ConnectInput>,
    pub creates: Vec<NestedCreate>,
    pub junction_connects: Vec<JunctionConnect>,
}

/// Where the input object sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Top-level create input
    Root,
    /// Row inside a `<rel>Create` list; the parent key is injected later
    Nested,
}

impl PartitionedInput {
    /// Split a create input object into its buckets
    pub fn partition(
        schema: &Schema,
        table: &Table,
        input: &Value,
        depth: Depth,
    ) -> Result<Self, MutationError> {
        let object = input.as_object().ok_or_else(|| {
            MutationError::invalid_input(format!("input for {} must be an object", table.type_name))
        })?;

        let mut partitioned = PartitionedInput::default();

        for (key, value) in object {
            if let Some(column) = table.column(key) {
                let value = column
                    .column_type
                    .coerce(value)
                    .map_err(|e| MutationError::invalid_input(format!("field '{}': {}", key, e)))?;
                partitioned.scalars.insert(key.clone(), value);
                continue;
            }

            if let Some(name) = key.strip_suffix("Connect")
                && let Some(rel) = table.relationship(name)
            {
                match rel.kind {
                    RelationshipKind::ManyToOne => {
                        if value.is_null() {
                            continue;
                        }
                        partitioned.connects.push(ConnectInput {
                            relationship: rel.name.clone(),
                            reference: parse_connect(key, value)?,
                        });
                        continue;
                    }
                    RelationshipKind::ManyToMany if depth == Depth::Root => {
                        let references = list_items(key, value)?
                            .iter()
                            .map(|item| parse_connect(key, item))
                            .collect::<Result<Vec<_>, _>>()?;
                        if !references.is_empty() {
                            partitioned.junction_connects.push(JunctionConnect {
                                relationship: rel.name.clone(),
                                references,
                            });
                        }
                        continue;
                    }
                    RelationshipKind::ManyToMany => {
                        return Err(MutationError::invalid_input(format!(
                            "'{}' is not supported inside nested rows",
                            key
                        )));
                    }
                    _ => {}
                }
            }

            if let Some(name) = key.strip_suffix("Create")
                && let Some(rel) = table.relationship(name)
                && matches!(rel.kind, RelationshipKind::OneToMany | RelationshipKind::EdgeList)
            {
                if depth == Depth::Nested {
                    return Err(MutationError::invalid_input(format!(
                        "'{}': nested creates are supported one level deep",
                        key
                    )));
                }
                let child = schema.table(&rel.target).ok_or_else(|| {
                    MutationError::internal(format!("unknown table '{}'", rel.target))
                })?;
                let mut rows = Vec::new();
                for item in list_items(key, value)? {
                    let row = Self::partition(schema, child, item, Depth::Nested)?;
                    let connected = row
                        .connects
                        .iter()
                        .filter_map(|c| child.relationship(&c.relationship))
                        .flat_map(|r| r.local_columns.iter());
                    if let Some(column) = rel
                        .remote_columns
                        .iter()
                        .find(|c| row.scalars.contains_key(*c))
                        .or_else(|| connected.into_iter().find(|c| rel.remote_columns.contains(*c)))
                    {
                        return Err(MutationError::invalid_input(format!(
                            "'{}': column '{}' is set from the parent",
                            key, column
                        )));
                    }
                    rows.push(row);
                }
                if !rows.is_empty() {
                    partitioned.creates.push(NestedCreate {
                        relationship: rel.name.clone(),
                        rows,
                    });
                }
                continue;
            }

            return Err(MutationError::invalid_input(format!(
                "unknown input field '{}' on {}",
                key, table.type_name
            )));
        }

        partitioned.check_exclusive(table)?;
        Ok(partitioned)
    }

    /// A connect and a plain value for the same foreign key are contradictory
    fn check_exclusive(&self, table: &Table) -> Result<(), MutationError> {
        for connect in &self.connects {
            let Some(rel) = table.relationship(&connect.relationship) else {
                continue;
            };
            if let Some(column) = rel
                .local_columns
                .iter()
                .find(|c| self.scalars.contains_key(*c))
            {
                return Err(MutationError::invalid_input(format!(
                    "'{}' and '{}' cannot both be supplied",
                    rel.connect_field(),
                    column
                )));
            }
        }
        Ok(())
    }
}

/// Decode an update `set` object: plain columns only
pub fn partition_set(table: &Table, set: &Value) -> Result<Row, MutationError> {
    let object = set
        .as_object()
        .ok_or_else(|| MutationError::invalid_input("'set' must be an object"))?;
    let mut row = Row::new();
    for (key, value) in object {
        let column = table.column(key).ok_or_else(|| {
            MutationError::invalid_input(format!("unknown field '{}' on {}", key, table.type_name))
        })?;
        let value = column
            .column_type
            .coerce(value)
            .map_err(|e| MutationError::invalid_input(format!("field '{}': {}", key, e)))?;
        row.insert(key.clone(), value);
    }
    Ok(row)
}

fn list_items<'v>(key: &str, value: &'v Value) -> Result<&'v [Value], MutationError> {
    match value {
        Value::Null => Ok(&[]),
        Value::Array(items) => Ok(items),
        _ => Err(MutationError::invalid_input(format!("'{}' must be a list", key))),
    }
}

/// Exactly one of `id` or one unique-index object
fn parse_connect(key: &str, value: &Value) -> Result<ConnectRef, MutationError> {
    let object = value
        .as_object()
        .ok_or_else(|| MutationError::invalid_input(format!("'{}' must be an object", key)))?;

    let supplied: Vec<(&String, &Value)> = object.iter().filter(|(_, v)| !v.is_null()).collect();
    let [(field, inner)] = supplied.as_slice() else {
        return Err(MutationError::invalid_input(format!(
            "'{}' requires exactly one of 'id' or a unique key, got {}",
            key,
            supplied.len()
        )));
    };

    if field.as_str() == "id" {
        let id = inner
            .as_str()
            .ok_or_else(|| MutationError::invalid_input(format!("'{}.id' must be a string", key)))?;
        return Ok(ConnectRef::Id(id.to_string()));
    }

    let values = inner.as_object().ok_or_else(|| {
        MutationError::invalid_input(format!("'{}.{}' must be an object", key, field))
    })?;
    Ok(ConnectRef::Unique {
        field: field.to_string(),
        values: values.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::core::error::ErrorKind;
    use crate::core::value::SqlValue;
    use serde_json::json;

    fn schema() -> Schema {
        SchemaConfig::blog().into_schema().unwrap()
    }

    #[test]
    fn test_partition_buckets() {
        let schema = schema();
        let posts = schema.table("posts").unwrap();
        let input = json!({
            "title": "Hello",
            "authorConnect": {"id": "abc"},
            "tagsConnect": [{"by_label": {"label": "rust"}}],
            "taggingsCreate": [{"tag_id": 3, "weight": 2}]
        });

        let parsed = PartitionedInput::partition(&schema, posts, &input, Depth::Root).unwrap();
        assert_eq!(parsed.scalars["title"], SqlValue::Text("Hello".to_string()));
        assert_eq!(parsed.connects.len(), 1);
        assert_eq!(parsed.connects[0].reference, ConnectRef::Id("abc".to_string()));
        assert_eq!(parsed.junction_connects[0].references.len(), 1);
        assert_eq!(parsed.creates[0].relationship, "taggings");
        assert_eq!(parsed.creates[0].rows[0].scalars["weight"], SqlValue::Int(2));
    }

    #[test]
    fn test_unknown_key_named() {
        let schema = schema();
        let users = schema.table("users").unwrap();
        let err = PartitionedInput::partition(&schema, users, &json!({"nickname": "x"}), Depth::Root)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputValidation);
        assert!(err.message.contains("nickname"));
    }

    #[test]
    fn test_connect_needs_exactly_one_reference() {
        let schema = schema();
        let posts = schema.table("posts").unwrap();

        for connect in [
            json!({}),
            json!({"id": "abc", "by_email": {"email": "a@b.c"}}),
        ] {
            let input = json!({"title": "x", "authorConnect": connect});
            let err =
                PartitionedInput::partition(&schema, posts, &input, Depth::Root).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InputValidation);
        }
    }

    #[test]
    fn test_connect_and_column_are_exclusive() {
        let schema = schema();
        let posts = schema.table("posts").unwrap();
        let input = json!({"title": "x", "author_id": 1, "authorConnect": {"id": "abc"}});
        let err = PartitionedInput::partition(&schema, posts, &input, Depth::Root).unwrap_err();
        assert!(err.message.contains("authorConnect"));
    }

    #[test]
    fn test_nested_rows_cannot_nest_further() {
        let schema = schema();
        let users = schema.table("users").unwrap();
        let input = json!({
            "email": "a@b.c",
            "name": "A",
            "postsCreate": [{"title": "x", "taggingsCreate": [{"tag_id": 1}]}]
        });
        let err = PartitionedInput::partition(&schema, users, &input, Depth::Root).unwrap_err();
        assert!(err.message.contains("one level"));
    }

    #[test]
    fn test_nested_rows_cannot_set_parent_key() {
        let schema = schema();
        let users = schema.table("users").unwrap();
        let input = json!({
            "email": "a@b.c",
            "name": "A",
            "postsCreate": [{"title": "x", "author_id": 9}]
        });
        let err = PartitionedInput::partition(&schema, users, &input, Depth::Root).unwrap_err();
        assert!(err.message.contains("author_id"));
    }

    #[test]
    fn test_bad_scalar_type() {
        let schema = schema();
        let users = schema.table("users").unwrap();
        let err = PartitionedInput::partition(&schema, users, &json!({"email": 5}), Depth::Root)
            .unwrap_err();
        assert!(err.message.contains("email"));
    }

    #[test]
    fn test_partition_set() {
        let schema = schema();
        let users = schema.table("users").unwrap();
        let row = partition_set(users, &json!({"name": "B"})).unwrap();
        assert_eq!(row["name"], SqlValue::Text("B".to_string()));
        assert!(partition_set(users, &json!({"postsCreate": []})).is_err());
    }
}
