//! Schema model: tables, columns, indexes and relationships
//!
//! Built once from [`SchemaConfig`] and shared read-only by every request.

use crate::config::{EngineSettings, SchemaConfig, TableConfig};
use crate::core::error::ConfigError;
use crate::core::naming;
use crate::core::value::SqlValue;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use uuid::Uuid;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Bool,
    Uuid,
    Timestamp,
    Json,
}

impl ColumnType {
    /// Decode an input value for a column of this type
    pub fn coerce(&self, value: &Value) -> Result<SqlValue, String> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        match self {
            ColumnType::Int => value
                .as_i64()
                .map(SqlValue::Int)
                .ok_or_else(|| format!("expected an integer, got {}", value)),
            ColumnType::Float => value
                .as_f64()
                .map(SqlValue::Float)
                .ok_or_else(|| format!("expected a number, got {}", value)),
            ColumnType::Text => value
                .as_str()
                .map(|s| SqlValue::Text(s.to_string()))
                .ok_or_else(|| format!("expected a string, got {}", value)),
            ColumnType::Bool => value
                .as_bool()
                .map(SqlValue::Bool)
                .ok_or_else(|| format!("expected a boolean, got {}", value)),
            ColumnType::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(SqlValue::Uuid)
                .ok_or_else(|| format!("expected a UUID, got {}", value)),
            ColumnType::Timestamp => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| SqlValue::Timestamp(t.with_timezone(&Utc)))
                .ok_or_else(|| format!("expected an RFC 3339 timestamp, got {}", value)),
            ColumnType::Json => Ok(SqlValue::Json(value.clone())),
        }
    }

    /// GraphQL scalar used in the generated SDL
    pub fn graphql_scalar(&self) -> &'static str {
        match self {
            ColumnType::Int => "Int",
            ColumnType::Float => "Float",
            ColumnType::Text => "String",
            ColumnType::Bool => "Boolean",
            ColumnType::Uuid => "UUID",
            ColumnType::Timestamp => "Datetime",
            ColumnType::Json => "JSON",
        }
    }
}

/// Kind of relationship between an owning table and a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToMany,
    ManyToOne,
    ManyToMany,
    /// Many-to-many whose junction row is exposed directly as the node
    EdgeList,
}

impl RelationshipKind {
    /// Whether the field resolves to a paginated connection
    pub fn is_connection(&self) -> bool {
        !matches!(self, RelationshipKind::ManyToOne)
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<SqlValue>,
    pub generated: bool,
}

impl Column {
    /// Must be supplied on insert (no default, not generated, not nullable)
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.generated
    }
}

#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Connect-input field name
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct Junction {
    pub table: String,
    pub local_columns: Vec<String>,
    pub remote_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationshipKind,
    /// Table that owns the field
    pub owner: String,
    pub target: String,
    pub local_columns: Vec<String>,
    pub remote_columns: Vec<String>,
    pub junction: Option<Junction>,
}

impl Relationship {
    /// `owner.name`, stable identity used in batch keys and logs
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// Connect-input field for many-to-one and many-to-many
    pub fn connect_field(&self) -> String {
        format!("{}Connect", self.name)
    }

    /// Nested-create input field for one-to-many and edge lists
    pub fn create_field(&self) -> String {
        format!("{}Create", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub type_name: String,
    pub list_field: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub relationships: Vec<Relationship>,
    pub read_only: bool,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Unique index addressed by its connect-input field
    pub fn unique_index_by_field(&self, field: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.unique && i.field == field)
    }

    pub fn connection_type_name(&self) -> String {
        format!("{}Connection", self.type_name)
    }

    pub fn is_primary_key(&self, columns: &[String]) -> bool {
        self.primary_key.as_slice() == columns
    }
}

/// The full relational schema exposed through the API
#[derive(Debug, Clone)]
pub struct Schema {
    pub settings: EngineSettings,
    tables: IndexMap<String, Table>,
}

impl Schema {
    /// Build a schema from already-validated tables
    pub fn new(settings: EngineSettings, tables: Vec<Table>) -> Self {
        Self {
            settings,
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// Validate a configuration into a schema
    pub fn from_config(config: SchemaConfig) -> Result<Self, ConfigError> {
        let mut tables = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            tables.push(build_table(table)?);
        }
        let schema = Self::new(config.settings, tables);
        schema.validate_relationships()?;
        Ok(schema)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_by_type(&self, type_name: &str) -> Option<&Table> {
        self.tables.values().find(|t| t.type_name == type_name)
    }

    pub fn table_by_list_field(&self, field: &str) -> Option<&Table> {
        self.tables.values().find(|t| t.list_field == field)
    }

    /// Table addressed by a `create`/`update`/`delete` field suffix
    pub fn table_by_mutation_suffix(&self, suffix: &str) -> Option<&Table> {
        self.table_by_type(suffix)
    }

    /// Table behind a single-row root field (`user` for `users`)
    pub fn table_by_single_field(&self, field: &str) -> Option<&Table> {
        self.tables
            .values()
            .find(|t| naming::singularize(&t.list_field) == field && t.list_field != field)
    }

    fn validate_relationships(&self) -> Result<(), ConfigError> {
        for table in self.tables.values() {
            for rel in &table.relationships {
                let context = format!("relationship '{}'", rel.qualified_name());
                let target = self.table(&rel.target).ok_or_else(|| ConfigError::UnknownReference {
                    what: "table",
                    name: rel.target.clone(),
                    context: context.clone(),
                })?;

                require_columns(table, &rel.local_columns, &context)?;
                require_columns(target, &rel.remote_columns, &context)?;

                if rel.local_columns.len() != rel.remote_columns.len() {
                    return Err(column_count_mismatch(&context));
                }

                match (&rel.kind, &rel.junction) {
                    (RelationshipKind::ManyToMany, Some(junction)) => {
                        let junction_table =
                            self.table(&junction.table)
                                .ok_or_else(|| ConfigError::UnknownReference {
                                    what: "table",
                                    name: junction.table.clone(),
                                    context: context.clone(),
                                })?;
                        require_columns(junction_table, &junction.local_columns, &context)?;
                        require_columns(junction_table, &junction.remote_columns, &context)?;
                        if junction.local_columns.len() != rel.local_columns.len()
                            || junction.remote_columns.len() != rel.remote_columns.len()
                        {
                            return Err(column_count_mismatch(&context));
                        }
                    }
                    (RelationshipKind::ManyToMany, None) => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.junction", context),
                            value: "null".to_string(),
                            message: "many_to_many relationships require a junction".to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn column_count_mismatch(context: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: context.to_string(),
        value: "columns".to_string(),
        message: "local and remote column lists differ in length".to_string(),
    }
}

fn require_columns(table: &Table, columns: &[String], context: &str) -> Result<(), ConfigError> {
    for column in columns {
        if !table.has_column(column) {
            return Err(ConfigError::UnknownReference {
                what: "column",
                name: format!("{}.{}", table.name, column),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

/// Names become GraphQL fields and SQL identifiers, so both grammars must accept them
fn check_identifier(field: String, name: &str) -> Result<(), ConfigError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let pattern = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").expect("identifier pattern is valid")
    });
    if pattern.is_match(name) {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        field,
        value: name.to_string(),
        message: "names must match [_A-Za-z][_0-9A-Za-z]*".to_string(),
    })
}

fn build_table(config: &TableConfig) -> Result<Table, ConfigError> {
    check_identifier(format!("{}.name", config.name), &config.name)?;
    let mut columns = Vec::with_capacity(config.columns.len());
    for column in &config.columns {
        check_identifier(format!("{}.columns", config.name), &column.name)?;
        let default = match &column.default {
            Some(value) => Some(column.column_type.coerce(value).map_err(|message| {
                ConfigError::InvalidValue {
                    field: format!("{}.{}.default", config.name, column.name),
                    value: value.to_string(),
                    message,
                }
            })?),
            None => None,
        };
        columns.push(Column {
            name: column.name.clone(),
            column_type: column.column_type,
            nullable: column.nullable,
            default,
            generated: column.generated,
        });
    }

    let mut table = Table {
        name: config.name.clone(),
        type_name: config
            .type_name
            .clone()
            .unwrap_or_else(|| naming::type_name_for_table(&config.name)),
        list_field: config
            .list_field
            .clone()
            .unwrap_or_else(|| config.name.clone()),
        primary_key: config.primary_key.clone(),
        columns,
        indexes: Vec::new(),
        relationships: Vec::new(),
        read_only: config.read_only,
    };

    if table.primary_key.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.primary_key", table.name),
            value: "[]".to_string(),
            message: "a primary key is required".to_string(),
        });
    }
    let context = format!("table '{}'", table.name);
    require_columns(&table, &table.primary_key, &context)?;

    for index in &config.indexes {
        require_columns(&table, &index.columns, &format!("index '{}'", index.name))?;
        table.indexes.push(Index {
            name: index.name.clone(),
            columns: index.columns.clone(),
            unique: index.unique,
            field: index
                .field
                .clone()
                .unwrap_or_else(|| naming::unique_index_field(&index.columns)),
        });
    }

    table.relationships = config
        .relationships
        .iter()
        .map(|rel| Relationship {
            name: rel.name.clone(),
            kind: rel.kind,
            owner: config.name.clone(),
            target: rel.target.clone(),
            local_columns: rel.local_columns.clone(),
            remote_columns: rel.remote_columns.clone(),
            junction: rel.junction.as_ref().map(|j| Junction {
                table: j.table.clone(),
                local_columns: j.local_columns.clone(),
                remote_columns: j.remote_columns.clone(),
            }),
        })
        .collect();

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blog_schema_builds() {
        let schema = SchemaConfig::blog().into_schema().unwrap();

        let users = schema.table("users").unwrap();
        assert_eq!(users.type_name, "User");
        assert_eq!(users.list_field, "users");
        assert_eq!(
            users.relationship("posts").unwrap().kind,
            RelationshipKind::OneToMany
        );

        let post_tags = schema.table("post_tags").unwrap();
        assert_eq!(post_tags.type_name, "PostTag");
        assert_eq!(
            post_tags.column("weight").unwrap().default,
            Some(SqlValue::Int(1))
        );
    }

    #[test]
    fn test_lookup_helpers() {
        let schema = SchemaConfig::blog().into_schema().unwrap();

        assert_eq!(schema.table_by_type("Post").unwrap().name, "posts");
        assert_eq!(schema.table_by_single_field("user").unwrap().name, "users");
        assert!(schema.table_by_single_field("users").is_none());

        let tags = schema.table("tags").unwrap();
        assert_eq!(tags.unique_index_by_field("by_label").unwrap().name, "tags_label_key");
        let users = schema.table("users").unwrap();
        assert!(users.unique_index_by_field("by_email").is_some());
    }

    #[test]
    fn test_required_columns() {
        let schema = SchemaConfig::blog().into_schema().unwrap();
        let posts = schema.table("posts").unwrap();

        assert!(!posts.column("id").unwrap().is_required());
        assert!(posts.column("author_id").unwrap().is_required());
        assert!(!posts.column("status").unwrap().is_required());
    }

    #[test]
    fn test_coerce_values() {
        assert_eq!(ColumnType::Int.coerce(&json!(5)).unwrap(), SqlValue::Int(5));
        assert!(ColumnType::Int.coerce(&json!("5")).is_err());
        assert!(ColumnType::Uuid.coerce(&json!("not-a-uuid")).is_err());
        assert!(matches!(
            ColumnType::Timestamp.coerce(&json!("2024-01-02T03:04:05Z")),
            Ok(SqlValue::Timestamp(_))
        ));
        assert_eq!(ColumnType::Text.coerce(&Value::Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let yaml = r#"
tables:
  - name: posts
    primary_key: [id]
    columns:
      - { name: id, type: int }
    relationships:
      - { name: author, kind: many_to_one, target: people, local_columns: [id], remote_columns: [id] }
"#;
        let err = SchemaConfig::from_yaml_str(yaml)
            .unwrap()
            .into_schema()
            .unwrap_err();
        assert!(err.to_string().contains("people"));
    }

    #[test]
    fn test_column_count_mismatch_rejected() {
        let yaml = r#"
tables:
  - name: users
    primary_key: [id]
    columns:
      - { name: id, type: int }
      - { name: org, type: int }
    relationships:
      - { name: me, kind: many_to_one, target: users, local_columns: [id, org], remote_columns: [id] }
"#;
        let err = SchemaConfig::from_yaml_str(yaml)
            .unwrap()
            .into_schema()
            .unwrap_err();
        assert!(err.to_string().contains("differ in length"));
    }

    #[test]
    fn test_many_to_many_requires_junction() {
        let yaml = r#"
tables:
  - name: a
    primary_key: [id]
    columns: [{ name: id, type: int }]
    relationships:
      - { name: bs, kind: many_to_many, target: a, local_columns: [id], remote_columns: [id] }
"#;
        let err = SchemaConfig::from_yaml_str(yaml)
            .unwrap()
            .into_schema()
            .unwrap_err();
        assert!(err.to_string().contains("junction"));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let yaml = r#"
tables:
  - name: users
    primary_key: [id]
    columns:
      - { name: id, type: int }
      - { name: "first name", type: text }
"#;
        let err = SchemaConfig::from_yaml_str(yaml)
            .unwrap()
            .into_schema()
            .unwrap_err();
        assert!(err.to_string().contains("first name"));
    }
}
