//! Configuration loading and management
//!
//! The relational schema is described in YAML: tables, columns, indexes and
//! relationships, plus the engine settings that bound batching and paging.
//! [`SchemaConfig::into_schema`] validates it into a read-only
//! [`Schema`](crate::core::schema::Schema).

use crate::core::error::ConfigError;
use crate::core::schema::{ColumnType, RelationshipKind, Schema};
use serde::{Deserialize, Serialize};

/// Upper bound on the parent keys bound into one grouped `IN`-style query
pub const BATCH_MAX_IN_CLAUSE: usize = 500;

/// Page size used when a connection is requested without `first` or `last`
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 1000;

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Parent keys per grouped query; larger sibling groups are chunked
    pub batch_max_in_clause: usize,

    /// Page size when neither `first` nor `last` is supplied
    pub default_page_size: usize,

    /// Maximum accepted `first`/`last`
    pub max_page_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_max_in_clause: BATCH_MAX_IN_CLAUSE,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    /// Storage-side default, applied when the column is omitted on insert
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    /// Value generated by storage (identity / serial columns)
    #[serde(default)]
    pub generated: bool,
}

/// Index definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub columns: Vec<String>,

    #[serde(default)]
    pub unique: bool,

    /// Field name used in connect inputs (defaults to `by_<col>[_and_<col>]`)
    #[serde(default)]
    pub field: Option<String>,
}

/// Junction table of a many-to-many relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JunctionConfig {
    pub table: String,

    /// Junction columns holding the owning side's key
    pub local_columns: Vec<String>,

    /// Junction columns holding the target side's key
    pub remote_columns: Vec<String>,
}

/// Relationship exposed as a field on the owning table's type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Field name (e.g., "posts")
    pub name: String,

    pub kind: RelationshipKind,

    /// Target table (the junction table itself for edge lists)
    pub target: String,

    /// Columns on the owning table
    pub local_columns: Vec<String>,

    /// Matching columns on the target table
    pub remote_columns: Vec<String>,

    /// Required for many-to-many
    #[serde(default)]
    pub junction: Option<JunctionConfig>,
}

/// Table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name in storage (e.g., "users")
    pub name: String,

    /// Output type name (defaults to the PascalCase singular of the table)
    #[serde(default)]
    pub type_name: Option<String>,

    /// Root list field name (defaults to the table name)
    #[serde(default)]
    pub list_field: Option<String>,

    pub primary_key: Vec<String>,

    pub columns: Vec<ColumnConfig>,

    #[serde(default)]
    pub indexes: Vec<IndexConfig>,

    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,

    /// Reject writes with a permission error
    #[serde(default)]
    pub read_only: bool,
}

/// Complete configuration for one exposed schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub settings: EngineSettings,

    pub tables: Vec<TableConfig>,
}

impl SchemaConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.to_string(),
            },
            _ => ConfigError::Io {
                message: e.to_string(),
            },
        })?;
        Self::parse(&content, Some(path))
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse(yaml, None)
    }

    fn parse(yaml: &str, file: Option<&str>) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            file: file.map(str::to_string),
            message: e.to_string(),
        })?;

        if config.settings.batch_max_in_clause == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.batch_max_in_clause".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }

    /// Validate and build the schema model
    pub fn into_schema(self) -> Result<Schema, ConfigError> {
        Schema::from_config(self)
    }

    /// Find a table definition
    pub fn find_table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// A small blog schema used by tests and the demo server
    ///
    /// users 1-n posts, posts n-1 users, posts n-n tags (via post_tags),
    /// posts edge-list post_tags.
    pub fn blog() -> Self {
        Self::from_yaml_str(BLOG_SCHEMA).expect("bundled blog schema is valid")
    }
}

const BLOG_SCHEMA: &str = r#"
tables:
  - name: users
    primary_key: [id]
    columns:
      - { name: id, type: int, generated: true }
      - { name: email, type: text }
      - { name: name, type: text }
      - { name: bio, type: text, nullable: true }
    indexes:
      - { name: users_email_key, columns: [email], unique: true }
    relationships:
      - name: posts
        kind: one_to_many
        target: posts
        local_columns: [id]
        remote_columns: [author_id]
  - name: posts
    primary_key: [id]
    columns:
      - { name: id, type: int, generated: true }
      - { name: author_id, type: int }
      - { name: title, type: text }
      - { name: status, type: text, default: "draft" }
    relationships:
      - name: author
        kind: many_to_one
        target: users
        local_columns: [author_id]
        remote_columns: [id]
      - name: tags
        kind: many_to_many
        target: tags
        local_columns: [id]
        remote_columns: [id]
        junction:
          table: post_tags
          local_columns: [post_id]
          remote_columns: [tag_id]
      - name: taggings
        kind: edge_list
        target: post_tags
        local_columns: [id]
        remote_columns: [post_id]
  - name: tags
    primary_key: [id]
    columns:
      - { name: id, type: int, generated: true }
      - { name: label, type: text }
    indexes:
      - { name: tags_label_key, columns: [label], unique: true, field: by_label }
  - name: post_tags
    primary_key: [post_id, tag_id]
    columns:
      - { name: post_id, type: int }
      - { name: tag_id, type: int }
      - { name: weight, type: int, default: 1 }
    relationships:
      - name: post
        kind: many_to_one
        target: posts
        local_columns: [post_id]
        remote_columns: [id]
      - name: tag
        kind: many_to_one
        target: tags
        local_columns: [tag_id]
        remote_columns: [id]
  - name: audit_log
    primary_key: [id]
    read_only: true
    columns:
      - { name: id, type: int, generated: true }
      - { name: message, type: text }
"#;
