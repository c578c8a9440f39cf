//! Shared test harness: the blog schema over the in-memory backend
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! mod harness;
//! use harness::*;
//! ```

#![allow(dead_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use relgraph::config::{EngineSettings, SchemaConfig};
use relgraph::core::{EngineError, NodeId, Row, SqlValue};
use relgraph::server::ServerBuilder;
use relgraph::server::exposure::GraphQLExecutor;
use relgraph::storage::{InMemoryDatabase, StatementKind};

/// Blog database plus an executor serving it
pub struct BlogApp {
    pub db: InMemoryDatabase,
    pub executor: GraphQLExecutor,
}

impl BlogApp {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let mut config = SchemaConfig::blog();
        config.settings = settings;
        let schema = Arc::new(config.into_schema().expect("blog schema is valid"));
        let db = InMemoryDatabase::new(schema);
        let host = ServerBuilder::new()
            .with_in_memory_database(db.clone())
            .build_host()
            .expect("host builds");
        Self {
            db,
            executor: GraphQLExecutor::new(Arc::new(host)),
        }
    }

    /// Run a document that must succeed; returns `data`
    pub async fn run(&self, query: &str) -> Value {
        self.run_with(query, Value::Null).await
    }

    pub async fn run_with(&self, query: &str, variables: Value) -> Value {
        let variables: Option<HashMap<String, Value>> = match variables {
            Value::Null => None,
            other => Some(serde_json::from_value(other).expect("variables are an object")),
        };
        let response = self
            .executor
            .execute(query, variables, None)
            .await
            .unwrap_or_else(|e| panic!("query failed: {}", e));
        response["data"].clone()
    }

    /// Run a document that must fail
    pub async fn run_err(&self, query: &str) -> anyhow::Error {
        match self.executor.execute(query, None, None).await {
            Ok(response) => panic!("expected an error, got {}", response),
            Err(e) => e,
        }
    }

    pub fn user(&self, email: &str, name: &str) -> i64 {
        key(self
            .db
            .seed("users", row(&[("email", email.into()), ("name", name.into())])))
    }

    pub fn post(&self, author_id: i64, title: &str) -> i64 {
        key(self.db.seed(
            "posts",
            row(&[("author_id", SqlValue::Int(author_id)), ("title", title.into())]),
        ))
    }

    pub fn tag(&self, label: &str) -> i64 {
        key(self.db.seed("tags", row(&[("label", label.into())])))
    }

    pub fn tag_post(&self, post_id: i64, tag_id: i64) {
        self.db
            .seed(
                "post_tags",
                row(&[("post_id", SqlValue::Int(post_id)), ("tag_id", SqlValue::Int(tag_id))]),
            )
            .expect("junction row seeds");
    }

    pub fn count(&self, kind: StatementKind) -> usize {
        self.db.count(kind)
    }

    pub fn count_on(&self, kind: StatementKind, table: &str) -> usize {
        self.db.count_on(kind, table)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.db.rows(table).expect("table exists")
    }
}

fn key(result: Result<Vec<SqlValue>, relgraph::core::StorageFailure>) -> i64 {
    result
        .expect("seed succeeds")
        .first()
        .and_then(SqlValue::as_int)
        .expect("integer key")
}

pub fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Opaque id of a single-integer-key row
pub fn id_of(type_name: &str, key: i64) -> String {
    NodeId::new(type_name, vec![SqlValue::Int(key)]).encode()
}

pub fn settings(batch_max_in_clause: usize) -> EngineSettings {
    EngineSettings {
        batch_max_in_clause,
        ..EngineSettings::default()
    }
}

/// Titles (or any one string field) of a connection's nodes
pub fn strings(connection: &Value, field: &str) -> Vec<String> {
    connection["nodes"]
        .as_array()
        .expect("nodes list")
        .iter()
        .map(|node| node[field].as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn engine_error(err: &anyhow::Error) -> &EngineError {
    err.downcast_ref::<EngineError>()
        .unwrap_or_else(|| panic!("not an engine error: {}", err))
}
