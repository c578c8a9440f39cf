//! # relgraph
//!
//! GraphQL over a relational schema, with request-scoped batching and
//! transactional mutations.
//!
//! ## Features
//!
//! - **Batched relationship fields**: one grouped query per sibling group
//!   instead of one per parent row, chunked to a configurable size
//! - **Single-flight cache**: concurrent resolvers asking for the same batch
//!   share one fetch
//! - **Cursor pagination**: opaque cursors, forward and backward, with
//!   primary-key tiebreakers on every sort
//! - **Nested writes**: connect by id or unique key, nested creates and
//!   many-to-many connects, all in one transaction per operation
//! - **Typed mutation errors**: storage failures become result-union members
//!   (`ConflictError`, `ConstraintError`, ...)
//! - **Configuration-based**: tables and relationships defined in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relgraph::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     ServerBuilder::new()
//!         .with_config_file("schema.yaml")?
//!         .with_in_memory()
//!         .serve("127.0.0.1:3000")
//!         .await
//! }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod mutation;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        ColumnType, EngineError, ErrorKind, Executor, MutationError, NodeId, Planner, QuerySource,
        Row, Schema, SqlValue, StorageFailure, Table, Transaction,
    };

    // === Engine ===
    pub use crate::engine::{Connection, ConnectionArgs, RequestBatchState, ResolveContext};

    // === Mutations ===
    pub use crate::mutation::{MutationContext, MutationPayload, Orchestrator};

    // === Storage ===
    #[cfg(feature = "in-memory")]
    pub use crate::storage::InMemoryDatabase;
    pub use crate::storage::PostgresPlanner;
    #[cfg(feature = "postgres")]
    pub use crate::storage::{PgExecutor, ensure_schema};

    // === Config ===
    pub use crate::config::{EngineSettings, SchemaConfig};

    // === Server ===
    pub use crate::server::{GraphQLExposure, ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
