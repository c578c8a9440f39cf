//! Core types shared by the resolution engine and the mutation orchestrator

pub mod cursor;
pub mod error;
pub mod executor;
pub mod naming;
pub mod node_id;
pub mod planner;
pub mod schema;
pub mod value;

pub use cursor::Cursor;
pub use error::{
    ConfigError, EngineError, ErrorKind, MutationError, MutationFailure, StorageFailure, classify,
};
pub use executor::{DirectSource, Executor, QuerySource, Transaction, WriteResult};
pub use node_id::NodeId;
pub use planner::{
    AggregateFunction, AggregateQuery, ConnectionQuery, JunctionHop, Planner, RelationScope,
    SortDirection, SortKey, Statement,
};
pub use schema::{Column, ColumnType, Index, Junction, Relationship, RelationshipKind, Schema, Table};
pub use value::{Row, SqlValue};
