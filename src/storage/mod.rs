//! Storage backends
//!
//! Each backend supplies a [`Planner`](crate::core::planner::Planner) and an
//! [`Executor`](crate::core::executor::Executor) for the engine.

#[cfg(feature = "in-memory")]
pub mod in_memory;
pub mod postgres;

#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryDatabase, LoggedStatement, StatementKind};
pub use postgres::PostgresPlanner;
#[cfg(feature = "postgres")]
pub use postgres::{PgExecutor, ensure_schema};
