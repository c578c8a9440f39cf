//! Request-scoped resolution engine: batching, caching and pagination

pub mod batch;
pub mod connection;
pub mod resolver;

pub use batch::{BatchKey, BatchStats, GroupedRows, ParentKey, RequestBatchState};
pub use connection::{Connection, ConnectionArgs, Edge, LazyAggregate, PageInfo, PaginationArgs};
pub use resolver::{
    ParentRef, RelationValue, ResolveContext, fetch_columns, resolve_node, resolve_relationship,
    resolve_root_connection,
};
