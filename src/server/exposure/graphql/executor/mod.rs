//! GraphQL executor module
//!
//! The executor is split into several sub-modules:
//! - `core`: operation selection, request contexts, transaction finalization
//! - `selection`: lowering parsed documents into owned selection trees
//! - `query_executor`: root query fields
//! - `mutation_executor`: root mutation fields and result unions
//! - `field_resolver`: objects, relationships and connections
//! - `utils`: argument helpers

mod core;
mod field_resolver;
mod mutation_executor;
mod query_executor;
mod selection;
mod utils;

pub use core::GraphQLExecutor;
pub use field_resolver::{aggregate_type_name, edge_type_name};
pub use mutation_executor::union_type_name;
