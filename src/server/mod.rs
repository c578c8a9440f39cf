//! Server module for exposing a relational schema over HTTP
//!
//! `ServerBuilder` wires a schema to a storage backend and produces an axum
//! router serving the GraphQL exposure.

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use exposure::GraphQLExposure;
pub use host::ServerHost;
