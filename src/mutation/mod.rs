//! Mutation orchestrator: partitioned input, connect resolution, nested
//! writes and one shared transaction per operation

pub mod connect;
pub mod context;
pub mod input;
pub mod orchestrator;
pub mod payload;

pub use connect::resolve_connect;
pub use context::{MutationContext, Outcome};
pub use input::{ConnectInput, ConnectRef, Depth, JunctionConnect, NestedCreate, PartitionedInput};
pub use orchestrator::{DeletedRow, Orchestrator};
pub use payload::MutationPayload;
