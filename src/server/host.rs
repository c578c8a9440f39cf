//! Server host for transport-agnostic API exposure
//!
//! The host holds everything a request needs and nothing request-scoped:
//! batch state and mutation contexts are created per operation by the
//! executor.

use crate::config::EngineSettings;
use crate::core::executor::Executor;
use crate::core::planner::Planner;
use crate::core::schema::Schema;
use std::sync::Arc;

/// Host context shared by every request
///
/// # Example
///
/// ```rust,ignore
/// let db = InMemoryDatabase::new(schema.clone());
/// let host = Arc::new(ServerHost::new(schema, Arc::new(db.clone()), Arc::new(db)));
/// let graphql_app = GraphQLExposure::build_router(host)?;
/// ```
pub struct ServerHost {
    /// Validated relational schema
    pub schema: Arc<Schema>,

    /// Statement planner for the backend's dialect
    pub planner: Arc<dyn Planner>,

    /// Executor statements run against
    pub executor: Arc<dyn Executor>,
}

impl ServerHost {
    pub fn new(schema: Arc<Schema>, planner: Arc<dyn Planner>, executor: Arc<dyn Executor>) -> Self {
        Self {
            schema,
            planner,
            executor,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.schema.settings
    }
}
