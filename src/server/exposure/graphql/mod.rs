//! GraphQL API exposure
//!
//! Routes:
//! - `POST /graphql`: queries and mutations
//! - `GET /graphql/schema`: generated SDL
//! - `GET /graphql/playground`: interactive playground (`playground` feature)

mod executor;
mod schema_generator;

pub use executor::GraphQLExecutor;
pub use schema_generator::SchemaGenerator;

use crate::core::error::EngineError;
use crate::server::host::ServerHost;
use anyhow::Result;
use axum::{
    Router,
    extract::{Extension, Json as AxumJson},
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQLRequestBody {
    query: String,
    #[serde(default)]
    variables: Option<HashMap<String, Value>>,
    #[serde(default)]
    operation_name: Option<String>,
}

/// GraphQL API exposure implementation
pub struct GraphQLExposure;

impl GraphQLExposure {
    /// Build the GraphQL router from a host
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let host = Arc::new(builder.build_host()?);
    /// let graphql_app = GraphQLExposure::build_router(host)?;
    /// ```
    pub fn build_router(host: Arc<ServerHost>) -> Result<Router> {
        let executor = Arc::new(GraphQLExecutor::new(host));

        let router = Router::new()
            .route("/graphql", post(graphql_handler))
            .route("/graphql/schema", get(graphql_schema));

        #[cfg(feature = "playground")]
        let router = router.route("/graphql/playground", get(graphql_playground));

        Ok(router.layer(Extension(executor)))
    }
}

/// Handler for GraphQL queries and mutations
async fn graphql_handler(
    Extension(executor): Extension<Arc<GraphQLExecutor>>,
    AxumJson(request): AxumJson<GraphQLRequestBody>,
) -> impl IntoResponse {
    match executor
        .execute(
            &request.query,
            request.variables,
            request.operation_name.as_deref(),
        )
        .await
    {
        Ok(response) => AxumJson(response),
        Err(e) => {
            tracing::debug!(error = %e, "graphql request failed");
            AxumJson(error_body(&e))
        }
    }
}

/// `{"errors": [...]}` with the engine error code when there is one
fn error_body(err: &anyhow::Error) -> Value {
    let code = err
        .downcast_ref::<EngineError>()
        .map(EngineError::error_code)
        .unwrap_or("GRAPHQL_ERROR");
    json!({
        "errors": [{
            "message": err.to_string(),
            "extensions": { "code": code }
        }]
    })
}

/// Handler for GraphQL schema SDL export
async fn graphql_schema(Extension(executor): Extension<Arc<GraphQLExecutor>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        executor.sdl().to_string(),
    )
}

#[cfg(feature = "playground")]
/// Handler for GraphQL playground UI
async fn graphql_playground() -> impl IntoResponse {
    use async_graphql::http::{GraphQLPlaygroundConfig, playground_source};
    axum::response::Html(playground_source(GraphQLPlaygroundConfig::new("/graphql")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_uses_engine_code() {
        let err = anyhow::Error::new(EngineError::invalid_argument("first", "must not be negative"));
        let body = error_body(&err);
        assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_ARGUMENT");

        let err = anyhow::anyhow!("Unknown query field: nope");
        let body = error_body(&err);
        assert_eq!(body["errors"][0]["extensions"]["code"], "GRAPHQL_ERROR");
        assert_eq!(body["errors"][0]["message"], "Unknown query field: nope");
    }

    #[test]
    fn test_request_body_accepts_operation_name() {
        let body: GraphQLRequestBody = serde_json::from_value(json!({
            "query": "query A { users { nodes { email } } }",
            "operationName": "A"
        }))
        .unwrap();
        assert_eq!(body.operation_name.as_deref(), Some("A"));
        assert!(body.variables.is_none());
    }
}
