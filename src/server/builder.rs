//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::GraphQLExposure;
use super::host::ServerHost;
use crate::config::SchemaConfig;
use crate::core::executor::Executor;
use crate::core::planner::Planner;
use crate::core::schema::Schema;
use anyhow::{Result, anyhow};
use axum::Router;
use axum::http::{HeaderValue, Method, header};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

#[cfg(feature = "in-memory")]
use crate::storage::InMemoryDatabase;

/// Where statements are planned and executed
enum Backend {
    /// In-memory database created from the schema at build time
    #[cfg(feature = "in-memory")]
    InMemory,
    /// An existing in-memory database (already seeded, shared with a caller)
    #[cfg(feature = "in-memory")]
    InMemoryDatabase(InMemoryDatabase),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
    Custom {
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
    },
}

/// Builder for the GraphQL server
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_config_file("schema.yaml")?
///     .with_in_memory()
///     .build()?;
/// ```
pub struct ServerBuilder {
    config: Option<SchemaConfig>,
    schema: Option<Arc<Schema>>,
    backend: Option<Backend>,
    custom_routes: Vec<Router>,
    cors_origins: Vec<String>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            config: None,
            schema: None,
            backend: None,
            custom_routes: Vec::new(),
            cors_origins: Vec::new(),
        }
    }

    /// Use a parsed schema configuration
    pub fn with_config(mut self, config: SchemaConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the schema configuration from a YAML file
    pub fn with_config_file(self, path: &str) -> Result<Self> {
        let config = SchemaConfig::from_yaml_file(path)?;
        Ok(self.with_config(config))
    }

    /// Use an already validated schema; takes precedence over any config
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Serve from a fresh in-memory database
    #[cfg(feature = "in-memory")]
    pub fn with_in_memory(mut self) -> Self {
        self.backend = Some(Backend::InMemory);
        self
    }

    /// Serve from an existing in-memory database
    ///
    /// The database carries its own schema, which replaces any configured one.
    #[cfg(feature = "in-memory")]
    pub fn with_in_memory_database(mut self, db: InMemoryDatabase) -> Self {
        self.schema = Some(db.schema().clone());
        self.backend = Some(Backend::InMemoryDatabase(db));
        self
    }

    /// Serve from PostgreSQL; the tables must already exist
    /// (see [`crate::storage::ensure_schema`])
    #[cfg(feature = "postgres")]
    pub fn with_postgres(mut self, pool: sqlx::PgPool) -> Self {
        self.backend = Some(Backend::Postgres(pool));
        self
    }

    /// Plug in any planner/executor pair
    pub fn with_backend(mut self, planner: Arc<dyn Planner>, executor: Arc<dyn Executor>) -> Self {
        self.backend = Some(Backend::Custom { planner, executor });
        self
    }

    /// Add custom routes to the server
    ///
    /// # Example
    ///
    /// ```ignore
    /// let health = Router::new().route("/health", get(|| async { "ok" }));
    ///
    /// ServerBuilder::new()
    ///     .with_config(config)
    ///     .with_in_memory()
    ///     .with_custom_routes(health)
    ///     .build()?;
    /// ```
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Allow cross-origin requests from these origins
    pub fn with_cors_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cors_origins.extend(origins.into_iter().map(Into::into));
        self
    }

    /// Build the transport-agnostic host
    pub fn build_host(&mut self) -> Result<ServerHost> {
        let schema = match (self.schema.take(), self.config.take()) {
            (Some(schema), _) => schema,
            (None, Some(config)) => Arc::new(config.into_schema()?),
            (None, None) => {
                return Err(anyhow!(
                    "A schema is required. Call .with_config() or .with_schema()"
                ));
            }
        };

        let backend = self
            .backend
            .take()
            .ok_or_else(|| anyhow!("A backend is required. Call .with_in_memory() or .with_backend()"))?;

        let (planner, executor): (Arc<dyn Planner>, Arc<dyn Executor>) = match backend {
            #[cfg(feature = "in-memory")]
            Backend::InMemory => {
                let db = InMemoryDatabase::new(schema.clone());
                (Arc::new(db.clone()), Arc::new(db))
            }
            #[cfg(feature = "in-memory")]
            Backend::InMemoryDatabase(db) => (Arc::new(db.clone()), Arc::new(db)),
            #[cfg(feature = "postgres")]
            Backend::Postgres(pool) => (
                Arc::new(crate::storage::PostgresPlanner::new(schema.clone())),
                Arc::new(crate::storage::PgExecutor::new(pool)),
            ),
            Backend::Custom { planner, executor } => (planner, executor),
        };

        tracing::info!(tables = schema.tables().count(), "schema loaded");
        Ok(ServerHost::new(schema, planner, executor))
    }

    /// Build the final router: GraphQL routes, custom routes, tracing and CORS
    pub fn build(mut self) -> Result<Router> {
        let host = Arc::new(self.build_host()?);

        let mut app = GraphQLExposure::build_router(host)?;
        for routes in std::mem::take(&mut self.custom_routes) {
            app = app.merge(routes);
        }

        let app = match build_cors_layer(&self.cors_origins) {
            Some(cors) => app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors)),
            None => app.layer(TraceLayer::new_for_http()),
        };
        Ok(app)
    }

    /// Serve the application with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let mut allowed = Vec::new();
    for origin in origins {
        let trimmed = origin.trim().trim_end_matches('/');
        match HeaderValue::from_str(trimmed) {
            Ok(value) if !trimmed.is_empty() => allowed.push(value),
            _ => tracing::warn!(%origin, "ignoring invalid CORS origin"),
        }
    }

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE]),
    )
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_host_requires_schema() {
        let err = ServerBuilder::new().build_host().err().unwrap();
        assert!(err.to_string().contains("schema is required"));
    }

    #[test]
    fn test_build_host_requires_backend() {
        let err = ServerBuilder::new()
            .with_config(SchemaConfig::blog())
            .build_host()
            .err()
            .unwrap();
        assert!(err.to_string().contains("backend is required"));
    }

    #[cfg(feature = "in-memory")]
    #[test]
    fn test_build_host_from_config() {
        let host = ServerBuilder::new()
            .with_config(SchemaConfig::blog())
            .with_in_memory()
            .build_host()
            .unwrap();
        assert!(host.schema.table("posts").is_some());
        assert_eq!(host.settings().batch_max_in_clause, 500);
    }

    #[cfg(feature = "in-memory")]
    #[test]
    fn test_existing_database_supplies_schema() {
        let schema = Arc::new(SchemaConfig::blog().into_schema().unwrap());
        let db = InMemoryDatabase::new(schema);
        let host = ServerBuilder::new()
            .with_in_memory_database(db)
            .build_host()
            .unwrap();
        assert!(host.schema.table("tags").is_some());
    }

    #[cfg(feature = "in-memory")]
    #[tokio::test]
    async fn test_build_router_with_custom_routes_and_cors() {
        use axum::routing::get;

        let router = ServerBuilder::new()
            .with_config(SchemaConfig::blog())
            .with_in_memory()
            .with_custom_routes(Router::new().route("/health", get(|| async { "ok" })))
            .with_cors_origins(["http://localhost:3000/"])
            .build();
        assert!(router.is_ok());
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        assert!(build_cors_layer(&[]).is_none());
        assert!(build_cors_layer(&["".to_string()]).is_none());
        assert!(build_cors_layer(&["https://example.com".to_string()]).is_some());
    }
}
