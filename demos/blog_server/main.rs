//! Blog server over the in-memory backend
//!
//! Serves the bundled blog schema with a few seeded rows:
//! - `POST /graphql` for queries and mutations
//! - `GET /graphql/schema` for the generated SDL
//!
//! ```sh
//! RUST_LOG=relgraph=debug cargo run --example blog_server
//! ```

use relgraph::prelude::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn seed(db: &InMemoryDatabase) -> Result<()> {
    let row = |pairs: &[(&str, SqlValue)]| -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    };

    for (email, name) in [("ann@example.com", "Ann"), ("bob@example.com", "Bob")] {
        db.seed("users", row(&[("email", email.into()), ("name", name.into())]))?;
    }
    for label in ["rust", "graphql", "sql"] {
        db.seed("tags", row(&[("label", label.into())]))?;
    }
    for (author, title) in [(1, "Batching explained"), (1, "Cursor pagination"), (2, "Nested writes")] {
        db.seed(
            "posts",
            row(&[("author_id", SqlValue::Int(author)), ("title", title.into())]),
        )?;
    }
    for (post, tag) in [(1, 1), (1, 2), (2, 2), (3, 3)] {
        db.seed(
            "post_tags",
            row(&[("post_id", SqlValue::Int(post)), ("tag_id", SqlValue::Int(tag))]),
        )?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relgraph=info")),
        )
        .init();

    let schema = Arc::new(SchemaConfig::blog().into_schema()?);
    let db = InMemoryDatabase::new(schema);
    seed(&db)?;

    tracing::info!(users = 2, posts = 3, tags = 3, "seeded blog data");

    ServerBuilder::new()
        .with_in_memory_database(db)
        .with_cors_origins(["http://localhost:3000"])
        .serve("127.0.0.1:3000")
        .await
}
