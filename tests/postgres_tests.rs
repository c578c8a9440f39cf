//! The blog schema against a real PostgreSQL
//!
//! # Requirements
//!
//! - Docker must be running (testcontainers launches a PostgreSQL container)
//! - Feature flag `postgres` must be enabled
//!
//! # Running
//!
//! ```sh
//! cargo test --features postgres --test postgres_tests -- --test-threads=1
//! ```
//!
//! All tests share one container (via `OnceLock`). Each test creates a fresh
//! `PgPool` and truncates the tables first.

#![cfg(feature = "postgres")]

use relgraph::config::SchemaConfig;
use relgraph::core::{NodeId, Schema, SqlValue};
use relgraph::server::ServerBuilder;
use relgraph::server::exposure::GraphQLExecutor;
use relgraph::storage::ensure_schema;
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::{Arc, OnceLock};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

/// Keeps the container alive for the whole test binary
struct PgTestEnv {
    _container: testcontainers::ContainerAsync<Postgres>,
    connection_url: String,
}

static TEST_ENV: OnceLock<PgTestEnv> = OnceLock::new();

fn blog_schema() -> Arc<Schema> {
    Arc::new(SchemaConfig::blog().into_schema().expect("blog schema is valid"))
}

async fn init_pg_env() -> &'static PgTestEnv {
    if let Some(env) = TEST_ENV.get() {
        return env;
    }

    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start PostgreSQL container (is Docker running?)");

    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPool::connect(&url)
        .await
        .expect("Failed to connect to PostgreSQL");
    ensure_schema(&pool, &blog_schema())
        .await
        .expect("Failed to create tables");
    pool.close().await;

    let _ = TEST_ENV.set(PgTestEnv {
        _container: container,
        connection_url: url,
    });
    TEST_ENV.get().unwrap()
}

/// Fresh pool on the current runtime, with empty tables
async fn clean_pool() -> PgPool {
    let env = init_pg_env().await;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&env.connection_url)
        .await
        .expect("Failed to connect to PostgreSQL");
    sqlx::query("TRUNCATE users, posts, tags, post_tags, audit_log RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to truncate tables");
    pool
}

async fn executor(pool: PgPool) -> GraphQLExecutor {
    let host = ServerBuilder::new()
        .with_schema(blog_schema())
        .with_postgres(pool)
        .build_host()
        .expect("host builds");
    GraphQLExecutor::new(Arc::new(host))
}

async fn run(executor: &GraphQLExecutor, query: &str) -> Value {
    let response = executor
        .execute(query, None, None)
        .await
        .unwrap_or_else(|e| panic!("query failed: {}", e));
    response["data"].clone()
}

fn user_id(key: i64) -> String {
    NodeId::new("User", vec![SqlValue::Int(key)]).encode()
}

#[tokio::test]
async fn test_nested_create_and_batched_read() {
    let pool = clean_pool().await;
    let executor = executor(pool.clone()).await;

    let data = run(
        &executor,
        r#"mutation {
            ann: createUser(input: {email: "ann@x.io", name: "ann", postsCreate: [{title: "a1"}, {title: "a2"}]}) {
                __typename
            }
            bob: createUser(input: {email: "bob@x.io", name: "bob", postsCreate: [{title: "b1"}]}) {
                __typename
            }
        }"#,
    )
    .await;
    assert_eq!(data["ann"]["__typename"], json!("CreateUserSuccess"));
    assert_eq!(data["bob"]["__typename"], json!("CreateUserSuccess"));

    let data = run(
        &executor,
        "{ users { nodes { name posts(first: 1) { nodes { title author { name } } pageInfo { hasNextPage } } } } }",
    )
    .await;
    assert_eq!(
        data["users"]["nodes"],
        json!([
            {"name": "ann", "posts": {"nodes": [{"title": "a1", "author": {"name": "ann"}}], "pageInfo": {"hasNextPage": true}}},
            {"name": "bob", "posts": {"nodes": [{"title": "b1", "author": {"name": "bob"}}], "pageInfo": {"hasNextPage": false}}}
        ])
    );
}

#[tokio::test]
async fn test_conflict_rolls_back_operation() {
    let pool = clean_pool().await;
    let executor = executor(pool.clone()).await;
    run(&executor, r#"mutation { createUser(input: {email: "ann@x.io", name: "ann"}) { __typename } }"#).await;

    let data = run(
        &executor,
        r#"mutation {
            a: createTag(input: {label: "rust"}) { __typename }
            b: createUser(input: {email: "ann@x.io", name: "dup"}) {
                __typename
                ... on ConflictError { code nativeErrorCode }
            }
        }"#,
    )
    .await;
    assert_eq!(data["b"], json!({"__typename": "ConflictError", "code": "CONFLICT", "nativeErrorCode": "23505"}));

    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tags, 0);
}

#[tokio::test]
async fn test_field_after_failed_write_still_runs() {
    let pool = clean_pool().await;
    let executor = executor(pool.clone()).await;
    run(&executor, r#"mutation { createUser(input: {email: "ann@x.io", name: "ann"}) { __typename } }"#).await;

    let data = run(
        &executor,
        r#"mutation {
            b: createUser(input: {email: "ann@x.io", name: "dup"}) { __typename }
            a: createTag(input: {label: "rust"}) {
                __typename
                ... on CreateTagSuccess { node { label } }
            }
        }"#,
    )
    .await;
    assert_eq!(data["b"]["__typename"], "ConflictError");
    assert_eq!(data["a"], json!({"__typename": "CreateTagSuccess", "node": {"label": "rust"}}));

    // The operation as a whole still rolls back
    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tags, 0);
}

#[tokio::test]
async fn test_delete_referenced_row_is_constraint_error() {
    let pool = clean_pool().await;
    let executor = executor(pool).await;
    run(
        &executor,
        r#"mutation { createUser(input: {email: "ann@x.io", name: "ann", postsCreate: [{title: "p"}]}) { __typename } }"#,
    )
    .await;

    let data = run(
        &executor,
        &format!(
            r#"mutation {{ deleteUser(id: "{}") {{ __typename ... on ConstraintError {{ nativeErrorCode }} }} }}"#,
            user_id(1)
        ),
    )
    .await;
    assert_eq!(data["deleteUser"], json!({"__typename": "ConstraintError", "nativeErrorCode": "23503"}));
}

#[tokio::test]
async fn test_many_to_many_connect_and_cursor_paging() {
    let pool = clean_pool().await;
    let executor = executor(pool).await;
    run(
        &executor,
        r#"mutation {
            t1: createTag(input: {label: "rust"}) { __typename }
            t2: createTag(input: {label: "sql"}) { __typename }
            u: createUser(input: {email: "ann@x.io", name: "ann"}) { __typename }
        }"#,
    )
    .await;

    let data = run(
        &executor,
        &format!(
            r#"mutation {{
                createPost(input: {{
                    title: "tagged",
                    authorConnect: {{id: "{}"}},
                    tagsConnect: [{{by_label: {{label: "sql"}}}}, {{by_label: {{label: "rust"}}}}]
                }}) {{
                    ... on CreatePostSuccess {{ node {{ tags {{ nodes {{ label }} }} }} }}
                }}
            }}"#,
            user_id(1)
        ),
    )
    .await;
    assert_eq!(
        data["createPost"]["node"]["tags"]["nodes"],
        json!([{"label": "rust"}, {"label": "sql"}])
    );

    let data = run(&executor, "{ tags(first: 1) { nodes { label } pageInfo { endCursor } } }").await;
    let cursor = data["tags"]["pageInfo"]["endCursor"].as_str().unwrap().to_string();
    let data = run(
        &executor,
        &format!(r#"{{ tags(first: 1, after: "{}") {{ nodes {{ label }} pageInfo {{ hasNextPage }} }} }}"#, cursor),
    )
    .await;
    assert_eq!(data["tags"]["nodes"], json!([{"label": "sql"}]));
    assert_eq!(data["tags"]["pageInfo"]["hasNextPage"], json!(false));
}
