//! Mutations: nested writes, connects, typed errors and the shared transaction

mod harness;

use harness::*;
use relgraph::core::SqlValue;
use relgraph::storage::StatementKind;
use serde_json::{Value, json};

const RESULT_FIELDS: &str = r#"
    __typename
    ... on MutationError { message code nativeErrorCode }
    ... on InputValidationError { message code }
    ... on ConflictError { message code nativeErrorCode }
    ... on ConstraintError { message code nativeErrorCode }
    ... on PermissionError { message code nativeErrorCode }
    ... on NotFoundError { message code }
"#;

#[tokio::test]
async fn test_create_with_nested_children_in_one_transaction() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{
                createUser(input: {{
                    email: "ann@x.io",
                    name: "ann",
                    postsCreate: [{{title: "first"}}, {{title: "second", status: "published"}}]
                }}) {{
                    ... on CreateUserSuccess {{
                        node {{ email posts {{ nodes {{ title status }} }} }}
                    }}
                    {}
                }}
            }}"#,
            RESULT_FIELDS
        ))
        .await;

    let result = &data["createUser"];
    assert_eq!(result["__typename"], json!("CreateUserSuccess"));
    assert_eq!(result["node"]["email"], json!("ann@x.io"));
    assert_eq!(
        result["node"]["posts"]["nodes"],
        json!([
            {"title": "first", "status": "draft"},
            {"title": "second", "status": "published"}
        ])
    );

    // Parent insert, one re-select of the parent, then the children, all
    // behind the field's savepoint in one committed transaction
    let log = app.db.statements();
    let writes: Vec<(StatementKind, &str)> = log
        .iter()
        .take_while(|s| s.kind != StatementKind::ReleaseSavepoint)
        .map(|s| (s.kind, s.table.as_str()))
        .collect();
    assert_eq!(
        writes,
        vec![
            (StatementKind::Begin, ""),
            (StatementKind::Savepoint, ""),
            (StatementKind::Insert, "users"),
            (StatementKind::Lookup, "users"),
            (StatementKind::Insert, "posts"),
            (StatementKind::Insert, "posts"),
        ]
    );
    assert!(log.iter().all(|s| s.in_transaction));
    assert_eq!(app.count(StatementKind::Begin), 1);
    assert_eq!(app.count(StatementKind::Commit), 1);
    assert_eq!(app.count(StatementKind::Rollback), 0);
    assert_eq!(app.rows("posts").len(), 2);
}

#[tokio::test]
async fn test_connect_by_id_and_by_unique_key() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");
    app.tag("rust");
    app.tag("sql");

    let data = app
        .run_with(
            r#"mutation($author: ID!) {
                createPost(input: {
                    title: "hello",
                    authorConnect: {id: $author},
                    tagsConnect: [{by_label: {label: "rust"}}, {by_label: {label: "sql"}}]
                }) {
                    __typename
                    ... on CreatePostSuccess {
                        node { title author { name } tags { nodes { label } } }
                    }
                }
            }"#,
            json!({"author": id_of("User", ann)}),
        )
        .await;

    let node = &data["createPost"]["node"];
    assert_eq!(data["createPost"]["__typename"], json!("CreatePostSuccess"));
    assert_eq!(node["author"]["name"], json!("ann"));
    assert_eq!(strings(&node["tags"], "label"), vec!["rust", "sql"]);
    assert_eq!(app.rows("post_tags").len(), 2);

    let data = app
        .run(&format!(
            r#"mutation {{
                createPost(input: {{title: "again", authorConnect: {{by_email: {{email: "ann@x.io"}}}}}}) {{
                    ... on CreatePostSuccess {{ node {{ author_id }} }}
                    {}
                }}
            }}"#,
            RESULT_FIELDS
        ))
        .await;
    assert_eq!(data["createPost"]["node"]["author_id"], json!(ann));
}

#[tokio::test]
async fn test_connect_needs_exactly_one_reference() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");

    for connect in [
        format!(r#"{{id: "{}", by_email: {{email: "ann@x.io"}}}}"#, id_of("User", ann)),
        "{}".to_string(),
    ] {
        let data = app
            .run(&format!(
                r#"mutation {{ createPost(input: {{title: "x", authorConnect: {}}}) {{ {} }} }}"#,
                connect, RESULT_FIELDS
            ))
            .await;
        assert_eq!(data["createPost"]["__typename"], json!("InputValidationError"));
        assert_eq!(data["createPost"]["code"], json!("INPUT_VALIDATION"));
    }
    assert!(app.rows("posts").is_empty());
}

#[tokio::test]
async fn test_connect_to_missing_row_is_not_found() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{ createPost(input: {{title: "x", authorConnect: {{id: "{}"}}}}) {{ {} }} }}"#,
            id_of("User", 42),
            RESULT_FIELDS
        ))
        .await;
    assert_eq!(data["createPost"]["__typename"], json!("NotFoundError"));
}

#[tokio::test]
async fn test_conflict_rolls_back_whole_operation() {
    let app = BlogApp::new();
    app.user("ann@x.io", "ann");

    let data = app
        .run(&format!(
            r#"mutation {{
                a: createUser(input: {{email: "new@x.io", name: "new"}}) {{ {fields} }}
                b: createUser(input: {{email: "ann@x.io", name: "dup"}}) {{ {fields} }}
            }}"#,
            fields = RESULT_FIELDS
        ))
        .await;

    assert_eq!(data["a"]["__typename"], json!("CreateUserSuccess"));
    assert_eq!(data["b"]["__typename"], json!("ConflictError"));
    assert_eq!(data["b"]["code"], json!("CONFLICT"));
    assert_eq!(data["b"]["nativeErrorCode"], json!("23505"));

    // The successful field is undone with the failed one
    let emails: Vec<SqlValue> = app.rows("users").iter().map(|r| r["email"].clone()).collect();
    assert_eq!(emails, vec![SqlValue::from("ann@x.io")]);
    assert_eq!(app.count(StatementKind::Rollback), 1);
    assert_eq!(app.count(StatementKind::Commit), 0);
}

#[tokio::test]
async fn test_failed_field_does_not_poison_later_fields() {
    let app = BlogApp::new();
    app.user("ann@x.io", "ann");

    let data = app
        .run(&format!(
            r#"mutation {{
                b: createUser(input: {{email: "ann@x.io", name: "dup"}}) {{ {fields} }}
                a: createTag(input: {{label: "rust"}}) {{ {fields} }}
            }}"#,
            fields = RESULT_FIELDS
        ))
        .await;

    assert_eq!(data["b"]["__typename"], json!("ConflictError"));
    assert_eq!(data["a"]["__typename"], json!("CreateTagSuccess"));

    // Only the failed field returns to its savepoint; the operation still rolls back
    assert_eq!(app.count(StatementKind::RollbackToSavepoint), 1);
    assert_eq!(app.count(StatementKind::ReleaseSavepoint), 1);
    assert_eq!(app.count(StatementKind::Rollback), 1);
    assert!(app.rows("tags").is_empty());
}

#[tokio::test]
async fn test_failed_child_insert_undoes_parent() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{
                createUser(input: {{
                    email: "ann@x.io",
                    name: "ann",
                    postsCreate: [{{title: "fine"}}, {{title: "broken", status: null}}]
                }}) {{ {} }}
            }}"#,
            RESULT_FIELDS
        ))
        .await;

    assert_eq!(data["createUser"]["__typename"], json!("ConstraintError"));
    assert_eq!(data["createUser"]["nativeErrorCode"], json!("23502"));
    assert_eq!(app.count_on(StatementKind::Insert, "users"), 1);
    assert_eq!(app.count_on(StatementKind::Insert, "posts"), 2);
    assert!(app.rows("users").is_empty());
    assert!(app.rows("posts").is_empty());
    assert_eq!(app.count(StatementKind::Rollback), 1);
}

#[tokio::test]
async fn test_missing_required_column_is_input_error() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{ createUser(input: {{email: "x@x.io"}}) {{ {} }} }}"#,
            RESULT_FIELDS
        ))
        .await;
    assert_eq!(data["createUser"]["__typename"], json!("InputValidationError"));
    assert!(data["createUser"]["message"].as_str().unwrap().contains("name"));
}

#[tokio::test]
async fn test_update_applies_set() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");

    let data = app
        .run(&format!(
            r#"mutation {{
                updateUser(id: "{}", set: {{bio: "hello"}}) {{
                    __typename
                    ... on UpdateUserSuccess {{ node {{ name bio }} }}
                }}
            }}"#,
            id_of("User", ann)
        ))
        .await;

    assert_eq!(data["updateUser"]["node"], json!({"name": "ann", "bio": "hello"}));
    assert_eq!(app.rows("users")[0]["bio"], SqlValue::from("hello"));
}

#[tokio::test]
async fn test_empty_set_writes_nothing() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");

    let data = app
        .run(&format!(
            r#"mutation {{
                updateUser(id: "{}", set: {{}}) {{
                    ... on UpdateUserSuccess {{ node {{ name }} }}
                }}
            }}"#,
            id_of("User", ann)
        ))
        .await;

    assert_eq!(data["updateUser"]["node"]["name"], json!("ann"));
    assert_eq!(app.count(StatementKind::Update), 0);
}

#[tokio::test]
async fn test_update_of_missing_row_succeeds_without_node() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{
                updateUser(id: "{}", set: {{name: "ghost"}}) {{
                    __typename
                    ... on UpdateUserSuccess {{ node {{ name }} }}
                }}
            }}"#,
            id_of("User", 7)
        ))
        .await;

    assert_eq!(data["updateUser"]["__typename"], json!("UpdateUserSuccess"));
    assert_eq!(data["updateUser"]["node"], Value::Null);
}

#[tokio::test]
async fn test_delete_success_and_not_found() {
    let app = BlogApp::new();
    let tag = app.tag("old");
    let id = id_of("Tag", tag);

    let query = format!(
        r#"mutation {{
            deleteTag(id: "{}") {{
                __typename
                ... on DeleteTagSuccess {{ id }}
                ... on NotFoundError {{ code }}
            }}
        }}"#,
        id
    );

    let data = app.run(&query).await;
    assert_eq!(data["deleteTag"], json!({"__typename": "DeleteTagSuccess", "id": id}));
    assert!(app.rows("tags").is_empty());

    let data = app.run(&query).await;
    assert_eq!(data["deleteTag"], json!({"__typename": "NotFoundError", "code": "NOT_FOUND"}));
}

#[tokio::test]
async fn test_delete_referenced_row_is_constraint_error() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");
    app.post(ann, "keeps ann alive");

    let data = app
        .run(&format!(
            r#"mutation {{ deleteUser(id: "{}") {{ {} }} }}"#,
            id_of("User", ann),
            RESULT_FIELDS
        ))
        .await;

    assert_eq!(data["deleteUser"]["__typename"], json!("ConstraintError"));
    assert_eq!(data["deleteUser"]["nativeErrorCode"], json!("23503"));
    assert_eq!(app.rows("users").len(), 1);
}

#[tokio::test]
async fn test_read_only_table_is_permission_error() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{ createAuditLog(input: {{message: "nope"}}) {{ {} }} }}"#,
            RESULT_FIELDS
        ))
        .await;

    assert_eq!(data["createAuditLog"]["__typename"], json!("PermissionError"));
    assert_eq!(data["createAuditLog"]["code"], json!("PERMISSION_DENIED"));
}

#[tokio::test]
async fn test_malformed_id_is_input_error() {
    let app = BlogApp::new();

    let data = app
        .run(&format!(
            r#"mutation {{ deleteUser(id: "%%%") {{ {} }} }}"#,
            RESULT_FIELDS
        ))
        .await;
    assert_eq!(data["deleteUser"]["__typename"], json!("InputValidationError"));
}

#[tokio::test]
async fn test_edge_list_nested_create() {
    let app = BlogApp::new();
    let ann = app.user("ann@x.io", "ann");
    let rust = app.tag("rust");

    let data = app
        .run_with(
            r#"mutation($author: ID!, $tag: Int!) {
                createPost(input: {
                    title: "weighted",
                    authorConnect: {id: $author},
                    taggingsCreate: [{tag_id: $tag, weight: 5}]
                }) {
                    ... on CreatePostSuccess {
                        node { taggings { nodes { weight tag { label } } } }
                    }
                }
            }"#,
            json!({"author": id_of("User", ann), "tag": rust}),
        )
        .await;

    assert_eq!(
        data["createPost"]["node"]["taggings"]["nodes"],
        json!([{"weight": 5, "tag": {"label": "rust"}}])
    );
}

#[tokio::test]
async fn test_fatal_error_rolls_back_and_fails_operation() {
    let app = BlogApp::new();

    let err = app
        .run_err(
            r#"mutation {
                createTag(input: {label: "kept?"}) { __typename }
                dropEverything { __typename }
            }"#,
        )
        .await;

    assert!(err.to_string().contains("Unknown mutation"));
    assert!(app.rows("tags").is_empty());
    assert_eq!(app.count(StatementKind::Rollback), 1);
}

#[tokio::test]
async fn test_mutation_without_writes_opens_no_transaction() {
    let app = BlogApp::new();

    let data = app.run("mutation { __typename }").await;
    assert_eq!(data["__typename"], json!("Mutation"));
    assert_eq!(app.count(StatementKind::Begin), 0);
}
