//! Connection resolution
//!
//! Every relationship field goes through [`resolve_relationship`], which picks
//! the cheapest correct strategy:
//!
//! 1. No batch state, or the parent's sibling group is unknown: one query
//!    scoped to this parent.
//! 2. Cursor or backward pagination (`after`, `before`, `last`): one direct
//!    query scoped to this parent, using the cursor boundary.
//! 3. Otherwise: one grouped query per chunk of `batch_max_in_clause` parent
//!    keys for the whole sibling group, cached under a [`BatchKey`], each
//!    parent getting `page + 1` rows so the look-ahead row decides
//!    `hasNextPage`.
//!
//! Rows produced by any fetch are registered as a new sibling group, so
//! grandchildren batch across every child of every parent.

use crate::config::EngineSettings;
use crate::core::cursor::Cursor;
use crate::core::error::EngineError;
use crate::core::executor::QuerySource;
use crate::core::node_id::NodeId;
use crate::core::planner::{
    AggregateQuery, ConnectionQuery, JunctionHop, Planner, RelationScope, SortKey, parent_key_column,
    reverse_sort,
};
use crate::core::schema::{Relationship, RelationshipKind, Schema, Table};
use crate::core::value::{Row, SqlValue, project, tuple_key};
use crate::engine::batch::{BatchKey, GroupedRows, ParentKey, RequestBatchState};
use crate::engine::connection::{Connection, ConnectionArgs, LazyAggregate, PaginationArgs};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything a resolver needs for one operation
#[derive(Clone)]
pub struct ResolveContext {
    pub schema: Arc<Schema>,
    pub planner: Arc<dyn Planner>,
    pub source: Arc<dyn QuerySource>,
    pub batch: Option<Arc<RequestBatchState>>,
}

impl ResolveContext {
    pub fn new(
        schema: Arc<Schema>,
        planner: Arc<dyn Planner>,
        source: Arc<dyn QuerySource>,
        batch: Option<Arc<RequestBatchState>>,
    ) -> Self {
        Self {
            schema,
            planner,
            source,
            batch,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.schema.settings
    }

    fn register(&self, key: &ParentKey, rows: Vec<Row>) -> Result<Option<ParentKey>, EngineError> {
        match &self.batch {
            Some(batch) => {
                batch.set_parent_rows(key.clone(), rows)?;
                Ok(Some(key.clone()))
            }
            None => Ok(None),
        }
    }
}

/// The parent a relationship field hangs off
#[derive(Debug, Clone, Copy)]
pub struct ParentRef<'a> {
    pub row: &'a Row,
    /// Sibling group the row was registered under, if any
    pub group: Option<&'a ParentKey>,
}

/// Result of a relationship field
pub enum RelationValue {
    Connection(Connection),
    /// Many-to-one: the related row and the group it was registered under
    Object(Option<(Row, Option<ParentKey>)>),
}

/// Sibling-group arguments qualified by the fetched column set; rows fetched
/// for different selections form different groups
fn group_args(args: &str, columns: &[String]) -> String {
    format!("{}|{}", args, columns.join(","))
}

/// Columns to fetch for `table`: the requested ones, the primary key, and
/// the local columns of any requested relationship, in table order
pub fn fetch_columns(table: &Table, fields: &[String], relationships: &[&Relationship]) -> Vec<String> {
    let mut wanted: HashSet<&str> = table.primary_key.iter().map(String::as_str).collect();
    for field in fields {
        wanted.insert(field.as_str());
    }
    for rel in relationships {
        for column in &rel.local_columns {
            wanted.insert(column.as_str());
        }
    }
    table
        .columns
        .iter()
        .filter(|c| wanted.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect()
}

fn with_sort_columns(columns: &[String], sort: &[SortKey]) -> Vec<String> {
    let mut columns = columns.to_vec();
    for key in sort {
        if !columns.contains(&key.column) {
            columns.push(key.column.clone());
        }
    }
    columns
}

fn target_table<'s>(schema: &'s Schema, rel: &Relationship) -> Result<&'s Table, EngineError> {
    if rel.local_columns.len() != rel.remote_columns.len() {
        return Err(EngineError::schema(format!(
            "relationship '{}' maps {} local columns onto {} remote columns",
            rel.qualified_name(),
            rel.local_columns.len(),
            rel.remote_columns.len()
        )));
    }
    schema.table(&rel.target).ok_or_else(|| {
        EngineError::schema(format!(
            "relationship '{}' targets unknown table '{}'",
            rel.qualified_name(),
            rel.target
        ))
    })
}

/// Scope restricting `rel`'s target rows to the given parent keys
fn relation_scope(rel: &Relationship, parent_keys: Vec<Vec<SqlValue>>) -> Result<RelationScope, EngineError> {
    let (key_columns, junction) = match (&rel.kind, &rel.junction) {
        (RelationshipKind::ManyToMany, Some(junction)) => {
            if junction.local_columns.len() != rel.local_columns.len()
                || junction.remote_columns.len() != rel.remote_columns.len()
            {
                return Err(EngineError::schema(format!(
                    "junction of '{}' does not match the relationship's column count",
                    rel.qualified_name()
                )));
            }
            (
                junction.local_columns.clone(),
                Some(JunctionHop {
                    table: junction.table.clone(),
                    target_columns: junction.remote_columns.clone(),
                    remote_columns: rel.remote_columns.clone(),
                }),
            )
        }
        (RelationshipKind::ManyToMany, None) => {
            return Err(EngineError::schema(format!(
                "many-to-many relationship '{}' has no junction",
                rel.qualified_name()
            )));
        }
        _ => (rel.remote_columns.clone(), None),
    };

    Ok(RelationScope {
        relationship: rel.qualified_name(),
        key_columns,
        junction,
        parent_keys,
    })
}

/// Parent key values for `rel`; `None` when any of them is null
fn parent_key(rel: &Relationship, row: &Row) -> Result<Option<Vec<SqlValue>>, EngineError> {
    let key = project(row, &rel.local_columns).ok_or_else(|| {
        EngineError::Internal(format!(
            "parent row lacks the local columns of '{}'",
            rel.qualified_name()
        ))
    })?;
    if key.iter().any(SqlValue::is_null) {
        return Ok(None);
    }
    Ok(Some(key))
}

// =============================================================================
// Root fields
// =============================================================================

/// Root list field (`users(first: ...)`); its page becomes a sibling group
pub async fn resolve_root_connection(
    ctx: &ResolveContext,
    table: &Table,
    args: &ConnectionArgs,
    columns: &[String],
) -> Result<Connection, EngineError> {
    args.pagination.validate(ctx.settings())?;
    let sort = args.effective_sort(table);
    let columns = with_sort_columns(columns, &sort);

    let (rows, has_next, has_previous) = fetch_page(ctx, table, args, &sort, &columns, None).await?;

    let group = ParentKey::new(&table.name, &table.list_field, group_args(&args.canonical(), &columns));
    let group = ctx.register(&group, rows.clone())?;

    let aggregate = LazyAggregate::new(
        ctx.planner.clone(),
        ctx.source.clone(),
        AggregateQuery {
            table: table.name.clone(),
            filter: args.filter.clone(),
            scope: None,
            functions: Vec::new(),
        },
    );

    Ok(Connection::new(table, &sort, rows, has_next, has_previous)?
        .with_group(group)
        .with_aggregate(aggregate))
}

/// Fetch one row by opaque id; the row becomes a sibling group of one
pub async fn resolve_node(
    ctx: &ResolveContext,
    table: &Table,
    id: &NodeId,
    columns: &[String],
) -> Result<Option<(Row, Option<ParentKey>)>, EngineError> {
    let statement = ctx.planner.plan_table_by_pk(table, &id.keys, columns)?;
    let mut rows = ctx.source.fetch(&statement).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let row = rows.swap_remove(0);

    let group = ParentKey::new(
        &table.name,
        format!("{}#id", table.list_field),
        group_args(&tuple_key(&id.keys), columns),
    );
    let group = ctx.register(&group, vec![row.clone()])?;
    Ok(Some((row, group)))
}

// =============================================================================
// Relationship fields
// =============================================================================

/// Resolve one relationship field of one parent row
pub async fn resolve_relationship(
    ctx: &ResolveContext,
    rel: &Relationship,
    parent: ParentRef<'_>,
    args: &ConnectionArgs,
    columns: &[String],
) -> Result<RelationValue, EngineError> {
    let target = target_table(&ctx.schema, rel)?;
    let args = if rel.kind == RelationshipKind::ManyToOne {
        // Single object: no caller pagination, one row per parent
        ConnectionArgs::with_pagination(PaginationArgs::first(1))
    } else {
        args.pagination.validate(ctx.settings())?;
        args.clone()
    };
    let sort = args.effective_sort(target);
    let columns = with_sort_columns(columns, &sort);

    let Some(key) = parent_key(rel, parent.row)? else {
        // Null foreign key: nothing can match
        return empty_result(ctx, rel, target, &args, &sort, None);
    };

    let sibling_rows = match (&ctx.batch, parent.group) {
        (Some(batch), Some(group)) => batch.get_parent_rows(group)?.map(|rows| (batch, group, rows)),
        _ => None,
    };

    let page = match sibling_rows {
        Some((batch, group, rows)) if args.pagination.is_batchable() => {
            batched_page(ctx, batch, group, &rows, rel, target, &args, &sort, &columns, &key).await?
        }
        _ => direct_page(ctx, rel, target, &args, &sort, &columns, &key).await?,
    };

    finish(ctx, rel, target, &args, &sort, &key, page)
}

/// Rows for one parent plus page flags and the group they were registered under
struct ParentPage {
    rows: Vec<Row>,
    has_next: bool,
    has_previous: bool,
    group: Option<ParentKey>,
}

fn finish(
    ctx: &ResolveContext,
    rel: &Relationship,
    target: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    key: &[SqlValue],
    page: ParentPage,
) -> Result<RelationValue, EngineError> {
    if rel.kind == RelationshipKind::ManyToOne {
        let row = page.rows.into_iter().next();
        return Ok(RelationValue::Object(row.map(|r| (r, page.group))));
    }

    let aggregate = LazyAggregate::new(
        ctx.planner.clone(),
        ctx.source.clone(),
        AggregateQuery {
            table: target.name.clone(),
            filter: args.filter.clone(),
            scope: Some(relation_scope(rel, vec![key.to_vec()])?),
            functions: Vec::new(),
        },
    );

    let connection = Connection::new(target, sort, page.rows, page.has_next, page.has_previous)?
        .with_group(page.group)
        .with_aggregate(aggregate);
    Ok(RelationValue::Connection(connection))
}

fn empty_result(
    ctx: &ResolveContext,
    rel: &Relationship,
    target: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    group: Option<ParentKey>,
) -> Result<RelationValue, EngineError> {
    if rel.kind == RelationshipKind::ManyToOne {
        return Ok(RelationValue::Object(None));
    }
    // An impossible key keeps aggregates consistent with the empty page
    let aggregate = LazyAggregate::new(
        ctx.planner.clone(),
        ctx.source.clone(),
        AggregateQuery {
            table: target.name.clone(),
            filter: args.filter.clone(),
            scope: Some(relation_scope(rel, Vec::new())?),
            functions: Vec::new(),
        },
    );
    Ok(RelationValue::Connection(
        Connection::new(target, sort, Vec::new(), false, args.pagination.after.is_some())?
            .with_group(group)
            .with_aggregate(aggregate),
    ))
}

/// Non-batched fetch scoped to a single parent, honoring cursors and `last`
async fn direct_page(
    ctx: &ResolveContext,
    rel: &Relationship,
    target: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    columns: &[String],
    key: &[SqlValue],
) -> Result<ParentPage, EngineError> {
    let scope = relation_scope(rel, vec![key.to_vec()])?;
    let (rows, has_next, has_previous) =
        fetch_page(ctx, target, args, sort, columns, Some(scope)).await?;

    let group = ParentKey::new(
        &target.name,
        rel.qualified_name(),
        group_args(&format!("{}|{}", args.canonical(), tuple_key(key)), columns),
    );
    let group = ctx.register(&group, rows.clone())?;

    Ok(ParentPage {
        rows,
        has_next,
        has_previous,
        group,
    })
}

/// One page from a single ungrouped query
///
/// Backward pages are planned in reverse order (so "last K" is a prefix) and
/// flipped back before returning. Returns `(rows, has_next, has_previous)`.
async fn fetch_page(
    ctx: &ResolveContext,
    table: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    columns: &[String],
    scope: Option<RelationScope>,
) -> Result<(Vec<Row>, bool, bool), EngineError> {
    let pagination = &args.pagination;
    let page = pagination.page_size(ctx.settings());

    let after = pagination
        .after
        .as_deref()
        .map(|token| Cursor::decode_for(token, &table.type_name, sort).map(|c| c.values))
        .transpose()?;
    let before = pagination
        .before
        .as_deref()
        .map(|token| Cursor::decode_for(token, &table.type_name, sort).map(|c| c.values))
        .transpose()?;

    let backward = pagination.is_backward();
    let query = ConnectionQuery {
        table: table.name.clone(),
        columns: columns.to_vec(),
        filter: args.filter.clone(),
        sort: if backward { reverse_sort(sort) } else { sort.to_vec() },
        // In reversed order "before" is the lower boundary
        after: if backward { before.clone() } else { after.clone() },
        before: if backward { after.clone() } else { before.clone() },
        limit: Some(page + 1),
        scope,
    };

    let statement = ctx.planner.plan_connection(&query)?;
    let mut rows = ctx.source.fetch(&statement).await?;

    let looked_ahead = rows.len() > page;
    rows.truncate(page);

    if backward {
        rows.reverse();
        Ok((rows, before.is_some(), looked_ahead))
    } else {
        Ok((rows, looked_ahead, after.is_some()))
    }
}

/// Grouped fetch for the whole sibling group, shared through the batch cache
#[allow(clippy::too_many_arguments)]
async fn batched_page(
    ctx: &ResolveContext,
    batch: &RequestBatchState,
    group: &ParentKey,
    siblings: &[Row],
    rel: &Relationship,
    target: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    columns: &[String],
    key: &[SqlValue],
) -> Result<ParentPage, EngineError> {
    let page = args.pagination.page_size(ctx.settings());
    let batch_key = BatchKey {
        relationship: rel.qualified_name(),
        selection: columns.join(","),
        args: args.canonical(),
        parent_group: group.clone(),
    };

    let grouped = batch
        .get_or_compute(batch_key, || {
            fetch_grouped(ctx, group, siblings, rel, target, args, sort, columns, page)
        })
        .await?;

    let rows = grouped.rows_for(key);
    Ok(ParentPage {
        has_next: rows.len() > page,
        has_previous: false,
        rows: rows.iter().take(page).cloned().collect(),
        group: grouped.child_group.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn fetch_grouped(
    ctx: &ResolveContext,
    group: &ParentKey,
    siblings: &[Row],
    rel: &Relationship,
    target: &Table,
    args: &ConnectionArgs,
    sort: &[SortKey],
    columns: &[String],
    page: usize,
) -> Result<GroupedRows, EngineError> {
    // Distinct, non-null parent keys in sibling order
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in siblings {
        if let Some(key) = parent_key(rel, row)?
            && seen.insert(tuple_key(&key))
        {
            keys.push(key);
        }
    }

    let chunk_size = ctx.settings().batch_max_in_clause.max(1);
    let arity = rel.local_columns.len();
    let parent_columns: Vec<String> = (0..arity).map(parent_key_column).collect();

    tracing::debug!(
        relationship = %rel.qualified_name(),
        parents = keys.len(),
        chunks = keys.len().div_ceil(chunk_size),
        "grouped relationship fetch"
    );

    let mut grouped = GroupedRows::new();
    let mut registered = Vec::new();
    let mut registered_keys = HashSet::new();

    for chunk in keys.chunks(chunk_size) {
        let query = ConnectionQuery {
            table: target.name.clone(),
            columns: columns.to_vec(),
            filter: args.filter.clone(),
            sort: sort.to_vec(),
            after: None,
            before: None,
            limit: Some(page + 1),
            scope: Some(relation_scope(rel, chunk.to_vec())?),
        };
        let statement = ctx.planner.plan_connection_batch(&query)?;
        let rows = ctx.source.fetch(&statement).await?;

        let mut per_parent_count: HashMap<String, usize> = HashMap::new();
        for mut row in rows {
            let mut owner = Vec::with_capacity(arity);
            for column in &parent_columns {
                let value = row.shift_remove(column).ok_or_else(|| {
                    EngineError::Internal(format!(
                        "grouped row for '{}' lacks column {}",
                        rel.qualified_name(),
                        column
                    ))
                })?;
                owner.push(value);
            }

            // Only rows inside some parent's page become the next sibling group
            let seen_for_owner = per_parent_count.entry(tuple_key(&owner)).or_default();
            *seen_for_owner += 1;
            if *seen_for_owner <= page {
                let identity = project(&row, &target.primary_key)
                    .map(|pk| tuple_key(&pk))
                    .unwrap_or_default();
                if registered_keys.insert(identity) {
                    registered.push(row.clone());
                }
            }

            grouped.push(&owner, row);
        }
    }

    let child_group = ParentKey::new(
        &target.name,
        rel.qualified_name(),
        group_args(&format!("{}|{}", args.canonical(), group), columns),
    );
    grouped.child_group = ctx.register(&child_group, registered)?;

    Ok(grouped)
}

#[cfg(all(test, feature = "in-memory"))]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::core::executor::DirectSource;
    use crate::storage::InMemoryDatabase;

    fn context() -> (ResolveContext, Arc<RequestBatchState>) {
        let schema = Arc::new(SchemaConfig::blog().into_schema().unwrap());
        let db = InMemoryDatabase::new(schema.clone());
        let row = |pairs: &[(&str, SqlValue)]| -> Row {
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
        };
        let ann = db
            .seed("users", row(&[("email", SqlValue::from("a@x.io")), ("name", SqlValue::from("ann"))]))
            .unwrap();
        db.seed("posts", row(&[("author_id", ann[0].clone()), ("title", SqlValue::from("p"))]))
            .unwrap();

        let batch = Arc::new(RequestBatchState::new());
        let ctx = ResolveContext::new(
            schema,
            Arc::new(db.clone()),
            Arc::new(DirectSource::new(Arc::new(db))),
            Some(batch.clone()),
        );
        (ctx, batch)
    }

    #[tokio::test]
    async fn test_selections_register_separate_groups() {
        let (ctx, batch) = context();
        let schema = ctx.schema.clone();
        let posts = schema.table("posts").unwrap();
        let args = ConnectionArgs::default();

        let with_fk = vec!["id".to_string(), "author_id".to_string()];
        let without_fk = vec!["id".to_string(), "title".to_string()];
        let first = resolve_root_connection(&ctx, posts, &args, &with_fk).await.unwrap();
        let second = resolve_root_connection(&ctx, posts, &args, &without_fk).await.unwrap();

        let first_group = first.group.unwrap();
        let second_group = second.group.unwrap();
        assert_ne!(first_group, second_group);

        // The later registration leaves the foreign key of the first intact
        let rows = batch.get_parent_rows(&first_group).unwrap().unwrap();
        assert!(rows[0].contains_key("author_id"));
        let rows = batch.get_parent_rows(&second_group).unwrap().unwrap();
        assert!(!rows[0].contains_key("author_id"));
    }
}
