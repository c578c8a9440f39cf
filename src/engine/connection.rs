//! Connection results and their arguments
//!
//! A [`Connection`] is one page of a relationship or root list:
//! `nodes`, `edges`, `pageInfo` and an `aggregate` computed only when asked.

use crate::config::EngineSettings;
use crate::core::cursor::Cursor;
use crate::core::error::EngineError;
use crate::core::executor::QuerySource;
use crate::core::planner::{AggregateFunction, AggregateQuery, Planner, SortDirection, SortKey};
use crate::core::schema::Table;
use crate::core::value::{Row, SqlValue};
use crate::engine::batch::ParentKey;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

// =============================================================================
// Arguments
// =============================================================================

/// `first`/`last`/`after`/`before`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaginationArgs {
    pub first: Option<usize>,
    pub last: Option<usize>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl PaginationArgs {
    pub fn first(n: usize) -> Self {
        Self {
            first: Some(n),
            ..Self::default()
        }
    }

    pub fn last(n: usize) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    /// Rows are fetched from the end of the sort order
    pub fn is_backward(&self) -> bool {
        self.last.is_some()
    }

    /// Forward, cursor-free pages are the only shape the grouped fetch honors
    pub fn is_batchable(&self) -> bool {
        self.last.is_none() && self.after.is_none() && self.before.is_none()
    }

    pub fn page_size(&self, settings: &EngineSettings) -> usize {
        self.first
            .or(self.last)
            .unwrap_or(settings.default_page_size)
    }

    pub fn validate(&self, settings: &EngineSettings) -> Result<(), EngineError> {
        if self.first.is_some() && self.last.is_some() {
            return Err(EngineError::invalid_argument(
                "first",
                "'first' and 'last' cannot be combined",
            ));
        }
        for (name, size) in [("first", self.first), ("last", self.last)] {
            if let Some(size) = size
                && size > settings.max_page_size
            {
                return Err(EngineError::invalid_argument(
                    name,
                    format!("page size {} exceeds the maximum of {}", size, settings.max_page_size),
                ));
            }
        }
        Ok(())
    }
}

/// Everything that shapes one connection fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionArgs {
    pub pagination: PaginationArgs,
    /// Equality conjunction
    pub filter: Vec<(String, SqlValue)>,
    pub order_by: Vec<SortKey>,
}

impl ConnectionArgs {
    pub fn with_pagination(pagination: PaginationArgs) -> Self {
        Self {
            pagination,
            ..Self::default()
        }
    }

    /// Decode field arguments against the target table
    pub fn from_arguments(
        table: &Table,
        args: &Map<String, Value>,
        settings: &EngineSettings,
    ) -> Result<Self, EngineError> {
        let pagination = PaginationArgs {
            first: page_size_arg(args, "first")?,
            last: page_size_arg(args, "last")?,
            after: cursor_arg(args, "after")?,
            before: cursor_arg(args, "before")?,
        };
        pagination.validate(settings)?;

        let mut filter = Vec::new();
        match args.get("filter") {
            None | Some(Value::Null) => {}
            Some(Value::Object(fields)) => {
                for (name, value) in fields {
                    let column = table.column(name).ok_or_else(|| {
                        EngineError::invalid_argument(
                            "filter",
                            format!("unknown column '{}' on {}", name, table.type_name),
                        )
                    })?;
                    let value = column
                        .column_type
                        .coerce(value)
                        .map_err(|e| EngineError::invalid_argument("filter", format!("{}: {}", name, e)))?;
                    filter.push((name.clone(), value));
                }
            }
            Some(other) => {
                return Err(EngineError::invalid_argument(
                    "filter",
                    format!("expected an object, got {}", other),
                ));
            }
        }

        let mut order_by = Vec::new();
        let entries: Vec<&Value> = match args.get("orderBy") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
        };
        for entry in entries {
            let fields = entry.as_object().ok_or_else(|| {
                EngineError::invalid_argument("orderBy", format!("expected an object, got {}", entry))
            })?;
            for (name, direction) in fields {
                if !table.has_column(name) {
                    return Err(EngineError::invalid_argument(
                        "orderBy",
                        format!("unknown column '{}' on {}", name, table.type_name),
                    ));
                }
                let direction = direction
                    .as_str()
                    .and_then(SortDirection::parse)
                    .ok_or_else(|| {
                        EngineError::invalid_argument(
                            "orderBy",
                            format!("'{}' must be ASC or DESC", name),
                        )
                    })?;
                order_by.push(SortKey::new(name.clone(), direction));
            }
        }

        Ok(Self {
            pagination,
            filter,
            order_by,
        })
    }

    /// Stable text form used in batch and parent keys
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Requested order plus primary-key tiebreakers, so the key is total
    pub fn effective_sort(&self, table: &Table) -> Vec<SortKey> {
        let mut sort = self.order_by.clone();
        for pk in &table.primary_key {
            if !sort.iter().any(|k| &k.column == pk) {
                sort.push(SortKey::new(pk.clone(), SortDirection::Asc));
            }
        }
        sort
    }
}

fn page_size_arg(args: &Map<String, Value>, name: &str) -> Result<Option<usize>, EngineError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n as usize)),
            Some(n) => Err(EngineError::invalid_argument(
                name,
                format!("must not be negative, got {}", n),
            )),
            None => Err(EngineError::invalid_argument(
                name,
                format!("expected an integer, got {}", value),
            )),
        },
    }
}

fn cursor_arg(args: &Map<String, Value>, name: &str) -> Result<Option<String>, EngineError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(EngineError::invalid_argument(
            name,
            format!("expected a cursor string, got {}", other),
        )),
    }
}

// =============================================================================
// Result shape
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub node: Row,
    pub cursor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// One page of rows; `edges[i].node` is `nodes()[i]`
pub struct Connection {
    pub type_name: String,
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
    /// Sibling group the page's rows were registered under
    pub group: Option<ParentKey>,
    aggregate: Option<LazyAggregate>,
}

impl Connection {
    /// Build a page from rows already in display order
    pub fn new(
        table: &Table,
        sort: &[SortKey],
        rows: Vec<Row>,
        has_next_page: bool,
        has_previous_page: bool,
    ) -> Result<Self, EngineError> {
        let edges = rows
            .into_iter()
            .map(|node| {
                let cursor = Cursor::for_row(&table.type_name, sort, &node)
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "row of {} is missing a sort column",
                            table.type_name
                        ))
                    })?
                    .encode();
                Ok(Edge { node, cursor })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };

        Ok(Self {
            type_name: table.type_name.clone(),
            edges,
            page_info,
            group: None,
            aggregate: None,
        })
    }

    pub fn with_group(mut self, group: Option<ParentKey>) -> Self {
        self.group = group;
        self
    }

    pub fn with_aggregate(mut self, aggregate: LazyAggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Row> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn aggregate(&self) -> Option<&LazyAggregate> {
        self.aggregate.as_ref()
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Aggregate over one connection, computed on first access and kept for the
/// lifetime of this connection instance only
pub struct LazyAggregate {
    planner: Arc<dyn Planner>,
    source: Arc<dyn QuerySource>,
    query: AggregateQuery,
    count: OnceCell<i64>,
    values: OnceCell<Row>,
}

impl LazyAggregate {
    /// `query.functions` is ignored; each access supplies its own
    pub fn new(planner: Arc<dyn Planner>, source: Arc<dyn QuerySource>, query: AggregateQuery) -> Self {
        Self {
            planner,
            source,
            query,
            count: OnceCell::new(),
            values: OnceCell::new(),
        }
    }

    /// Row count, via a dedicated count query unless a full aggregate already ran
    pub async fn count(&self) -> Result<i64, EngineError> {
        if let Some(values) = self.values.get()
            && let Some(count) = values.get("count").and_then(SqlValue::as_int)
        {
            return Ok(count);
        }

        let count = self
            .count
            .get_or_try_init(|| async {
                let row = self.run(vec![AggregateFunction::Count]).await?;
                Ok::<_, EngineError>(row.get("count").and_then(SqlValue::as_int).unwrap_or(0))
            })
            .await?;
        Ok(*count)
    }

    /// All requested functions in one query; seeds `count`
    pub async fn values(&self, functions: &[AggregateFunction]) -> Result<&Row, EngineError> {
        self.values
            .get_or_try_init(|| async {
                let mut functions = functions.to_vec();
                if !functions.contains(&AggregateFunction::Count) {
                    functions.insert(0, AggregateFunction::Count);
                }
                let row = self.run(functions).await?;
                if let Some(count) = row.get("count").and_then(SqlValue::as_int) {
                    let _ = self.count.set(count);
                }
                Ok(row)
            })
            .await
    }

    async fn run(&self, functions: Vec<AggregateFunction>) -> Result<Row, EngineError> {
        let query = AggregateQuery {
            functions,
            ..self.query.clone()
        };
        let statement = self.planner.plan_aggregate(&query)?;
        let mut rows = self.source.fetch(&statement).await?;
        if rows.is_empty() {
            return Err(EngineError::Internal(format!(
                "aggregate over {} returned no row",
                query.table
            )));
        }
        Ok(rows.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use serde_json::json;

    fn posts() -> Table {
        SchemaConfig::blog()
            .into_schema()
            .unwrap()
            .table("posts")
            .unwrap()
            .clone()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_parse_arguments() {
        let settings = EngineSettings::default();
        let parsed = ConnectionArgs::from_arguments(
            &posts(),
            &args(json!({
                "first": 5,
                "filter": {"status": "published"},
                "orderBy": [{"title": "DESC"}]
            })),
            &settings,
        )
        .unwrap();

        assert_eq!(parsed.pagination.first, Some(5));
        assert_eq!(
            parsed.filter,
            vec![("status".to_string(), SqlValue::Text("published".to_string()))]
        );
        assert_eq!(parsed.order_by, vec![SortKey::new("title", SortDirection::Desc)]);
        assert!(parsed.pagination.is_batchable());
    }

    #[test]
    fn test_effective_sort_appends_primary_key() {
        let table = posts();
        let parsed = ConnectionArgs {
            order_by: vec![SortKey::new("title", SortDirection::Desc)],
            ..ConnectionArgs::default()
        };
        let sort = parsed.effective_sort(&table);
        assert_eq!(sort.len(), 2);
        assert_eq!(sort[1], SortKey::new("id", SortDirection::Asc));

        assert_eq!(ConnectionArgs::default().effective_sort(&table).len(), 1);
    }

    #[test]
    fn test_invalid_arguments() {
        let settings = EngineSettings::default();
        let table = posts();

        for bad in [
            json!({"first": -1}),
            json!({"first": 2, "last": 2}),
            json!({"first": 5000}),
            json!({"filter": {"nope": 1}}),
            json!({"orderBy": {"title": "SIDEWAYS"}}),
            json!({"after": 3}),
        ] {
            let result = ConnectionArgs::from_arguments(&table, &args(bad.clone()), &settings);
            assert!(
                matches!(result, Err(EngineError::InvalidArgument { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_batchable_shapes() {
        assert!(PaginationArgs::first(3).is_batchable());
        assert!(PaginationArgs::default().is_batchable());
        assert!(!PaginationArgs::last(3).is_batchable());
        let after = PaginationArgs {
            first: Some(3),
            after: Some("c".to_string()),
            ..PaginationArgs::default()
        };
        assert!(!after.is_batchable());
    }

    #[test]
    fn test_canonical_distinguishes_arguments() {
        let a = ConnectionArgs::with_pagination(PaginationArgs::first(3));
        let b = ConnectionArgs::with_pagination(PaginationArgs::first(4));
        assert_ne!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), a.clone().canonical());
    }

    #[test]
    fn test_connection_edges_and_page_info() {
        let table = posts();
        let sort = ConnectionArgs::default().effective_sort(&table);
        let rows: Vec<Row> = (1..=2)
            .map(|id| {
                let mut row = Row::new();
                row.insert("id".to_string(), SqlValue::Int(id));
                row
            })
            .collect();

        let connection = Connection::new(&table, &sort, rows, true, false).unwrap();
        assert_eq!(connection.len(), 2);
        assert_eq!(connection.nodes().count(), 2);
        assert_eq!(
            connection.page_info.end_cursor.as_deref(),
            Some(connection.edges[1].cursor.as_str())
        );
        assert!(connection.page_info.has_next_page);

        let empty = Connection::new(&table, &sort, vec![], false, false).unwrap();
        assert!(empty.page_info.start_cursor.is_none());
    }
}
