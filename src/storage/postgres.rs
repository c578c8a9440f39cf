//! PostgreSQL backend
//!
//! [`PostgresPlanner`] renders structured requests into PostgreSQL SQL text
//! with `$n` placeholders. It is plain string generation and always compiled.
//!
//! [`PgExecutor`] runs those statements through a `sqlx::PgPool` and is gated
//! behind the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! relgraph = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Ordering
//!
//! Sort keys render as `ASC NULLS FIRST` / `DESC NULLS LAST`, matching the
//! null ordering of [`SqlValue::total_cmp`], and cursor boundaries expand
//! into an OR-chain so that mixed sort directions continue correctly.
//!
//! # Grouped fetch
//!
//! A batched connection is one statement: the parent keys become a `VALUES`
//! list joined `LATERAL` against the per-parent page, so `LIMIT` applies to
//! each parent separately.

use crate::core::error::EngineError;
use crate::core::planner::{
    AggregateFunction, AggregateQuery, ConnectionQuery, Planner, RelationScope, SortDirection,
    SortKey, Statement, parent_key_column, reverse_sort,
};
use crate::core::schema::{ColumnType, Index, RelationshipKind, Schema, Table};
use crate::core::value::{Row, SqlValue};
use std::sync::Arc;

/// Quote an identifier
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// PostgreSQL type a column is stored as
pub fn pg_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int => "int8",
        ColumnType::Float => "float8",
        ColumnType::Text => "text",
        ColumnType::Bool => "bool",
        ColumnType::Uuid => "uuid",
        ColumnType::Timestamp => "timestamptz",
        ColumnType::Json => "jsonb",
    }
}

/// Statement text under construction plus its positional arguments
#[derive(Default)]
struct SqlBuilder {
    sql: String,
    args: Vec<SqlValue>,
}

impl SqlBuilder {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Placeholder for `value`, cast to the column's type so NULLs and
    /// untyped literals bind unambiguously
    fn arg(&mut self, value: &SqlValue, column_type: ColumnType) -> String {
        self.args.push(value.clone());
        format!("${}::{}", self.args.len(), pg_type(column_type))
    }

    fn finish(self) -> Statement {
        Statement::new(self.sql, self.args)
    }
}

/// PostgreSQL dialect planner
#[derive(Clone)]
pub struct PostgresPlanner {
    schema: Arc<Schema>,
}

const TARGET: &str = "t";
const JUNCTION: &str = "j";
const PARENTS: &str = "p";

/// `<alias>.<column> <dir>` with nulls placed where the cursor boundaries expect
fn sort_term(alias: &str, key: &SortKey) -> String {
    let nulls = match key.direction {
        SortDirection::Asc => "NULLS FIRST",
        SortDirection::Desc => "NULLS LAST",
    };
    format!("{}.{} {} {}", alias, quote(&key.column), key.direction.as_sql(), nulls)
}

impl PostgresPlanner {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    fn table(&self, name: &str) -> Result<&Table, EngineError> {
        self.schema
            .table(name)
            .ok_or_else(|| EngineError::schema(format!("unknown table '{}'", name)))
    }

    fn column_type(&self, table: &Table, column: &str) -> Result<ColumnType, EngineError> {
        table.column(column).map(|c| c.column_type).ok_or_else(|| {
            EngineError::schema(format!("unknown column '{}.{}'", table.name, column))
        })
    }

    fn select_list(&self, table: &Table, columns: &[String]) -> Result<String, EngineError> {
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            self.column_type(table, column)?;
            parts.push(format!("{}.{}", TARGET, quote(column)));
        }
        if parts.is_empty() {
            // Pages always need at least the key to be addressable
            parts.extend(
                table
                    .primary_key
                    .iter()
                    .map(|c| format!("{}.{}", TARGET, quote(c))),
            );
        }
        Ok(parts.join(", "))
    }

    /// `FROM` clause for the target, joined to the junction table when scoped
    /// through one
    fn from_clause(&self, table: &Table, scope: Option<&RelationScope>) -> Result<String, EngineError> {
        let mut from = format!("{} AS {}", quote(&table.name), TARGET);
        if let Some(hop) = scope.and_then(|s| s.junction.as_ref()) {
            let on = hop
                .target_columns
                .iter()
                .zip(&hop.remote_columns)
                .map(|(j, t)| format!("{}.{} = {}.{}", JUNCTION, quote(j), TARGET, quote(t)))
                .collect::<Vec<_>>()
                .join(" AND ");
            from.push_str(&format!(" JOIN {} AS {} ON {}", quote(&hop.table), JUNCTION, on));
        }
        Ok(from)
    }

    /// Table and alias the scope's key columns live on
    fn key_owner<'a>(&'a self, table: &'a Table, scope: &RelationScope) -> Result<(&'a Table, &'static str), EngineError> {
        match &scope.junction {
            Some(hop) => Ok((self.table(&hop.table)?, JUNCTION)),
            None => Ok((table, TARGET)),
        }
    }

    fn filter_conditions(
        &self,
        b: &mut SqlBuilder,
        table: &Table,
        filter: &[(String, SqlValue)],
    ) -> Result<Vec<String>, EngineError> {
        let mut conditions = Vec::new();
        for (column, value) in filter {
            let column_type = self.column_type(table, column)?;
            let lhs = format!("{}.{}", TARGET, quote(column));
            if value.is_null() {
                conditions.push(format!("{} IS NULL", lhs));
            } else {
                conditions.push(format!("{} = {}", lhs, b.arg(value, column_type)));
            }
        }
        Ok(conditions)
    }

    /// `(k1, k2) IN ((..), (..))` for an ungrouped scope
    fn scope_condition(
        &self,
        b: &mut SqlBuilder,
        table: &Table,
        scope: &RelationScope,
    ) -> Result<String, EngineError> {
        if scope.parent_keys.is_empty() {
            return Ok("FALSE".to_string());
        }
        let (owner, alias) = self.key_owner(table, scope)?;
        let types = scope
            .key_columns
            .iter()
            .map(|c| self.column_type(owner, c))
            .collect::<Result<Vec<_>, _>>()?;

        let lhs = scope
            .key_columns
            .iter()
            .map(|c| format!("{}.{}", alias, quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut tuples = Vec::with_capacity(scope.parent_keys.len());
        for key in &scope.parent_keys {
            if key.len() != types.len() {
                return Err(EngineError::Internal(format!(
                    "parent key of '{}' has {} values for {} columns",
                    scope.relationship,
                    key.len(),
                    types.len()
                )));
            }
            let values = key
                .iter()
                .zip(&types)
                .map(|(v, t)| b.arg(v, *t))
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({})", values));
        }
        Ok(format!("({}) IN ({})", lhs, tuples.join(", ")))
    }

    /// Rows strictly after `boundary` in `sort` order
    ///
    /// `(a, b) > (x, y)` becomes `a > x OR (a = x AND b > y)` with each
    /// comparison respecting its own direction and null placement.
    fn boundary_condition(
        &self,
        b: &mut SqlBuilder,
        table: &Table,
        sort: &[SortKey],
        boundary: &[SqlValue],
    ) -> Result<String, EngineError> {
        if boundary.len() != sort.len() {
            return Err(EngineError::Internal(format!(
                "boundary has {} values for a {}-column sort",
                boundary.len(),
                sort.len()
            )));
        }

        let mut branches = Vec::with_capacity(sort.len());
        for i in 0..sort.len() {
            let mut terms = Vec::with_capacity(i + 1);
            for (key, value) in sort[..i].iter().zip(boundary) {
                let lhs = format!("{}.{}", TARGET, quote(&key.column));
                if value.is_null() {
                    terms.push(format!("{} IS NULL", lhs));
                } else {
                    let column_type = self.column_type(table, &key.column)?;
                    terms.push(format!("{} = {}", lhs, b.arg(value, column_type)));
                }
            }

            let key = &sort[i];
            let value = &boundary[i];
            let lhs = format!("{}.{}", TARGET, quote(&key.column));
            let beyond = match (key.direction, value.is_null()) {
                // Nulls sort first ascending: every non-null is beyond a null
                (SortDirection::Asc, true) => format!("{} IS NOT NULL", lhs),
                (SortDirection::Asc, false) => {
                    let column_type = self.column_type(table, &key.column)?;
                    format!("{} > {}", lhs, b.arg(value, column_type))
                }
                // Nulls sort last descending: nothing is beyond a null
                (SortDirection::Desc, true) => "FALSE".to_string(),
                (SortDirection::Desc, false) => {
                    let column_type = self.column_type(table, &key.column)?;
                    format!("({} < {} OR {} IS NULL)", lhs, b.arg(value, column_type), lhs)
                }
            };
            terms.push(beyond);
            branches.push(format!("({})", terms.join(" AND ")));
        }
        Ok(format!("({})", branches.join(" OR ")))
    }

    fn order_by(&self, sort: &[SortKey]) -> String {
        sort.iter()
            .map(|k| sort_term(TARGET, k))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Everything after `SELECT <list> FROM ...` for one page: filter,
    /// boundaries, extra conditions, order and limit
    fn page_tail(
        &self,
        b: &mut SqlBuilder,
        table: &Table,
        query: &ConnectionQuery,
        mut conditions: Vec<String>,
    ) -> Result<(), EngineError> {
        conditions.extend(self.filter_conditions(b, table, &query.filter)?);
        if let Some(after) = &query.after {
            conditions.push(self.boundary_condition(b, table, &query.sort, after)?);
        }
        if let Some(before) = &query.before {
            conditions.push(self.boundary_condition(b, table, &reverse_sort(&query.sort), before)?);
        }
        if !conditions.is_empty() {
            b.push(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if !query.sort.is_empty() {
            b.push(&format!(" ORDER BY {}", self.order_by(&query.sort)));
        }
        if let Some(limit) = query.limit {
            b.push(&format!(" LIMIT {}", limit));
        }
        Ok(())
    }

    fn key_condition(
        &self,
        b: &mut SqlBuilder,
        table: &Table,
        columns: &[String],
        values: &[SqlValue],
        qualified: bool,
    ) -> Result<String, EngineError> {
        if columns.len() != values.len() {
            return Err(EngineError::Internal(format!(
                "{} key values for {} columns of {}",
                values.len(),
                columns.len(),
                table.name
            )));
        }
        let mut terms = Vec::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            let column_type = self.column_type(table, column)?;
            let lhs = if qualified {
                format!("{}.{}", TARGET, quote(column))
            } else {
                quote(column)
            };
            terms.push(format!("{} = {}", lhs, b.arg(value, column_type)));
        }
        Ok(terms.join(" AND "))
    }
}

impl Planner for PostgresPlanner {
    fn plan_connection(&self, query: &ConnectionQuery) -> Result<Statement, EngineError> {
        let table = self.table(&query.table)?;
        let mut b = SqlBuilder::default();
        b.push(&format!(
            "SELECT {} FROM {}",
            self.select_list(table, &query.columns)?,
            self.from_clause(table, query.scope.as_ref())?
        ));

        let mut conditions = Vec::new();
        if let Some(scope) = &query.scope {
            conditions.push(self.scope_condition(&mut b, table, scope)?);
        }
        self.page_tail(&mut b, table, query, conditions)?;
        Ok(b.finish())
    }

    fn plan_connection_batch(&self, query: &ConnectionQuery) -> Result<Statement, EngineError> {
        let table = self.table(&query.table)?;
        let scope = query.scope.as_ref().ok_or_else(|| {
            EngineError::Internal("grouped connection requires a relation scope".to_string())
        })?;
        let (owner, alias) = self.key_owner(table, scope)?;
        let types = scope
            .key_columns
            .iter()
            .map(|c| self.column_type(owner, c))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_columns: Vec<String> = (0..types.len()).map(parent_key_column).collect();

        let mut b = SqlBuilder::default();
        let outer = parent_columns
            .iter()
            .map(|c| format!("{}.{}", PARENTS, quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        b.push(&format!("SELECT s.*, {} FROM ", outer));

        if scope.parent_keys.is_empty() {
            let nulls = parent_columns
                .iter()
                .zip(&types)
                .map(|(c, t)| format!("NULL::{} AS {}", pg_type(*t), quote(c)))
                .collect::<Vec<_>>()
                .join(", ");
            b.push(&format!("(SELECT {} WHERE FALSE) AS {}", nulls, PARENTS));
        } else {
            let mut tuples = Vec::with_capacity(scope.parent_keys.len());
            for key in &scope.parent_keys {
                if key.len() != types.len() {
                    return Err(EngineError::Internal(format!(
                        "parent key of '{}' has {} values for {} columns",
                        scope.relationship,
                        key.len(),
                        types.len()
                    )));
                }
                let values = key
                    .iter()
                    .zip(&types)
                    .map(|(v, t)| b.arg(v, *t))
                    .collect::<Vec<_>>()
                    .join(", ");
                tuples.push(format!("({})", values));
            }
            let names = parent_columns
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(", ");
            b.push(&format!("(VALUES {}) AS {}({})", tuples.join(", "), PARENTS, names));
        }

        b.push(&format!(
            " CROSS JOIN LATERAL (SELECT {} FROM {}",
            self.select_list(table, &query.columns)?,
            self.from_clause(table, Some(scope))?
        ));
        let correlation = scope
            .key_columns
            .iter()
            .zip(&parent_columns)
            .map(|(k, p)| format!("{}.{} = {}.{}", alias, quote(k), PARENTS, quote(p)))
            .collect();
        self.page_tail(&mut b, table, query, correlation)?;
        b.push(") AS s");

        // The lateral's ORDER BY does not carry through the join
        let selected = if query.columns.is_empty() { &table.primary_key } else { &query.columns };
        let mut order = vec![outer];
        for key in &query.sort {
            if !selected.contains(&key.column) {
                return Err(EngineError::Internal(format!(
                    "sort column '{}' is not selected from {}",
                    key.column, table.name
                )));
            }
            order.push(sort_term("s", key));
        }
        b.push(&format!(" ORDER BY {}", order.join(", ")));
        Ok(b.finish())
    }

    fn plan_aggregate(&self, query: &AggregateQuery) -> Result<Statement, EngineError> {
        let table = self.table(&query.table)?;
        let mut b = SqlBuilder::default();

        let mut functions = Vec::with_capacity(query.functions.len().max(1));
        for function in &query.functions {
            let expr = match function {
                AggregateFunction::Count => "count(*)".to_string(),
                other => {
                    let column = other.column().unwrap_or_default();
                    let column_type = self.column_type(table, column)?;
                    let lhs = format!("{}.{}", TARGET, quote(column));
                    match other {
                        AggregateFunction::Sum(_) => format!("sum({})::{}", lhs, pg_type(column_type)),
                        AggregateFunction::Avg(_) => format!("avg({})::float8", lhs),
                        AggregateFunction::Min(_) => format!("min({})", lhs),
                        _ => format!("max({})", lhs),
                    }
                }
            };
            functions.push(format!("{} AS {}", expr, quote(&function.alias())));
        }
        if functions.is_empty() {
            functions.push(format!("count(*) AS {}", quote(&AggregateFunction::Count.alias())));
        }

        b.push(&format!(
            "SELECT {} FROM {}",
            functions.join(", "),
            self.from_clause(table, query.scope.as_ref())?
        ));
        let mut conditions = Vec::new();
        if let Some(scope) = &query.scope {
            conditions.push(self.scope_condition(&mut b, table, scope)?);
        }
        conditions.extend(self.filter_conditions(&mut b, table, &query.filter)?);
        if !conditions.is_empty() {
            b.push(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        Ok(b.finish())
    }

    fn plan_insert(&self, table: &Table, values: &Row) -> Result<Statement, EngineError> {
        let mut b = SqlBuilder::default();
        let returning = table
            .primary_key
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");

        if values.is_empty() {
            b.push(&format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                quote(&table.name),
                returning
            ));
            return Ok(b.finish().returning());
        }

        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            let column_type = self.column_type(table, column)?;
            columns.push(quote(column));
            placeholders.push(b.arg(value, column_type));
        }
        b.push(&format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quote(&table.name),
            columns.join(", "),
            placeholders.join(", "),
            returning
        ));
        Ok(b.finish().returning())
    }

    fn plan_update(&self, table: &Table, key: &[SqlValue], set: &Row) -> Result<Statement, EngineError> {
        if set.is_empty() {
            return Err(EngineError::Internal(format!(
                "empty update planned for {}",
                table.name
            )));
        }
        let mut b = SqlBuilder::default();
        let mut assignments = Vec::with_capacity(set.len());
        for (column, value) in set {
            let column_type = self.column_type(table, column)?;
            assignments.push(format!("{} = {}", quote(column), b.arg(value, column_type)));
        }
        let condition = self.key_condition(&mut b, table, &table.primary_key, key, false)?;
        b.push(&format!(
            "UPDATE {} SET {} WHERE {}",
            quote(&table.name),
            assignments.join(", "),
            condition
        ));
        Ok(b.finish())
    }

    fn plan_delete(&self, table: &Table, key: &[SqlValue]) -> Result<Statement, EngineError> {
        let mut b = SqlBuilder::default();
        let condition = self.key_condition(&mut b, table, &table.primary_key, key, false)?;
        b.push(&format!("DELETE FROM {} WHERE {}", quote(&table.name), condition));
        Ok(b.finish())
    }

    fn plan_unique_key_lookup(
        &self,
        table: &Table,
        index: &Index,
        values: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError> {
        let mut b = SqlBuilder::default();
        let select = self.select_list(table, columns)?;
        let condition = self.key_condition(&mut b, table, &index.columns, values, true)?;
        b.push(&format!(
            "SELECT {} FROM {} AS {} WHERE {} LIMIT 1",
            select,
            quote(&table.name),
            TARGET,
            condition
        ));
        Ok(b.finish())
    }

    fn plan_table_by_pk(
        &self,
        table: &Table,
        key: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError> {
        let mut b = SqlBuilder::default();
        let select = self.select_list(table, columns)?;
        let condition = self.key_condition(&mut b, table, &table.primary_key, key, true)?;
        b.push(&format!(
            "SELECT {} FROM {} AS {} WHERE {} LIMIT 1",
            select,
            quote(&table.name),
            TARGET,
            condition
        ));
        Ok(b.finish())
    }
}

// =============================================================================
// DDL
// =============================================================================

fn literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlValue::Uuid(u) => format!("'{}'::uuid", u),
        SqlValue::Timestamp(t) => format!("'{}'::timestamptz", t.to_rfc3339()),
        SqlValue::Json(v) => format!("'{}'::jsonb", v.to_string().replace('\'', "''")),
    }
}

/// `CREATE TABLE` statements for every table, then the foreign keys of
/// every many-to-one relationship
///
/// Read-only tables are created like any other; restricting them is left to
/// database privileges.
pub fn schema_ddl(schema: &Schema) -> Vec<String> {
    let mut statements = Vec::new();

    for table in schema.tables() {
        let mut parts = Vec::new();
        for column in &table.columns {
            let mut def = format!("{} {}", quote(&column.name), pg_type(column.column_type));
            if column.generated {
                match column.column_type {
                    ColumnType::Uuid => def.push_str(" DEFAULT gen_random_uuid()"),
                    _ => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
                }
            } else if let Some(default) = &column.default {
                def.push_str(&format!(" DEFAULT {}", literal(default)));
            }
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            parts.push(def);
        }
        let pk = table
            .primary_key
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote(&format!("{}_pkey", table.name)),
            pk
        ));
        for index in table.indexes.iter().filter(|i| i.unique) {
            let columns = index
                .columns
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("CONSTRAINT {} UNIQUE ({})", quote(&index.name), columns));
        }
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&table.name),
            parts.join(", ")
        ));
    }

    for table in schema.tables() {
        for rel in table
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::ManyToOne)
        {
            let local = rel.local_columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            let remote = rel.remote_columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote(&table.name),
                quote(&format!("{}_{}_fkey", table.name, rel.local_columns.join("_"))),
                local,
                quote(&rel.target),
                remote
            ));
        }
    }

    statements
}

// =============================================================================
// Executor (sqlx)
// =============================================================================

#[cfg(feature = "postgres")]
pub use executor::{PgExecutor, ensure_schema};

#[cfg(feature = "postgres")]
mod executor {
    use super::{quote, schema_ddl};
    use crate::core::error::StorageFailure;
    use crate::core::executor::{Executor, Transaction, WriteResult};
    use crate::core::planner::Statement;
    use crate::core::schema::Schema;
    use crate::core::value::{Row, SqlValue};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use sqlx::postgres::{PgArguments, PgRow};
    use sqlx::query::Query;
    use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
    use uuid::Uuid;

    fn storage_failure(err: sqlx::Error) -> StorageFailure {
        match &err {
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => StorageFailure::new(code.to_string(), db.message().to_string()),
                None => StorageFailure::other(db.message().to_string()),
            },
            _ => StorageFailure::other(err.to_string()),
        }
    }

    fn bind_all<'q>(statement: &'q Statement) -> Query<'q, Postgres, PgArguments> {
        statement
            .args
            .iter()
            .fold(sqlx::query(&statement.sql), |query, value| match value {
                // Placeholders carry a cast, so a text NULL converts to any type
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(b) => query.bind(*b),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Float(f) => query.bind(*f),
                SqlValue::Text(s) => query.bind(s.as_str()),
                SqlValue::Uuid(u) => query.bind(*u),
                SqlValue::Timestamp(t) => query.bind(*t),
                SqlValue::Json(v) => query.bind(sqlx::types::Json(v.clone())),
            })
    }

    fn decode_row(row: &PgRow) -> Result<Row, StorageFailure> {
        let mut out = Row::new();
        for (i, column) in row.columns().iter().enumerate() {
            let value = match column.type_info().name() {
                "INT2" => row.try_get::<Option<i16>, _>(i).map(|v| v.map(|v| SqlValue::Int(v.into()))),
                "INT4" => row.try_get::<Option<i32>, _>(i).map(|v| v.map(|v| SqlValue::Int(v.into()))),
                "INT8" => row.try_get::<Option<i64>, _>(i).map(|v| v.map(SqlValue::Int)),
                "FLOAT4" => row.try_get::<Option<f32>, _>(i).map(|v| v.map(|v| SqlValue::Float(v.into()))),
                "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(|v| v.map(SqlValue::Float)),
                "BOOL" => row.try_get::<Option<bool>, _>(i).map(|v| v.map(SqlValue::Bool)),
                "UUID" => row.try_get::<Option<Uuid>, _>(i).map(|v| v.map(SqlValue::Uuid)),
                "TIMESTAMPTZ" => row
                    .try_get::<Option<DateTime<Utc>>, _>(i)
                    .map(|v| v.map(SqlValue::Timestamp)),
                "TIMESTAMP" => row
                    .try_get::<Option<NaiveDateTime>, _>(i)
                    .map(|v| v.map(|t| SqlValue::Timestamp(t.and_utc()))),
                "JSON" | "JSONB" => row
                    .try_get::<Option<serde_json::Value>, _>(i)
                    .map(|v| v.map(SqlValue::Json)),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                    row.try_get::<Option<String>, _>(i).map(|v| v.map(SqlValue::Text))
                }
                other => {
                    return Err(StorageFailure::other(format!(
                        "unsupported column type {} for '{}'",
                        other,
                        column.name()
                    )));
                }
            }
            .map_err(storage_failure)?;
            out.insert(column.name().to_string(), value.unwrap_or(SqlValue::Null));
        }
        Ok(out)
    }

    fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<Row>, StorageFailure> {
        rows.iter().map(decode_row).collect()
    }

    /// Create the configured tables (idempotent for tables, not for foreign keys)
    pub async fn ensure_schema(pool: &PgPool, schema: &Schema) -> Result<(), StorageFailure> {
        for ddl in schema_ddl(schema) {
            sqlx::query(&ddl)
                .execute(pool)
                .await
                .map_err(storage_failure)?;
        }
        Ok(())
    }

    /// Executor backed by a `sqlx::PgPool`
    #[derive(Clone, Debug)]
    pub struct PgExecutor {
        pool: PgPool,
    }

    impl PgExecutor {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        pub fn pool(&self) -> &PgPool {
            &self.pool
        }
    }

    #[async_trait]
    impl Executor for PgExecutor {
        async fn query(&self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
            let rows = bind_all(statement)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_failure)?;
            decode_rows(rows)
        }

        async fn exec(&self, statement: &Statement) -> Result<WriteResult, StorageFailure> {
            let result = bind_all(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_failure)?;
            Ok(WriteResult {
                rows_affected: result.rows_affected(),
                last_insert_id: None,
            })
        }

        async fn begin(&self) -> Result<Box<dyn Transaction>, StorageFailure> {
            let tx = self.pool.begin().await.map_err(storage_failure)?;
            Ok(Box::new(PgTransaction { tx }))
        }
    }

    struct PgTransaction {
        tx: sqlx::Transaction<'static, Postgres>,
    }

    impl PgTransaction {
        async fn control(&mut self, sql: String) -> Result<(), StorageFailure> {
            sqlx::query(&sql)
                .execute(&mut *self.tx)
                .await
                .map_err(storage_failure)?;
            Ok(())
        }
    }

    #[async_trait]
    impl Transaction for PgTransaction {
        async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageFailure> {
            let rows = bind_all(statement)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(storage_failure)?;
            decode_rows(rows)
        }

        async fn exec(&mut self, statement: &Statement) -> Result<WriteResult, StorageFailure> {
            let result = bind_all(statement)
                .execute(&mut *self.tx)
                .await
                .map_err(storage_failure)?;
            Ok(WriteResult {
                rows_affected: result.rows_affected(),
                last_insert_id: None,
            })
        }

        async fn savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
            self.control(format!("SAVEPOINT {}", quote(name))).await
        }

        async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
            self.control(format!("ROLLBACK TO SAVEPOINT {}", quote(name))).await
        }

        async fn release_savepoint(&mut self, name: &str) -> Result<(), StorageFailure> {
            self.control(format!("RELEASE SAVEPOINT {}", quote(name))).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StorageFailure> {
            let this = *self;
            this.tx.commit().await.map_err(storage_failure)
        }

        async fn rollback(self: Box<Self>) -> Result<(), StorageFailure> {
            let this = *self;
            this.tx.rollback().await.map_err(storage_failure)
        }
    }
}
