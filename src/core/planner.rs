//! Planner interface
//!
//! A planner turns a structured request into statement text plus positional
//! arguments for one target database. It never executes anything. The engine
//! only ever talks to storage through a [`Planner`] and an
//! [`Executor`](crate::core::executor::Executor).

use crate::core::error::EngineError;
use crate::core::schema::{Index, Table};
use crate::core::value::{Row, SqlValue};
use serde::{Deserialize, Serialize};

/// Synthetic column prefix tagging each grouped row with its owning parent
pub const PARENT_KEY_PREFIX: &str = "__parent_";

/// Name of the `i`-th owning-parent key column in grouped results
pub fn parent_key_column(i: usize) -> String {
    format!("{}{}", PARENT_KEY_PREFIX, i)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// The same key with every direction flipped
pub fn reverse_sort(sort: &[SortKey]) -> Vec<SortKey> {
    sort.iter()
        .map(|k| SortKey::new(k.column.clone(), k.direction.reverse()))
        .collect()
}

/// Hop through a junction table for many-to-many relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionHop {
    pub table: String,
    /// Junction columns matching the target table's `remote_columns`
    pub target_columns: Vec<String>,
    /// Target table columns
    pub remote_columns: Vec<String>,
}

/// Restricts a query to rows related to one or more parents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationScope {
    /// Qualified relationship name, for logging
    pub relationship: String,
    /// Columns compared against each parent key: on the junction table when
    /// `junction` is set, otherwise on the queried table
    pub key_columns: Vec<String>,
    pub junction: Option<JunctionHop>,
    pub parent_keys: Vec<Vec<SqlValue>>,
}

/// One page of a connection
///
/// `after`/`before` are exclusive boundaries expressed in `sort` order. When
/// the query is grouped, `limit` applies per parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Vec<(String, SqlValue)>,
    pub sort: Vec<SortKey>,
    pub after: Option<Vec<SqlValue>>,
    pub before: Option<Vec<SqlValue>>,
    pub limit: Option<usize>,
    pub scope: Option<RelationScope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl AggregateFunction {
    /// Result column name
    pub fn alias(&self) -> String {
        match self {
            AggregateFunction::Count => "count".to_string(),
            AggregateFunction::Sum(c) => format!("sum__{}", c),
            AggregateFunction::Avg(c) => format!("avg__{}", c),
            AggregateFunction::Min(c) => format!("min__{}", c),
            AggregateFunction::Max(c) => format!("max__{}", c),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            AggregateFunction::Count => None,
            AggregateFunction::Sum(c)
            | AggregateFunction::Avg(c)
            | AggregateFunction::Min(c)
            | AggregateFunction::Max(c) => Some(c),
        }
    }
}

/// Aggregate over the rows of one connection (single parent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub table: String,
    pub filter: Vec<(String, SqlValue)>,
    pub scope: Option<RelationScope>,
    pub functions: Vec<AggregateFunction>,
}

/// Statement text plus positional arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
    /// The statement yields the generated key as a row
    pub returning: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
            returning: false,
        }
    }

    pub fn returning(mut self) -> Self {
        self.returning = true;
        self
    }
}

/// Translates structured requests into statements for one dialect
pub trait Planner: Send + Sync {
    /// Connection page, ungrouped (at most one parent key in scope)
    fn plan_connection(&self, query: &ConnectionQuery) -> Result<Statement, EngineError>;

    /// Connection pages for every parent key in scope, `limit` rows each,
    /// every row tagged with `__parent_<i>` columns
    fn plan_connection_batch(&self, query: &ConnectionQuery) -> Result<Statement, EngineError>;

    /// Single-row aggregate, columns named by [`AggregateFunction::alias`]
    fn plan_aggregate(&self, query: &AggregateQuery) -> Result<Statement, EngineError>;

    fn plan_insert(&self, table: &Table, values: &Row) -> Result<Statement, EngineError>;

    fn plan_update(
        &self,
        table: &Table,
        key: &[SqlValue],
        set: &Row,
    ) -> Result<Statement, EngineError>;

    fn plan_delete(&self, table: &Table, key: &[SqlValue]) -> Result<Statement, EngineError>;

    fn plan_unique_key_lookup(
        &self,
        table: &Table,
        index: &Index,
        values: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError>;

    fn plan_table_by_pk(
        &self,
        table: &Table,
        key: &[SqlValue],
        columns: &[String],
    ) -> Result<Statement, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_sort() {
        let sort = vec![
            SortKey::new("title", SortDirection::Desc),
            SortKey::new("id", SortDirection::Asc),
        ];
        let reversed = reverse_sort(&sort);
        assert_eq!(reversed[0].direction, SortDirection::Asc);
        assert_eq!(reversed[1].direction, SortDirection::Desc);
        assert_eq!(reverse_sort(&reversed), sort);
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!(SortDirection::parse("desc"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("up"), None);
    }

    #[test]
    fn test_aggregate_alias() {
        assert_eq!(AggregateFunction::Count.alias(), "count");
        assert_eq!(AggregateFunction::Sum("weight".into()).alias(), "sum__weight");
        assert_eq!(AggregateFunction::Max("id".into()).column(), Some("id"));
    }
}
