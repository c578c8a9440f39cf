//! Scalar values and rows exchanged with the planner and executor

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A single column value as read from or written to storage
///
/// The externally tagged representation is kept on purpose: cursors and
/// opaque ids embed these values and must decode to the exact same variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

/// One result row, columns in selection order
pub type Row = IndexMap<String, SqlValue>;

impl SqlValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Get the value as an integer if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as a string if possible
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value for a GraphQL response
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => json!(b),
            SqlValue::Int(i) => json!(i),
            SqlValue::Float(f) => json!(f),
            SqlValue::Text(s) => json!(s),
            SqlValue::Uuid(u) => json!(u.to_string()),
            SqlValue::Timestamp(t) => json!(t.to_rfc3339()),
            SqlValue::Json(v) => v.clone(),
        }
    }

    /// Convert an untyped argument value without column type information
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Json(other.clone()),
        }
    }

    /// Canonical string form, stable across equal values
    ///
    /// Used to key maps by parent identity, since `f64` rules out `Hash`.
    pub fn canonical(&self) -> String {
        match self {
            SqlValue::Null => "n:".to_string(),
            SqlValue::Bool(b) => format!("b:{}", b),
            SqlValue::Int(i) => format!("i:{}", i),
            SqlValue::Float(f) => format!("f:{}", f),
            SqlValue::Text(s) => format!("s:{}", s),
            SqlValue::Uuid(u) => format!("u:{}", u),
            SqlValue::Timestamp(t) => format!("t:{}", t.to_rfc3339()),
            SqlValue::Json(v) => format!("j:{}", v),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::Int(_) | SqlValue::Float(_) => 2,
            SqlValue::Text(_) => 3,
            SqlValue::Uuid(_) => 4,
            SqlValue::Timestamp(_) => 5,
            SqlValue::Json(_) => 6,
        }
    }

    /// Total order used for sorting and boundary comparison
    ///
    /// Nulls sort first; integers and floats compare numerically.
    pub fn total_cmp(&self, other: &SqlValue) -> Ordering {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
            (SqlValue::Int(a), SqlValue::Int(b)) => a.cmp(b),
            (SqlValue::Float(a), SqlValue::Float(b)) => a.total_cmp(b),
            (SqlValue::Int(a), SqlValue::Float(b)) => (*a as f64).total_cmp(b),
            (SqlValue::Float(a), SqlValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a.cmp(b),
            (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => a.cmp(b),
            (SqlValue::Json(a), SqlValue::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    /// Equality under the total order (`Int(1)` equals `Float(1.0)`)
    pub fn same_as(&self, other: &SqlValue) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "'{}'", s),
            SqlValue::Uuid(u) => write!(f, "{}", u),
            SqlValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            SqlValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// Extract the values of `columns` from a row, in order
///
/// Returns `None` when a column is absent.
pub fn project(row: &Row, columns: &[String]) -> Option<Vec<SqlValue>> {
    columns.iter().map(|c| row.get(c).cloned()).collect()
}

/// Canonical key for a tuple of values
pub fn tuple_key(values: &[SqlValue]) -> String {
    values
        .iter()
        .map(SqlValue::canonical)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Render a row as a JSON object
pub fn row_to_json(row: &Row) -> Value {
    let map: serde_json::Map<String, Value> =
        row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(SqlValue::from_json(&json!(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Float(1.5));
        assert!(SqlValue::from_json(&Value::Null).is_null());
    }

    #[test]
    fn test_total_cmp_mixed_numeric() {
        assert_eq!(
            SqlValue::Int(2).total_cmp(&SqlValue::Float(1.5)),
            Ordering::Greater
        );
        assert!(SqlValue::Int(1).same_as(&SqlValue::Float(1.0)));
    }

    #[test]
    fn test_nulls_sort_first() {
        assert_eq!(
            SqlValue::Null.total_cmp(&SqlValue::Int(-10)),
            Ordering::Less
        );
    }

    #[test]
    fn test_tuple_key_distinguishes_types() {
        let a = tuple_key(&[SqlValue::Int(1)]);
        let b = tuple_key(&[SqlValue::Text("1".to_string())]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_project_missing_column() {
        let mut row = Row::new();
        row.insert("id".to_string(), SqlValue::Int(1));
        assert_eq!(
            project(&row, &["id".to_string()]),
            Some(vec![SqlValue::Int(1)])
        );
        assert_eq!(project(&row, &["email".to_string()]), None);
    }
}
