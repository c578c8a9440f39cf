//! Pagination cursors
//!
//! A cursor records the sort key of one row together with the sort order it
//! was minted under. Decoding reproduces the exact boundary tuple used for
//! the continuation predicate, and refuses tokens from a different order.

use crate::core::error::EngineError;
use crate::core::planner::{SortDirection, SortKey};
use crate::core::value::{Row, SqlValue};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "t")]
    pub type_name: String,
    #[serde(rename = "c")]
    pub columns: Vec<String>,
    #[serde(rename = "d")]
    pub directions: Vec<SortDirection>,
    #[serde(rename = "v")]
    pub values: Vec<SqlValue>,
}

impl Cursor {
    /// Cursor for `row` under `sort`; `None` if a sort column is missing
    pub fn for_row(type_name: &str, sort: &[SortKey], row: &Row) -> Option<Self> {
        let values = sort
            .iter()
            .map(|key| row.get(&key.column).cloned())
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            type_name: type_name.to_string(),
            columns: sort.iter().map(|k| k.column.clone()).collect(),
            directions: sort.iter().map(|k| k.direction).collect(),
            values,
        })
    }

    pub fn encode(&self) -> String {
        // Serializing plain data into a Vec cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, EngineError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid("not a valid cursor token"))?;
        let cursor: Self =
            serde_json::from_slice(&bytes).map_err(|_| invalid("not a valid cursor token"))?;

        if cursor.columns.len() != cursor.directions.len()
            || cursor.columns.len() != cursor.values.len()
        {
            return Err(invalid("cursor sort key is malformed"));
        }
        Ok(cursor)
    }

    /// Decode and check that the token was minted for this type and sort order
    pub fn decode_for(token: &str, type_name: &str, sort: &[SortKey]) -> Result<Self, EngineError> {
        let cursor = Self::decode(token)?;

        if cursor.type_name != type_name {
            return Err(invalid(&format!(
                "cursor was issued for {}, not {}",
                cursor.type_name, type_name
            )));
        }

        let same_order = cursor.columns.len() == sort.len()
            && cursor
                .columns
                .iter()
                .zip(&cursor.directions)
                .zip(sort)
                .all(|((column, direction), key)| *column == key.column && *direction == key.direction);
        if !same_order {
            return Err(invalid("cursor was issued for a different sort order"));
        }

        Ok(cursor)
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidCursor {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort() -> Vec<SortKey> {
        vec![
            SortKey::new("title", SortDirection::Desc),
            SortKey::new("id", SortDirection::Asc),
        ]
    }

    fn row() -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), SqlValue::Int(9));
        row.insert("title".to_string(), SqlValue::Text("b".to_string()));
        row
    }

    #[test]
    fn test_round_trip_reproduces_boundary() {
        let cursor = Cursor::for_row("Post", &sort(), &row()).unwrap();
        let decoded = Cursor::decode_for(&cursor.encode(), "Post", &sort()).unwrap();

        assert_eq!(decoded, cursor);
        assert_eq!(
            decoded.values,
            vec![SqlValue::Text("b".to_string()), SqlValue::Int(9)]
        );
    }

    #[test]
    fn test_stable_encoding() {
        let a = Cursor::for_row("Post", &sort(), &row()).unwrap().encode();
        let b = Cursor::for_row("Post", &sort(), &row()).unwrap().encode();
        assert_eq!(a, b);
    }

    #[test]
    fn test_other_sort_order_rejected() {
        let token = Cursor::for_row("Post", &sort(), &row()).unwrap().encode();
        let flipped = vec![
            SortKey::new("title", SortDirection::Asc),
            SortKey::new("id", SortDirection::Asc),
        ];

        let err = Cursor::decode_for(&token, "Post", &flipped).unwrap_err();
        assert!(matches!(err, EngineError::InvalidCursor { .. }));

        let by_id = vec![SortKey::new("id", SortDirection::Asc)];
        assert!(Cursor::decode_for(&token, "Post", &by_id).is_err());
    }

    #[test]
    fn test_other_type_rejected() {
        let token = Cursor::for_row("Post", &sort(), &row()).unwrap().encode();
        assert!(Cursor::decode_for(&token, "User", &sort()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Cursor::decode("!!").is_err());
        assert!(Cursor::decode(&URL_SAFE_NO_PAD.encode("{}")).is_err());
    }

    #[test]
    fn test_missing_sort_column() {
        let mut partial = Row::new();
        partial.insert("id".to_string(), SqlValue::Int(1));
        assert!(Cursor::for_row("Post", &sort(), &partial).is_none());
    }
}
