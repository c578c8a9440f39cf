//! Mutation result payloads
//!
//! A mutation field always resolves to exactly one member of its result
//! union. Success members carry the row; error members carry
//! `{message, code, nativeErrorCode}`.

use crate::core::error::{EngineError, MutationError, MutationFailure};
use crate::core::schema::Table;
use crate::core::value::{Row, row_to_json};
use crate::mutation::orchestrator::DeletedRow;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum MutationPayload {
    Created(Row),
    /// `None` when no row was affected
    Updated(Option<Row>),
    Deleted(DeletedRow),
    Failed(MutationError),
}

impl MutationPayload {
    /// Collapse an orchestrator result: typed failures become a payload,
    /// fatal ones are handed back
    pub fn from_result<T>(
        result: Result<T, MutationFailure>,
        success: impl FnOnce(T) -> Self,
    ) -> Result<Self, EngineError> {
        match result {
            Ok(value) => Ok(success(value)),
            Err(MutationFailure::Typed(err)) => Ok(MutationPayload::Failed(err)),
            Err(MutationFailure::Fatal(err)) => Err(err),
        }
    }

    /// `__typename` of this union member for `table`
    pub fn type_name(&self, table: &Table) -> String {
        match self {
            MutationPayload::Created(_) => format!("Create{}Success", table.type_name),
            MutationPayload::Updated(_) => format!("Update{}Success", table.type_name),
            MutationPayload::Deleted(_) => format!("Delete{}Success", table.type_name),
            MutationPayload::Failed(err) => err.kind.type_name().to_string(),
        }
    }

    /// Row exposed as `node`, if this member has one
    pub fn node(&self) -> Option<&Row> {
        match self {
            MutationPayload::Created(row) => Some(row),
            MutationPayload::Updated(row) => row.as_ref(),
            _ => None,
        }
    }

    /// Value of a scalar member field; `None` for fields the member lacks
    pub fn scalar(&self, field: &str) -> Option<Value> {
        match (self, field) {
            (MutationPayload::Deleted(deleted), "id") => Some(json!(deleted.id)),
            // Raw key columns, also reachable when a key column is itself named `id`
            (MutationPayload::Deleted(deleted), "key") => Some(row_to_json(&deleted.key)),
            (MutationPayload::Deleted(deleted), column) => deleted.key.get(column).map(|v| v.to_json()),
            (MutationPayload::Failed(err), "message") => Some(json!(err.message)),
            (MutationPayload::Failed(err), "code") => Some(json!(err.kind.error_code())),
            (MutationPayload::Failed(err), "nativeErrorCode") => Some(json!(err.native_code)),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MutationPayload::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::core::error::{ErrorKind, StorageFailure, classify};
    use crate::core::value::SqlValue;

    fn users() -> Table {
        SchemaConfig::blog()
            .into_schema()
            .unwrap()
            .table("users")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_success_type_names() {
        let table = users();
        assert_eq!(MutationPayload::Created(Row::new()).type_name(&table), "CreateUserSuccess");
        assert_eq!(MutationPayload::Updated(None).type_name(&table), "UpdateUserSuccess");
        assert!(MutationPayload::Updated(None).node().is_none());
    }

    #[test]
    fn test_error_member_fields() {
        let payload = MutationPayload::Failed(classify(StorageFailure::new("23505", "duplicate")));
        assert_eq!(payload.type_name(&users()), "ConflictError");
        assert_eq!(payload.scalar("code"), Some(json!("CONFLICT")));
        assert_eq!(payload.scalar("nativeErrorCode"), Some(json!("23505")));
        assert_eq!(payload.scalar("message"), Some(json!("duplicate")));
        assert!(payload.is_error());
    }

    #[test]
    fn test_deleted_member_fields() {
        let mut key = Row::new();
        key.insert("id".to_string(), SqlValue::Int(4));
        let payload = MutationPayload::Deleted(DeletedRow {
            id: "abc".to_string(),
            key,
        });
        assert_eq!(payload.scalar("id"), Some(json!("abc")));
        assert_eq!(payload.scalar("key"), Some(json!({"id": 4})));
        assert_eq!(payload.scalar("email"), None);
    }

    #[test]
    fn test_from_result() {
        let typed: Result<Row, MutationFailure> =
            Err(MutationError::new(ErrorKind::NotFound, "gone").into());
        let payload = MutationPayload::from_result(typed, MutationPayload::Created).unwrap();
        assert_eq!(payload.type_name(&users()), "NotFoundError");

        let fatal: Result<Row, MutationFailure> =
            Err(EngineError::Internal("broken".to_string()).into());
        assert!(MutationPayload::from_result(fatal, MutationPayload::Created).is_err());
    }
}
