//! Typed error handling for relgraph
//!
//! Two families of failure flow through the engine and they are never mixed:
//!
//! - [`MutationError`]: an *expected* outcome of a write (bad input, unique
//!   violation, missing row, ...). It is converted into a member of the
//!   mutation field's result union and never aborts sibling fields.
//! - [`EngineError`]: a fatal condition (storage failure while reading,
//!   invalid query arguments, broken schema invariants). It propagates and
//!   fails the field or the whole operation.
//!
//! Driver failures arrive as [`StorageFailure`] and are classified exactly
//! once, by [`classify`], at the point where the statement was executed.
//!
//! # Example
//!
//! ```rust,ignore
//! match orchestrator.create(&ctx, table, input, &selection).await {
//!     Ok(row) => payload::create_success(table, row),
//!     Err(MutationFailure::Typed(err)) => payload::error(&err),
//!     Err(MutationFailure::Fatal(err)) => return Err(err.into()),
//! }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Storage failures
// =============================================================================

/// Raw failure reported by an executor
///
/// `code` carries the driver's native error code (SQLSTATE for PostgreSQL)
/// when one is available.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct StorageFailure {
    pub code: Option<String>,
    pub message: String,
}

impl StorageFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// A failure without a native code
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// SQLSTATE codes the classifier understands
pub mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const INVALID_SAVEPOINT: &str = "3B001";
}

// =============================================================================
// Mutation errors
// =============================================================================

/// The closed set of typed mutation outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InputValidation,
    Conflict,
    Constraint,
    Permission,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Result-union member name
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "InputValidationError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::Permission => "PermissionError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Machine-readable code exposed on the payload
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "INPUT_VALIDATION",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Constraint => "CONSTRAINT_VIOLATION",
            ErrorKind::Permission => "PERMISSION_DENIED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Every member, in declaration order
    pub fn all() -> [ErrorKind; 6] {
        [
            ErrorKind::InputValidation,
            ErrorKind::Conflict,
            ErrorKind::Constraint,
            ErrorKind::Permission,
            ErrorKind::NotFound,
            ErrorKind::Internal,
        ]
    }
}

/// A typed, user-facing mutation failure
#[derive(Debug, Clone, PartialEq)]
pub struct MutationError {
    pub kind: ErrorKind,
    pub message: String,
    pub native_code: Option<String>,
}

impl MutationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            native_code: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputValidation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.type_name(), self.message)
    }
}

impl std::error::Error for MutationError {}

/// Map a driver failure onto the typed taxonomy
pub fn classify(failure: StorageFailure) -> MutationError {
    let kind = match failure.code.as_deref() {
        Some(sqlstate::UNIQUE_VIOLATION) => ErrorKind::Conflict,
        Some(sqlstate::FOREIGN_KEY_VIOLATION)
        | Some(sqlstate::NOT_NULL_VIOLATION)
        | Some(sqlstate::CHECK_VIOLATION) => ErrorKind::Constraint,
        Some(sqlstate::INSUFFICIENT_PRIVILEGE) => ErrorKind::Permission,
        _ => ErrorKind::Internal,
    };

    MutationError {
        kind,
        message: failure.message,
        native_code: failure.code,
    }
}

// =============================================================================
// Fatal errors
// =============================================================================

/// Fatal engine error; propagates instead of becoming a payload
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage failed while reading (infrastructure, not user input)
    #[error("storage error: {0}")]
    Storage(#[from] StorageFailure),

    /// A query argument could not be honored
    #[error("invalid argument '{argument}': {message}")]
    InvalidArgument { argument: String, message: String },

    /// A cursor was malformed or minted for another sort order
    #[error("invalid cursor: {message}")]
    InvalidCursor { message: String },

    /// The schema model violates an invariant (e.g. column-count mismatch)
    #[error("schema invariant violated: {message}")]
    Schema { message: String },

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        EngineError::Schema {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidArgument { .. } | EngineError::InvalidCursor { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            EngineError::InvalidCursor { .. } => "INVALID_CURSOR",
            EngineError::Schema { .. } => "SCHEMA_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

/// Outcome of one mutation step: typed (becomes a payload) or fatal
#[derive(Debug)]
pub enum MutationFailure {
    Typed(MutationError),
    Fatal(EngineError),
}

impl From<MutationError> for MutationFailure {
    fn from(err: MutationError) -> Self {
        MutationFailure::Typed(err)
    }
}

impl From<EngineError> for MutationFailure {
    fn from(err: EngineError) -> Self {
        MutationFailure::Fatal(err)
    }
}

impl fmt::Display for MutationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationFailure::Typed(e) => write!(f, "{}", e),
            MutationFailure::Fatal(e) => write!(f, "{}", e),
        }
    }
}

// =============================================================================
// Config errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration
    #[error("Failed to parse config{}: {message}", .file.as_ref().map(|f| format!(" file '{}'", f)).unwrap_or_default())]
    Parse {
        file: Option<String>,
        message: String,
    },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// IO error while reading configuration
    #[error("IO error: {message}")]
    Io { message: String },

    /// Invalid value in configuration
    #[error("Invalid value '{value}' for field '{field}': {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// Reference to an unknown table or column
    #[error("Unknown {what} '{name}' referenced by {context}")]
    UnknownReference {
        what: &'static str,
        name: String,
        context: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unique_violation() {
        let err = classify(StorageFailure::new("23505", "duplicate key"));
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.native_code.as_deref(), Some("23505"));
        assert_eq!(err.message, "duplicate key");
    }

    #[test]
    fn test_classify_constraint_codes() {
        for code in ["23503", "23502", "23514"] {
            let err = classify(StorageFailure::new(code, "violation"));
            assert_eq!(err.kind, ErrorKind::Constraint, "code {}", code);
        }
    }

    #[test]
    fn test_classify_permission_and_unknown() {
        assert_eq!(
            classify(StorageFailure::new("42501", "denied")).kind,
            ErrorKind::Permission
        );
        assert_eq!(
            classify(StorageFailure::new("40001", "serialization")).kind,
            ErrorKind::Internal
        );
        assert_eq!(
            classify(StorageFailure::other("socket closed")).kind,
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::NotFound.type_name(), "NotFoundError");
        assert_eq!(ErrorKind::Conflict.error_code(), "CONFLICT");
        assert_eq!(ErrorKind::all().len(), 6);
    }

    #[test]
    fn test_engine_error_status_codes() {
        let err = EngineError::InvalidCursor {
            message: "bad".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INVALID_CURSOR");

        let err: EngineError = StorageFailure::other("down").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_mutation_failure_conversion() {
        let failure: MutationFailure = MutationError::invalid_input("unknown key 'x'").into();
        assert!(matches!(failure, MutationFailure::Typed(_)));
        assert!(failure.to_string().contains("InputValidationError"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Parse {
            file: Some("schema.yaml".to_string()),
            message: "bad indent".to_string(),
        };
        assert!(err.to_string().contains("schema.yaml"));

        let err = ConfigError::Parse {
            file: None,
            message: "bad indent".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to parse config: bad indent");
    }
}
