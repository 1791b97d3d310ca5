//! Error types for the PostgreSQL MCP gateway.
//!
//! This module defines all error types using `thiserror`. Every failure that
//! reaches the MCP client is a structured error carrying a stable `kind`
//! and, where one helps, a suggestion for recovering from it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("No connection available within {waited_secs}s (pool size {max_connections})")]
    PoolExhausted {
        waited_secs: u64,
        max_connections: u32,
    },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Query rejected: {reason}")]
    RejectedQuery { reason: String },

    #[error("{object} not found")]
    NotFound { object: String },

    #[error("Introspection of '{object}' failed: {message}")]
    Introspection { object: String, message: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(waited_secs: u64, max_connections: u32) -> Self {
        Self::PoolExhausted {
            waited_secs,
            max_connections,
        }
    }

    /// Create a rejection carrying the guard's reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::RejectedQuery {
            reason: reason.into(),
        }
    }

    pub fn not_found(object: impl Into<String>) -> Self {
        Self::NotFound {
            object: object.into(),
        }
    }

    /// Create an introspection error for the object whose catalog query failed.
    pub fn introspection(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Introspection {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQLSTATE.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Connection { .. } => "connection_error",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PoolClosed => "pool_closed",
            Self::RejectedQuery { .. } => "rejected_query",
            Self::NotFound { .. } => "not_found",
            Self::Introspection { .. } => "introspection_error",
            Self::Execution { .. } => "execution_error",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Retry later or raise --max-connections / --acquire-timeout")
            }
            Self::PoolClosed => Some("The server is shutting down"),
            Self::RejectedQuery { .. } => {
                Some("Only read-only statements can be executed through execute_query")
            }
            Self::NotFound { .. } => Some("Call get_tables to list available tables and schemas"),
            Self::Timeout { .. } => {
                Some("Narrow the query or raise --statement-timeout")
            }
            _ => None,
        }
    }

    /// Connection failures may succeed on a later acquisition once the pool reconnects.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }

    /// Whether the connection that produced this error can no longer be trusted.
    pub fn poisons_connection(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            // Class 08 connection exceptions and 57P operator intervention,
            // e.g. 57P01 when the backend is terminated
            Self::Execution {
                sql_state: Some(code),
                ..
            } => code.starts_with("08") || code.starts_with("57P"),
            _ => false,
        }
    }

    /// Re-label a catalog failure as an introspection error for `object`.
    ///
    /// Not-found, pool and connection errors pass through untouched.
    pub fn into_introspection(self, object: &str) -> Self {
        match self {
            Self::Execution { message, .. } | Self::Internal { message } => {
                Self::introspection(object, message)
            }
            Self::Timeout { .. } => Self::introspection(object, self.to_string()),
            other => other,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build the structured `data` payload attached to every MCP error.
fn error_data(err: &DbError) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert("kind".to_string(), err.kind().into());
    if let Some(s) = err.suggestion() {
        data.insert("suggestion".to_string(), s.into());
    }
    match err {
        DbError::Execution {
            sql_state: Some(code),
            ..
        } => {
            data.insert("sql_state".to_string(), code.as_str().into());
        }
        DbError::NotFound { object } | DbError::Introspection { object, .. } => {
            data.insert("object".to_string(), object.as_str().into());
        }
        _ => {}
    }
    serde_json::Value::Object(data)
}

/// Convert DbError to MCP ErrorData for semantic error categorization.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = Some(error_data(&err));
        match &err {
            DbError::RejectedQuery { .. } | DbError::InvalidInput { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }

            DbError::NotFound { .. } => rmcp::ErrorData::resource_not_found(err.to_string(), data),

            // Database's own message is surfaced verbatim, SQLSTATE appended
            DbError::Execution { message, sql_state } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }

            DbError::Configuration { .. }
            | DbError::Connection { .. }
            | DbError::PoolExhausted { .. }
            | DbError::PoolClosed
            | DbError::Introspection { .. }
            | DbError::Timeout { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let errors = [
            DbError::configuration("x"),
            DbError::connection("x", "y"),
            DbError::pool_exhausted(1, 2),
            DbError::PoolClosed,
            DbError::rejected("x"),
            DbError::not_found("x"),
            DbError::introspection("x", "y"),
            DbError::execution("x", None),
            DbError::timeout("x", 1),
            DbError::invalid_input("x"),
            DbError::internal("x"),
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::pool_exhausted(30, 20).is_retryable());
        assert!(!DbError::rejected("destructive").is_retryable());
        assert!(!DbError::PoolClosed.is_retryable());
    }

    #[test]
    fn test_poisons_connection() {
        assert!(DbError::timeout("statement", 60).poisons_connection());
        assert!(DbError::connection("reset", "retry").poisons_connection());
        assert!(!DbError::execution("syntax error", Some("42601".into())).poisons_connection());
        assert!(!DbError::execution("canceled", Some("57014".into())).poisons_connection());
        assert!(!DbError::execution("no code", None).poisons_connection());
    }

    #[test]
    fn test_fatal_server_errors_poison_connection() {
        for code in ["57P01", "57P02", "08006", "08003"] {
            let err = DbError::execution("terminating connection", Some(code.into()));
            assert!(err.poisons_connection(), "{code}");
        }
    }

    #[test]
    fn test_into_introspection_wraps_execution_errors() {
        let err = DbError::execution("permission denied for table secrets", Some("42501".into()))
            .into_introspection("public.secrets");
        match err {
            DbError::Introspection { object, message } => {
                assert_eq!(object, "public.secrets");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_into_introspection_keeps_not_found() {
        let err = DbError::not_found("Table 'public.nope'").into_introspection("public.nope");
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    // Tests for From<DbError> for rmcp::ErrorData

    #[test]
    fn test_rejected_maps_to_invalid_params() {
        let mcp_err: rmcp::ErrorData = DbError::rejected("destructive or mutating").into();
        // invalid_params uses -32602
        assert_eq!(mcp_err.code.0, -32602);
        assert!(mcp_err.message.contains("destructive"));
        assert_eq!(mcp_err.data.unwrap()["kind"], "rejected_query");
    }

    #[test]
    fn test_not_found_maps_to_resource_not_found() {
        let mcp_err: rmcp::ErrorData = DbError::not_found("Table 'public.users'").into();
        // resource_not_found uses -32002 in rmcp
        assert_eq!(mcp_err.code.0, -32002);
        let data = mcp_err.data.unwrap();
        assert_eq!(data["kind"], "not_found");
        assert_eq!(data["object"], "Table 'public.users'");
    }

    #[test]
    fn test_execution_error_includes_sql_state() {
        let err = DbError::execution("syntax error at or near \"SELEC\"", Some("42601".into()));
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32602);
        assert!(mcp_err.message.starts_with("syntax error at or near"));
        assert!(mcp_err.message.contains("42601"));
        assert_eq!(mcp_err.data.unwrap()["sql_state"], "42601");
    }

    #[test]
    fn test_pool_errors_map_to_internal_error() {
        let exhausted: rmcp::ErrorData = DbError::pool_exhausted(30, 20).into();
        let closed: rmcp::ErrorData = DbError::PoolClosed.into();
        // internal_error uses -32603
        assert_eq!(exhausted.code.0, -32603);
        assert_eq!(closed.code.0, -32603);
        assert_eq!(closed.data.unwrap()["kind"], "pool_closed");
    }

    #[test]
    fn test_connection_error_includes_suggestion_in_data() {
        let err = DbError::connection("failed", "try reconnecting");
        let mcp_err: rmcp::ErrorData = err.into();
        let data = mcp_err.data.unwrap();
        assert_eq!(data["suggestion"], "try reconnecting");
        assert_eq!(data["kind"], "connection_error");
    }

    #[test]
    fn test_introspection_error_carries_object() {
        let err = DbError::introspection("public.orders", "connection reset");
        let mcp_err: rmcp::ErrorData = err.into();
        assert_eq!(mcp_err.code.0, -32603);
        assert_eq!(mcp_err.data.unwrap()["object"], "public.orders");
    }
}
