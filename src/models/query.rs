//! Query-related data models.
//!
//! This module defines types for SQL query requests and results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Row bound used when the caller does not pass one.
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// A literal SQL statement plus an optional row bound. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    sql: String,
    limit: Option<u32>,
}

impl QueryRequest {
    /// Create a new query request with the default row bound.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            limit: None,
        }
    }

    /// Set the requested row limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Effective row bound: the requested limit (default 1000) capped by
    /// `max_rows`, and never below one row.
    pub fn effective_limit(&self, max_rows: u32) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(max_rows)
            .max(1)
    }
}

/// Result of `execute_query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Rows as ordered column -> value maps
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
    /// True if the enforced row bound cut the result short
    pub truncated: bool,
    /// The SQL text actually sent to the database
    pub executed_sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_defaults_to_1000() {
        let request = QueryRequest::new("SELECT 1");
        assert_eq!(request.effective_limit(10_000), 1000);
    }

    #[test]
    fn test_effective_limit_capped_by_max_rows() {
        let request = QueryRequest::new("SELECT 1").with_limit(50_000);
        assert_eq!(request.effective_limit(10_000), 10_000);
        assert_eq!(QueryRequest::new("SELECT 1").effective_limit(200), 200);
    }

    #[test]
    fn test_effective_limit_never_zero() {
        let request = QueryRequest::new("SELECT 1").with_limit(0);
        assert_eq!(request.effective_limit(10_000), 1);
    }

    #[test]
    fn test_query_response_field_order() {
        let response = QueryResponse {
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            executed_sql: "SELECT 1 LIMIT 1000".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(
            json,
            r#"{"rows":[],"row_count":0,"truncated":false,"executed_sql":"SELECT 1 LIMIT 1000"}"#
        );
    }
}
