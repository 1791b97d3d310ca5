//! Data models for the PostgreSQL MCP gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionCheck, ConnectionSettings, ConnectionSettingsError};
pub use query::{DEFAULT_QUERY_LIMIT, QueryRequest, QueryResponse};
pub use schema::{
    ColumnDescriptor, ConstraintDescriptor, ConstraintKind, ConstraintReference,
    IndexDescriptor, RoutineDescriptor, RoutineKind, SchemaSummary, SummaryCounts, TableDescriptor,
    TableDetail, TableKind, TableSummary,
};
