//! PostgreSQL MCP Gateway Library
//!
//! Read-oriented access to a single PostgreSQL database for AI assistants:
//! catalog introspection tools plus a guarded query tool, served over MCP.

pub mod assembler;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod mcp;
pub mod models;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use gateway::{Gateway, Operation, OperationOutput};
pub use guard::{GuardMode, QueryGuard, QueryVerdict};
pub use mcp::GatewayService;
