//! MCP server integration module.
//!
//! Exposes the gateway operations as MCP tools through the rmcp framework.

pub mod service;

pub use service::GatewayService;
