//! Response assembly.
//!
//! Turns operation results into the records handed back to the MCP client.
//! Pure functions: field order follows the model declarations (and, for
//! query rows, the result-set column order), so output is reproducible.

use crate::error::{DbError, DbResult};
use crate::gateway::OperationOutput;
use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde_json::Value as JsonValue;

/// Structured record for an operation result.
pub fn to_record(output: &OperationOutput) -> DbResult<JsonValue> {
    serde_json::to_value(output)
        .map_err(|e| DbError::internal(format!("Failed to serialize response: {e}")))
}

/// Pretty-printed JSON text for an operation result.
pub fn to_json_text(output: &OperationOutput) -> DbResult<String> {
    serde_json::to_string_pretty(output)
        .map_err(|e| DbError::internal(format!("Failed to serialize response: {e}")))
}

/// Convert a dispatch result into an MCP tool result.
///
/// Failures become structured MCP errors carrying the error kind; they are
/// never reported as empty successes.
pub fn to_tool_result(result: DbResult<OperationOutput>) -> Result<CallToolResult, McpError> {
    let output = result.map_err(McpError::from)?;
    let text = to_json_text(&output).map_err(McpError::from)?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}
