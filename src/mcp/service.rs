//! MCP service implementation using rmcp.
//!
//! Each tool translates its arguments into a gateway [`Operation`] and hands
//! the outcome to the response assembler. No tool talks to the database
//! directly.

use crate::assembler;
use crate::gateway::{Gateway, Operation};
use crate::models::QueryRequest;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Input for the get_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetTablesInput {
    /// Schema to list. Omit to list every user schema.
    #[serde(default)]
    pub schema: Option<String>,
    /// Include views (and materialized views). Default: false
    #[serde(default)]
    pub include_views: bool,
}

/// Input for the get_table_schema tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetTableSchemaInput {
    /// Table or view name
    pub table_name: String,
    /// Schema containing the table. Default: "public"
    #[serde(default = "default_schema")]
    pub schema: String,
}

/// Input for the get_routines_and_functions tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetRoutinesInput {
    /// Schema to list. Omit to list every user schema.
    #[serde(default)]
    pub schema: Option<String>,
    /// Case-sensitive name filter. Plain text matches as a substring;
    /// `%` or `*` make it a wildcard pattern.
    #[serde(default)]
    pub function_name_pattern: Option<String>,
}

/// Input for the execute_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// Literal SQL text. Parameters are not supported.
    pub query: String,
    /// Maximum rows to return. Default: 1000, capped by the server's --max-rows
    #[serde(default)]
    pub limit: Option<u32>,
}

fn default_schema() -> String {
    crate::db::introspect::DEFAULT_SCHEMA.to_string()
}

#[derive(Clone)]
pub struct GatewayService {
    gateway: Arc<Gateway>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            tool_router: Self::tool_router(),
        }
    }

    async fn call(&self, operation: Operation) -> Result<CallToolResult, McpError> {
        assembler::to_tool_result(self.gateway.dispatch(operation).await)
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "List tables in the database with column counts, primary key columns and size.\nOmit `schema` to list every user schema. Set `include_views` to also list views."
    )]
    async fn get_tables(
        &self,
        Parameters(input): Parameters<GetTablesInput>,
    ) -> Result<CallToolResult, McpError> {
        self.call(Operation::GetTables {
            schema: input.schema,
            include_views: input.include_views,
        })
        .await
    }

    #[tool(
        description = "Describe one table: columns in declaration order, constraints (primary key, foreign keys, unique, check) and indexes.\nFails with not_found if the table does not exist in the schema."
    )]
    async fn get_table_schema(
        &self,
        Parameters(input): Parameters<GetTableSchemaInput>,
    ) -> Result<CallToolResult, McpError> {
        self.call(Operation::GetTableSchema {
            table_name: input.table_name,
            schema: Some(input.schema),
        })
        .await
    }

    #[tool(
        description = "List stored functions, procedures, aggregates and window functions with their arguments, return type, language and definition."
    )]
    async fn get_routines_and_functions(
        &self,
        Parameters(input): Parameters<GetRoutinesInput>,
    ) -> Result<CallToolResult, McpError> {
        self.call(Operation::GetRoutines {
            schema: input.schema,
            name_pattern: input.function_name_pattern,
        })
        .await
    }

    #[tool(
        description = "Summarize the whole database schema: every table and view with its columns and constraints, every routine, and aggregate counts.\nExpensive on large schemas; always computed fresh."
    )]
    async fn get_database_schema_summary(&self) -> Result<CallToolResult, McpError> {
        self.call(Operation::GetDatabaseSchemaSummary).await
    }

    #[tool(
        description = "Execute a read-only SQL statement and return its rows.\nDROP, DELETE, UPDATE, TRUNCATE, ALTER, INSERT, GRANT, REVOKE and CREATE are rejected.\nSELECT statements without a LIMIT get `LIMIT <limit>` appended; the response reports `executed_sql` and whether rows were `truncated`."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let mut request = QueryRequest::new(input.query);
        if let Some(limit) = input.limit {
            request = request.with_limit(limit);
        }
        self.call(Operation::ExecuteQuery(request)).await
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "pg-mcp-gateway".to_owned(),
                title: Some("PostgreSQL MCP Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Read-oriented access to one PostgreSQL database.\n\
                \n\
                ## Workflow\n\
                1. Call `get_database_schema_summary` (small schemas) or `get_tables` to see what exists\n\
                2. Call `get_table_schema` for the tables you need\n\
                3. Write SQL yourself and run it with `execute_query`\n\
                \n\
                ## Query rules\n\
                - Mutating statements are rejected before reaching the database\n\
                - Results are capped at {} rows; pass `limit` to ask for fewer\n\
                - Only literal SQL is accepted, no bind parameters",
                self.gateway.guard().max_rows()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewaySettings, PoolSettings};
    use crate::db::connector::PgConnector;
    use crate::models::ConnectionSettings;

    fn create_test_service() -> GatewayService {
        let settings = ConnectionSettings::from_url("postgres://u:p@127.0.0.1:1/app").unwrap();
        let gateway = Gateway::new(
            PgConnector::new(&settings).unwrap(),
            PoolSettings::default(),
            GatewaySettings::default(),
        );
        GatewayService::new(Arc::new(gateway))
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "pg-mcp-gateway");
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("10000 rows"));
    }

    #[test]
    fn test_all_tools_registered() {
        let service = create_test_service();
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "execute_query",
                "get_database_schema_summary",
                "get_routines_and_functions",
                "get_table_schema",
                "get_tables",
            ]
        );
    }

    #[test]
    fn test_table_schema_input_defaults_to_public() {
        let input: GetTableSchemaInput =
            serde_json::from_value(serde_json::json!({ "table_name": "orders" })).unwrap();
        assert_eq!(input.schema, "public");
    }

    #[test]
    fn test_get_tables_input_defaults() {
        let input: GetTablesInput = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(input.schema.is_none());
        assert!(!input.include_views);
    }

    #[tokio::test]
    async fn test_rejected_query_is_invalid_params() {
        let service = create_test_service();
        let err = service
            .execute_query(Parameters(ExecuteQueryInput {
                query: "DELETE FROM users".to_string(),
                limit: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("destructive"));
    }
}
