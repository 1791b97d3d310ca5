//! Stdio transport for the MCP server.

use crate::error::{DbError, DbResult};
use crate::gateway::Gateway;
use crate::mcp::GatewayService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// Reads JSON-RPC messages from stdin and writes responses to stdout.
pub struct StdioTransport {
    gateway: Arc<Gateway>,
}

impl StdioTransport {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = GatewayService::new(self.gateway.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {e}")))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "Stdio transport error");
                    self.gateway.shutdown().await;
                    return Err(DbError::internal(format!("Stdio transport error: {e}")));
                }
                info!("Client disconnected");
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Shutting down connection pool");
        self.gateway.shutdown().await;

        if shutdown_requested {
            // stdin reads block and cannot be interrupted by select!
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewaySettings, PoolSettings};
    use crate::db::PgConnector;
    use crate::models::ConnectionSettings;

    #[test]
    fn test_stdio_transport_creation() {
        let settings = ConnectionSettings::from_url("postgres://localhost/app").unwrap();
        let gateway = Gateway::new(
            PgConnector::new(&settings).unwrap(),
            PoolSettings::default(),
            GatewaySettings::default(),
        );
        let transport = StdioTransport::new(Arc::new(gateway));
        assert_eq!(transport.name(), "stdio");
    }
}
