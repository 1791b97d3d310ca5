//! PostgreSQL MCP Gateway - Main entry point.

use pg_mcp_gateway::config::{Config, TransportMode};
use pg_mcp_gateway::db::PgConnector;
use pg_mcp_gateway::gateway::Gateway;
use pg_mcp_gateway::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    let settings = config.connection_settings()?;
    let pool_settings = config.pool_settings()?;
    let gateway_settings = config.gateway_settings()?;

    let connector =
        PgConnector::new(&settings)?.with_statement_timeout(gateway_settings.statement_timeout);

    if config.check {
        info!(database = %settings.masked_connection_string(), "Checking database connection");
        let report = connector.check().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        transport = %config.transport,
        guard = %gateway_settings.guard_mode,
        max_rows = gateway_settings.max_rows,
        "Starting PostgreSQL MCP Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let gateway = Arc::new(Gateway::new(connector, pool_settings, gateway_settings));

    // The server never accepts requests against a pool that failed to open
    if let Err(e) = gateway.initialize().await {
        error!(
            database = %settings.masked_connection_string(),
            error = %e,
            "Failed to initialize connection pool"
        );
        return Err(e.into());
    }
    info!(
        database = %settings.masked_connection_string(),
        min_connections = pool_settings.min_connections,
        max_connections = pool_settings.max_connections,
        "Connection pool ready"
    );

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(gateway).run().await,
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                gateway,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
