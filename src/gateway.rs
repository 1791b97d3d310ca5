//! The gateway context: one pool, one guard, five operations.
//!
//! Constructed once by the entry point and shared by every request handler.
//! Operations form a closed set dispatched through a single match.

use crate::config::{GatewaySettings, PoolSettings};
use crate::db::connector::PgConnector;
use crate::db::executor::{QueryExecutor, into_response};
use crate::db::introspect;
use crate::db::pool::{ConnectionPool, PoolState, PoolStats};
use crate::error::{DbError, DbResult};
use crate::guard::{AllowedQuery, QueryGuard};
use crate::models::{
    QueryRequest, QueryResponse, RoutineDescriptor, SchemaSummary, TableDescriptor, TableDetail,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One request from the tool-invocation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetTables {
        schema: Option<String>,
        include_views: bool,
    },
    GetTableSchema {
        table_name: String,
        schema: Option<String>,
    },
    GetRoutines {
        schema: Option<String>,
        name_pattern: Option<String>,
    },
    GetDatabaseSchemaSummary,
    ExecuteQuery(QueryRequest),
}

impl Operation {
    /// Tool name as exposed over MCP.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetTables { .. } => "get_tables",
            Self::GetTableSchema { .. } => "get_table_schema",
            Self::GetRoutines { .. } => "get_routines_and_functions",
            Self::GetDatabaseSchemaSummary => "get_database_schema_summary",
            Self::ExecuteQuery(_) => "execute_query",
        }
    }
}

/// Result of an [`Operation`], one variant per operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    Tables(Vec<TableDescriptor>),
    TableDetail(TableDetail),
    Routines(Vec<RoutineDescriptor>),
    Summary(SchemaSummary),
    Query(QueryResponse),
}

/// Validated work for a spawned task. Rejected queries never become a job.
enum Job {
    Tables {
        schema: Option<String>,
        include_views: bool,
    },
    TableSchema {
        table_name: String,
        schema: Option<String>,
    },
    Routines {
        schema: Option<String>,
        name_pattern: Option<String>,
    },
    Summary,
    Query(AllowedQuery),
}

pub struct Gateway {
    pool: ConnectionPool<PgConnector>,
    guard: QueryGuard,
    executor: QueryExecutor,
}

impl Gateway {
    pub fn new(connector: PgConnector, pool: PoolSettings, settings: GatewaySettings) -> Self {
        Self {
            pool: ConnectionPool::new(connector, pool),
            guard: QueryGuard::new(settings.max_rows, settings.guard_mode),
            executor: QueryExecutor::new(settings.statement_timeout),
        }
    }

    /// Open the pool. Must succeed before any operation is accepted.
    pub async fn initialize(&self) -> DbResult<()> {
        self.pool.initialize().await
    }

    /// Close the pool. Later operations fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn guard(&self) -> &QueryGuard {
        &self.guard
    }

    /// Run one operation to completion.
    ///
    /// The database work runs in its own task that owns the pooled
    /// connection. If the caller goes away, the statement still finishes
    /// and the connection is still returned.
    pub async fn dispatch(&self, operation: Operation) -> DbResult<OperationOutput> {
        let name = operation.name();
        let start = Instant::now();
        debug!(operation = name, "Dispatching operation");

        let job = self.plan(operation)?;
        let pool = self.pool.clone();
        let executor = self.executor;

        let result = tokio::spawn(run_job(pool, executor, job))
            .await
            .map_err(|e| DbError::internal(format!("{name} task failed: {e}")))?;

        match &result {
            Ok(_) => info!(
                operation = name,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Operation completed"
            ),
            Err(e) => warn!(operation = name, kind = e.kind(), error = %e, "Operation failed"),
        }
        result
    }

    /// Validate inputs and apply the guard. Nothing here touches the pool.
    fn plan(&self, operation: Operation) -> DbResult<Job> {
        let job = match operation {
            Operation::GetTables {
                schema,
                include_views,
            } => Job::Tables {
                schema: non_empty(schema),
                include_views,
            },
            Operation::GetTableSchema { table_name, schema } => {
                if table_name.trim().is_empty() {
                    return Err(DbError::invalid_input("table_name must not be empty"));
                }
                Job::TableSchema {
                    table_name,
                    schema: non_empty(schema),
                }
            }
            Operation::GetRoutines {
                schema,
                name_pattern,
            } => Job::Routines {
                schema: non_empty(schema),
                name_pattern: non_empty(name_pattern),
            },
            Operation::GetDatabaseSchemaSummary => Job::Summary,
            Operation::ExecuteQuery(request) => {
                Job::Query(self.guard.classify(&request).into_result()?)
            }
        };
        Ok(job)
    }
}

// Blank filters mean no filter; anything else passes through untouched
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn run_job(
    pool: ConnectionPool<PgConnector>,
    executor: QueryExecutor,
    job: Job,
) -> DbResult<OperationOutput> {
    let mut conn = pool.acquire().await?;

    let (result, object) = match job {
        Job::Tables {
            schema,
            include_views,
        } => {
            let object = schema.clone().unwrap_or_else(|| "tables".to_string());
            let result = executor
                .run(
                    "get_tables",
                    introspect::list_tables(&mut conn, schema.as_deref(), include_views),
                )
                .await
                .map(OperationOutput::Tables);
            (result, Some(object))
        }
        Job::TableSchema { table_name, schema } => {
            let object = format!(
                "{}.{}",
                schema.as_deref().unwrap_or(introspect::DEFAULT_SCHEMA),
                table_name
            );
            let result = executor
                .run(
                    "get_table_schema",
                    introspect::describe_table(&mut conn, &table_name, schema.as_deref()),
                )
                .await
                .map(OperationOutput::TableDetail);
            (result, Some(object))
        }
        Job::Routines {
            schema,
            name_pattern,
        } => {
            let result = executor
                .run(
                    "get_routines_and_functions",
                    introspect::list_routines(
                        &mut conn,
                        schema.as_deref(),
                        name_pattern.as_deref(),
                    ),
                )
                .await
                .map(OperationOutput::Routines);
            (result, Some("routines".to_string()))
        }
        Job::Summary => {
            let result = executor
                .run("get_database_schema_summary", introspect::summarize(&mut conn))
                .await
                .map(OperationOutput::Summary);
            (result, Some("schema summary".to_string()))
        }
        Job::Query(allowed) => {
            let start = Instant::now();
            let result = executor
                .fetch_bounded(&mut conn, &allowed.sql, allowed.limit)
                .await
                .map(|rows| {
                    OperationOutput::Query(into_response(
                        rows,
                        allowed.limit,
                        allowed.rewritten,
                        allowed.sql,
                        start,
                    ))
                });
            (result, None)
        }
    };

    let reusable = match &result {
        Err(e) if e.poisons_connection() => false,
        // A user statement may leave a transaction open or settings changed
        _ if object.is_none() => match executor.reset_session(&mut conn).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Session reset failed, discarding connection");
                false
            }
        },
        _ => true,
    };
    if reusable {
        conn.release();
    } else {
        conn.discard();
    }

    match (result, object) {
        (Err(e), Some(object)) => Err(e.into_introspection(&object)),
        (result, _) => result,
    }
}
