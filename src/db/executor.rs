//! Query execution engine.
//!
//! Statements run as literal SQL over the simple-query protocol. Row limits
//! are enforced by streaming: at most `limit + 1` rows are pulled, the extra
//! row only telling us whether the result was cut short.

use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::QueryResponse;
use futures_util::StreamExt;
use sqlx::postgres::{PgConnection, PgRow};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

// Sent separately: the reset commands below cannot run in an aborted transaction
const ROLLBACK: &str = "ROLLBACK";

const RESET_SESSION: &str = "SET SESSION AUTHORIZATION DEFAULT; RESET ALL; CLOSE ALL; \
                             UNLISTEN *; SELECT pg_advisory_unlock_all(); DISCARD TEMP";

/// Rows pulled from a statement, bounded by the requested limit.
#[derive(Debug)]
pub struct BoundedRows {
    pub rows: Vec<PgRow>,
    /// More rows existed than the limit allowed
    pub has_more: bool,
}

/// Runs guarded statements under a deadline.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    statement_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(statement_timeout: Duration) -> Self {
        Self { statement_timeout }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Execute `sql` and pull at most `limit` rows.
    pub async fn fetch_bounded(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        limit: u32,
    ) -> DbResult<BoundedRows> {
        use sqlx::Executor;

        debug!(
            sql = %sql,
            limit,
            timeout_secs = self.statement_timeout.as_secs(),
            "Executing query"
        );

        let fetch_limit = limit as usize + 1;
        let rows_future = conn.fetch(sql).take(fetch_limit).collect::<Vec<_>>();

        let results = match timeout(self.statement_timeout, rows_future).await {
            Ok(results) => results,
            Err(_) => return Err(timeout_error("query execution", self.statement_timeout)),
        };

        let mut rows = collect_rows(results)?;
        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        Ok(BoundedRows { rows, has_more })
    }

    /// Return the session to its connect-time state after a user statement.
    ///
    /// Settings passed at connect time, such as the server-side statement
    /// timeout, are what `RESET ALL` restores. Prepared statements survive.
    pub async fn reset_session(&self, conn: &mut PgConnection) -> DbResult<()> {
        use sqlx::Executor;

        let reset = async {
            (&mut *conn).execute(ROLLBACK).await?;
            (&mut *conn).execute(RESET_SESSION).await?;
            Ok::<_, sqlx::Error>(())
        };

        match timeout(self.statement_timeout, reset).await {
            Ok(result) => result.map_err(DbError::from),
            Err(_) => Err(timeout_error("session reset", self.statement_timeout)),
        }
    }

    /// Run any database future under the statement deadline.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(operation, self.statement_timeout)),
        }
    }
}

/// Build the `execute_query` response.
///
/// `rewritten` means the guard appended the bound itself, in which case a
/// full page also counts as truncated: the database stopped at our LIMIT.
pub fn into_response(
    bounded: BoundedRows,
    limit: u32,
    rewritten: bool,
    executed_sql: String,
    start: Instant,
) -> QueryResponse {
    let row_count = bounded.rows.len();
    let truncated = bounded.has_more || (rewritten && row_count == limit as usize);

    let rows = bounded.rows.iter().map(RowToJson::to_json_map).collect();

    if truncated {
        warn!(row_count, limit, "Query result truncated");
    }
    debug!(
        row_count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Query finished"
    );

    QueryResponse {
        rows,
        row_count,
        truncated,
        executed_sql,
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}
