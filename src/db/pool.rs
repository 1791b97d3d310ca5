//! Connection pool management.
//!
//! A bounded set of live connections with lazy one-time initialization,
//! RAII release and graceful shutdown. The pool is generic over a
//! [`Connector`] so the acquire/release contract can be exercised without
//! a database.
//!
//! Invariants:
//! - at most `max_connections` connections are lent out at any time
//!   (enforced by a semaphore whose permit travels with the guard);
//! - every [`PooledConnection`] gives its connection back exactly once,
//!   either to the idle set or to the connector for closing;
//! - once shut down, the pool never lends or keeps a connection again.

use crate::config::PoolSettings;
use crate::db::connector::Connector;
use crate::error::{DbError, DbResult};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEREF_ERR: &str = "pooled connection already returned";

/// Lifecycle state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolState {
    Uninitialized,
    Ready,
    Closed,
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub state: PoolState,
    pub idle: usize,
    pub in_use: usize,
    pub max_connections: u32,
}

struct PoolInner<C: Connector> {
    connector: C,
    settings: PoolSettings,
    /// One permit per connection that may be lent out
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<C::Connection>>,
    initialized: OnceCell<()>,
    closed: AtomicBool,
    in_use: AtomicUsize,
}

impl<C: Connector> PoolInner<C> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<C::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self) -> DbResult<C::Connection> {
        match timeout(self.settings.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::connection(
                format!(
                    "Timed out after {}s opening a connection",
                    self.settings.connect_timeout.as_secs()
                ),
                "Check that the database host is reachable",
            )),
        }
    }

    /// Open the configured minimum. All-or-nothing: on failure the
    /// connections opened so far are closed again.
    async fn open_minimum(&self) -> DbResult<()> {
        let mut opened = Vec::with_capacity(self.settings.min_connections as usize);
        for _ in 0..self.settings.min_connections {
            match self.open().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    for conn in opened {
                        self.connector.close(conn).await;
                    }
                    return Err(e);
                }
            }
        }

        let count = opened.len();
        let leftover = {
            let mut idle = self.idle();
            if self.closed.load(Ordering::SeqCst) {
                Some(opened)
            } else {
                idle.extend(opened);
                None
            }
        };
        if let Some(conns) = leftover {
            for conn in conns {
                self.connector.close(conn).await;
            }
            return Err(DbError::PoolClosed);
        }

        info!(
            connections = count,
            max_connections = self.settings.max_connections,
            "Connection pool initialized"
        );
        Ok(())
    }

    /// Put a connection back, or close it if the pool has shut down meanwhile.
    fn give_back(self: &Arc<Self>, conn: C::Connection) {
        let rejected = {
            let mut idle = self.idle();
            if self.closed.load(Ordering::SeqCst) {
                Some(conn)
            } else {
                idle.push_back(conn);
                None
            }
        };
        if let Some(conn) = rejected {
            self.close_detached(conn);
        }
    }

    /// Close a connection without blocking the caller.
    fn close_detached(self: &Arc<Self>, conn: C::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.connector.close(conn).await });
            }
            Err(_) => {
                warn!("No async runtime available, dropping connection without close");
            }
        }
    }
}

/// Bounded connection pool. Cheap to clone; clones share the same connections.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an uninitialized pool. No connection is opened yet.
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                settings,
                permits: Arc::new(Semaphore::new(settings.max_connections as usize)),
                idle: Mutex::new(VecDeque::new()),
                initialized: OnceCell::new(),
                closed: AtomicBool::new(false),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Open the minimum set of connections.
    ///
    /// Idempotent: the first caller connects, concurrent callers wait for it,
    /// later callers return immediately. A failed attempt leaves the pool
    /// uninitialized so the next call retries.
    pub async fn initialize(&self) -> DbResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::PoolClosed);
        }
        self.inner
            .initialized
            .get_or_try_init(|| self.inner.open_minimum())
            .await?;
        Ok(())
    }

    /// Borrow a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> DbResult<PooledConnection<C>> {
        self.initialize().await?;

        let settings = &self.inner.settings;
        let permit = match timeout(
            settings.acquire_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore is only closed by shutdown()
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                warn!(
                    max_connections = settings.max_connections,
                    waited_secs = settings.acquire_timeout.as_secs(),
                    "Connection pool exhausted"
                );
                return Err(DbError::pool_exhausted(
                    settings.acquire_timeout.as_secs(),
                    settings.max_connections,
                ));
            }
        };

        let reused = self.inner.idle().pop_front();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!("No idle connection, opening a new one");
                // The permit is released if this fails
                self.inner.open().await?
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Close every idle connection and refuse further acquisitions.
    ///
    /// Connections still lent out are closed when their guards drop.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut idle = self.inner.idle();
            self.inner.closed.store(true, Ordering::SeqCst);
            idle.drain(..).collect()
        };
        self.inner.permits.close();

        let count = drained.len();
        for conn in drained {
            self.inner.connector.close(conn).await;
        }
        info!(
            closed = count,
            in_use = self.inner.in_use.load(Ordering::SeqCst),
            "Connection pool shut down"
        );
    }

    pub fn state(&self) -> PoolState {
        if self.inner.closed.load(Ordering::SeqCst) {
            PoolState::Closed
        } else if self.inner.initialized.initialized() {
            PoolState::Ready
        } else {
            PoolState::Uninitialized
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            state: self.state(),
            idle: self.inner.idle().len(),
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            max_connections: self.inner.settings.max_connections,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }
}

/// A connection on loan from the pool.
///
/// Dropping the guard returns the connection. Use [`PooledConnection::discard`]
/// for a connection that can no longer be trusted.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    // Dropped after `Drop::drop` has put the connection back
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<C: Connector> PooledConnection<C> {
    /// Return the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Close the connection instead of returning it. The freed slot is
    /// refilled lazily by a later `acquire()`.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            warn!("Discarding pooled connection");
            self.pool.close_detached(conn);
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(DEREF_ERR)
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(DEREF_ERR)
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.give_back(conn);
        }
    }
}
