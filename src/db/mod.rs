//! Database layer.
//!
//! - Connection establishment and the bounded connection pool
//! - Bounded statement execution
//! - Catalog introspection
//! - Row to JSON conversion

pub mod connector;
pub mod executor;
pub mod introspect;
pub mod pool;
pub mod types;

pub use connector::{Connector, PgConnector};
pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolState, PoolStats, PooledConnection};
