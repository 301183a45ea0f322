//! PostgreSQL adapter for the CR/JR audit.
//!
//! Renders [`QuerySpec`](crjr_audit_core::QuerySpec) values to read-only SQL
//! and executes them through a single-connection pool.

pub mod config;
pub mod source;
pub mod sql;

use sqlx::postgres::PgPoolOptions;

pub use config::DbConfig;
pub use source::RelationalDataSource;

pub type DbPool = sqlx::PgPool;

/// Create a lazily connected pool.
///
/// No connection is attempted until the first query, so an unreachable
/// server surfaces as a query-time connection error.
pub fn create_pool(config: &DbConfig) -> Result<DbPool, sqlx::Error> {
    let options = config.connect_options()?;
    Ok(PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .connect_lazy_with(options))
}
