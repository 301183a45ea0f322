use async_trait::async_trait;
use serde_json::Value;

use crjr_audit_core::source::{DataSource, QuerySpec, SourceKind};
use crjr_audit_core::types::Record;
use crjr_audit_core::SourceError;

use crate::sql::{render, SqlStatement};
use crate::DbPool;

/// SQLSTATE classes that mean the server itself is unusable: connection
/// exceptions, authorization failures, unknown database, operator shutdown.
const CONNECTION_SQLSTATE_PREFIXES: &[&str] = &["08", "28", "3D", "57P"];

/// Read-only [`DataSource`] over a PostgreSQL pool.
pub struct RelationalDataSource {
    pool: DbPool,
}

impl RelationalDataSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn statement(query: &QuerySpec) -> Result<SqlStatement, SourceError> {
        let stmt = render(query).map_err(|e| SourceError::Query(e.to_string()))?;
        tracing::debug!(sql = %stmt.sql, binds = ?stmt.binds, "Executing audit query");
        Ok(stmt)
    }
}

#[async_trait]
impl DataSource for RelationalDataSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Relational
    }

    async fn fetch_scalar(&self, query: &QuerySpec) -> Result<Value, SourceError> {
        let stmt = Self::statement(query)?;
        let mut q = sqlx::query_scalar::<_, Option<Value>>(&stmt.sql);
        for bind in &stmt.binds {
            q = q.bind(bind.as_str());
        }
        let value = q.fetch_optional(&self.pool).await.map_err(classify)?;
        Ok(value.flatten().unwrap_or(Value::Null))
    }

    async fn fetch_rows(&self, query: &QuerySpec) -> Result<Vec<Record>, SourceError> {
        let stmt = Self::statement(query)?;
        let mut q = sqlx::query_scalar::<_, Value>(&stmt.sql);
        for bind in &stmt.binds {
            q = q.bind(bind.as_str());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(classify)?;
        rows.into_iter()
            .map(|row| match row {
                Value::Object(record) => Ok(record),
                other => Err(SourceError::Query(format!(
                    "expected a record, got {other}"
                ))),
            })
            .collect()
    }

    async fn fetch_json(
        &self,
        endpoint: &str,
        _params: &[(String, String)],
    ) -> Result<Value, SourceError> {
        Err(SourceError::Query(format!(
            "relational source cannot fetch endpoint {endpoint}"
        )))
    }
}

/// Map a sqlx error onto the audit error taxonomy.
pub fn classify(err: sqlx::Error) -> SourceError {
    let connection = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            CONNECTION_SQLSTATE_PREFIXES
                .iter()
                .any(|prefix| code.starts_with(*prefix))
        }),
        _ => false,
    };
    if connection {
        SourceError::Connection(err.to_string())
    } else {
        SourceError::Query(err.to_string())
    }
}
