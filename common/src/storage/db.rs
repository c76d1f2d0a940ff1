use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::AppError;

/// Shared Postgres handle. The pool is owned here; nothing outside
/// `common::storage` issues SQL.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: PgPool,
}

impl PostgresClient {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations. Safe to call on every startup.
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    /// Cheap liveness probe used by the readiness endpoint.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// True when the error is a Postgres unique-constraint violation, which the
/// idempotent insert paths resolve by looking up the existing row.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
