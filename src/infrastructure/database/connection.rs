use crate::domain::errors::DomainError;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

/// SQLite connection pool manager. WAL mode keeps the driver agent's
/// frequent equipment-config writes from blocking reservation/override
/// reads from the coordinator's RPC handlers.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self, DomainError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DomainError::Configuration(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Apply all pending migrations from `./migrations`. Safe to call on
    /// every startup; only new migrations run.
    pub async fn migrate(&self) -> Result<(), DomainError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::Configuration(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_pool_creation() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create database connection");
        assert!(!db.pool().is_closed());
        db.close().await;
    }

    #[tokio::test]
    async fn migration_runs_successfully() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create database connection");
        db.migrate().await.expect("failed to run migrations");

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='equipment_config'",
        )
        .fetch_one(db.pool())
        .await
        .expect("failed to query table");

        assert_eq!(result.0, 1, "equipment_config table should exist");
        db.close().await;
    }

    #[tokio::test]
    async fn foreign_keys_enabled() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create database connection");
        db.migrate().await.expect("failed to run migrations");

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("failed to check foreign_keys pragma");

        assert_eq!(result.0, 1, "foreign keys should be enabled");
        db.close().await;
    }
}
