use crate::domain::errors::DomainError;
use crate::domain::ports::ConfigStore;
use async_trait::async_trait;
use sqlx::SqlitePool;

const RESERVATION_STATE_KEY: &str = "_reservation_state";
const OVERRIDE_STATE_KEY: &str = "_override_state";

/// `ConfigStore` backed by the `equipment_config` / `platform_state`
/// tables. Reservation and override state are single rows, replaced
/// wholesale on every save rather than diffed.
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>, DomainError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value_json FROM platform_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_state(&self, key: &str, raw: &str) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO platform_state (key, value_json, updated_at) \
             VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get_device_config(&self, device_id: &str) -> Result<Option<String>, DomainError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT config_json FROM equipment_config WHERE device_id = ?")
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_device_config(&self, device_id: &str, raw: &str) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO equipment_config (device_id, config_json, updated_at) \
             VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
             ON CONFLICT(device_id) DO UPDATE SET config_json = excluded.config_json, updated_at = excluded.updated_at",
        )
        .bind(device_id)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_device_config(&self, device_id: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM equipment_config WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_device_ids(&self) -> Result<Vec<String>, DomainError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT device_id FROM equipment_config ORDER BY device_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_reservation_state(&self) -> Result<Option<String>, DomainError> {
        self.get_state(RESERVATION_STATE_KEY).await
    }

    async fn set_reservation_state(&self, raw: &str) -> Result<(), DomainError> {
        self.set_state(RESERVATION_STATE_KEY, raw).await
    }

    async fn get_override_state(&self) -> Result<Option<String>, DomainError> {
        self.get_state(OVERRIDE_STATE_KEY).await
    }

    async fn set_override_state(&self, raw: &str) -> Result<(), DomainError> {
        self.set_state(OVERRIDE_STATE_KEY, raw).await
    }
}
