use crate::domain::errors::DomainError;
use async_trait::async_trait;

/// Persistence port for everything the coordinator needs surviving a
/// restart: per-device equipment configuration plus the two singleton
/// state blobs (§6 — `_reservation_state`, `_override_state`).
///
/// Values cross this boundary as already-serialized strings; callers own
/// the choice of JSON encoding so that `ConfigStore` implementations stay
/// format-agnostic.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_device_config(&self, device_id: &str) -> Result<Option<String>, DomainError>;

    async fn set_device_config(&self, device_id: &str, raw: &str) -> Result<(), DomainError>;

    async fn delete_device_config(&self, device_id: &str) -> Result<(), DomainError>;

    async fn list_device_ids(&self) -> Result<Vec<String>, DomainError>;

    async fn get_reservation_state(&self) -> Result<Option<String>, DomainError>;

    async fn set_reservation_state(&self, raw: &str) -> Result<(), DomainError>;

    async fn get_override_state(&self) -> Result<Option<String>, DomainError>;

    async fn set_override_state(&self, raw: &str) -> Result<(), DomainError>;
}
