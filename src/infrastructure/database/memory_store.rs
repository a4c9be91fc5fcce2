//! Pure in-memory `ConfigStore`, for exercising the Reservation/Override
//! Manager and Coordinator without pulling in `sqlx` (§10.5).

use crate::domain::errors::DomainError;
use crate::domain::ports::ConfigStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    devices: HashMap<String, String>,
    reservation_state: Option<String>,
    override_state: Option<String>,
}

#[derive(Default)]
pub struct MemoryConfigStore {
    state: Mutex<State>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_device_config(&self, device_id: &str) -> Result<Option<String>, DomainError> {
        Ok(self.state.lock().unwrap().devices.get(device_id).cloned())
    }

    async fn set_device_config(&self, device_id: &str, raw: &str) -> Result<(), DomainError> {
        self.state.lock().unwrap().devices.insert(device_id.to_string(), raw.to_string());
        Ok(())
    }

    async fn delete_device_config(&self, device_id: &str) -> Result<(), DomainError> {
        self.state.lock().unwrap().devices.remove(device_id);
        Ok(())
    }

    async fn list_device_ids(&self) -> Result<Vec<String>, DomainError> {
        let mut ids: Vec<String> = self.state.lock().unwrap().devices.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_reservation_state(&self) -> Result<Option<String>, DomainError> {
        Ok(self.state.lock().unwrap().reservation_state.clone())
    }

    async fn set_reservation_state(&self, raw: &str) -> Result<(), DomainError> {
        self.state.lock().unwrap().reservation_state = Some(raw.to_string());
        Ok(())
    }

    async fn get_override_state(&self) -> Result<Option<String>, DomainError> {
        Ok(self.state.lock().unwrap().override_state.clone())
    }

    async fn set_override_state(&self, raw: &str) -> Result<(), DomainError> {
        self.state.lock().unwrap().override_state = Some(raw.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_config_round_trips() {
        let store = MemoryConfigStore::new();
        assert!(store.get_device_config("d1").await.unwrap().is_none());
        store.set_device_config("d1", "{}").await.unwrap();
        assert_eq!(store.get_device_config("d1").await.unwrap(), Some("{}".to_string()));
        store.delete_device_config("d1").await.unwrap();
        assert!(store.get_device_config("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reservation_state_round_trips() {
        let store = MemoryConfigStore::new();
        assert!(store.get_reservation_state().await.unwrap().is_none());
        store.set_reservation_state("[]").await.unwrap();
        assert_eq!(store.get_reservation_state().await.unwrap(), Some("[]".to_string()));
    }
}
