//! Override Manager: timed write-blocks over Equipment Tree sub-trees
//! (§4.E). Tracks active overrides and their expiry; the failsafe/
//! staggered revert orchestration itself lives in the Coordinator, which
//! is the only service that holds both the Equipment Tree and the Driver
//! Agents an override revert needs to write through.
//!
//! Globs use `glob-match` semantics: `*` stays within one `/`-separated
//! segment, so covering every device and point under a building or
//! campus requires `**`, not `*` (see [`OverridePattern`]).

use crate::domain::errors::DomainError;
use crate::domain::models::override_pattern::OverridePattern;
use crate::domain::ports::ConfigStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One active override: the write-block pattern plus whether expiry
/// should restore each covered point to its driver default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub pattern: OverridePattern,
    pub failsafe_revert: bool,
}

pub struct OverrideManager {
    entries: RwLock<HashMap<String, OverrideEntry>>,
    config_store: Arc<dyn ConfigStore>,
}

impl OverrideManager {
    pub fn new(config_store: Arc<dyn ConfigStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config_store,
        }
    }

    /// Set or replace the override covering `glob`. `duration_secs` of
    /// `None` means the override never expires on its own.
    pub async fn set_override(
        &self,
        glob: impl Into<String>,
        duration_secs: Option<f64>,
        failsafe_revert: bool,
        staggered_revert: bool,
        now: DateTime<Utc>,
    ) {
        let glob = glob.into();
        let end_time = duration_secs.map(|secs| now + Duration::milliseconds((secs * 1000.0).round() as i64));
        let entry = OverrideEntry {
            pattern: OverridePattern::new(glob.clone(), end_time, staggered_revert),
            failsafe_revert,
        };
        self.entries.write().await.insert(glob, entry);
        self.persist().await;
    }

    pub async fn clear_override(&self, glob: &str) -> bool {
        let removed = self.entries.write().await.remove(glob).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    pub async fn list_overrides(&self) -> Vec<OverrideEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// The (first, by insertion order is not guaranteed) active override
    /// blocking writes to `identifier`, if any.
    pub async fn matches(&self, identifier: &str, now: DateTime<Utc>) -> Option<OverrideEntry> {
        self.entries
            .read()
            .await
            .values()
            .find(|entry| !entry.pattern.expired(now) && entry.pattern.matches(identifier))
            .cloned()
    }

    pub async fn raise_on_override(&self, identifier: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.matches(identifier, now).await.is_some() {
            return Err(DomainError::Override { pattern: identifier.to_string() });
        }
        Ok(())
    }

    /// Remove every override whose `end_time` has passed, returning the
    /// removed entries so the caller can drive whatever failsafe revert
    /// each one asked for.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<OverrideEntry> {
        let mut entries = self.entries.write().await;
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.pattern.expired(now))
            .map(|(glob, _)| glob.clone())
            .collect();
        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = entries.remove(&key) {
                expired.push(entry);
            }
        }
        drop(entries);
        if !expired.is_empty() {
            self.persist().await;
        }
        expired
    }

    async fn persist(&self) {
        let entries: Vec<OverrideEntry> = self.entries.read().await.values().cloned().collect();
        let Ok(json) = serde_json::to_vec(&entries) else { return };
        let encoded = STANDARD.encode(json);
        let _ = self.config_store.set_override_state(&encoded).await;
    }

    /// Restore overrides from `_override_state` on startup (§3 persisted
    /// state shapes).
    pub async fn load_state(&self) -> Result<(), DomainError> {
        let Some(encoded) = self.config_store.get_override_state().await? else {
            return Ok(());
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| DomainError::Configuration(format!("corrupt override state: {err}")))?;
        let entries: Vec<OverrideEntry> = serde_json::from_slice(&bytes)?;
        let mut guard = self.entries.write().await;
        *guard = entries.into_iter().map(|e| (e.pattern.glob.clone(), e)).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::MemoryConfigStore;

    #[tokio::test]
    async fn set_override_blocks_matching_identifiers() {
        let mgr = OverrideManager::new(Arc::new(MemoryConfigStore::new()));
        let now = Utc::now();
        mgr.set_override("devices/building1/**", None, true, false, now).await;

        assert!(mgr.matches("devices/building1/ahu1/temp", now).await.is_some());
        assert!(mgr.matches("devices/building2/ahu1/temp", now).await.is_none());
    }

    #[tokio::test]
    async fn sweep_expired_removes_past_due_overrides() {
        let mgr = OverrideManager::new(Arc::new(MemoryConfigStore::new()));
        let now = Utc::now();
        mgr.set_override("devices/*", Some(1.0), true, false, now).await;

        let later = now + Duration::seconds(2);
        let expired = mgr.sweep_expired(later).await;
        assert_eq!(expired.len(), 1);
        assert!(mgr.list_overrides().await.is_empty());
    }

    #[tokio::test]
    async fn clear_override_removes_by_glob() {
        let mgr = OverrideManager::new(Arc::new(MemoryConfigStore::new()));
        let now = Utc::now();
        mgr.set_override("devices/*", None, false, false, now).await;
        assert!(mgr.clear_override("devices/*").await);
        assert!(!mgr.clear_override("devices/*").await);
    }

    #[tokio::test]
    async fn override_state_round_trips_through_config_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let now = Utc::now();
        let mgr = OverrideManager::new(store.clone());
        mgr.set_override("devices/*", None, true, true, now).await;

        let reloaded = OverrideManager::new(store);
        reloaded.load_state().await.unwrap();
        let overrides = reloaded.list_overrides().await;
        assert_eq!(overrides.len(), 1);
        assert!(overrides[0].failsafe_revert);
    }
}
