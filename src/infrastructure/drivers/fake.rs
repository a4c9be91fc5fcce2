//! In-memory `DriverInterface` used by tests and local demos. Stands in
//! for a real wire-protocol adapter (out of scope, spec §1): every point
//! lives in a map, writes apply immediately unless the test has asked a
//! point to ignore writes or fail outright.

use crate::domain::errors::DomainError;
use crate::domain::models::{ErrorInfo, PointMetaData, PointValue};
use crate::domain::ports::driver_interface::PointReading;
use crate::domain::ports::DriverInterface;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    values: HashMap<String, PointValue>,
    defaults: HashMap<String, PointValue>,
    failing_points: HashSet<String>,
    ignore_writes: HashSet<String>,
}

/// A fake remote. Construct one per `unique_remote_id`, seed point
/// values/defaults, then register it directly with a `DriverAgent` in
/// tests (no `DriverRegistry` factory needed unless the test exercises
/// registry lookup itself).
pub struct FakeDriverInterface {
    remote_id: String,
    state: Mutex<State>,
    remote_down: AtomicBool,
}

impl FakeDriverInterface {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            state: Mutex::new(State::default()),
            remote_down: AtomicBool::new(false),
        }
    }

    pub fn seed(&self, point_id: impl Into<String>, value: PointValue) {
        self.state.lock().unwrap().values.insert(point_id.into(), value);
    }

    pub fn set_default(&self, point_id: impl Into<String>, value: PointValue) {
        self.state.lock().unwrap().defaults.insert(point_id.into(), value);
    }

    /// Make a single point fail with a `Remote` error on get/set, without
    /// affecting the rest of the batch.
    pub fn fail_point(&self, point_id: impl Into<String>) {
        self.state.lock().unwrap().failing_points.insert(point_id.into());
    }

    /// Make a point silently refuse writes (the underlying value never
    /// changes), for exercising `set(..., confirm=true)` mismatch paths.
    pub fn ignore_writes(&self, point_id: impl Into<String>) {
        self.state.lock().unwrap().ignore_writes.insert(point_id.into());
    }

    /// Simulate the whole remote being unreachable: every call returns a
    /// `Transport` error until cleared.
    pub fn set_remote_down(&self, down: bool) {
        self.remote_down.store(down, Ordering::SeqCst);
    }

    fn check_remote_up(&self) -> Result<(), DomainError> {
        if self.remote_down.load(Ordering::SeqCst) {
            Err(DomainError::Transport(format!("remote {} unreachable", self.remote_id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DriverInterface for FakeDriverInterface {
    fn unique_remote_id(&self) -> &str {
        &self.remote_id
    }

    async fn get_point(&self, point_id: &str) -> Result<PointReading, DomainError> {
        self.check_remote_up()?;
        let state = self.state.lock().unwrap();
        if state.failing_points.contains(point_id) {
            return Err(DomainError::Remote {
                point: point_id.to_string(),
                detail: "simulated read failure".to_string(),
            });
        }
        let value = state
            .values
            .get(point_id)
            .or_else(|| state.defaults.get(point_id))
            .cloned()
            .unwrap_or_else(|| serde_json::json!(0));
        Ok(PointReading {
            value,
            meta_data: Some(PointMetaData::default()),
        })
    }

    async fn set_point(&self, point_id: &str, value: &PointValue) -> Result<PointValue, DomainError> {
        self.check_remote_up()?;
        let mut state = self.state.lock().unwrap();
        if state.failing_points.contains(point_id) {
            return Err(DomainError::Remote {
                point: point_id.to_string(),
                detail: "simulated write failure".to_string(),
            });
        }
        if state.ignore_writes.contains(point_id) {
            return Ok(state.values.get(point_id).cloned().unwrap_or_else(|| serde_json::json!(0)));
        }
        state.values.insert(point_id.to_string(), value.clone());
        Ok(value.clone())
    }

    async fn revert_point(&self, point_id: &str) -> Result<(), DomainError> {
        self.check_remote_up()?;
        let mut state = self.state.lock().unwrap();
        if state.failing_points.contains(point_id) {
            return Err(DomainError::Remote {
                point: point_id.to_string(),
                detail: "simulated revert failure".to_string(),
            });
        }
        let default = state.defaults.get(point_id).cloned().unwrap_or_else(|| serde_json::json!(0));
        state.values.insert(point_id.to_string(), default);
        Ok(())
    }

    async fn get_multiple_points(
        &self,
        point_ids: &[String],
    ) -> (HashMap<String, PointReading>, HashMap<String, ErrorInfo>) {
        let mut readings = HashMap::new();
        let mut errors = HashMap::new();
        for point_id in point_ids {
            match self.get_point(point_id).await {
                Ok(reading) => {
                    readings.insert(point_id.clone(), reading);
                }
                Err(err) => {
                    let (kind, detail) = err.as_type_value();
                    errors.insert(point_id.clone(), ErrorInfo::new(kind, detail));
                }
            }
        }
        (readings, errors)
    }

    async fn set_multiple_points(&self, pairs: &[(String, PointValue)]) -> HashMap<String, ErrorInfo> {
        let mut errors = HashMap::new();
        for (point_id, value) in pairs {
            if let Err(err) = self.set_point(point_id, value).await {
                let (kind, detail) = err.as_type_value();
                errors.insert(point_id.clone(), ErrorInfo::new(kind, detail));
            }
        }
        errors
    }

    async fn heartbeat(&self) -> Result<(), DomainError> {
        self.check_remote_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_point_falls_back_to_default() {
        let driver = FakeDriverInterface::new("remote1");
        driver.set_default("p1", serde_json::json!(42));
        let reading = driver.get_point("p1").await.unwrap();
        assert_eq!(reading.value, serde_json::json!(42));
    }

    #[tokio::test]
    async fn ignored_write_leaves_value_unchanged() {
        let driver = FakeDriverInterface::new("remote1");
        driver.seed("p1", serde_json::json!(0));
        driver.ignore_writes("p1");
        driver.set_point("p1", &serde_json::json!(42)).await.unwrap();
        let reading = driver.get_point("p1").await.unwrap();
        assert_eq!(reading.value, serde_json::json!(0));
    }

    #[tokio::test]
    async fn remote_down_fails_every_call() {
        let driver = FakeDriverInterface::new("remote1");
        driver.set_remote_down(true);
        assert!(driver.get_point("p1").await.is_err());
        let (readings, errors) = driver.get_multiple_points(&["p1".to_string(), "p2".to_string()]).await;
        assert!(readings.is_empty());
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn revert_restores_default() {
        let driver = FakeDriverInterface::new("remote1");
        driver.set_default("p1", serde_json::json!(10));
        driver.set_point("p1", &serde_json::json!(99)).await.unwrap();
        driver.revert_point("p1").await.unwrap();
        let reading = driver.get_point("p1").await.unwrap();
        assert_eq!(reading.value, serde_json::json!(10));
    }
}
