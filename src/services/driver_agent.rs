//! Driver Agent: the sole caller of a remote's `DriverInterface` (spec
//! §4.B). One instance per physical remote, shared by the Poll Scheduler
//! and the Coordinator's RPC surface, serialized behind a single mutex.

use crate::domain::errors::DomainError;
use crate::domain::models::config::{CircuitBreakerConfig, PlatformDriverConfig, RateLimitConfig, RetryConfig};
use crate::domain::models::{ErrorInfo, PointValue};
use crate::domain::ports::driver_interface::PointReading;
use crate::domain::ports::{Clock, DriverInterface, Publisher};
use crate::services::equipment_tree::EquipmentTree;
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

type HeartbeatLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn build_heartbeat_limiter(cfg: &RateLimitConfig) -> HeartbeatLimiter {
    let rps = NonZeroU32::new(cfg.requests_per_second.round() as u32).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(cfg.burst_size).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rps).allow_burst(burst))
}

/// Per-remote circuit breaker state (§10.6), tripped by repeated
/// whole-batch transport failures rather than isolated per-point errors.
#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: DateTime<Utc> },
    HalfOpen,
}

pub struct DriverAgent {
    remote_id: String,
    interface: Arc<dyn DriverInterface>,
    io_lock: AsyncMutex<()>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    circuit_config: CircuitBreakerConfig,
    circuit: StdMutex<CircuitState>,
    devices: StdMutex<BTreeSet<String>>,
    heartbeat_limiter: HeartbeatLimiter,
}

impl DriverAgent {
    pub fn new(
        interface: Arc<dyn DriverInterface>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        circuit_config: CircuitBreakerConfig,
    ) -> Self {
        Self::with_rate_limit(interface, clock, retry, circuit_config, RateLimitConfig::default())
    }

    /// As [`Self::new`], with an explicit heartbeat rate limit instead of
    /// the default (§10.6 — bounds how often a flapping remote's heartbeat
    /// can re-enter the transport-error/retry cycle).
    pub fn with_rate_limit(
        interface: Arc<dyn DriverInterface>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        circuit_config: CircuitBreakerConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let remote_id = interface.unique_remote_id().to_string();
        Self {
            remote_id,
            interface,
            io_lock: AsyncMutex::new(()),
            clock,
            retry,
            circuit_config,
            circuit: StdMutex::new(CircuitState::Closed { consecutive_failures: 0 }),
            devices: StdMutex::new(BTreeSet::new()),
            heartbeat_limiter: build_heartbeat_limiter(&rate_limit),
        }
    }

    pub fn unique_remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn add_equipment(&self, device_id: &str) {
        self.devices.lock().unwrap().insert(device_id.to_string());
    }

    pub fn remove_equipment(&self, device_id: &str) {
        self.devices.lock().unwrap().remove(device_id);
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    fn circuit_allows(&self, now: DateTime<Utc>) -> bool {
        let mut circuit = self.circuit.lock().unwrap();
        match *circuit {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open { opened_at } => {
                let elapsed_secs = (now - opened_at).num_milliseconds() as f64 / 1000.0;
                if elapsed_secs >= self.circuit_config.open_timeout_secs {
                    *circuit = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        *self.circuit.lock().unwrap() = CircuitState::Closed { consecutive_failures: 0 };
    }

    fn record_failure(&self, now: DateTime<Utc>) {
        let mut circuit = self.circuit.lock().unwrap();
        *circuit = match *circuit {
            CircuitState::HalfOpen => CircuitState::Open { opened_at: now },
            CircuitState::Closed { consecutive_failures } => {
                let next = consecutive_failures + 1;
                if next >= self.circuit_config.failure_threshold {
                    CircuitState::Open { opened_at: now }
                } else {
                    CircuitState::Closed { consecutive_failures: next }
                }
            }
            CircuitState::Open { opened_at } => CircuitState::Open { opened_at },
        };
    }

    fn transport_error(&self) -> DomainError {
        DomainError::Transport(format!("circuit open for remote {}", self.remote_id))
    }

    /// Wrap a single fallible interface call with jittered exponential
    /// backoff, retrying only `Transport` errors up to the remote's
    /// configured ceiling (§10.6).
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DomainError>>,
    {
        let policy = backoff::ExponentialBackoff {
            initial_interval: StdDuration::from_millis(self.retry.initial_backoff_ms),
            max_interval: StdDuration::from_millis(self.retry.max_backoff_ms),
            max_elapsed_time: Some(StdDuration::from_millis(
                self.retry.max_backoff_ms.saturating_mul(u64::from(self.retry.max_retries) + 1),
            )),
            ..backoff::ExponentialBackoff::default()
        };
        backoff::future::retry(policy, || async {
            op().await.map_err(|err| match err {
                DomainError::Transport(_) => backoff::Error::transient(err),
                other => backoff::Error::permanent(other),
            })
        })
        .await
    }

    /// Batched read (spec §4.B). Never fails the whole batch; per-point
    /// errors are reported in the returned map. A batch in which every
    /// requested point failed counts as one transport failure against the
    /// circuit breaker.
    pub async fn get_multiple_points(
        &self,
        point_ids: &[String],
    ) -> (HashMap<String, PointReading>, HashMap<String, ErrorInfo>) {
        let now = self.clock.now();
        let _guard = self.io_lock.lock().await;
        if !self.circuit_allows(now) {
            let (_, detail) = self.transport_error().as_type_value();
            let errors = point_ids.iter().map(|id| (id.clone(), ErrorInfo::new("TransportError", detail.clone()))).collect();
            return (HashMap::new(), errors);
        }

        let (readings, errors) = self.interface.get_multiple_points(point_ids).await;
        if !point_ids.is_empty() && errors.len() == point_ids.len() {
            self.record_failure(now);
        } else {
            self.record_success();
        }
        (readings, errors)
    }

    /// Batched write (spec §4.B), same whole-batch transport-failure rule
    /// as `get_multiple_points`.
    pub async fn set_multiple_points(&self, pairs: &[(String, PointValue)]) -> HashMap<String, ErrorInfo> {
        let now = self.clock.now();
        let _guard = self.io_lock.lock().await;
        if !self.circuit_allows(now) {
            let (_, detail) = self.transport_error().as_type_value();
            return pairs.iter().map(|(id, _)| (id.clone(), ErrorInfo::new("TransportError", detail.clone()))).collect();
        }

        let errors = self.interface.set_multiple_points(pairs).await;
        if !pairs.is_empty() && errors.len() == pairs.len() {
            self.record_failure(now);
        } else {
            self.record_success();
        }
        errors
    }

    pub async fn revert_point(&self, point_id: &str) -> Result<(), DomainError> {
        let now = self.clock.now();
        let _guard = self.io_lock.lock().await;
        if !self.circuit_allows(now) {
            return Err(self.transport_error());
        }
        let result = self.with_retry(|| self.interface.revert_point(point_id)).await;
        self.note_single_outcome(&result, now);
        result
    }

    /// Sent every `remote_heartbeat_interval` seconds; a no-op for
    /// interfaces without heartbeat support. Throttled by the per-remote
    /// `governor` rate limiter so a remote stuck bouncing between `Open`
    /// and `HalfOpen` cannot drive the heartbeat loop into a hot retry
    /// cycle (§10.6).
    pub async fn heartbeat(&self) -> Result<(), DomainError> {
        if self.heartbeat_limiter.check().is_err() {
            return Err(DomainError::Transport(format!(
                "heartbeat rate-limited for remote {}",
                self.remote_id
            )));
        }
        let now = self.clock.now();
        let _guard = self.io_lock.lock().await;
        if !self.circuit_allows(now) {
            return Err(self.transport_error());
        }
        let result = self.with_retry(|| self.interface.heartbeat()).await;
        self.note_single_outcome(&result, now);
        result
    }

    fn note_single_outcome<T>(&self, result: &Result<T, DomainError>, now: DateTime<Utc>) {
        match result {
            Ok(_) => self.record_success(),
            Err(DomainError::Transport(_)) => self.record_failure(now),
            Err(_) => {}
        }
    }

    /// Invoked by the Poll Scheduler for one slot's `(remote, points)`
    /// bucket: batched read, tree write-back, and the full publish matrix
    /// (§4.B publication table).
    pub async fn poll(
        &self,
        tree: &RwLock<EquipmentTree>,
        slot_points: &[String],
        publisher: &dyn Publisher,
        driver_config: &PlatformDriverConfig,
    ) {
        let now = self.clock.now();
        let (readings, errors) = self.get_multiple_points(slot_points).await;

        {
            let mut guard = tree.write().await;
            for (point_id, reading) in &readings {
                let _ = guard.record_read(point_id, reading.value.clone(), reading.meta_data.clone(), now);
            }
        }

        for (point_id, err) in &errors {
            let _ = publisher.publish_error(&format!("{}/actuators/error", driver_config.depth_first_base), err).await;
        }

        self.publish_poll_results(&readings, tree, publisher, driver_config, now).await;
    }

    async fn publish_poll_results(
        &self,
        readings: &HashMap<String, PointReading>,
        tree: &RwLock<EquipmentTree>,
        publisher: &dyn Publisher,
        cfg: &PlatformDriverConfig,
        now: DateTime<Utc>,
    ) {
        for (point_id, reading) in readings {
            let Some((device, leaf)) = point_id.rsplit_once('/') else { continue };
            let (single_depth, single_breadth) = {
                let guard = tree.read().await;
                (guard.is_published_single_depth(point_id), guard.is_published_single_breadth(point_id))
            };
            if single_depth {
                let topic = format!("{}/{device}/{leaf}", cfg.depth_first_base);
                let _ = publisher.publish_point(&topic, &reading.value).await;
            }
            if single_breadth {
                let topic = format!("{leaf}/{device}");
                let _ = publisher.publish_point(&topic, &reading.value).await;
            }
        }

        let mut by_device: BTreeMap<&str, Vec<(&str, &PointValue)>> = BTreeMap::new();
        for (point_id, reading) in readings {
            if let Some((device, leaf)) = point_id.rsplit_once('/') {
                by_device.entry(device).or_default().push((leaf, &reading.value));
            }
        }

        // `multi_breadth` is "one message per building/campus with every
        // device" rather than per-device, so matching devices accumulate
        // into one combined map per building and are published once after
        // the per-device loop below.
        let mut breadth_batches: BTreeMap<&str, HashMap<String, PointValue>> = BTreeMap::new();

        for (&device, points) in &by_device {
            let (multi_depth, multi_breadth, all_depth, all_breadth, all_interval, last_all) = {
                let guard = tree.read().await;
                let node = guard.get_node(device);
                (
                    guard.is_published_multi_depth(device),
                    guard.is_published_multi_breadth(device),
                    guard.is_published_all_depth(device),
                    guard.is_published_all_breadth(device),
                    node.and_then(|n| n.effective_config.all_publish_interval),
                    node.and_then(|n| n.last_all_publish),
                )
            };
            let building = device.rsplit_once('/').map_or(device, |(b, _)| b);
            let device_leaf = device.rsplit_once('/').map_or(device, |(_, d)| d);

            if multi_depth {
                let topic = format!("{}/{device}", cfg.depth_first_base);
                let map: HashMap<String, PointValue> =
                    points.iter().map(|(leaf, v)| ((*leaf).to_string(), (*v).clone())).collect();
                let _ = publisher.publish_depth_first(&topic, &map).await;
            }
            if multi_breadth {
                let batch = breadth_batches.entry(building).or_default();
                for (leaf, value) in points {
                    batch.insert(format!("{device_leaf}/{leaf}"), (*value).clone());
                }
            }

            if !(all_depth || all_breadth) {
                continue;
            }
            let due = match (all_interval, last_all) {
                (Some(interval), Some(last)) => (now - last).num_milliseconds() as f64 / 1000.0 >= interval,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !due {
                continue;
            }

            let all_points: HashMap<String, PointValue> = {
                let guard = tree.read().await;
                guard
                    .points(device)
                    .into_iter()
                    .filter_map(|n| n.last_value.clone().map(|v| (n.leaf_name().to_string(), v)))
                    .collect()
            };
            if all_depth {
                let topic = format!("{}/{device}/all", cfg.depth_first_base);
                let _ = publisher.publish_depth_first(&topic, &all_points).await;
            }
            if all_breadth {
                let topic = format!("{}/{building}/all", cfg.breadth_first_base);
                let _ = publisher.publish_depth_first(&topic, &all_points).await;
            }
            let mut guard = tree.write().await;
            let _ = guard.mark_all_published(device, now);
        }

        for (building, batch) in breadth_batches {
            let topic = format!("{}/{building}", cfg.breadth_first_base);
            let _ = publisher.publish_depth_first(&topic, &batch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NodeConfig;
    use crate::infrastructure::clock::fake::FakeClock;
    use crate::infrastructure::drivers::fake::FakeDriverInterface;
    use crate::services::equipment_tree::{EquipmentTree, RegistryPoint};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        points: Mutex<Vec<(String, PointValue)>>,
        depth_first: Mutex<Vec<(String, HashMap<String, PointValue>)>>,
        errors: Mutex<Vec<(String, ErrorInfo)>>,
    }

    #[async_trait::async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish_point(&self, topic: &str, value: &PointValue) -> Result<(), DomainError> {
            self.points.lock().unwrap().push((topic.to_string(), value.clone()));
            Ok(())
        }

        async fn publish_depth_first(&self, topic: &str, values: &HashMap<String, PointValue>) -> Result<(), DomainError> {
            self.depth_first.lock().unwrap().push((topic.to_string(), values.clone()));
            Ok(())
        }

        async fn publish_error(&self, topic: &str, error: &ErrorInfo) -> Result<(), DomainError> {
            self.errors.lock().unwrap().push((topic.to_string(), error.clone()));
            Ok(())
        }
    }

    fn clock() -> Arc<FakeClock> {
        Arc::new(FakeClock::new(Utc::now()))
    }

    fn agent_with(driver: FakeDriverInterface, clock: Arc<FakeClock>) -> DriverAgent {
        DriverAgent::new(Arc::new(driver), clock, RetryConfig::default(), CircuitBreakerConfig::default())
    }

    #[tokio::test]
    async fn get_multiple_points_reports_per_point_errors_without_failing_batch() {
        let driver = FakeDriverInterface::new("r1");
        driver.seed("devices/ahu1/temp", serde_json::json!(21.0));
        driver.fail_point("devices/ahu1/bad");
        let agent = agent_with(driver, clock());

        let (readings, errors) = agent
            .get_multiple_points(&["devices/ahu1/temp".to_string(), "devices/ahu1/bad".to_string()])
            .await;
        assert_eq!(readings.len(), 1);
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_whole_batch_failures() {
        let driver = FakeDriverInterface::new("r1");
        driver.set_remote_down(true);
        let clock = clock();
        let mut breaker = CircuitBreakerConfig::default();
        breaker.failure_threshold = 2;
        let agent = DriverAgent::new(Arc::new(driver), clock.clone(), RetryConfig { max_retries: 0, ..RetryConfig::default() }, breaker);

        let _ = agent.get_multiple_points(&["p1".to_string()]).await;
        let (_, errors) = agent.get_multiple_points(&["p1".to_string()]).await;
        assert_eq!(errors["p1"].error_type, "TransportError");

        let (_, errors) = agent.get_multiple_points(&["p1".to_string()]).await;
        assert!(errors["p1"].value.contains("circuit open"));
    }

    #[tokio::test]
    async fn heartbeat_rate_limiter_rejects_bursts_past_its_quota() {
        let driver = FakeDriverInterface::new("r1");
        let rate_limit = RateLimitConfig { requests_per_second: 1.0, burst_size: 1 };
        let agent = DriverAgent::with_rate_limit(
            Arc::new(driver),
            clock(),
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
            rate_limit,
        );

        assert!(agent.heartbeat().await.is_ok());
        let second = agent.heartbeat().await;
        assert!(matches!(second, Err(DomainError::Transport(msg)) if msg.contains("rate-limited")));
    }

    #[tokio::test]
    async fn poll_writes_into_tree_and_publishes_single_depth() {
        let driver = FakeDriverInterface::new("r1");
        driver.seed("devices/ahu1/temp", serde_json::json!(72.0));
        let agent = agent_with(driver, clock());

        let mut tree = EquipmentTree::new();
        let mut cfg = NodeConfig::default();
        cfg.publish_single_depth = Some(true);
        tree.add_device(
            "devices/ahu1",
            cfg,
            "r1".to_string(),
            &[RegistryPoint::new("temp", NodeConfig::default())],
        )
        .unwrap();
        let tree_lock = RwLock::new(tree);

        let publisher = RecordingPublisher::default();
        let driver_config = PlatformDriverConfig::default();
        agent.poll(&tree_lock, &["devices/ahu1/temp".to_string()], &publisher, &driver_config).await;

        let guard = tree_lock.read().await;
        assert_eq!(guard.get_node("devices/ahu1/temp").unwrap().last_value, Some(serde_json::json!(72.0)));
        assert_eq!(publisher.points.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multi_breadth_combines_every_device_in_a_building_into_one_message() {
        let driver = FakeDriverInterface::new("r1");
        driver.seed("devices/building1/ahu1/temp", serde_json::json!(70.0));
        driver.seed("devices/building1/ahu2/temp", serde_json::json!(71.0));
        let agent = agent_with(driver, clock());

        let mut tree = EquipmentTree::new();
        let mut cfg = NodeConfig::default();
        cfg.publish_multi_breadth = Some(true);
        tree.add_device(
            "devices/building1/ahu1",
            cfg.clone(),
            "r1".to_string(),
            &[RegistryPoint::new("temp", NodeConfig::default())],
        )
        .unwrap();
        tree.add_device(
            "devices/building1/ahu2",
            cfg,
            "r1".to_string(),
            &[RegistryPoint::new("temp", NodeConfig::default())],
        )
        .unwrap();
        let tree_lock = RwLock::new(tree);

        let publisher = RecordingPublisher::default();
        let driver_config = PlatformDriverConfig::default();
        agent
            .poll(
                &tree_lock,
                &["devices/building1/ahu1/temp".to_string(), "devices/building1/ahu2/temp".to_string()],
                &publisher,
                &driver_config,
            )
            .await;

        let batches = publisher.depth_first.lock().unwrap();
        assert_eq!(batches.len(), 1, "expected one combined message per building, not one per device");
        let (topic, values) = &batches[0];
        assert_eq!(topic, &format!("{}/devices/building1", driver_config.breadth_first_base));
        assert_eq!(values.get("ahu1/temp"), Some(&serde_json::json!(70.0)));
        assert_eq!(values.get("ahu2/temp"), Some(&serde_json::json!(71.0)));
    }
}
