//! Coordinator: the façade that composes the Equipment Tree, Driver
//! Agents, Poll Schedulers, Reservation Manager, and Override Manager
//! behind the single public RPC surface the CLI and external callers use
//! (spec §4.F).

use crate::domain::errors::DomainError;
use crate::domain::models::config::PlatformDriverConfig;
use crate::domain::models::node::NodeConfig;
use crate::domain::models::poll_set::PollMember;
use crate::domain::models::reservation::{DeviceRequest, ReservationOutcome};
use crate::domain::models::{DeviceRecord, PointValue, RegistryPointRecord};
use crate::domain::ports::{Clock, ConfigStore, Publisher};
use crate::services::driver_agent::DriverAgent;
use crate::services::equipment_tree::{EquipmentTree, RegistryPoint};
use crate::services::override_manager::{OverrideEntry, OverrideManager};
use crate::services::poll_scheduler::PollScheduler;
use crate::services::reservation_manager::ReservationManager;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Two scheduler-affecting settings that spec §4.F refuses to change at
/// runtime: they size bounded pools allocated at startup.
const RESTART_REQUIRED_FIELDS: [&str; 2] = ["max_open_sockets", "max_concurrent_publishes"];

/// Window a staggered failsafe revert spreads its `revert_point` calls
/// across (§4.E "spread reverts across the devices linearly").
const STAGGER_WINDOW: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Coordinator {
    tree: Arc<RwLock<EquipmentTree>>,
    agents: RwLock<HashMap<String, Arc<DriverAgent>>>,
    schedulers: RwLock<HashMap<String, Arc<PollScheduler>>>,
    reservations: Arc<ReservationManager>,
    overrides: Arc<OverrideManager>,
    config_store: Arc<dyn ConfigStore>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    driver_config: RwLock<Arc<PlatformDriverConfig>>,
    /// Last raw `devices/<id>` payload seen per device, so
    /// `reconcile_equipment_config` can tell an unchanged row from a
    /// `NEW`/`UPDATE`/`DELETE` one without a push-style store API.
    known_device_configs: RwLock<HashMap<String, String>>,
}

impl Coordinator {
    pub fn new(
        tree: Arc<RwLock<EquipmentTree>>,
        reservations: Arc<ReservationManager>,
        overrides: Arc<OverrideManager>,
        config_store: Arc<dyn ConfigStore>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        driver_config: PlatformDriverConfig,
    ) -> Self {
        Self {
            tree,
            agents: RwLock::new(HashMap::new()),
            schedulers: RwLock::new(HashMap::new()),
            reservations,
            overrides,
            config_store,
            publisher,
            clock,
            driver_config: RwLock::new(Arc::new(driver_config)),
            known_device_configs: RwLock::new(HashMap::new()),
        }
    }

    /// Records a device's raw config payload as already-applied, so the
    /// next `reconcile_equipment_config` doesn't treat state the caller
    /// already loaded into the tree (e.g. at `bootstrap::build` time) as
    /// a fresh `NEW` event.
    pub async fn seed_device_config(&self, device_id: impl Into<String>, raw: impl Into<String>) {
        self.known_device_configs.write().await.insert(device_id.into(), raw.into());
    }

    pub async fn register_driver_agent(&self, remote_id: impl Into<String>, agent: Arc<DriverAgent>) {
        self.agents.write().await.insert(remote_id.into(), agent);
    }

    pub async fn register_scheduler(&self, group: impl Into<String>, scheduler: Arc<PollScheduler>) {
        self.schedulers.write().await.insert(group.into(), scheduler);
    }

    pub async fn load_state(&self) -> Result<(), DomainError> {
        self.reservations.load_state().await?;
        self.overrides.load_state().await?;
        Ok(())
    }

    /// `get`/`last` both resolve a topic against every matching point;
    /// `last` additionally reports the read timestamp.
    #[instrument(skip(self))]
    pub async fn get(&self, topic_glob: &str, regex: &str) -> Result<HashMap<String, PointValue>, DomainError> {
        let tree = self.tree.read().await;
        let matched = tree.find_points(topic_glob, regex)?;
        Ok(matched
            .into_iter()
            .filter_map(|n| n.last_value.clone().map(|v| (n.identifier.clone(), v)))
            .collect())
    }

    pub async fn last(
        &self,
        topic_glob: &str,
        regex: &str,
    ) -> Result<HashMap<String, (PointValue, Option<DateTime<Utc>>)>, DomainError> {
        let tree = self.tree.read().await;
        let matched = tree.find_points(topic_glob, regex)?;
        Ok(matched
            .into_iter()
            .filter_map(|n| n.last_value.clone().map(|v| (n.identifier.clone(), (v, n.last_updated))))
            .collect())
    }

    /// `list_topics`: children of the exact node if present, falling back
    /// silently to the nearest parent's children otherwise (§12 open
    /// question decision). `active`/`enabled`, when `Some`, further
    /// restrict the result to children whose flag matches.
    pub async fn list_topics(&self, topic: &str, active: Option<bool>, enabled: Option<bool>) -> Vec<String> {
        let tree = self.tree.read().await;
        let children = if tree.get_node(topic).is_some() {
            tree.children(topic)
        } else {
            let Some((parent, _)) = topic.rsplit_once('/') else {
                return Vec::new();
            };
            tree.children(parent)
        };
        children
            .into_iter()
            .filter(|n| active.is_none_or(|want| n.active == want))
            .filter(|n| enabled.is_none_or(|want| n.enabled == want))
            .map(|n| n.identifier.clone())
            .collect()
    }

    /// Writes a point, subject to the reservation-lock and override
    /// checks (§4.D/§4.E). `confirm` re-reads the point after writing and
    /// reports the actual post-write value even when it differs from
    /// what was requested (e.g. an ignored write).
    #[instrument(skip(self, value))]
    pub async fn set(
        &self,
        point_id: &str,
        value: PointValue,
        confirm: bool,
        task_id: Option<&str>,
    ) -> Result<PointValue, DomainError> {
        let now = self.clock.now();
        self.overrides.raise_on_override(point_id, now).await?;
        self.reservations.raise_on_locks(point_id, task_id).await?;

        let remote_id = {
            let tree = self.tree.read().await;
            tree.get_remote(point_id)?.to_string()
        };
        let agent = self.agent_for(&remote_id).await?;
        let mut errors = agent.set_multiple_points(&[(point_id.to_string(), value.clone())]).await;
        if let Some(err) = errors.remove(point_id) {
            return Err(DomainError::Remote { point: point_id.to_string(), detail: err.value });
        }

        if !confirm {
            return Ok(value);
        }
        let (mut readings, _) = agent.get_multiple_points(&[point_id.to_string()]).await;
        let actual = readings.remove(point_id).map_or(value, |r| r.value);
        let mut tree = self.tree.write().await;
        let _ = tree.record_read(point_id, actual.clone(), None, now);
        Ok(actual)
    }

    pub async fn revert(&self, point_id: &str, task_id: Option<&str>) -> Result<(), DomainError> {
        self.overrides.raise_on_override(point_id, self.clock.now()).await?;
        self.reservations.raise_on_locks(point_id, task_id).await?;
        let remote_id = {
            let tree = self.tree.read().await;
            tree.get_remote(point_id)?.to_string()
        };
        let agent = self.agent_for(&remote_id).await?;
        agent.revert_point(point_id).await
    }

    pub async fn start(&self, topic_glob: &str) -> Result<bool, DomainError> {
        let mut tree = self.tree.write().await;
        tree.set_active(topic_glob, true)
    }

    pub async fn stop(&self, topic_glob: &str) -> Result<bool, DomainError> {
        let mut tree = self.tree.write().await;
        tree.set_active(topic_glob, false)
    }

    /// Persisted but never callback-driven (§4.F): disabling a point
    /// hides it from publication and polling without tearing down its
    /// node. Each matched point is written back to the configuration
    /// store via `update_stored_registry_config` so the change survives a
    /// restart; a point with no persisted registry row (not yet backed by
    /// a stored device config) is skipped rather than failing the batch.
    pub async fn enable(&self, topic_glob: &str) -> Vec<String> {
        let matched = self.tree.write().await.set_enabled(topic_glob, true);
        self.persist_enabled_state(&matched).await;
        matched
    }

    pub async fn disable(&self, topic_glob: &str) -> Vec<String> {
        let matched = self.tree.write().await.set_enabled(topic_glob, false);
        self.persist_enabled_state(&matched).await;
        matched
    }

    /// Persists the enabled/disabled state for every matched node that is
    /// a `point` (the only kind with a registry row to update); segments
    /// and devices matched by the same glob have no per-point registry
    /// entry to write back and are skipped.
    async fn persist_enabled_state(&self, node_ids: &[String]) {
        for node_id in node_ids {
            let is_point = {
                let tree = self.tree.read().await;
                tree.get_node(node_id).is_some_and(|n| n.kind == crate::domain::models::NodeKind::Point)
            };
            if !is_point {
                continue;
            }
            if let Err(err) = self.update_stored_registry_config(node_id).await {
                warn!(point_id = %node_id, %err, "failed to persist enable/disable state");
            }
        }
    }

    pub async fn new_reservation(
        &self,
        agent_id: &str,
        task_id: &str,
        priority: &str,
        requests: Vec<DeviceRequest>,
    ) -> ReservationOutcome {
        self.reservations.new_task(agent_id, task_id, priority, requests).await
    }

    pub async fn cancel_reservation(&self, agent_id: &str, task_id: &str) -> ReservationOutcome {
        self.reservations.cancel_task(agent_id, task_id).await
    }

    pub async fn set_override(
        &self,
        glob: &str,
        duration_secs: Option<f64>,
        failsafe_revert: bool,
        staggered_revert: bool,
    ) {
        self.overrides
            .set_override(glob, duration_secs, failsafe_revert, staggered_revert, self.clock.now())
            .await;

        if !failsafe_revert {
            return;
        }
        let points: Vec<String> = {
            let tree = self.tree.read().await;
            tree.find_points(glob, "").unwrap_or_default().into_iter().map(|n| n.identifier.clone()).collect()
        };
        self.revert_points(points, staggered_revert).await;
    }

    /// Drives the `revert_point` calls a `failsafe_revert` override asks
    /// for at set time. `staggered` spreads them linearly across
    /// `STAGGER_WINDOW` instead of firing them all at once.
    async fn revert_points(&self, points: Vec<String>, staggered: bool) {
        let count = points.len() as u32;
        for point_id in points {
            if staggered && count > 1 {
                tokio::time::sleep(STAGGER_WINDOW / count).await;
            }
            if let Err(err) = self.revert(&point_id, None).await {
                warn!(%point_id, %err, "failsafe revert on override set failed");
            }
        }
    }

    pub async fn clear_override(&self, glob: &str) -> bool {
        self.overrides.clear_override(glob).await
    }

    pub async fn list_overrides(&self) -> Vec<OverrideEntry> {
        self.overrides.list_overrides().await
    }

    /// Legacy keyword-form compatibility (§6): a single-point `get_point`
    /// is `get` restricted to one identifier.
    pub async fn get_point(&self, point_id: &str) -> Result<PointValue, DomainError> {
        let tree = self.tree.read().await;
        tree.get_node(point_id)
            .and_then(|n| n.last_value.clone())
            .ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()))
    }

    pub async fn set_point(&self, point_id: &str, value: PointValue) -> Result<PointValue, DomainError> {
        self.set(point_id, value, false, None).await
    }

    /// Applies a root config change. Refuses any attempt to alter a
    /// pool-sizing field at runtime, per §4.F — those require a restart.
    pub async fn apply_driver_config_change(&self, new_config: PlatformDriverConfig) -> Result<(), DomainError> {
        let current = self.driver_config.read().await.clone();
        if current.max_open_sockets != new_config.max_open_sockets
            || current.max_concurrent_publishes != new_config.max_concurrent_publishes
        {
            warn!(
                fields = ?RESTART_REQUIRED_FIELDS,
                "ignoring runtime change to pool-sizing config; restart required"
            );
            return Err(DomainError::Configuration(
                "max_open_sockets/max_concurrent_publishes cannot change without a restart".to_string(),
            ));
        }
        *self.driver_config.write().await = Arc::new(new_config);
        Ok(())
    }

    /// Applies a `NEW`/`UPDATE` equipment configuration event (§4.F):
    /// reconciles the Equipment Tree node (`add_device` if unseen,
    /// `update_equipment` otherwise) and re-syncs every Poll Scheduler
    /// whose group lost or gained a point as a result. Provisioning a
    /// Driver Agent for a brand-new remote is the caller's job — the
    /// Coordinator composes agents, it doesn't build them.
    #[instrument(skip(self, dev_config, registry))]
    pub async fn apply_equipment_config(
        &self,
        path: &str,
        dev_config: NodeConfig,
        remote_id: String,
        registry: Vec<RegistryPoint>,
    ) -> Result<(), DomainError> {
        let default_interval = self.driver_config.read().await.default_polling_interval;
        let mut tree = self.tree.write().await;
        let before = Self::point_groups(&tree, path);

        if tree.get_node(path).is_none() {
            tree.add_device(path, dev_config, remote_id.clone(), &registry)?;
        } else {
            tree.update_equipment(path, dev_config, remote_id.clone(), &registry)?;
        }

        let after: Vec<(String, String, f64)> = tree
            .points(path)
            .into_iter()
            .map(|n| {
                let group = n.effective_config.group.clone().unwrap_or_else(|| "default".to_string());
                let interval = n.effective_config.polling_interval.unwrap_or(default_interval);
                (n.identifier.clone(), group, interval)
            })
            .collect();
        drop(tree);

        self.resync_schedulers(before, after, &remote_id).await;
        Ok(())
    }

    /// Applies a `DELETE` equipment configuration event (§4.F): removes
    /// the node and every descendant, then drops its points from
    /// whichever Poll Scheduler(s) held them.
    #[instrument(skip(self))]
    pub async fn remove_equipment_config(&self, path: &str) -> usize {
        let mut tree = self.tree.write().await;
        let before = Self::point_groups(&tree, path);
        let removed = tree.remove_segment(path);
        drop(tree);

        self.resync_schedulers(before, Vec::new(), "").await;
        removed
    }

    /// Writes back a registry row representing `point_id`'s current
    /// declared config to the configuration store (§4.A
    /// `update_stored_registry_config`). Locates the owning device's
    /// persisted `DeviceRecord` by matching its `path` field against the
    /// point's device path (config-store keys are opaque device ids, not
    /// tree paths) and upserts the point's entry in its registry.
    #[instrument(skip(self))]
    pub async fn update_stored_registry_config(&self, point_id: &str) -> Result<(), DomainError> {
        let (device_path, point_name) = point_id
            .rsplit_once('/')
            .ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()))?;

        let (declared_config, enabled) = {
            let tree = self.tree.read().await;
            let node = tree.get_node(point_id).ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()))?;
            (node.declared_config.clone(), node.enabled)
        };

        for device_id in self.config_store.list_device_ids().await? {
            let Some(raw) = self.config_store.get_device_config(&device_id).await? else {
                continue;
            };
            let mut record: DeviceRecord = serde_json::from_str(&raw).map_err(|e| {
                DomainError::Configuration(format!("malformed equipment_config row for device {device_id}: {e}"))
            })?;
            if record.path != device_path {
                continue;
            }

            match record.registry.iter_mut().find(|p| p.name == point_name) {
                Some(entry) => {
                    entry.config = declared_config;
                    entry.enabled = enabled;
                }
                None => record.registry.push(RegistryPointRecord {
                    name: point_name.to_string(),
                    config: declared_config,
                    enabled,
                }),
            }

            let new_raw = serde_json::to_string(&record).map_err(|e| {
                DomainError::Configuration(format!("failed to serialize equipment_config row for device {device_id}: {e}"))
            })?;
            self.config_store.set_device_config(&device_id, &new_raw).await?;
            self.known_device_configs.write().await.insert(device_id, new_raw);
            return Ok(());
        }

        Err(DomainError::EquipmentNotFound(point_id.to_string()))
    }

    /// Polls the configuration store for `devices/...` changes and
    /// reconciles the Equipment Tree against them (§4.F: the Coordinator
    /// "handles configuration events [...] from the configuration
    /// store"). `ConfigStore` has no push/subscribe primitive (§6), so
    /// this diffs every device's raw payload against what was last seen
    /// and dispatches `apply_equipment_config`/`remove_equipment_config`
    /// for anything that changed. Callers run it on a loop alongside
    /// `tick`.
    #[instrument(skip(self))]
    pub async fn reconcile_equipment_config(&self) -> Result<(), DomainError> {
        let device_ids = self.config_store.list_device_ids().await?;
        let mut still_present = std::collections::HashSet::new();

        for device_id in &device_ids {
            let Some(raw) = self.config_store.get_device_config(device_id).await? else {
                continue;
            };
            still_present.insert(device_id.clone());
            let unchanged = self.known_device_configs.read().await.get(device_id) == Some(&raw);
            if unchanged {
                continue;
            }

            let record: DeviceRecord = serde_json::from_str(&raw).map_err(|e| {
                DomainError::Configuration(format!("malformed equipment_config row for device {device_id}: {e}"))
            })?;
            let points: Vec<RegistryPoint> =
                record.registry.into_iter().map(|p| RegistryPoint { name: p.name, config: p.config, enabled: p.enabled }).collect();
            self.apply_equipment_config(&record.path, record.dev_config, record.remote_id, points).await?;
            self.known_device_configs.write().await.insert(device_id.clone(), raw);
            info!(%device_id, "equipment config applied");
        }

        let removed: Vec<(String, String)> = {
            let seen = self.known_device_configs.read().await;
            seen.iter()
                .filter(|(id, _)| !still_present.contains(*id))
                .map(|(id, raw)| (id.clone(), raw.clone()))
                .collect()
        };
        for (device_id, raw) in removed {
            self.known_device_configs.write().await.remove(&device_id);
            let Ok(record) = serde_json::from_str::<DeviceRecord>(&raw) else { continue };
            self.remove_equipment_config(&record.path).await;
            info!(%device_id, "equipment config removed");
        }
        Ok(())
    }

    fn point_groups(tree: &EquipmentTree, path: &str) -> Vec<(String, String)> {
        tree.points(path)
            .into_iter()
            .map(|n| (n.identifier.clone(), n.effective_config.group.clone().unwrap_or_else(|| "default".to_string())))
            .collect()
    }

    /// Diffs a device's points before/after a config change and drives
    /// `add_to_schedule`/`remove_from_schedule` on each affected group's
    /// scheduler, finishing with one `schedule()` per touched group so
    /// every plan reflects the new membership (§4.F "asks the
    /// appropriate Poll Scheduler to re-plan"). Skipped when
    /// `allow_reschedule` is `false` (§4.C): the poll set is still
    /// updated, but the caller must invoke `schedule()` itself for the
    /// change to take effect on the running plan.
    async fn resync_schedulers(&self, before: Vec<(String, String)>, after: Vec<(String, String, f64)>, remote_id: &str) {
        let schedulers = self.schedulers.read().await;
        let mut touched = std::collections::HashSet::new();

        for (point_id, group) in &before {
            if let Some(scheduler) = schedulers.get(group) {
                scheduler.remove_from_schedule(point_id).await;
                touched.insert(group.clone());
            }
        }
        for (point_id, group, interval_secs) in &after {
            if let Some(scheduler) = schedulers.get(group) {
                let member = PollMember { point_id: point_id.clone(), remote_id: remote_id.to_string(), interval_secs: *interval_secs };
                scheduler.add_to_schedule(member).await;
                touched.insert(group.clone());
            }
        }
        if !self.driver_config.read().await.allow_reschedule {
            return;
        }
        for group in touched {
            if let Some(scheduler) = schedulers.get(&group) {
                scheduler.schedule().await;
            }
        }
    }

    async fn agent_for(&self, remote_id: &str) -> Result<Arc<DriverAgent>, DomainError> {
        self.agents
            .read()
            .await
            .get(remote_id)
            .cloned()
            .ok_or_else(|| DomainError::Configuration(format!("no driver agent registered for remote {remote_id}")))
    }

    /// One sweep of the Reservation/Override Manager background loop:
    /// advance task state and drop overrides past their `end_time`
    /// (§4.E/§4.D). Failsafe reverts fire at `set_override` time, not
    /// here — expiry only removes the write-block. Callers run this on a
    /// loop that sleeps until `next_wake`.
    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let now = self.clock.now();
        self.reservations.tick(now).await;
        let expired = self.overrides.sweep_expired(now).await;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired overrides swept");
        }
        info!("coordinator tick complete");
    }

    pub async fn next_wake(&self) -> DateTime<Utc> {
        self.reservations.next_wake(self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ErrorInfo;
    use crate::infrastructure::clock::fake::FakeClock;
    use crate::infrastructure::database::MemoryConfigStore;
    use crate::domain::ports::DriverInterface;
    use crate::infrastructure::drivers::fake::FakeDriverInterface;
    use crate::services::equipment_tree::RegistryPoint;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullPublisher {
        points: Mutex<Vec<(String, PointValue)>>,
    }

    #[async_trait::async_trait]
    impl Publisher for NullPublisher {
        async fn publish_point(&self, topic: &str, value: &PointValue) -> Result<(), DomainError> {
            self.points.lock().unwrap().push((topic.to_string(), value.clone()));
            Ok(())
        }
        async fn publish_depth_first(&self, _topic: &str, _values: &Map<String, PointValue>) -> Result<(), DomainError> {
            Ok(())
        }
        async fn publish_error(&self, _topic: &str, _error: &ErrorInfo) -> Result<(), DomainError> {
            Ok(())
        }
    }

    async fn coordinator_with_point(point_id: &str, remote_id: &str) -> Coordinator {
        let mut tree = EquipmentTree::new();
        tree.add_device(
            point_id.rsplit_once('/').unwrap().0,
            Default::default(),
            remote_id.to_string(),
            &[RegistryPoint { name: point_id.rsplit_once('/').unwrap().1.to_string(), config: Default::default(), enabled: true }],
        )
        .unwrap();
        let tree = Arc::new(RwLock::new(tree));

        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let reservations = Arc::new(ReservationManager::new(60.0, 60.0, clock.clone(), store.clone()));
        let overrides = Arc::new(OverrideManager::new(store.clone()));
        let coordinator = Coordinator::new(
            tree,
            reservations,
            overrides,
            store,
            Arc::new(NullPublisher::default()),
            clock.clone(),
            PlatformDriverConfig::default(),
        );

        let driver = FakeDriverInterface::new(remote_id);
        driver.seed(point_id, serde_json::json!(1));
        let agent = Arc::new(DriverAgent::new(Arc::new(driver), clock, Default::default(), Default::default()));
        coordinator.register_driver_agent(remote_id, agent).await;
        coordinator
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_driver_agent() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        coordinator.set("devices/ahu1/temp", serde_json::json!(72), true, None).await.unwrap();

        let values = coordinator.get("devices/ahu1/*", "").await.unwrap();
        assert_eq!(values["devices/ahu1/temp"], serde_json::json!(72));
    }

    #[tokio::test]
    async fn set_blocked_by_active_override() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        coordinator.set_override("devices/ahu1/*", None, false, false).await;

        let result = coordinator.set("devices/ahu1/temp", serde_json::json!(99), false, None).await;
        assert!(matches!(result, Err(DomainError::Override { .. })));
    }

    #[tokio::test]
    async fn set_override_with_failsafe_revert_reverts_matched_points_immediately() {
        let point_id = "devices/ahu1/temp";
        let mut tree = EquipmentTree::new();
        tree.add_device(
            "devices/ahu1",
            Default::default(),
            "r1".to_string(),
            &[RegistryPoint { name: "temp".to_string(), config: Default::default(), enabled: true }],
        )
        .unwrap();
        let tree = Arc::new(RwLock::new(tree));

        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let reservations = Arc::new(ReservationManager::new(60.0, 60.0, clock.clone(), store.clone()));
        let overrides = Arc::new(OverrideManager::new(store.clone()));
        let coordinator = Coordinator::new(
            tree,
            reservations,
            overrides,
            store,
            Arc::new(NullPublisher::default()),
            clock.clone(),
            PlatformDriverConfig::default(),
        );

        let driver = Arc::new(FakeDriverInterface::new("r1"));
        driver.set_default(point_id, serde_json::json!(68));
        driver.seed(point_id, serde_json::json!(72));
        let agent = Arc::new(DriverAgent::new(driver.clone(), clock, Default::default(), Default::default()));
        coordinator.register_driver_agent("r1", agent).await;

        coordinator.set_override("devices/ahu1/*", None, true, false).await;

        let reading = driver.get_point(point_id).await.unwrap();
        assert_eq!(reading.value, serde_json::json!(68));
    }

    #[tokio::test]
    async fn apply_equipment_config_adds_new_points_to_the_right_scheduler() {
        use crate::domain::models::config::GroupConfig;
        use crate::services::equipment_tree::RegistryPoint as RP;

        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        let scheduler = Arc::new(PollScheduler::new(
            "default",
            GroupConfig::default(),
            Arc::new(RwLock::new(EquipmentTree::new())),
            Arc::new(Map::new()),
            Arc::new(NullPublisher::default()),
            Arc::new(PlatformDriverConfig::default()),
        ));
        coordinator.register_scheduler("default", scheduler.clone()).await;

        coordinator
            .apply_equipment_config(
                "devices/ahu2",
                Default::default(),
                "r1".to_string(),
                vec![RP { name: "fan".to_string(), config: Default::default(), enabled: true }],
            )
            .await
            .unwrap();

        scheduler.schedule().await;
        let topics = coordinator.list_topics("devices/ahu2", None, None).await;
        assert_eq!(topics, vec!["devices/ahu2/fan".to_string()]);
    }

    #[tokio::test]
    async fn remove_equipment_config_drops_the_node_and_its_schedule_entries() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        let removed = coordinator.remove_equipment_config("devices/ahu1").await;
        assert_eq!(removed, 1);
        assert!(coordinator.get("devices/ahu1/*", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_topics_falls_back_to_parent_for_unknown_node() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        let topics = coordinator.list_topics("devices/ahu1/missing", None, None).await;
        assert!(topics.contains(&"devices/ahu1/temp".to_string()));
    }

    #[tokio::test]
    async fn list_topics_filters_by_active_and_enabled() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        coordinator.stop("devices/ahu1/temp").await.unwrap();

        let active_only = coordinator.list_topics("devices/ahu1", Some(true), None).await;
        assert!(active_only.is_empty());

        let inactive_only = coordinator.list_topics("devices/ahu1", Some(false), None).await;
        assert_eq!(inactive_only, vec!["devices/ahu1/temp".to_string()]);

        let enabled_only = coordinator.list_topics("devices/ahu1", None, Some(true)).await;
        assert_eq!(enabled_only, vec!["devices/ahu1/temp".to_string()]);
    }

    #[tokio::test]
    async fn reservation_lock_blocks_writes_from_other_tasks() {
        let coordinator = coordinator_with_point("devices/ahu1/temp", "r1").await;
        let now = Utc::now();
        let requests = vec![DeviceRequest {
            device: "devices/ahu1/temp".to_string(),
            start: now - chrono::Duration::minutes(1),
            end: now + chrono::Duration::hours(1),
        }];
        coordinator.new_reservation("agent1", "task1", "HIGH", requests).await;
        coordinator.tick().await;

        let result = coordinator.set("devices/ahu1/temp", serde_json::json!(50), false, None).await;
        assert!(matches!(result, Err(DomainError::ReservationLock { .. })));

        let result = coordinator.set("devices/ahu1/temp", serde_json::json!(50), false, Some("task1")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn update_stored_registry_config_writes_back_the_points_declared_config() {
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let mut tree = EquipmentTree::new();
        let mut point_config = NodeConfig::default();
        point_config.polling_interval = Some(15.0);
        tree.add_device(
            "devices/ahu1",
            Default::default(),
            "r1".to_string(),
            &[RegistryPoint { name: "temp".to_string(), config: point_config, enabled: true }],
        )
        .unwrap();

        let clock = Arc::new(FakeClock::new(Utc::now()));
        let reservations = Arc::new(ReservationManager::new(60.0, 60.0, clock.clone(), store.clone()));
        let overrides = Arc::new(OverrideManager::new(store.clone()));
        let coordinator = Coordinator::new(
            Arc::new(RwLock::new(tree)),
            reservations,
            overrides,
            store.clone(),
            Arc::new(NullPublisher::default()),
            clock,
            PlatformDriverConfig::default(),
        );

        let record = DeviceRecord {
            path: "devices/ahu1".to_string(),
            dev_config: Default::default(),
            remote_id: "r1".to_string(),
            driver_type: "fake".to_string(),
            registry: vec![RegistryPointRecord { name: "temp".to_string(), config: Default::default(), enabled: true }],
        };
        store.set_device_config("ahu1", &serde_json::to_string(&record).unwrap()).await.unwrap();

        coordinator.update_stored_registry_config("devices/ahu1/temp").await.unwrap();

        let raw = store.get_device_config("ahu1").await.unwrap().unwrap();
        let stored: DeviceRecord = serde_json::from_str(&raw).unwrap();
        let entry = stored.registry.iter().find(|p| p.name == "temp").unwrap();
        assert_eq!(entry.config.polling_interval, Some(15.0));
    }
}
