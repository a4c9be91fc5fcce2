//! Process-level wiring shared by `serve` and every one-shot RPC
//! subcommand: load configuration, open the config store, rebuild the
//! Equipment Tree from persisted device records, register a `DriverAgent`
//! per remote, and assemble the `Coordinator`.
//!
//! Concrete wire-protocol interfaces are out of scope (§1 Non-goals), so
//! every device record's `driver_type` is expected to resolve against the
//! `fake` entry registered here — a real deployment would register its
//! own `DriverRegistry` factories before calling [`build`].

use crate::domain::models::config::AppConfig;
use crate::domain::models::{DeviceRecord, PlatformDriverConfig};
use crate::domain::ports::ConfigStore;
use crate::infrastructure::database::{DatabaseConnection, SqliteConfigStore};
use crate::infrastructure::drivers::fake::FakeDriverInterface;
use crate::infrastructure::drivers::DriverRegistry;
use crate::infrastructure::{SystemClock, TracingPublisher};
use crate::services::driver_agent::DriverAgent;
use crate::services::equipment_tree::{EquipmentTree, RegistryPoint};
use crate::services::poll_scheduler::PollScheduler;
use crate::services::{Coordinator, OverrideManager, ReservationManager};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a running process needs: the assembled `Coordinator` plus
/// the per-group schedulers `serve` starts (one-shot commands never start
/// them, so schedulers stay idle and are simply dropped).
pub struct Runtime {
    pub coordinator: Arc<Coordinator>,
    pub schedulers: Vec<Arc<PollScheduler>>,
}

/// Assemble a `Runtime` from a loaded `AppConfig`. Safe to call
/// repeatedly — each call opens its own pool against the same on-disk
/// database file and rebuilds the same state from it.
pub async fn build(config: &AppConfig) -> Result<Runtime> {
    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::new(&database_url)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run database migrations")?;

    let store: Arc<dyn ConfigStore> = Arc::new(SqliteConfigStore::new(db.pool().clone()));

    let mut registry = DriverRegistry::new();
    registry.register(
        "fake",
        Box::new(|remote_id| Arc::new(FakeDriverInterface::new(remote_id))),
    );

    let mut tree = EquipmentTree::new();
    let mut remotes: HashMap<String, String> = HashMap::new();
    let mut known_device_configs: Vec<(String, String)> = Vec::new();
    for device_id in store.list_device_ids().await? {
        let Some(raw) = store.get_device_config(&device_id).await? else {
            continue;
        };
        let record: DeviceRecord = serde_json::from_str(&raw)
            .with_context(|| format!("malformed equipment_config row for device {device_id}"))?;
        let points: Vec<RegistryPoint> = record
            .registry
            .clone()
            .into_iter()
            .map(|p| RegistryPoint { name: p.name, config: p.config, enabled: p.enabled })
            .collect();
        tree.add_device(&record.path, record.dev_config.clone(), record.remote_id.clone(), &points)?;
        remotes.insert(record.remote_id.clone(), record.driver_type.clone());
        known_device_configs.push((device_id, raw));
    }

    let mut driver_config: PlatformDriverConfig = config.driver.clone();
    driver_config.ensure_default_group();

    let clock = Arc::new(SystemClock);
    let mut agents: HashMap<String, Arc<DriverAgent>> = HashMap::new();
    for (remote_id, driver_type) in &remotes {
        let interface = registry.build(driver_type, remote_id).ok_or_else(|| {
            anyhow::anyhow!("no driver registered for driver_type '{driver_type}' (remote {remote_id})")
        })?;
        let agent = Arc::new(DriverAgent::with_rate_limit(
            interface,
            clock.clone(),
            config.retry,
            config.circuit_breaker,
            config.rate_limit,
        ));
        agents.insert(remote_id.clone(), agent);
    }
    let agents = Arc::new(agents);

    let tree = Arc::new(RwLock::new(tree));
    let reservations = Arc::new(ReservationManager::new(
        driver_config.reservation_preempt_grace_time,
        driver_config.reservation_publish_interval,
        clock.clone(),
        store.clone(),
    ));
    let overrides = Arc::new(OverrideManager::new(store.clone()));
    let publisher = Arc::new(TracingPublisher);

    let coordinator = Arc::new(Coordinator::new(
        tree.clone(),
        reservations,
        overrides,
        store,
        publisher.clone(),
        clock,
        driver_config.clone(),
    ));
    for (remote_id, agent) in agents.iter() {
        coordinator.register_driver_agent(remote_id.clone(), agent.clone()).await;
    }
    coordinator.load_state().await?;
    for (device_id, raw) in known_device_configs {
        coordinator.seed_device_config(device_id, raw).await;
    }

    let driver_config = Arc::new(driver_config);
    let mut schedulers = Vec::new();
    for (group_name, group_config) in &driver_config.groups {
        let scheduler = Arc::new(PollScheduler::new(
            group_name.clone(),
            group_config.clone(),
            tree.clone(),
            agents.clone(),
            publisher.clone(),
            driver_config.clone(),
        ));
        coordinator.register_scheduler(group_name.clone(), scheduler.clone()).await;
        schedulers.push(scheduler);
    }

    populate_schedules(&tree, &schedulers, &driver_config).await?;

    Ok(Runtime { coordinator, schedulers })
}

/// Seed each scheduler's poll set from the points currently in the tree,
/// then run a full `schedule()` so every group has a plan before `serve`
/// starts dispatching.
async fn populate_schedules(
    tree: &Arc<RwLock<EquipmentTree>>,
    schedulers: &[Arc<PollScheduler>],
    driver_config: &PlatformDriverConfig,
) -> Result<()> {
    use crate::domain::models::poll_set::PollMember;

    let tree = tree.read().await;
    let by_group: HashMap<&str, &Arc<PollScheduler>> =
        schedulers.iter().map(|s| (s.group(), s)).collect();
    for node in tree.find_points("**", "")? {
        let group = node.effective_config.group.as_deref().unwrap_or("default");
        let Some(scheduler) = by_group.get(group) else {
            continue;
        };
        let remote_id = tree.get_remote(&node.identifier)?.to_string();
        let interval = node
            .effective_config
            .polling_interval
            .unwrap_or(driver_config.default_polling_interval);
        scheduler
            .add_to_schedule(PollMember { point_id: node.identifier.clone(), remote_id, interval_secs: interval })
            .await;
    }
    drop(tree);
    for scheduler in schedulers {
        scheduler.schedule().await;
    }
    Ok(())
}
