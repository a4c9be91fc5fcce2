//! `serve`: run every poll scheduler and the reservation/override tick
//! loop until interrupted (§4.F daemon mode).

use crate::cli::bootstrap::{self, Runtime};
use crate::domain::models::config::AppConfig;
use anyhow::Result;
use tracing::{info, warn};

/// How often `serve` polls the configuration store for equipment-config
/// changes (§4.F). The store has no push/subscribe primitive, so this
/// trades a little latency on config changes for not needing a watcher.
const CONFIG_RECONCILE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

pub async fn handle_serve(config: &AppConfig) -> Result<()> {
    let Runtime { coordinator, schedulers } = bootstrap::build(config).await?;

    for scheduler in &schedulers {
        scheduler.start();
    }
    info!(groups = schedulers.len(), "poll schedulers started");

    let tick_coordinator = coordinator.clone();
    let tick_task = tokio::spawn(async move {
        loop {
            let now = chrono::Utc::now();
            let wake = tick_coordinator.next_wake().await;
            let sleep_for = (wake - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
            tokio::time::sleep(sleep_for.min(std::time::Duration::from_secs(60))).await;
            tick_coordinator.tick().await;
        }
    });

    let reconcile_coordinator = coordinator.clone();
    let reconcile_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONFIG_RECONCILE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = reconcile_coordinator.reconcile_equipment_config().await {
                warn!(%err, "equipment config reconcile failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping schedulers");
    tick_task.abort();
    reconcile_task.abort();
    for scheduler in &schedulers {
        scheduler.stop().await;
    }
    Ok(())
}
