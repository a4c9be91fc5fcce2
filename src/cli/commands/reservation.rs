//! Reservation Manager command handlers (§4.D).

use crate::cli::display::{action_failure, action_success};
use crate::domain::models::DeviceRequest;
use crate::services::Coordinator;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

#[allow(clippy::too_many_arguments)]
pub async fn handle_new(
    coordinator: &Coordinator,
    agent_id: &str,
    task_id: &str,
    priority: &str,
    device: &str,
    start: &str,
    end: &str,
    json: bool,
) -> Result<()> {
    let start: DateTime<Utc> = start.parse().context("start must be RFC 3339")?;
    let end: DateTime<Utc> = end.parse().context("end must be RFC 3339")?;
    let requests = vec![DeviceRequest { device: device.to_string(), start, end }];

    let outcome = coordinator.new_reservation(agent_id, task_id, priority, requests).await;
    print_outcome(task_id, outcome, json);
    if outcome.success() {
        Ok(())
    } else {
        anyhow::bail!("reservation rejected: {}", outcome.info_string())
    }
}

pub async fn handle_cancel(coordinator: &Coordinator, agent_id: &str, task_id: &str, json: bool) -> Result<()> {
    let outcome = coordinator.cancel_reservation(agent_id, task_id).await;
    print_outcome(task_id, outcome, json);
    if outcome.success() {
        Ok(())
    } else {
        anyhow::bail!("cancel rejected: {}", outcome.info_string())
    }
}

fn print_outcome(task_id: &str, outcome: crate::domain::models::ReservationOutcome, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({"task_id": task_id, "success": outcome.success(), "detail": outcome.info_string()})
        );
        return;
    }
    if outcome.success() {
        let suffix = outcome.info_string();
        let message = if suffix.is_empty() {
            format!("task {task_id} accepted")
        } else {
            format!("task {task_id} accepted ({suffix})")
        };
        println!("{}", action_success(&message));
    } else {
        println!("{}", action_failure(&format!("task {task_id}: {}", outcome.info_string())));
    }
}
