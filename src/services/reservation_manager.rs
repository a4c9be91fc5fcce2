//! Reservation Manager: the `new_task`/`cancel_task` priority and
//! preemption arbitration pipeline (§4.D) plus the background loop that
//! advances task state and persists it across restarts.

use crate::domain::errors::DomainError;
use crate::domain::models::reservation::{DeviceRequest, Priority, ReservationOutcome, Task, TaskState};
use crate::domain::ports::{Clock, ConfigStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ReservationManager {
    tasks: RwLock<HashMap<String, Task>>,
    grace_time: Duration,
    publish_interval: f64,
    clock: Arc<dyn Clock>,
    config_store: Arc<dyn ConfigStore>,
}

impl ReservationManager {
    pub fn new(
        grace_time_secs: f64,
        publish_interval_secs: f64,
        clock: Arc<dyn Clock>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            grace_time: Duration::milliseconds((grace_time_secs * 1000.0).round() as i64),
            publish_interval: publish_interval_secs,
            clock,
            config_store,
        }
    }

    /// §4.D validation pipeline, in the exact order the outcome codes are
    /// pinned to: empty identifiers, then request shape, then priority,
    /// then task-id existence, then request parsing (time-range order and
    /// self-conflict), then external conflict.
    pub async fn new_task(
        &self,
        agent_id: &str,
        task_id: &str,
        priority_raw: &str,
        requests: Vec<DeviceRequest>,
    ) -> ReservationOutcome {
        if agent_id.trim().is_empty() {
            return ReservationOutcome::MalformedSenderEmpty;
        }
        if task_id.trim().is_empty() {
            return ReservationOutcome::MalformedTaskIdEmpty;
        }
        if requests.is_empty() {
            return ReservationOutcome::MalformedRequestEmpty;
        }
        let Some(priority) = Priority::parse(priority_raw) else {
            return ReservationOutcome::InvalidPriority;
        };

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(task_id) {
            return ReservationOutcome::TaskIdAlreadyExists;
        }

        if requests.iter().any(|r| r.start >= r.end) {
            return ReservationOutcome::MalformedTimeRangeInverted;
        }
        if Task::conflicts_with_self(&requests) {
            return ReservationOutcome::RequestConflictsWithSelf;
        }

        let mut candidate = Task::new(task_id, agent_id, priority);
        candidate.populate_reservation(&requests);

        let mut to_preempt = Vec::new();
        for (existing_id, existing) in tasks.iter() {
            if !existing.conflicts_with(&requests) {
                continue;
            }
            if !candidate.check_can_preempt_other(existing) {
                return ReservationOutcome::ConflictsWithExistingReservations;
            }
            to_preempt.push(existing_id.clone());
        }

        let now = self.clock.now();
        let mut any_preempted = false;
        for existing_id in &to_preempt {
            if let Some(existing) = tasks.get_mut(existing_id) {
                if existing.preempt(self.grace_time, now) {
                    any_preempted = true;
                }
            }
        }
        tasks.retain(|_, task| task.state != TaskState::Finished);

        tasks.insert(task_id.to_string(), candidate);
        drop(tasks);
        self.persist().await;

        if any_preempted {
            ReservationOutcome::TasksWerePreempted
        } else {
            ReservationOutcome::Success
        }
    }

    pub async fn cancel_task(&self, agent_id: &str, task_id: &str) -> ReservationOutcome {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get(task_id) else {
            return ReservationOutcome::TaskIdDoesNotExist;
        };
        if task.agent_id != agent_id {
            return ReservationOutcome::AgentIdTaskIdMismatch;
        }
        tasks.remove(task_id);
        drop(tasks);
        self.persist().await;
        ReservationOutcome::Success
    }

    /// §4.D write-locking protocol: writes to a device are refused while
    /// a `RUNNING` task other than `exempt_task_id` holds a slot on it at
    /// `now`, unless `allow_no_lock_write` is set by the caller.
    pub async fn raise_on_locks(&self, device_id: &str, exempt_task_id: Option<&str>) -> Result<(), DomainError> {
        let now = self.clock.now();
        let tasks = self.tasks.read().await;
        for (id, task) in tasks.iter() {
            if Some(id.as_str()) == exempt_task_id {
                continue;
            }
            if task.state != TaskState::Running {
                continue;
            }
            let Some(reservation) = task.devices.get(device_id) else {
                continue;
            };
            if reservation.time_slots.iter().any(|slot| slot.contains(now)) {
                return Err(DomainError::ReservationLock {
                    device: device_id.to_string(),
                    detail: format!("held by task {id}"),
                });
            }
        }
        Ok(())
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Earliest of any task's next start/end/grace-expiry, or the publish
    /// interval if no task has an upcoming event (§9 suspension-heavy
    /// scheduling).
    pub async fn next_wake(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tasks = self.tasks.read().await;
        let earliest = tasks.values().filter_map(|t| t.get_next_event_time(now)).min();
        let fallback = now + Duration::milliseconds((self.publish_interval * 1000.0).round() as i64);
        earliest.map_or(fallback, |t| t.min(fallback))
    }

    /// Advance every task's state machine against `now`, dropping tasks
    /// that have finished.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let mut tasks = self.tasks.write().await;
        for task in tasks.values_mut() {
            task.make_current(now);
        }
        tasks.retain(|_, task| task.state != TaskState::Finished);
        drop(tasks);
        self.persist().await;
    }

    async fn persist(&self) {
        let tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        let Ok(json) = serde_json::to_vec(&tasks) else { return };
        let encoded = STANDARD.encode(json);
        let _ = self.config_store.set_reservation_state(&encoded).await;
    }

    /// Restore tasks from `_reservation_state` on startup (§3 persisted
    /// state shapes).
    pub async fn load_state(&self) -> Result<(), DomainError> {
        let Some(encoded) = self.config_store.get_reservation_state().await? else {
            return Ok(());
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| DomainError::Configuration(format!("corrupt reservation state: {err}")))?;
        let tasks: Vec<Task> = serde_json::from_slice(&bytes)?;
        let mut guard = self.tasks.write().await;
        *guard = tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::fake::FakeClock;
    use crate::infrastructure::database::MemoryConfigStore;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn manager(now: DateTime<Utc>) -> ReservationManager {
        ReservationManager::new(60.0, 60.0, Arc::new(FakeClock::new(now)), Arc::new(MemoryConfigStore::new()))
    }

    #[tokio::test]
    async fn new_task_rejects_empty_agent_id() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let outcome = mgr.new_task("", "t1", "HIGH", vec![]).await;
        assert_eq!(outcome, ReservationOutcome::MalformedSenderEmpty);
    }

    #[tokio::test]
    async fn new_task_checks_request_emptiness_before_priority() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let outcome = mgr.new_task("a1", "t1", "NOT_A_PRIORITY", vec![]).await;
        assert_eq!(outcome, ReservationOutcome::MalformedRequestEmpty);
    }

    #[tokio::test]
    async fn new_task_checks_task_id_existence_before_self_conflict() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let start = dt(2022, 1, 1, 1);
        let end = dt(2022, 1, 1, 2);
        let first = vec![DeviceRequest { device: "d1".to_string(), start, end }];
        assert_eq!(mgr.new_task("a1", "t1", "HIGH", first).await, ReservationOutcome::Success);

        let self_conflicting = vec![
            DeviceRequest { device: "d2".to_string(), start, end },
            DeviceRequest { device: "d2".to_string(), start, end },
        ];
        let outcome = mgr.new_task("a2", "t1", "HIGH", self_conflicting).await;
        assert_eq!(outcome, ReservationOutcome::TaskIdAlreadyExists);
    }

    #[tokio::test]
    async fn new_task_rejects_inverted_time_range() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let requests =
            vec![DeviceRequest { device: "d1".to_string(), start: dt(2022, 1, 1, 2), end: dt(2022, 1, 1, 1) }];
        let outcome = mgr.new_task("a1", "t1", "HIGH", requests).await;
        assert_eq!(outcome, ReservationOutcome::MalformedTimeRangeInverted);
    }

    #[tokio::test]
    async fn new_task_rejects_self_conflicting_requests() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let start = dt(2022, 1, 1, 1);
        let end = dt(2022, 1, 1, 2);
        let requests = vec![
            DeviceRequest { device: "d1".to_string(), start, end },
            DeviceRequest { device: "d1".to_string(), start, end },
        ];
        let outcome = mgr.new_task("a1", "t1", "HIGH", requests).await;
        assert_eq!(outcome, ReservationOutcome::RequestConflictsWithSelf);
    }

    #[tokio::test]
    async fn new_task_preempts_lower_priority_pre_run_task() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let start = dt(2022, 1, 1, 1);
        let end = dt(2022, 1, 1, 2);
        let requests = vec![DeviceRequest { device: "d1".to_string(), start, end }];

        let outcome = mgr.new_task("a1", "low", "LOW", requests.clone()).await;
        assert_eq!(outcome, ReservationOutcome::Success);

        let outcome = mgr.new_task("a2", "high", "HIGH", requests).await;
        assert_eq!(outcome, ReservationOutcome::TasksWerePreempted);
        assert_eq!(mgr.list_tasks().await.len(), 2);
    }

    #[tokio::test]
    async fn new_task_conflicts_when_neither_can_preempt() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let start = dt(2022, 1, 1, 1);
        let end = dt(2022, 1, 1, 2);
        let requests = vec![DeviceRequest { device: "d1".to_string(), start, end }];

        assert_eq!(mgr.new_task("a1", "t1", "HIGH", requests.clone()).await, ReservationOutcome::Success);
        let outcome = mgr.new_task("a2", "t2", "HIGH", requests).await;
        assert_eq!(outcome, ReservationOutcome::ConflictsWithExistingReservations);
    }

    #[tokio::test]
    async fn cancel_task_checks_agent_ownership() {
        let mgr = manager(dt(2022, 1, 1, 0));
        let requests = vec![DeviceRequest { device: "d1".to_string(), start: dt(2022, 1, 1, 1), end: dt(2022, 1, 1, 2) }];
        mgr.new_task("a1", "t1", "HIGH", requests).await;

        assert_eq!(mgr.cancel_task("wrong-agent", "t1").await, ReservationOutcome::AgentIdTaskIdMismatch);
        assert_eq!(mgr.cancel_task("a1", "t1").await, ReservationOutcome::Success);
        assert_eq!(mgr.cancel_task("a1", "t1").await, ReservationOutcome::TaskIdDoesNotExist);
    }

    #[tokio::test]
    async fn reservation_state_round_trips_through_config_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let mgr = ReservationManager::new(60.0, 60.0, Arc::new(FakeClock::new(dt(2022, 1, 1, 0))), store.clone());
        let requests = vec![DeviceRequest { device: "d1".to_string(), start: dt(2022, 1, 1, 1), end: dt(2022, 1, 1, 2) }];
        mgr.new_task("a1", "t1", "HIGH", requests).await;

        let reloaded = ReservationManager::new(60.0, 60.0, Arc::new(FakeClock::new(dt(2022, 1, 1, 0))), store);
        reloaded.load_state().await.unwrap();
        assert_eq!(reloaded.list_tasks().await.len(), 1);
    }
}
