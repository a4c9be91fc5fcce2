//! StaticCyclic poll scheduler: one instance per scheduling group, each
//! running a single sleeping task that wakes for its own slots rather
//! than busy-polling (§4.C, §9 scheduler-suspension preference).

use crate::domain::models::config::GroupConfig;
use crate::domain::models::poll_set::{cycle_length_from_intervals, PollMember, PollSet, SlotPlan};
use crate::domain::ports::Publisher;
use crate::services::driver_agent::DriverAgent;
use crate::services::equipment_tree::EquipmentTree;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, RwLock, Semaphore};

/// Points awaiting their next tick when the group's task falls more than
/// one cycle behind get dropped rather than queued (§5 overrun policy).
const MAX_QUEUED_CYCLES: u32 = 2;

pub struct PollScheduler {
    group: String,
    config: GroupConfig,
    poll_set: RwLock<PollSet>,
    plan: RwLock<SlotPlan>,
    tree: Arc<RwLock<EquipmentTree>>,
    agents: Arc<HashMap<String, Arc<DriverAgent>>>,
    publisher: Arc<dyn Publisher>,
    driver_config: Arc<crate::domain::models::config::PlatformDriverConfig>,
    max_open_sockets: usize,
    running: AtomicBool,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(
        group: impl Into<String>,
        config: GroupConfig,
        tree: Arc<RwLock<EquipmentTree>>,
        agents: Arc<HashMap<String, Arc<DriverAgent>>>,
        publisher: Arc<dyn Publisher>,
        driver_config: Arc<crate::domain::models::config::PlatformDriverConfig>,
    ) -> Self {
        let group = group.into();
        let max_open_sockets = driver_config.max_open_sockets.unwrap_or(8);
        Self {
            poll_set: RwLock::new(PollSet::new(group.clone())),
            plan: RwLock::new(SlotPlan::empty()),
            group,
            config,
            tree,
            agents,
            publisher,
            driver_config,
            max_open_sockets,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Full rebuild: recompute the plan's cycle length from every member
    /// currently in the group (§4.C). Always safe to call; the only cost
    /// is that in-flight timing resets to the new cycle's offset zero.
    pub async fn schedule(&self) {
        let poll_set = self.poll_set.read().await;
        let intervals: Vec<f64> = poll_set.members.iter().map(|m| m.interval_secs).collect();
        let cycle_length = cycle_length_from_intervals(&intervals, self.config.minimum_polling_interval);
        let plan = SlotPlan::compute(&poll_set.members, self.config.minimum_polling_interval, cycle_length);
        *self.plan.write().await = plan;
    }

    /// Add one point to the group without a full rebuild, when doing so
    /// is "scheduling-neutral": another member already shares this exact
    /// interval, so the cycle length and existing slot offsets are
    /// unaffected (§4.C). Returns `false` if a full `schedule()` is
    /// required instead. When the change isn't neutral, the rebuild is
    /// only performed automatically if `allow_reschedule` is set on the
    /// driver config; otherwise the point is added to the poll set but
    /// the caller must invoke `schedule()` explicitly for it to take
    /// effect (§4.C).
    pub async fn add_to_schedule(&self, member: PollMember) -> bool {
        let mut poll_set = self.poll_set.write().await;
        let neutral = poll_set.members.iter().any(|m| interval_eq(m.interval_secs, member.interval_secs));
        poll_set.add(member);
        if !neutral {
            return false;
        }
        if !self.driver_config.allow_reschedule {
            return false;
        }
        let cycle_length = self.plan.read().await.cycle_length_secs;
        let plan = SlotPlan::compute(&poll_set.members, self.config.minimum_polling_interval, cycle_length);
        drop(poll_set);
        *self.plan.write().await = plan;
        true
    }

    /// Remove one point from the group without a full rebuild, neutral
    /// when another member at the same interval remains so the cycle
    /// length stays valid (§4.C). Subject to the same `allow_reschedule`
    /// gate as `add_to_schedule`.
    pub async fn remove_from_schedule(&self, point_id: &str) -> bool {
        let mut poll_set = self.poll_set.write().await;
        let Some(removed) = poll_set.members.iter().find(|m| m.point_id == point_id).cloned() else {
            return true;
        };
        poll_set.remove(point_id);
        let neutral = poll_set.members.iter().any(|m| interval_eq(m.interval_secs, removed.interval_secs));
        if !neutral {
            return false;
        }
        if !self.driver_config.allow_reschedule {
            return false;
        }
        let cycle_length = self.plan.read().await.cycle_length_secs;
        let plan = SlotPlan::compute(&poll_set.members, self.config.minimum_polling_interval, cycle_length);
        drop(poll_set);
        *self.plan.write().await = plan;
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the group's single sleeping task. Re-reads the plan every
    /// cycle so `schedule()` changes made mid-cycle take effect on the
    /// next lap without restarting the task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        *self.handle.try_lock().expect("start called from a single owner") = Some(handle);
    }

    /// Stop the task, allowing any slot firings already spawned to
    /// complete in the background rather than aborting them (§5 bounded
    /// teardown).
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = tokio::time::timeout(StdDuration::from_secs(5), handle).await;
        }
    }

    async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.max_open_sockets.max(1)));
        let start_offset = StdDuration::from_secs_f64(self.config.start_offset.max(0.0));
        tokio::time::sleep(start_offset).await;

        let mut cycle_start = tokio::time::Instant::now();
        let mut next_slot_idx = 0usize;
        let mut behind_cycles: u32 = 0;

        while self.running.load(Ordering::SeqCst) {
            let plan = self.plan.read().await.clone();
            if plan.slots.is_empty() {
                tokio::time::sleep(StdDuration::from_millis(200)).await;
                continue;
            }
            if next_slot_idx >= plan.slots.len() {
                next_slot_idx = 0;
                cycle_start += StdDuration::from_secs_f64(plan.cycle_length_secs);
                let now = tokio::time::Instant::now();
                if now > cycle_start {
                    behind_cycles += 1;
                    if behind_cycles > MAX_QUEUED_CYCLES {
                        cycle_start = now;
                        behind_cycles = 0;
                    }
                    continue;
                }
                behind_cycles = 0;
            }

            let slot = &plan.slots[next_slot_idx];
            let target = cycle_start + StdDuration::from_secs_f64(slot.offset_secs);
            let now = tokio::time::Instant::now();
            if target > now {
                tokio::time::sleep(target - now).await;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for entry in &slot.entries {
                let Some(agent) = self.agents.get(&entry.remote_id).cloned() else {
                    continue;
                };
                let permit = semaphore.clone().acquire_owned().await;
                let Ok(permit) = permit else { continue };
                let tree = self.tree.clone();
                let publisher = self.publisher.clone();
                let driver_config = self.driver_config.clone();
                let point_ids = entry.point_ids.clone();
                tokio::spawn(async move {
                    agent.poll(&tree, &point_ids, publisher.as_ref(), &driver_config).await;
                    drop(permit);
                });
            }

            next_slot_idx += 1;
        }
    }
}

fn interval_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::fake::FakeClock;
    use crate::infrastructure::drivers::fake::FakeDriverInterface;
    use chrono::Utc;

    struct NullPublisher;

    #[async_trait::async_trait]
    impl Publisher for NullPublisher {
        async fn publish_point(&self, _topic: &str, _value: &crate::domain::models::PointValue) -> Result<(), crate::domain::errors::DomainError> {
            Ok(())
        }
        async fn publish_depth_first(
            &self,
            _topic: &str,
            _values: &HashMap<String, crate::domain::models::PointValue>,
        ) -> Result<(), crate::domain::errors::DomainError> {
            Ok(())
        }
        async fn publish_error(&self, _topic: &str, _error: &crate::domain::models::ErrorInfo) -> Result<(), crate::domain::errors::DomainError> {
            Ok(())
        }
    }

    fn scheduler() -> Arc<PollScheduler> {
        let driver = FakeDriverInterface::new("r1");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let agent = Arc::new(DriverAgent::new(
            Arc::new(driver),
            clock,
            Default::default(),
            Default::default(),
        ));
        let mut agents = HashMap::new();
        agents.insert("r1".to_string(), agent);
        Arc::new(PollScheduler::new(
            "default",
            GroupConfig::default(),
            Arc::new(RwLock::new(EquipmentTree::new())),
            Arc::new(agents),
            Arc::new(NullPublisher),
            Arc::new(crate::domain::models::config::PlatformDriverConfig::default()),
        ))
    }

    #[tokio::test]
    async fn schedule_builds_a_plan_from_added_members() {
        let scheduler = scheduler();
        scheduler
            .add_to_schedule(PollMember { point_id: "d1/p1".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        // First member of its interval: add_to_schedule is never neutral
        // by itself, so a full rebuild is required.
        scheduler.schedule().await;
        let plan = scheduler.plan.read().await;
        assert!(!plan.slots.is_empty());
    }

    #[tokio::test]
    async fn add_to_schedule_is_neutral_when_interval_already_present() {
        let scheduler = scheduler();
        scheduler
            .add_to_schedule(PollMember { point_id: "d1/p1".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        scheduler.schedule().await;

        let neutral = scheduler
            .add_to_schedule(PollMember { point_id: "d1/p2".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        assert!(neutral);
        let poll_set = scheduler.poll_set.read().await;
        assert_eq!(poll_set.members.len(), 2);
    }

    #[tokio::test]
    async fn add_to_schedule_skips_the_neutral_fast_path_when_reschedule_is_disallowed() {
        let driver = FakeDriverInterface::new("r1");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let agent = Arc::new(DriverAgent::new(Arc::new(driver), clock, Default::default(), Default::default()));
        let mut agents = HashMap::new();
        agents.insert("r1".to_string(), agent);
        let mut driver_config = crate::domain::models::config::PlatformDriverConfig::default();
        driver_config.allow_reschedule = false;
        let scheduler = Arc::new(PollScheduler::new(
            "default",
            GroupConfig::default(),
            Arc::new(RwLock::new(EquipmentTree::new())),
            Arc::new(agents),
            Arc::new(NullPublisher),
            Arc::new(driver_config),
        ));

        scheduler
            .add_to_schedule(PollMember { point_id: "d1/p1".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        scheduler.schedule().await;

        let neutral = scheduler
            .add_to_schedule(PollMember { point_id: "d1/p2".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        assert!(!neutral);
        let poll_set = scheduler.poll_set.read().await;
        assert_eq!(poll_set.members.len(), 2);
        drop(poll_set);

        let plan = scheduler.plan.read().await;
        assert!(!plan.slots.iter().any(|s| s.entries.iter().any(|e| e.point_ids.contains(&"d1/p2".to_string()))));
    }

    #[tokio::test]
    async fn remove_from_schedule_requires_rebuild_when_interval_becomes_unique() {
        let scheduler = scheduler();
        scheduler
            .add_to_schedule(PollMember { point_id: "d1/p1".to_string(), remote_id: "r1".to_string(), interval_secs: 1.0 })
            .await;
        scheduler.schedule().await;

        let neutral = scheduler.remove_from_schedule("d1/p1").await;
        assert!(!neutral);
    }
}
