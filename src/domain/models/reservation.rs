use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `HIGH > LOW_PREEMPT > LOW`, ordered so `Ord`/`PartialOrd` derive the
/// comparison directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    LowPreempt,
    High,
}

impl Priority {
    /// Case-insensitive parse against the wire vocabulary (`test_lowercase_priority`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "LOW" => Some(Self::Low),
            "LOW_PREEMPT" => Some(Self::LowPreempt),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
            Self::LowPreempt => "LOW_PREEMPT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    PreRun,
    Running,
    Preempted,
    Finished,
}

/// A half-open time interval `[start, end)`. Two slices conflict only if
/// they overlap on an open interval — touching at a boundary is not a
/// conflict (`test_schedule_overlap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlice {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlice {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSlice) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Per-device reservation: the ordered, non-overlapping time slots one
/// Task holds on one device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reservation {
    pub time_slots: Vec<TimeSlice>,
}

impl Reservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot, keeping `time_slots` sorted by start time. Does not
    /// itself check for overlap against existing slots — callers run the
    /// conflict search first.
    pub fn reserve_slot(&mut self, slot: TimeSlice) {
        let idx = self
            .time_slots
            .partition_point(|existing| existing.start < slot.start);
        self.time_slots.insert(idx, slot);
    }

    pub fn overlaps_any(&self, slot: &TimeSlice) -> bool {
        self.time_slots.iter().any(|existing| existing.overlaps(slot))
    }

    /// True once every slot has ended by `now`.
    pub fn finished(&self, now: DateTime<Utc>) -> bool {
        self.time_slots.iter().all(|slot| slot.end <= now)
    }

    /// Earliest of each slot's start/end that is still ahead of `now`.
    pub fn get_next_event_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.time_slots
            .iter()
            .flat_map(|slot| [slot.start, slot.end])
            .filter(|t| *t > now)
            .min()
    }

    /// Truncate every slot to end no later than `cutoff`, dropping slots
    /// that would become empty or inverted.
    fn truncate_to(&mut self, cutoff: DateTime<Utc>) {
        self.time_slots.retain_mut(|slot| {
            if slot.start >= cutoff {
                return false;
            }
            if slot.end > cutoff {
                slot.end = cutoff;
            }
            true
        });
    }
}

/// One request line in a `new_task` call: `[device, start, end]`.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub device: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A reservation holder: an agent's claim to a set of device time slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent_id: String,
    pub priority: Priority,
    pub state: TaskState,
    pub time_slice: Option<TimeSlice>,
    pub devices: HashMap<String, Reservation>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            priority,
            state: TaskState::PreRun,
            time_slice: None,
            devices: HashMap::new(),
        }
    }

    /// Populate `devices`/`time_slice` from a validated, non-self-conflicting
    /// set of requests.
    pub fn populate_reservation(&mut self, requests: &[DeviceRequest]) {
        let mut overall_start: Option<DateTime<Utc>> = None;
        let mut overall_end: Option<DateTime<Utc>> = None;
        for request in requests {
            let slice = TimeSlice::new(request.start, request.end);
            self.devices
                .entry(request.device.clone())
                .or_default()
                .reserve_slot(slice);
            overall_start = Some(overall_start.map_or(request.start, |s| s.min(request.start)));
            overall_end = Some(overall_end.map_or(request.end, |e| e.max(request.end)));
        }
        if let (Some(start), Some(end)) = (overall_start, overall_end) {
            self.time_slice = Some(TimeSlice::new(start, end));
        }
    }

    /// `N` overlaps itself if two of its own requested slots intersect on
    /// the same device — checked before any external conflict search.
    pub fn conflicts_with_self(requests: &[DeviceRequest]) -> bool {
        for (i, a) in requests.iter().enumerate() {
            for b in &requests[i + 1..] {
                if a.device != b.device {
                    continue;
                }
                let slice_a = TimeSlice::new(a.start, a.end);
                let slice_b = TimeSlice::new(b.start, b.end);
                if slice_a.overlaps(&slice_b) {
                    return true;
                }
            }
        }
        false
    }

    pub fn conflicts_with(&self, requests: &[DeviceRequest]) -> bool {
        requests.iter().any(|request| {
            self.devices.get(&request.device).is_some_and(|reservation| {
                reservation.overlaps_any(&TimeSlice::new(request.start, request.end))
            })
        })
    }

    /// §4.D preemption eligibility: a higher-priority task may preempt a
    /// `RUNNING` task only if that task is `LOW_PREEMPT`; `PRE_RUN` and
    /// `FINISHED` tasks of lower priority are always displaced.
    pub fn check_can_preempt_other(&self, other: &Task) -> bool {
        if self.priority <= other.priority {
            return false;
        }
        match other.state {
            TaskState::PreRun | TaskState::Finished => true,
            TaskState::Running => other.priority == Priority::LowPreempt,
            TaskState::Preempted => true,
        }
    }

    /// Shorten the task to `[now, now + grace_time]` and mark it
    /// `PREEMPTED`. Returns `false` (and transitions to `FINISHED`
    /// instead) if no reservation slot survives the shortening, or if the
    /// task was already `FINISHED`. A task already `PREEMPTED` is a no-op
    /// success.
    pub fn preempt(&mut self, grace_time: Duration, now: DateTime<Utc>) -> bool {
        if self.state == TaskState::Preempted {
            return true;
        }
        if self.state == TaskState::Finished {
            return false;
        }
        let cutoff = now + grace_time;
        for reservation in self.devices.values_mut() {
            reservation.truncate_to(cutoff);
        }
        self.devices.retain(|_, reservation| !reservation.time_slots.is_empty());
        if self.devices.is_empty() {
            self.state = TaskState::Finished;
            self.time_slice = None;
            return false;
        }
        self.state = TaskState::Preempted;
        self.time_slice = Some(TimeSlice::new(now, cutoff));
        true
    }

    /// Advance `PRE_RUN -> RUNNING -> FINISHED` against `now`, dropping
    /// device reservations that have finished and clearing the task
    /// entirely once it is finished.
    pub fn make_current(&mut self, now: DateTime<Utc>) {
        if self.state == TaskState::Finished {
            self.devices.clear();
            return;
        }

        self.devices.retain(|_, reservation| !reservation.finished(now));
        if self.devices.is_empty() {
            self.state = TaskState::Finished;
            return;
        }

        if let Some(time_slice) = self.time_slice {
            if now < time_slice.start {
                self.state = TaskState::PreRun;
            } else if now >= time_slice.end {
                self.state = TaskState::Finished;
                self.devices.clear();
            } else {
                self.state = TaskState::Running;
            }
        }
    }

    pub fn get_next_event_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.devices
            .values()
            .filter_map(|reservation| reservation.get_next_event_time(now))
            .min()
    }
}

/// Exact wire vocabulary for `new_task`/`cancel_task` replies, pinned by
/// the original reservation test suite. External agents depend on these
/// strings; they are not free to restate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Success,
    TasksWerePreempted,
    MalformedSenderEmpty,
    MalformedTaskIdEmpty,
    MalformedTaskIdNotString,
    MalformedRequestEmpty,
    MalformedTimeRangeInverted,
    InvalidPriority,
    TaskIdAlreadyExists,
    RequestConflictsWithSelf,
    ConflictsWithExistingReservations,
    TaskIdDoesNotExist,
    AgentIdTaskIdMismatch,
}

impl ReservationOutcome {
    pub fn success(self) -> bool {
        matches!(self, Self::Success | Self::TasksWerePreempted)
    }

    pub fn info_string(self) -> String {
        match self {
            Self::Success => String::new(),
            Self::TasksWerePreempted => "TASKS_WERE_PREEMPTED".to_string(),
            Self::MalformedSenderEmpty => {
                "MALFORMED_REQUEST: TypeError: agent_id must be a nonempty string".to_string()
            }
            Self::MalformedTaskIdEmpty | Self::MalformedTaskIdNotString => {
                "MALFORMED_REQUEST: TypeError: taskid must be a nonempty string".to_string()
            }
            Self::MalformedRequestEmpty => "MALFORMED_REQUEST_EMPTY".to_string(),
            Self::MalformedTimeRangeInverted => {
                "MALFORMED_REQUEST: TypeError: start must be before end".to_string()
            }
            Self::InvalidPriority => "INVALID_PRIORITY".to_string(),
            Self::TaskIdAlreadyExists => "TASK_ID_ALREADY_EXISTS".to_string(),
            Self::RequestConflictsWithSelf => "REQUEST_CONFLICTS_WITH_SELF".to_string(),
            Self::ConflictsWithExistingReservations => {
                "CONFLICTS_WITH_EXISTING_RESERVATIONS".to_string()
            }
            Self::TaskIdDoesNotExist => "TASK_ID_DOES_NOT_EXIST".to_string(),
            Self::AgentIdTaskIdMismatch => "AGENT_ID_TASK_ID_MISMATCH".to_string(),
        }
    }
}
