use std::collections::BTreeMap;

/// One point's contribution to a scheduling group: the interval it polls
/// at and the remote that serves it.
#[derive(Debug, Clone, PartialEq)]
pub struct PollMember {
    pub point_id: String,
    pub remote_id: String,
    pub interval_secs: f64,
}

/// The points and devices belonging to one named scheduling group,
/// before a plan is computed from them.
#[derive(Debug, Clone, Default)]
pub struct PollSet {
    pub group: String,
    pub members: Vec<PollMember>,
}

impl PollSet {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            members: Vec::new(),
        }
    }

    pub fn add(&mut self, member: PollMember) {
        self.members.push(member);
    }

    pub fn remove(&mut self, point_id: &str) {
        self.members.retain(|m| m.point_id != point_id);
    }
}

/// One bucket of points to read together, for one remote, at one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub remote_id: String,
    /// Lexicographically ordered for deterministic batched reads.
    pub point_ids: Vec<String>,
}

/// One `(slot_time, [entries])` tick in a `SlotPlan`'s static cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Seconds since `start_offset` at which this slot fires.
    pub offset_secs: f64,
    pub entries: Vec<SlotEntry>,
}

/// The static cyclic plan computed for one group: a cycle length (the
/// LCM of member intervals, bounded below by the group minimum) and the
/// ordered slots within it.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPlan {
    pub cycle_length_secs: f64,
    pub slots: Vec<Slot>,
}

impl SlotPlan {
    pub fn empty() -> Self {
        Self {
            cycle_length_secs: 0.0,
            slots: Vec::new(),
        }
    }

    /// Build the plan: for each multiple `k` of `minimum_interval` within
    /// one cycle, collect members whose interval divides `k ·
    /// minimum_interval`, then coalesce by remote with points sorted
    /// lexicographically.
    pub fn compute(members: &[PollMember], minimum_interval: f64, cycle_length_secs: f64) -> Self {
        if minimum_interval <= 0.0 || cycle_length_secs <= 0.0 {
            return Self::empty();
        }

        let ticks = (cycle_length_secs / minimum_interval).round() as u64;
        let mut slots = Vec::new();

        for k in 0..ticks.max(1) {
            let offset = k as f64 * minimum_interval;
            let mut by_remote: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for member in members {
                if member.interval_secs <= 0.0 {
                    continue;
                }
                let ratio = member.interval_secs / minimum_interval;
                let steps = ratio.round() as u64;
                if steps == 0 || k % steps != 0 {
                    continue;
                }
                by_remote
                    .entry(member.remote_id.as_str())
                    .or_default()
                    .push(member.point_id.as_str());
            }
            if by_remote.is_empty() {
                continue;
            }
            let mut entries: Vec<SlotEntry> = by_remote
                .into_iter()
                .map(|(remote_id, mut points)| {
                    points.sort_unstable();
                    SlotEntry {
                        remote_id: remote_id.to_string(),
                        point_ids: points.into_iter().map(str::to_string).collect(),
                    }
                })
                .collect();
            entries.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
            slots.push(Slot {
                offset_secs: offset,
                entries,
            });
        }

        Self {
            cycle_length_secs,
            slots,
        }
    }
}

/// Least common multiple of a group's polling intervals, in integer
/// milliseconds to avoid floating-point LCM drift, converted back to
/// seconds for the plan.
pub fn cycle_length_from_intervals(intervals: &[f64], minimum_interval: f64) -> f64 {
    if intervals.is_empty() {
        return minimum_interval.max(f64::EPSILON);
    }
    let to_millis = |secs: f64| (secs * 1000.0).round() as u64;
    let gcd = |a: u64, b: u64| -> u64 {
        let (mut a, mut b) = (a, b);
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    };
    let lcm = |a: u64, b: u64| -> u64 {
        if a == 0 || b == 0 {
            0
        } else {
            a / gcd(a, b) * b
        }
    };
    let mut acc = to_millis(minimum_interval).max(1);
    for interval in intervals {
        acc = lcm(acc, to_millis(*interval).max(1));
    }
    acc as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_length_is_lcm_of_intervals() {
        let intervals = [1.0, 2.0, 5.0];
        let cycle = cycle_length_from_intervals(&intervals, 1.0);
        assert_eq!(cycle, 10.0);
    }

    #[test]
    fn plan_coalesces_points_sharing_remote_and_slot() {
        let members = vec![
            PollMember {
                point_id: "device1/b".to_string(),
                remote_id: "remoteA".to_string(),
                interval_secs: 1.0,
            },
            PollMember {
                point_id: "device1/a".to_string(),
                remote_id: "remoteA".to_string(),
                interval_secs: 1.0,
            },
            PollMember {
                point_id: "device2/c".to_string(),
                remote_id: "remoteB".to_string(),
                interval_secs: 2.0,
            },
        ];
        let plan = SlotPlan::compute(&members, 1.0, 2.0);
        assert_eq!(plan.slots.len(), 2);
        let first_slot_remote_a = &plan.slots[0].entries[0];
        assert_eq!(first_slot_remote_a.remote_id, "remoteA");
        assert_eq!(first_slot_remote_a.point_ids, vec!["device1/a", "device1/b"]);
        assert_eq!(plan.slots[1].entries.len(), 2);
    }
}
